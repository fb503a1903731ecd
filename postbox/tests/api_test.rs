mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use common::Harness;
use postbox::auth::{JwtConfig, TriggerSecrets, BYPASS_HEADER, MANUAL_TRIGGER_HEADER};
use postbox::models::{CampaignKind, JobStatus};
use postbox::queue::Drain;
use postbox::routes;
use postbox::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;

const CRON_SECRET: &str = "cron-secret-value";
const BYPASS_SECRET: &str = "bypass-secret-value";

struct App {
    h: Harness,
    router: Router,
    _drain: Drain,
}

fn app(production: bool) -> App {
    let h = Harness::new(10);
    let (drain, handle) = Drain::new(h.processor.clone(), 10);
    let state = AppState {
        campaigns: Arc::new(h.store.clone()),
        users: Arc::new(h.store.clone()),
        processor: h.processor.clone(),
        drain: handle,
        jwt: JwtConfig::new("an-hmac-key-for-tests-that-is-long-enough")
            .unwrap()
            .build(),
        key: h.key.clone(),
        secrets: TriggerSecrets {
            cron_secret: Some(CRON_SECRET.into()),
            bypass_secret: Some(BYPASS_SECRET.into()),
            production,
        },
    };
    App {
        router: routes::router(state),
        h,
        _drain: drain,
    }
}

async fn send(app: &App, req: Request<Body>) -> Response {
    app.router.clone().oneshot(req).await.unwrap()
}

async fn body_json(res: Response) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn process() -> axum::http::request::Builder {
    Request::builder().uri("/api/cron/process")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn register(app: &App, email: &str) -> String {
    let res = send(
        app,
        post_json(
            "/api/auth/register",
            json!({ "email": email, "password": "correct-horse" }),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    body_json(res).await["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn production_rejects_anonymous_triggers() {
    let app = app(true);
    let res = send(&app, process().body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = send(
        &app,
        process()
            .header(header::AUTHORIZATION, "Bearer not-the-secret")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cron_secret_runs_a_batch() {
    let app = app(true);
    let jobs = app.h.campaign(CampaignKind::Scheduled, 2).await;

    let res = send(
        &app,
        process()
            .method(Method::POST)
            .header(header::AUTHORIZATION, format!("Bearer {CRON_SECRET}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(res).await;
    assert_eq!(body["processed"], 2);
    assert_eq!(body["batchSize"], 10);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    assert_eq!(app.h.job(jobs[0].id).await.status, JobStatus::Sent);
}

#[tokio::test]
async fn bypass_header_is_accepted() {
    let app = app(true);
    let res = send(
        &app,
        process()
            .header(BYPASS_HEADER, BYPASS_SECRET)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn development_allows_anonymous_idle_runs() {
    let app = app(false);
    let res = send(&app, process().body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        body_json(res).await,
        json!({
            "processed": 0,
            "message": "No emails due for sending",
            "futurePendingCount": 0,
            "failedRetryableCount": 0,
        })
    );
}

#[tokio::test]
async fn development_fallback_does_not_retry_failed_jobs() {
    let app = app(false);
    let jobs = app.h.campaign(CampaignKind::Scheduled, 1).await;
    app.h
        .edit(&jobs[0], |job| {
            job.status = JobStatus::Failed;
            job.retry_count = 1;
        })
        .await;

    let res = send(
        &app,
        process()
            .header(MANUAL_TRIGGER_HEADER, "true")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(body_json(res).await["processed"], 0);
    assert_eq!(app.h.job(jobs[0].id).await.status, JobStatus::Failed);
}

#[tokio::test]
async fn signed_in_manual_trigger_retries_failed_jobs() {
    let app = app(true);
    let token = register(&app, "owner@example.com").await;
    let jobs = app.h.campaign(CampaignKind::Scheduled, 1).await;
    app.h
        .edit(&jobs[0], |job| {
            job.status = JobStatus::Failed;
            job.retry_count = 1;
        })
        .await;

    // Cross-site requests cannot use the session.
    let res = send(
        &app,
        process()
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(MANUAL_TRIGGER_HEADER, "true")
            .header("sec-fetch-site", "cross-site")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = send(
        &app,
        process()
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(MANUAL_TRIGGER_HEADER, "true")
            .header("sec-fetch-site", "same-origin")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["processed"], 1);

    let job = app.h.job(jobs[0].id).await;
    assert_eq!(job.status, JobStatus::Sent);
    assert!(job.sent_via_cron);
}

#[tokio::test]
async fn tracking_pixel_counts_opens() {
    let app = app(true);
    let jobs = app.h.campaign(CampaignKind::Scheduled, 1).await;
    let uri = format!("/api/track/{}", jobs[0].tracking_id);

    for _ in 0..2 {
        let res = send(&app, Request::get(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "image/gif");
    }
    assert_eq!(app.h.job(jobs[0].id).await.open_count, 2);

    let res = send(
        &app,
        Request::get("/api/track/unknown-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn survey_answers_are_recorded() {
    let app = app(true);
    let jobs = app.h.campaign(CampaignKind::Scheduled, 1).await;

    let uri = format!("/api/survey/{}", jobs[0].tracking_id);
    let res = send(&app, post_json(&uri, json!({ "response": "interested" }))).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        app.h.job(jobs[0].id).await.survey_response.as_deref(),
        Some("interested")
    );

    let res = send(
        &app,
        post_json("/api/survey/unknown-token", json!({ "response": "no" })),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn campaign_lifecycle() {
    let app = app(true);
    let token = register(&app, "owner@example.com").await;
    let bearer = format!("Bearer {token}");

    let res = send(
        &app,
        Request::get("/api/campaigns").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let mut create = post_json(
        "/api/campaigns",
        json!({
            "name": "Launch",
            "smtp": {
                "host": "smtp.example.com",
                "port": 587,
                "username": "sales@example.com",
                "password": "app-password",
            },
            "recipients": ["a@acme.io", "b@acme.io", "c@acme.io"],
            "subject": "Hello",
            "body": "<p>Hi</p>",
            "durationMinutes": 30,
        }),
    );
    create
        .headers_mut()
        .insert(header::AUTHORIZATION, bearer.parse().unwrap());
    let res = send(&app, create).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created = body_json(res).await;
    assert_eq!(created["jobs"], 3);
    let id = created["id"].as_str().unwrap().to_string();

    let res = send(
        &app,
        Request::get("/api/campaigns")
            .header(header::AUTHORIZATION, &bearer)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let list = body_json(res).await;
    assert_eq!(list[0]["name"], "Launch");
    assert_eq!(list[0]["counts"]["pending"], 3);

    let res = send(
        &app,
        Request::get(format!("/api/campaigns/{id}/jobs"))
            .header(header::AUTHORIZATION, &bearer)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let jobs = body_json(res).await;
    assert_eq!(jobs[0]["recipient"], "a@acme.io");
    let job_id = jobs[0]["id"].as_str().unwrap().to_string();

    let res = send(
        &app,
        Request::post(format!("/api/jobs/{job_id}/cancel"))
            .header(header::AUTHORIZATION, &bearer)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let other = register(&app, "intruder@example.com").await;
    let res = send(
        &app,
        Request::delete(format!("/api/campaigns/{id}"))
            .header(header::AUTHORIZATION, format!("Bearer {other}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = send(
        &app,
        Request::delete(format!("/api/campaigns/{id}"))
            .header(header::AUTHORIZATION, &bearer)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn register_rejects_malformed_email() {
    let app = app(true);
    let res = send(
        &app,
        post_json(
            "/api/auth/register",
            json!({ "email": "not an@address here", "password": "correct-horse" }),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_campaign_window_is_a_bad_request() {
    let app = app(true);
    let token = register(&app, "owner@example.com").await;

    let mut create = post_json(
        "/api/campaigns",
        json!({
            "smtp": {
                "host": "smtp.example.com",
                "port": 587,
                "username": "sales@example.com",
                "password": "app-password",
            },
            "recipients": ["a@acme.io", "b@acme.io"],
            "subject": "Hello",
            "body": "<p>Hi</p>",
            "durationMinutes": u32::MAX,
        }),
    );
    create
        .headers_mut()
        .insert(header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
    let res = send(&app, create).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(app.h.store.jobs().await.is_empty());
}
