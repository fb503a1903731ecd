use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::campaigns::{CampaignDraft, CampaignView, JobView, NewCampaign};
use crate::error::{Error, JsonResult, Result};
use crate::state::AppState;

pub async fn list(State(state): State<AppState>, user: AuthUser) -> JsonResult<Vec<CampaignView>> {
    let summaries = state.campaigns.list_campaigns(user.id).await?;
    Ok(Json(
        summaries
            .into_iter()
            .map(|summary| CampaignView::new(&state.key, summary))
            .collect(),
    ))
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<NewCampaign>,
) -> Result<(StatusCode, Json<Value>)> {
    let draft =
        CampaignDraft::build(state.key.clone(), user.id, req, OffsetDateTime::now_utc()).await?;
    state
        .campaigns
        .create_campaign(&draft.campaign, &draft.attachments, &draft.jobs)
        .await?;

    tracing::info!(
        campaign_id = %draft.campaign.id,
        kind = draft.campaign.kind.as_str(),
        jobs = draft.jobs.len(),
        "campaign created"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": draft.campaign.id, "jobs": draft.jobs.len() })),
    ))
}

pub async fn jobs(
    State(state): State<AppState>,
    user: AuthUser,
    Path(campaign_id): Path<Uuid>,
) -> JsonResult<Vec<JobView>> {
    let jobs = state.campaigns.campaign_jobs(user.id, campaign_id).await?;
    Ok(Json(
        jobs.into_iter()
            .map(|job| JobView::new(&state.key, job))
            .collect(),
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(campaign_id): Path<Uuid>,
) -> Result<StatusCode> {
    if !state.campaigns.delete_campaign(user.id, campaign_id).await? {
        return Err(Error::NotFound("campaign"));
    }
    tracing::info!(%campaign_id, "campaign deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<Uuid>,
) -> JsonResult<Value> {
    if !state.campaigns.cancel_job(user.id, job_id).await? {
        return Err(Error::NotCancellable);
    }
    Ok(Json(json!({ "ok": true })))
}
