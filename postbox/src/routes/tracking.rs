use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, JsonResult};
use crate::state::AppState;
use crate::tracking::PIXEL_GIF;

/// Always answers with the pixel, whether or not the token is known.
pub async fn open(
    State(state): State<AppState>,
    Path(tracking_id): Path<String>,
) -> impl IntoResponse {
    match state.campaigns.record_open(&tracking_id).await {
        Ok(true) => tracing::debug!(%tracking_id, "open recorded"),
        Ok(false) => tracing::debug!(%tracking_id, "open for unknown tracking id"),
        Err(e) => tracing::warn!(%tracking_id, error = %e, "failed to record open"),
    }

    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, max-age=0"),
        ],
        PIXEL_GIF,
    )
}

#[derive(Deserialize)]
pub struct SurveyAnswer {
    response: String,
}

pub async fn survey(
    State(state): State<AppState>,
    Path(tracking_id): Path<String>,
    Json(answer): Json<SurveyAnswer>,
) -> JsonResult<Value> {
    let response = answer.response.trim();
    if response.is_empty() {
        return Err(Error::Invalid("response is required".into()));
    }
    if !state.campaigns.record_survey(&tracking_id, response).await? {
        return Err(Error::NotFound("tracking id"));
    }
    Ok(Json(json!({ "ok": true })))
}
