use axum::extract::State;
use axum::Json;

use crate::auth::TriggerAuth;
use crate::error::{Error, JsonResult};
use crate::queue::{self, BatchReport};
use crate::state::AppState;

/// `GET|POST /api/cron/process`
pub async fn process(
    State(state): State<AppState>,
    TriggerAuth(trigger): TriggerAuth,
) -> JsonResult<BatchReport> {
    let report = queue::run_and_continue(&state.processor, &state.drain, trigger)
        .await
        .map_err(Error::Processing)?;
    Ok(Json(report))
}
