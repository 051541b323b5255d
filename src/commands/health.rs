use crate::sentiment::types::LiveConnectionState;
use crate::{error::AppError, state::AppState};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub stream: LiveConnectionState,
}

pub fn build_health_response(started_at: Instant, stream: LiveConnectionState) -> HealthResponse {
    let status = match stream {
        LiveConnectionState::Failed => "degraded",
        _ => "ok",
    };

    HealthResponse {
        status,
        uptime_ms: started_at.elapsed().as_millis(),
        stream,
    }
}

pub async fn health(state: &AppState) -> Result<HealthResponse, AppError> {
    let stream = state.live_status.read().await.state;
    Ok(build_health_response(state.started_at, stream))
}
