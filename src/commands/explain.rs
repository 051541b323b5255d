use crate::error::AppError;
use crate::sentiment::explain::{fetch_explanation, ExplainRequestWire};
use crate::sentiment::types::parse_wire_time;
use crate::state::AppState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainSentimentArgs {
    /// Backend identifier of the coin, as known to the rendering layer.
    pub coin_id: u32,
    /// Point key (`YYYY-MM-DD HH:MM`) or any accepted wire timestamp.
    pub point: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResponse {
    pub coin_id: u32,
    pub start_time: String,
    pub end_time: String,
    pub explanation: String,
}

pub async fn explain_sentiment(
    state: &AppState,
    args: ExplainSentimentArgs,
) -> Result<ExplainResponse, AppError> {
    let endpoint = {
        let stream_slot = state.live_stream.lock().await;
        let handle = stream_slot.as_ref().ok_or(AppError::StreamNotRunning)?;
        handle.config.explain_endpoint.clone()
    }
    .ok_or_else(|| AppError::InvalidArgument("explain endpoint is not configured".to_string()))?;

    let point_time = parse_wire_time(&args.point)?;
    let request = ExplainRequestWire::for_point(args.coin_id, point_time);
    let explanation = fetch_explanation(&state.http_client, &endpoint, &request).await?;

    Ok(ExplainResponse {
        coin_id: request.coin_id,
        start_time: request.start_time,
        end_time: request.end_time,
        explanation,
    })
}
