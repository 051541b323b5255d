use crate::error::AppError;
use crate::sentiment::types::{format_wire_time, truncate_to_minute};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const EXPLAIN_WINDOW_MINUTES: i64 = 5;
pub const NO_EXPLANATION: &str = "No explanation returned by API.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExplainRequestWire {
    pub coin_id: u32,
    pub start_time: String,
    pub end_time: String,
}

impl ExplainRequestWire {
    /// Covers the minutes leading up to the selected point.
    pub fn for_point(coin_id: u32, point_time: DateTime<Utc>) -> Self {
        let end = truncate_to_minute(point_time);
        let start = end - chrono::Duration::minutes(EXPLAIN_WINDOW_MINUTES);
        Self {
            coin_id,
            start_time: format_wire_time(start),
            end_time: format_wire_time(end),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExplainResponseWire {
    explanation: Option<String>,
}

/// Asks the backend why sentiment moved. The backend reports its own failures
/// as explanation text with a non-2xx status, so the body is read regardless.
pub async fn fetch_explanation(
    client: &Client,
    endpoint: &str,
    request: &ExplainRequestWire,
) -> Result<String, AppError> {
    let response = client.post(endpoint).json(request).send().await?;
    let status = response.status();
    let payload = response.json::<ExplainResponseWire>().await?;
    debug!(coin_id = request.coin_id, status = status.as_u16(), "explanation received");

    Ok(payload
        .explanation
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| NO_EXPLANATION.to_string()))
}
