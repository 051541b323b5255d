use crate::error::AppError;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const SERIES_CAPACITY: usize = 300;
pub const POINT_KEY_FORMAT: &str = "%Y-%m-%d %H:%M";
pub const MIN_SENTIMENT_SCORE: f64 = -1.0;
pub const MAX_SENTIMENT_SCORE: f64 = 1.0;

const FEED_MINUTE_FORMAT: &str = "%Y-%m-%dT%H:%MZ";

/// Immutable, cheaply clonable view of a buffered series.
pub type Series = Arc<[SentimentPoint]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LiveConnectionState {
    Connecting,
    Live,
    Reconnecting,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LookbackRange {
    #[default]
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "5h")]
    H5,
    #[serde(rename = "10h")]
    H10,
    #[serde(rename = "24h")]
    H24,
}

impl LookbackRange {
    pub const ALL: [LookbackRange; 5] = [Self::H1, Self::H2, Self::H5, Self::H10, Self::H24];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H5 => "5h",
            Self::H10 => "10h",
            Self::H24 => "24h",
        }
    }

    pub fn hours(self) -> i64 {
        match self {
            Self::H1 => 1,
            Self::H2 => 2,
            Self::H5 => 5,
            Self::H10 => 10,
            Self::H24 => 24,
        }
    }

    pub fn duration(self) -> chrono::Duration {
        chrono::Duration::hours(self.hours())
    }

    pub fn parse_str(raw: &str) -> Result<Self, AppError> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|range| range.as_str() == normalized)
            .ok_or_else(|| {
                AppError::InvalidArgument(format!(
                    "lookback must be one of 1h, 2h, 5h, 10h, 24h (got '{raw}')"
                ))
            })
    }
}

/// One minute of aggregated sentiment, keyed by its minute-truncated timestamp.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SentimentPoint {
    timestamp: DateTime<Utc>,
    values: BTreeMap<String, f64>,
}

impl SentimentPoint {
    /// Truncates `timestamp` to the minute and clamps every score into [-1, 1].
    pub fn new(timestamp: DateTime<Utc>, values: BTreeMap<String, f64>) -> Self {
        let values = values
            .into_iter()
            .map(|(symbol, score)| (symbol, clamp_score(score)))
            .collect();
        Self {
            timestamp: truncate_to_minute(timestamp),
            values,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn key(&self) -> String {
        self.timestamp.format(POINT_KEY_FORMAT).to_string()
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn value(&self, symbol: &str) -> Option<f64> {
        self.values.get(symbol).copied()
    }

    /// Keeps only the scores for `instruments`; `None` when nothing is left.
    pub fn restricted_to(mut self, instruments: &BTreeSet<String>) -> Option<Self> {
        self.values.retain(|symbol, _| instruments.contains(symbol));
        if self.values.is_empty() {
            return None;
        }
        Some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub instruments: BTreeSet<String>,
}

impl SubscriptionWindow {
    pub fn to_wire(&self) -> SubscriptionRequestWire {
        SubscriptionRequestWire {
            start_time: format_wire_time(self.start),
            end_time: format_wire_time(self.end),
            tokens: self.instruments.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionRequestWire {
    pub start_time: String,
    pub end_time: String,
    pub tokens: Vec<String>,
}

pub fn encode_subscription(window: &SubscriptionWindow) -> Result<String, AppError> {
    Ok(simd_json::serde::to_string(&window.to_wire())?)
}

#[derive(Debug, Deserialize)]
pub struct SentimentRecordWire {
    pub time: String,
    pub coins: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SentimentPushWire {
    Batch(Vec<SentimentRecordWire>),
    Rejected { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushPayload {
    Batch(Vec<SentimentPoint>),
    Rejected(String),
}

impl TryFrom<SentimentRecordWire> for SentimentPoint {
    type Error = AppError;

    fn try_from(value: SentimentRecordWire) -> Result<Self, Self::Error> {
        let timestamp = parse_wire_time(&value.time)?;
        if value.coins.values().any(|score| !score.is_finite()) {
            return Err(AppError::MalformedPayload(format!(
                "non-finite sentiment score at {}",
                value.time
            )));
        }
        Ok(SentimentPoint::new(timestamp, value.coins))
    }
}

/// Decodes one inbound frame. A single bad record rejects the whole batch.
pub fn parse_push_payload(payload: &mut [u8]) -> Result<PushPayload, AppError> {
    let wire: SentimentPushWire = simd_json::serde::from_slice(payload)?;
    match wire {
        SentimentPushWire::Batch(records) => {
            let mut points = Vec::with_capacity(records.len());
            for record in records {
                points.push(record.try_into()?);
            }
            Ok(PushPayload::Batch(points))
        }
        SentimentPushWire::Rejected { error } => Ok(PushPayload::Rejected(error)),
    }
}

pub fn format_wire_time(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339, the feed's minute format (`2025-04-21T15:05Z`) and point keys.
pub fn parse_wire_time(raw: &str) -> Result<DateTime<Utc>, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::MalformedPayload("empty timestamp".to_string()));
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, FEED_MINUTE_FORMAT) {
        return Ok(parsed.and_utc());
    }
    Ok(NaiveDateTime::parse_from_str(trimmed, POINT_KEY_FORMAT)?.and_utc())
}

pub fn truncate_to_minute(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let seconds = timestamp.timestamp();
    let floored = seconds - seconds.rem_euclid(60);
    DateTime::from_timestamp(floored, 0).unwrap_or(timestamp)
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(MIN_SENTIMENT_SCORE, MAX_SENTIMENT_SCORE)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatusSnapshot {
    pub state: LiveConnectionState,
    pub instruments: Vec<String>,
    pub lookback: LookbackRange,
    pub last_window_end: Option<DateTime<Utc>>,
    pub points: usize,
    pub reason: Option<String>,
}

impl LiveStatusSnapshot {
    pub fn stopped(reason: Option<String>) -> Self {
        Self {
            state: LiveConnectionState::Stopped,
            instruments: Vec::new(),
            lookback: LookbackRange::default(),
            last_window_end: None,
            points: 0,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 21, hour, minute, second)
            .single()
            .expect("valid test timestamp")
    }

    #[test]
    fn point_identity_is_minute_truncated() {
        let point = SentimentPoint::new(at(10, 0, 42), BTreeMap::new());
        assert_eq!(point.timestamp(), at(10, 0, 0));
        assert_eq!(point.key(), "2025-04-21 10:00");
    }

    #[test]
    fn point_scores_are_clamped() {
        let values = BTreeMap::from([("BTC".to_string(), 1.7), ("ETH".to_string(), -3.0)]);
        let point = SentimentPoint::new(at(10, 0, 0), values);
        assert_eq!(point.value("BTC"), Some(1.0));
        assert_eq!(point.value("ETH"), Some(-1.0));
        assert_eq!(point.value("SOL"), None);
    }

    #[test]
    fn restricting_point_drops_unselected_scores() {
        let values = BTreeMap::from([("BTC".to_string(), 0.4), ("SOL".to_string(), -0.1)]);
        let point = SentimentPoint::new(at(10, 0, 0), values);

        let sol_only = point
            .clone()
            .restricted_to(&BTreeSet::from(["SOL".to_string()]))
            .expect("SOL score is kept");
        assert_eq!(sol_only.value("SOL"), Some(-0.1));
        assert_eq!(sol_only.value("BTC"), None);
        assert_eq!(sol_only.timestamp(), at(10, 0, 0));

        assert!(point
            .restricted_to(&BTreeSet::from(["ETH".to_string()]))
            .is_none());
    }

    #[test]
    fn parses_feed_array_payload() {
        let mut payload =
            br#"[{"time":"2025-04-21T10:00Z","coins":{"BTC":0.5,"ETH":0}},{"time":"2025-04-21T10:05Z","coins":{"BTC":-0.25}}]"#
                .to_vec();
        let parsed = parse_push_payload(&mut payload).expect("array payload should parse");

        let PushPayload::Batch(points) = parsed else {
            panic!("expected a batch");
        };
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp(), at(10, 0, 0));
        assert_eq!(points[0].value("BTC"), Some(0.5));
        assert_eq!(points[0].value("ETH"), Some(0.0));
        assert_eq!(points[1].key(), "2025-04-21 10:05");
    }

    #[test]
    fn surfaces_server_error_objects_as_rejections() {
        let mut payload = br#"{"error":"invalid start_time or end_time"}"#.to_vec();
        let parsed = parse_push_payload(&mut payload).expect("error object should decode");
        assert_eq!(
            parsed,
            PushPayload::Rejected("invalid start_time or end_time".to_string())
        );
    }

    #[test]
    fn rejects_non_array_payloads() {
        let mut payload = br#"{"time":"2025-04-21T10:00Z","coins":{"BTC":0.5}}"#.to_vec();
        assert!(parse_push_payload(&mut payload).is_err());

        let mut garbage = b"not json at all".to_vec();
        assert!(parse_push_payload(&mut garbage).is_err());
    }

    #[test]
    fn rejects_batch_with_unparseable_time() {
        let mut payload = br#"[{"time":"yesterday","coins":{"BTC":0.5}}]"#.to_vec();
        assert!(parse_push_payload(&mut payload).is_err());
    }

    #[test]
    fn parses_all_supported_time_formats() {
        assert_eq!(
            parse_wire_time("2025-04-21T10:05:30.250Z").expect("rfc3339"),
            Utc.with_ymd_and_hms(2025, 4, 21, 10, 5, 30).single().expect("valid")
                + chrono::Duration::milliseconds(250)
        );
        assert_eq!(
            parse_wire_time("2025-04-21T10:05Z").expect("feed minute format"),
            at(10, 5, 0)
        );
        assert_eq!(
            parse_wire_time("2025-04-21 10:05").expect("point key format"),
            at(10, 5, 0)
        );
        assert!(parse_wire_time("   ").is_err());
    }

    #[test]
    fn encodes_subscription_request() {
        let window = SubscriptionWindow {
            start: at(8, 0, 0),
            end: at(10, 0, 0),
            instruments: BTreeSet::from(["ETH".to_string(), "BTC".to_string()]),
        };
        let encoded = encode_subscription(&window).expect("window should encode");
        let mut bytes = encoded.into_bytes();
        let decoded: SubscriptionRequestWire =
            simd_json::serde::from_slice(&mut bytes).expect("request should decode");

        assert_eq!(decoded.start_time, "2025-04-21T08:00:00.000Z");
        assert_eq!(decoded.end_time, "2025-04-21T10:00:00.000Z");
        assert_eq!(decoded.tokens, vec!["BTC".to_string(), "ETH".to_string()]);
    }

    #[test]
    fn parses_lookback_labels() {
        assert_eq!(LookbackRange::parse_str("24H").expect("valid"), LookbackRange::H24);
        assert_eq!(LookbackRange::parse_str(" 5h ").expect("valid"), LookbackRange::H5);
        assert!(LookbackRange::parse_str("3h").is_err());
        assert_eq!(LookbackRange::H10.duration(), chrono::Duration::hours(10));
    }
}
