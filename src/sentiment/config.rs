use crate::error::AppError;
use crate::sentiment::instruments::normalize_selection;
use crate::sentiment::types::LookbackRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8080/ws";
pub const DEFAULT_LOOKBACK: LookbackRange = LookbackRange::H1;
pub const DEFAULT_ROLLING_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 0;
pub const DEFAULT_PROFILE_TIMEOUT_MS: u64 = 5_000;
pub const MIN_ROLLING_INTERVAL_MS: u64 = 1_000;
pub const MAX_ROLLING_INTERVAL_MS: u64 = 3_600_000;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const MIN_PROFILE_TIMEOUT_MS: u64 = 100;
pub const MAX_PROFILE_TIMEOUT_MS: u64 = 60_000;

const ENV_WS_URL: &str = "SENTIMENT_WS_URL";
const ENV_INSTRUMENTS: &str = "SENTIMENT_INSTRUMENTS";
const ENV_LOOKBACK: &str = "SENTIMENT_LOOKBACK";
const ENV_ROLLING_INTERVAL_MS: &str = "SENTIMENT_ROLLING_INTERVAL_MS";
const ENV_RECONNECT_MAX_ATTEMPTS: &str = "SENTIMENT_RECONNECT_MAX_ATTEMPTS";
const ENV_PROFILE_URL: &str = "SENTIMENT_PROFILE_URL";
const ENV_PROFILE_TOKEN: &str = "SENTIMENT_PROFILE_TOKEN";
const ENV_EXPLAIN_URL: &str = "SENTIMENT_EXPLAIN_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartLiveStreamArgs {
    pub endpoint: Option<String>,
    pub instruments: Option<Vec<String>>,
    pub lookback: Option<LookbackRange>,
    pub rolling_interval_ms: Option<u64>,
    pub reconnect_max_attempts: Option<u32>,
    pub profile_endpoint: Option<String>,
    pub profile_token: Option<String>,
    pub profile_timeout_ms: Option<u64>,
    pub explain_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LiveStreamConfig {
    pub endpoint: String,
    /// Explicit selection; `None` defers to the profile lookup.
    pub instruments: Option<BTreeSet<String>>,
    pub lookback: LookbackRange,
    pub rolling_interval: Duration,
    pub reconnect_max_attempts: u32,
    pub profile_endpoint: Option<String>,
    pub profile_token: Option<String>,
    pub profile_timeout: Duration,
    pub explain_endpoint: Option<String>,
}

impl StartLiveStreamArgs {
    /// Reads overrides from the environment. Blank values count as unset;
    /// values that do not parse are passed through as invalid so `normalize`
    /// reports them.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let instruments = read(ENV_INSTRUMENTS).map(|raw| {
            raw.split(',')
                .map(|symbol| symbol.trim().to_string())
                .filter(|symbol| !symbol.is_empty())
                .collect::<Vec<_>>()
        });
        let lookback = read(ENV_LOOKBACK)
            .map(|raw| LookbackRange::parse_str(&raw))
            .transpose()?;
        let rolling_interval_ms = read(ENV_ROLLING_INTERVAL_MS)
            .map(|raw| parse_env_number(ENV_ROLLING_INTERVAL_MS, &raw))
            .transpose()?;
        let reconnect_max_attempts = read(ENV_RECONNECT_MAX_ATTEMPTS)
            .map(|raw| parse_env_number(ENV_RECONNECT_MAX_ATTEMPTS, &raw))
            .transpose()?;

        Ok(Self {
            endpoint: read(ENV_WS_URL),
            instruments,
            lookback,
            rolling_interval_ms,
            reconnect_max_attempts,
            profile_endpoint: read(ENV_PROFILE_URL),
            profile_token: read(ENV_PROFILE_TOKEN),
            profile_timeout_ms: None,
            explain_endpoint: read(ENV_EXPLAIN_URL),
        })
    }

    pub fn normalize(self) -> Result<LiveStreamConfig, AppError> {
        let endpoint = self
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim()
            .to_string();
        if !has_scheme(&endpoint, &["ws://", "wss://"]) {
            return Err(AppError::InvalidArgument(
                "endpoint must be a ws:// or wss:// URL".to_string(),
            ));
        }

        let instruments = self.instruments.map(normalize_selection).transpose()?;
        let lookback = self.lookback.unwrap_or(DEFAULT_LOOKBACK);

        let rolling_interval_ms = self
            .rolling_interval_ms
            .unwrap_or(DEFAULT_ROLLING_INTERVAL_MS);
        if !(MIN_ROLLING_INTERVAL_MS..=MAX_ROLLING_INTERVAL_MS).contains(&rolling_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "rollingIntervalMs must be between {MIN_ROLLING_INTERVAL_MS} and {MAX_ROLLING_INTERVAL_MS}"
            )));
        }

        let reconnect_max_attempts = self
            .reconnect_max_attempts
            .unwrap_or(DEFAULT_RECONNECT_MAX_ATTEMPTS);
        if reconnect_max_attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(AppError::InvalidArgument(format!(
                "reconnectMaxAttempts must be at most {MAX_RECONNECT_ATTEMPTS}"
            )));
        }

        let profile_timeout_ms = self
            .profile_timeout_ms
            .unwrap_or(DEFAULT_PROFILE_TIMEOUT_MS);
        if !(MIN_PROFILE_TIMEOUT_MS..=MAX_PROFILE_TIMEOUT_MS).contains(&profile_timeout_ms) {
            return Err(AppError::InvalidArgument(format!(
                "profileTimeoutMs must be between {MIN_PROFILE_TIMEOUT_MS} and {MAX_PROFILE_TIMEOUT_MS}"
            )));
        }

        let profile_endpoint = normalize_http_endpoint(self.profile_endpoint, "profileEndpoint")?;
        let explain_endpoint = normalize_http_endpoint(self.explain_endpoint, "explainEndpoint")?;
        let profile_token = self
            .profile_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        Ok(LiveStreamConfig {
            endpoint,
            instruments,
            lookback,
            rolling_interval: Duration::from_millis(rolling_interval_ms),
            reconnect_max_attempts,
            profile_endpoint,
            profile_token,
            profile_timeout: Duration::from_millis(profile_timeout_ms),
            explain_endpoint,
        })
    }
}

impl LiveStreamConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            instruments: None,
            lookback: DEFAULT_LOOKBACK,
            rolling_interval: Duration::from_millis(DEFAULT_ROLLING_INTERVAL_MS),
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            profile_endpoint: None,
            profile_token: None,
            profile_timeout: Duration::from_millis(DEFAULT_PROFILE_TIMEOUT_MS),
            explain_endpoint: None,
        }
    }
}

fn has_scheme(endpoint: &str, schemes: &[&str]) -> bool {
    let lowered = endpoint.to_ascii_lowercase();
    schemes
        .iter()
        .any(|scheme| lowered.starts_with(scheme) && lowered.len() > scheme.len())
}

fn normalize_http_endpoint(
    endpoint: Option<String>,
    field: &str,
) -> Result<Option<String>, AppError> {
    let Some(endpoint) = endpoint
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };

    if !has_scheme(&endpoint, &["http://", "https://"]) {
        return Err(AppError::InvalidArgument(format!(
            "{field} must be an http:// or https:// URL"
        )));
    }
    Ok(Some(endpoint))
}

fn parse_env_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, AppError> {
    raw.parse::<T>()
        .map_err(|_| AppError::InvalidArgument(format!("{key} must be a non-negative integer")))
}
