use crate::error::AppError;
use crate::sentiment::instruments::{default_selection, filter_known};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Source of the user's preferred instruments, consulted once per activation.
pub trait ProfileSource: Send + Sync + 'static {
    fn fetch_instruments(&self) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;
}

#[derive(Debug, Deserialize)]
struct ProfileResponseWire {
    #[serde(default)]
    success: bool,
    user: Option<ProfileUserWire>,
}

#[derive(Debug, Deserialize)]
struct ProfileUserWire {
    coins: Option<ProfileCoinsWire>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProfileCoinsWire {
    List(Vec<String>),
    Csv(String),
}

impl ProfileCoinsWire {
    fn into_symbols(self) -> Vec<String> {
        match self {
            Self::List(symbols) => symbols,
            Self::Csv(raw) => raw
                .split(',')
                .map(|symbol| symbol.trim().to_string())
                .filter(|symbol| !symbol.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpProfileSource {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpProfileSource {
    pub fn new(client: Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token,
        }
    }
}

impl ProfileSource for HttpProfileSource {
    async fn fetch_instruments(&self) -> Result<Vec<String>, AppError> {
        // Anonymous users have no profile.
        let Some(token) = self.token.as_deref() else {
            return Ok(Vec::new());
        };

        let response = self
            .client
            .get(&self.endpoint)
            .header(AUTHORIZATION, token)
            .send()
            .await?
            .error_for_status()?;
        let payload = response.json::<ProfileResponseWire>().await?;

        let coins = payload.user.and_then(|user| user.coins);
        if !payload.success && coins.is_none() {
            return Err(AppError::MalformedPayload(
                "profile response carried no coins".to_string(),
            ));
        }
        Ok(coins.map(ProfileCoinsWire::into_symbols).unwrap_or_default())
    }
}

/// A profile that always answers with the same symbols.
#[derive(Debug, Clone, Default)]
pub struct FixedSelection(pub Vec<String>);

impl ProfileSource for FixedSelection {
    async fn fetch_instruments(&self) -> Result<Vec<String>, AppError> {
        Ok(self.0.clone())
    }
}

impl<P: ProfileSource> ProfileSource for Option<P> {
    async fn fetch_instruments(&self) -> Result<Vec<String>, AppError> {
        match self {
            Some(source) => source.fetch_instruments().await,
            None => Ok(Vec::new()),
        }
    }
}

/// Resolves the starting selection. Lookup failures, timeouts and selections
/// with no known symbols all fall back to the default selection.
pub async fn resolve_initial_selection<P: ProfileSource>(
    profile: &P,
    timeout: Duration,
) -> BTreeSet<String> {
    let fetched = match tokio::time::timeout(timeout, profile.fetch_instruments()).await {
        Ok(Ok(symbols)) => symbols,
        Ok(Err(error)) => {
            warn!(%error, "profile lookup failed, using default selection");
            return default_selection();
        }
        Err(_) => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "profile lookup timed out, using default selection"
            );
            return default_selection();
        }
    };

    let selection = filter_known(&fetched);
    if selection.is_empty() {
        info!(
            requested = fetched.len(),
            "profile selected no known instruments, using default selection"
        );
        return default_selection();
    }
    selection
}
