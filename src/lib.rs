pub mod commands;
pub mod error;
pub mod sentiment;
pub mod state;

pub use error::AppError;

use commands::live_stream::{start_live_stream, stop_live_stream};
use sentiment::config::StartLiveStreamArgs;
use sentiment::events::TracingObserver;
use state::AppState;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "sentiment_pulse_lib=info,sentiment_pulse=info";

pub fn init_tracing() {
    // A subscriber may already be installed by an embedding host.
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Runs a headless live stream configured from the environment until Ctrl-C.
pub async fn run() -> Result<(), AppError> {
    init_tracing();

    let args = StartLiveStreamArgs::from_env()?;
    let state = AppState::default();
    let session = start_live_stream(&state, Arc::new(TracingObserver), Some(args)).await?;
    info!(
        endpoint = %session.endpoint,
        lookback = session.lookback.as_str(),
        rolling_interval_ms = session.rolling_interval_ms,
        "live stream started, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;

    let stopped = stop_live_stream(&state).await?;
    info!(stopped = stopped.stopped, "live stream stopped");
    Ok(())
}
