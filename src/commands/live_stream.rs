use crate::error::AppError;
use crate::sentiment::config::{LiveStreamConfig, StartLiveStreamArgs};
use crate::sentiment::controller::{LiveCommand, LiveSentimentController};
use crate::sentiment::events::LiveObserver;
use crate::sentiment::instruments::{normalize_selection, InstrumentInfo, KNOWN_INSTRUMENTS};
use crate::sentiment::profile::HttpProfileSource;
use crate::sentiment::types::{LiveConnectionState, LiveStatusSnapshot, LookbackRange, Series};
use crate::state::{AppState, LiveStreamHandle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamSession {
    pub running: bool,
    pub endpoint: String,
    pub instruments: Option<Vec<String>>,
    pub lookback: LookbackRange,
    pub rolling_interval_ms: u64,
    pub reconnect_max_attempts: u32,
    pub profile_lookup: bool,
    pub explain_enabled: bool,
}

impl LiveStreamSession {
    pub fn from_config(config: &LiveStreamConfig) -> Self {
        Self {
            running: true,
            endpoint: config.endpoint.clone(),
            instruments: config
                .instruments
                .as_ref()
                .map(|selection| selection.iter().cloned().collect()),
            lookback: config.lookback,
            rolling_interval_ms: config.rolling_interval.as_millis() as u64,
            reconnect_max_attempts: config.reconnect_max_attempts,
            profile_lookup: config.instruments.is_none() && config.profile_endpoint.is_some(),
            explain_enabled: config.explain_endpoint.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamStopResult {
    pub stopped: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectInstrumentsArgs {
    pub instruments: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectLookbackArgs {
    pub lookback: LookbackRange,
}

pub async fn start_live_stream(
    state: &AppState,
    observer: Arc<dyn LiveObserver>,
    args: Option<StartLiveStreamArgs>,
) -> Result<LiveStreamSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;

    let existing_handle = {
        let mut stream_slot = state.live_stream.lock().await;
        stream_slot.take()
    };
    if let Some(handle) = existing_handle {
        handle.shutdown().await;
    }

    let profile = config.profile_endpoint.as_ref().map(|endpoint| {
        HttpProfileSource::new(
            state.http_client.clone(),
            endpoint.clone(),
            config.profile_token.clone(),
        )
    });
    let (controller, view) = LiveSentimentController::new(
        config.clone(),
        profile,
        observer,
        Arc::clone(&state.live_status),
    );

    let cancellation_token = CancellationToken::new();
    let (commands, commands_rx) = mpsc::unbounded_channel();
    let join_handle = tokio::spawn(controller.run(commands_rx, cancellation_token.clone()));

    let session = LiveStreamSession::from_config(&config);
    {
        let mut stream_slot = state.live_stream.lock().await;
        *stream_slot = Some(LiveStreamHandle {
            cancellation_token,
            join_handle,
            commands,
            view,
            config,
        });
    }

    Ok(session)
}

pub async fn stop_live_stream(state: &AppState) -> Result<LiveStreamStopResult, AppError> {
    let existing_handle = {
        let mut stream_slot = state.live_stream.lock().await;
        stream_slot.take()
    };

    let stopped = if let Some(handle) = existing_handle {
        handle.shutdown().await;
        true
    } else {
        false
    };

    {
        let mut writable = state.live_status.write().await;
        *writable = LiveStatusSnapshot {
            state: LiveConnectionState::Stopped,
            instruments: std::mem::take(&mut writable.instruments),
            lookback: writable.lookback,
            last_window_end: None,
            points: 0,
            reason: Some("stream stopped by command".to_string()),
        };
    }

    Ok(LiveStreamStopResult { stopped })
}

pub async fn live_stream_status(state: &AppState) -> Result<LiveStatusSnapshot, AppError> {
    let snapshot = state.live_status.read().await.clone();
    Ok(snapshot)
}

pub async fn live_series_snapshot(state: &AppState) -> Result<Series, AppError> {
    let stream_slot = state.live_stream.lock().await;
    Ok(stream_slot
        .as_ref()
        .map(|handle| handle.view.snapshot())
        .unwrap_or_else(|| Series::from(Vec::new())))
}

pub async fn select_instruments(
    state: &AppState,
    args: SelectInstrumentsArgs,
) -> Result<(), AppError> {
    let selection = normalize_selection(&args.instruments)?;
    send_command(state, LiveCommand::SelectInstruments(selection)).await
}

pub async fn select_lookback(state: &AppState, args: SelectLookbackArgs) -> Result<(), AppError> {
    send_command(state, LiveCommand::SelectLookback(args.lookback)).await
}

pub fn instrument_catalog() -> Vec<InstrumentInfo> {
    KNOWN_INSTRUMENTS.to_vec()
}

async fn send_command(state: &AppState, command: LiveCommand) -> Result<(), AppError> {
    let stream_slot = state.live_stream.lock().await;
    let handle = stream_slot.as_ref().ok_or(AppError::StreamNotRunning)?;
    handle
        .commands
        .send(command)
        .map_err(|_| AppError::StreamNotRunning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentiment::events::NoopObserver;

    #[tokio::test]
    async fn commands_require_running_stream() {
        let state = AppState::default();

        let result = select_lookback(
            &state,
            SelectLookbackArgs {
                lookback: LookbackRange::H5,
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::StreamNotRunning)));

        let stopped = stop_live_stream(&state).await.expect("stop is infallible");
        assert!(!stopped.stopped);
        assert!(live_series_snapshot(&state)
            .await
            .expect("snapshot is infallible")
            .is_empty());
    }

    #[tokio::test]
    async fn rejects_invalid_instrument_symbols_before_forwarding() {
        let state = AppState::default();
        let result = select_instruments(
            &state,
            SelectInstrumentsArgs {
                instruments: vec!["BTC/USDT".to_string()],
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn start_rejects_invalid_arguments() {
        let state = AppState::default();
        let result = start_live_stream(
            &state,
            Arc::new(NoopObserver),
            Some(StartLiveStreamArgs {
                endpoint: Some("http://127.0.0.1:9".to_string()),
                ..Default::default()
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
        assert!(state.live_stream.lock().await.is_none());
    }

    #[tokio::test]
    async fn start_then_stop_leaves_stopped_status() {
        let state = AppState::default();
        let session = start_live_stream(
            &state,
            Arc::new(NoopObserver),
            Some(StartLiveStreamArgs {
                endpoint: Some("ws://127.0.0.1:9/ws".to_string()),
                instruments: Some(vec!["eth".to_string()]),
                lookback: Some(LookbackRange::H2),
                ..Default::default()
            }),
        )
        .await
        .expect("arguments are valid");
        assert!(session.running);
        assert_eq!(session.instruments, Some(vec!["ETH".to_string()]));
        assert!(!session.profile_lookup);

        select_instruments(
            &state,
            SelectInstrumentsArgs {
                instruments: vec!["btc".to_string()],
            },
        )
        .await
        .expect("stream is running");

        let stopped = stop_live_stream(&state).await.expect("stop is infallible");
        assert!(stopped.stopped);

        let status = live_stream_status(&state).await.expect("status is infallible");
        assert_eq!(status.state, LiveConnectionState::Stopped);
        assert_eq!(status.lookback, LookbackRange::H2);
        assert!(state.live_stream.lock().await.is_none());
    }

    #[test]
    fn catalog_lists_known_instruments() {
        let catalog = instrument_catalog();
        assert_eq!(catalog.len(), KNOWN_INSTRUMENTS.len());
        assert_eq!(catalog[0].symbol, "BTC");
    }
}
