use crate::error::AppError;
use crate::sentiment::buffer::TimeSeriesBuffer;
use crate::sentiment::config::LiveStreamConfig;
use crate::sentiment::connection::{CloseReason, SessionEvent, StreamConnection, StreamEvent};
use crate::sentiment::events::{LiveEvent, LiveObserver};
use crate::sentiment::planner::{initial_window, rolling_window};
use crate::sentiment::profile::{resolve_initial_selection, ProfileSource};
use crate::sentiment::types::{
    ConnectionState, LiveConnectionState, LiveStatusSnapshot, LookbackRange, SentimentPoint,
    Series,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RECONNECT_BASE_DELAY_MS: u64 = 200;
const RECONNECT_MAX_DELAY_MS: u64 = 5_000;
const RECONNECT_JITTER_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveCommand {
    SelectInstruments(BTreeSet<String>),
    SelectLookback(LookbackRange),
}

/// Read-only handle on a running controller.
#[derive(Debug, Clone)]
pub struct LiveView {
    series: watch::Receiver<Series>,
    status: Arc<RwLock<LiveStatusSnapshot>>,
}

impl LiveView {
    pub fn snapshot(&self) -> Series {
        self.series.borrow().clone()
    }

    /// Waits for the next merged series. Fails once the controller is gone.
    pub async fn changed(&mut self) -> Result<Series, AppError> {
        self.series
            .changed()
            .await
            .map_err(|_| AppError::StreamNotRunning)?;
        Ok(self.series.borrow_and_update().clone())
    }

    pub async fn status(&self) -> LiveStatusSnapshot {
        self.status.read().await.clone()
    }
}

/// The periodic rolling-window trigger. Holds at most one interval; arming
/// always drops the previous one first.
#[derive(Debug, Default)]
pub struct RollingTimer {
    interval: Option<Interval>,
}

impl RollingTimer {
    pub fn arm(&mut self, period: Duration) {
        self.cancel();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
    }

    pub fn cancel(&mut self) {
        self.interval = None;
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Resolves on the next tick; never resolves while disarmed.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => std::future::pending().await,
        }
    }
}

pub struct LiveSentimentController<P> {
    config: LiveStreamConfig,
    profile: P,
    observer: Arc<dyn LiveObserver>,
    status_store: Arc<RwLock<LiveStatusSnapshot>>,
    series_tx: watch::Sender<Series>,
    buffer: TimeSeriesBuffer,
    selected: BTreeSet<String>,
    lookback: LookbackRange,
    last_window_end: Option<DateTime<Utc>>,
    timer: RollingTimer,
    connection: Option<StreamConnection>,
    next_session_id: u64,
    reconnect_attempt: u32,
    reconnect_at: Option<Instant>,
    state: LiveConnectionState,
    reason: Option<String>,
}

impl<P: ProfileSource> LiveSentimentController<P> {
    pub fn new(
        config: LiveStreamConfig,
        profile: P,
        observer: Arc<dyn LiveObserver>,
        status_store: Arc<RwLock<LiveStatusSnapshot>>,
    ) -> (Self, LiveView) {
        let buffer = TimeSeriesBuffer::new();
        let (series_tx, series_rx) = watch::channel(buffer.snapshot());
        let view = LiveView {
            series: series_rx,
            status: Arc::clone(&status_store),
        };

        let controller = Self {
            lookback: config.lookback,
            selected: config.instruments.clone().unwrap_or_default(),
            config,
            profile,
            observer,
            status_store,
            series_tx,
            buffer,
            last_window_end: None,
            timer: RollingTimer::default(),
            connection: None,
            next_session_id: 0,
            reconnect_attempt: 0,
            reconnect_at: None,
            state: LiveConnectionState::Connecting,
            reason: None,
        };
        (controller, view)
    }

    /// Drives the stream until cancelled or until every command sender is gone.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<LiveCommand>,
        cancel_token: CancellationToken,
    ) {
        self.set_state(
            LiveConnectionState::Connecting,
            Some("resolving instrument selection".to_string()),
        )
        .await;

        let resolved = match self.config.instruments.clone() {
            Some(selection) => Some(selection),
            None => tokio::select! {
                _ = cancel_token.cancelled() => None,
                selection = resolve_initial_selection(&self.profile, self.config.profile_timeout) => {
                    Some(selection)
                }
            },
        };
        let Some(selection) = resolved else {
            self.teardown().await;
            return;
        };
        self.selected = selection;
        info!(
            instruments = ?self.selected,
            lookback = self.lookback.as_str(),
            endpoint = %self.config.endpoint,
            "starting live sentiment stream"
        );

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        self.open_session(&events_tx).await;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.apply_command(command).await;
                }
                Some(event) = events_rx.recv() => {
                    self.handle_session_event(event).await;
                }
                _ = self.timer.tick() => {
                    self.send_rolling_window().await;
                }
                _ = wait_for_deadline(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open_session(&events_tx).await;
                }
            }
        }

        self.teardown().await;
    }

    async fn open_session(&mut self, events_tx: &mpsc::UnboundedSender<SessionEvent>) {
        self.next_session_id = self.next_session_id.wrapping_add(1);
        self.connection = Some(StreamConnection::open(
            self.config.endpoint.clone(),
            self.next_session_id,
            events_tx.clone(),
        ));

        let (state, reason) = if self.reconnect_attempt == 0 {
            (
                LiveConnectionState::Connecting,
                "opening websocket stream".to_string(),
            )
        } else {
            (
                LiveConnectionState::Reconnecting,
                format!("reconnect attempt {}", self.reconnect_attempt),
            )
        };
        self.set_state(state, Some(reason)).await;
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        let current_session = self.connection.as_ref().map(StreamConnection::session_id);
        if current_session != Some(event.session_id) {
            debug!(session_id = event.session_id, "ignoring event from stale session");
            return;
        }

        match event.event {
            StreamEvent::Opened => {
                self.start_subscription();
                self.set_state(
                    LiveConnectionState::Live,
                    Some("websocket connected".to_string()),
                )
                .await;
            }
            StreamEvent::Batch(points) => {
                // Only a session that delivers data counts as recovered.
                self.reconnect_attempt = 0;
                self.apply_batch(points).await;
            }
            StreamEvent::Error(reason) => {
                warn!(session_id = event.session_id, %reason, "live stream error");
                self.observer.notify(&LiveEvent::StreamError(reason));
            }
            StreamEvent::Closed(reason) => self.handle_closed(reason).await,
        }
    }

    /// Sends the backfill window for the current selection and restarts the
    /// rolling timer. An empty selection leaves the session idle.
    fn start_subscription(&mut self) {
        self.timer.cancel();
        self.last_window_end = None;

        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        if self.selected.is_empty() {
            debug!("no instruments selected, subscription idle");
            return;
        }

        let now = Utc::now();
        let window = initial_window(now, self.lookback, &self.selected);
        if connection.send(&window) {
            debug!(
                start = %window.start,
                end = %window.end,
                instruments = window.instruments.len(),
                "sent initial subscription window"
            );
            self.last_window_end = Some(now);
            self.timer.arm(self.config.rolling_interval);
        }
    }

    async fn send_rolling_window(&mut self) {
        let Some(connection) = self.connection.as_ref() else {
            return;
        };

        let now = Utc::now();
        let Some(window) = rolling_window(self.last_window_end, now, &self.selected) else {
            debug!("rolling tick with nothing to request");
            return;
        };
        if connection.send(&window) {
            debug!(start = %window.start, end = %window.end, "sent rolling subscription window");
            self.last_window_end = Some(now);
            self.store_status().await;
        }
    }

    /// Merges a batch, keeping only scores for the current selection. Answers
    /// to requests sent before a selection change lose their stale symbols.
    async fn apply_batch(&mut self, points: Vec<SentimentPoint>) {
        let received = points.len();
        let selected: Vec<SentimentPoint> = points
            .into_iter()
            .filter_map(|point| point.restricted_to(&self.selected))
            .collect();
        if selected.is_empty() {
            debug!(received, "batch carried no selected instruments");
            return;
        }

        let series = self.buffer.merge(selected);
        debug!(received, held = series.len(), "merged sentiment batch");

        self.series_tx.send_replace(Arc::clone(&series));
        self.observer.notify(&LiveEvent::Series(series));
        self.store_status().await;
    }

    async fn apply_command(&mut self, command: LiveCommand) {
        let changed = match command {
            LiveCommand::SelectInstruments(selection) => {
                let changed = selection != self.selected;
                self.selected = selection;
                changed
            }
            LiveCommand::SelectLookback(lookback) => {
                let changed = lookback != self.lookback;
                self.lookback = lookback;
                changed
            }
        };
        if !changed {
            debug!("subscription settings unchanged");
            return;
        }

        info!(
            instruments = ?self.selected,
            lookback = self.lookback.as_str(),
            "subscription settings changed"
        );
        self.timer.cancel();
        self.last_window_end = None;
        self.buffer.reset();
        let series = self.buffer.snapshot();
        self.series_tx.send_replace(Arc::clone(&series));
        self.observer.notify(&LiveEvent::Series(series));

        let is_open = self
            .connection
            .as_ref()
            .is_some_and(|connection| connection.state() == ConnectionState::Open);
        if is_open {
            self.start_subscription();
        }
        self.publish_status().await;
    }

    async fn handle_closed(&mut self, reason: CloseReason) {
        self.timer.cancel();
        self.connection = None;

        if self.reconnect_attempt < self.config.reconnect_max_attempts {
            self.reconnect_attempt += 1;
            let delay = reconnect_delay(self.reconnect_attempt);
            self.reconnect_at = Some(Instant::now() + delay);
            info!(
                attempt = self.reconnect_attempt,
                max_attempts = self.config.reconnect_max_attempts,
                delay_ms = delay.as_millis() as u64,
                %reason,
                "scheduling live stream reconnect"
            );
            self.set_state(
                LiveConnectionState::Reconnecting,
                Some(format!("{reason}; reconnecting")),
            )
            .await;
            return;
        }

        warn!(%reason, "live stream failed");
        self.set_state(LiveConnectionState::Failed, Some(reason.to_string()))
            .await;
    }

    async fn teardown(&mut self) {
        self.timer.cancel();
        self.reconnect_at = None;
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.set_state(
            LiveConnectionState::Stopped,
            Some("stream stopped".to_string()),
        )
        .await;
    }

    async fn set_state(&mut self, state: LiveConnectionState, reason: Option<String>) {
        self.state = state;
        self.reason = reason;
        self.publish_status().await;
    }

    async fn publish_status(&self) {
        let snapshot = self.store_status().await;
        self.observer.notify(&LiveEvent::Status(snapshot));
    }

    async fn store_status(&self) -> LiveStatusSnapshot {
        let snapshot = LiveStatusSnapshot {
            state: self.state,
            instruments: self.selected.iter().cloned().collect(),
            lookback: self.lookback,
            last_window_end: self.last_window_end,
            points: self.buffer.len(),
            reason: self.reason.clone(),
        };
        let mut writable = self.status_store.write().await;
        *writable = snapshot.clone();
        snapshot
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    let base_ms = RECONNECT_BASE_DELAY_MS.saturating_mul(1_u64 << exponent);
    let jitter_ms = Utc::now().timestamp_millis().unsigned_abs() % RECONNECT_JITTER_MS;
    Duration::from_millis((base_ms + jitter_ms).min(RECONNECT_MAX_DELAY_MS))
}
