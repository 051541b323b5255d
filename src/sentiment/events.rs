use crate::sentiment::types::{LiveStatusSnapshot, Series};
use crate::sentiment::{LIVE_STATUS_EVENT, SERIES_UPDATE_EVENT, STREAM_ERROR_EVENT};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum LiveEvent {
    Status(LiveStatusSnapshot),
    Series(Series),
    StreamError(String),
}

impl LiveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status(_) => LIVE_STATUS_EVENT,
            Self::Series(_) => SERIES_UPDATE_EVENT,
            Self::StreamError(_) => STREAM_ERROR_EVENT,
        }
    }
}

/// Receives controller notifications. Called from the controller task, so
/// implementations must return quickly.
pub trait LiveObserver: Send + Sync {
    fn notify(&self, event: &LiveEvent);
}

impl<F> LiveObserver for F
where
    F: Fn(&LiveEvent) + Send + Sync,
{
    fn notify(&self, event: &LiveEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LiveObserver for NoopObserver {
    fn notify(&self, _event: &LiveEvent) {}
}

/// Logs every notification; used by the headless runner.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl LiveObserver for TracingObserver {
    fn notify(&self, event: &LiveEvent) {
        match event {
            LiveEvent::Status(status) => info!(
                event = event.name(),
                state = ?status.state,
                instruments = ?status.instruments,
                lookback = status.lookback.as_str(),
                points = status.points,
                reason = status.reason.as_deref().unwrap_or(""),
                "live status"
            ),
            LiveEvent::Series(series) => debug!(
                event = event.name(),
                points = series.len(),
                latest = %series.last().map(|point| point.key()).unwrap_or_default(),
                "series updated"
            ),
            LiveEvent::StreamError(reason) => warn!(event = event.name(), %reason, "stream error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn closures_act_as_observers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = move |event: &LiveEvent| sink.lock().push(event.name());

        observer.notify(&LiveEvent::StreamError("boom".to_string()));
        observer.notify(&LiveEvent::Series(Series::from(Vec::new())));

        assert_eq!(*seen.lock(), vec![STREAM_ERROR_EVENT, SERIES_UPDATE_EVENT]);
    }
}
