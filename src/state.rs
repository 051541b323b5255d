use crate::sentiment::config::LiveStreamConfig;
use crate::sentiment::controller::{LiveCommand, LiveView};
use crate::sentiment::types::LiveStatusSnapshot;
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct LiveStreamHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
    pub commands: mpsc::UnboundedSender<LiveCommand>,
    pub view: LiveView,
    pub config: LiveStreamConfig,
}

impl LiveStreamHandle {
    /// Cancels the controller and waits for its teardown to finish.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        let _ = self.join_handle.await;
    }
}

pub struct AppState {
    pub started_at: Instant,
    pub http_client: Client,
    pub live_stream: Mutex<Option<LiveStreamHandle>>,
    pub live_status: Arc<RwLock<LiveStatusSnapshot>>,
}

impl AppState {
    pub fn new(http_client: Client) -> Self {
        let live_status = LiveStatusSnapshot::stopped(Some("stream idle".to_string()));

        Self {
            started_at: Instant::now(),
            http_client,
            live_stream: Mutex::new(None),
            live_status: Arc::new(RwLock::new(live_status)),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Client::new())
    }
}
