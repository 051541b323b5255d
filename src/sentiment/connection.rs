use crate::error::AppError;
use crate::sentiment::types::{
    encode_subscription, parse_push_payload, ConnectionState, PushPayload, SentimentPoint,
    SubscriptionWindow,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type SentimentWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect_sentiment_stream(endpoint: &str) -> Result<SentimentWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(64 << 20),
        max_frame_size: Some(16 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(endpoint, Some(ws_config), true).await?;
    Ok(stream)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Local,
    RemoteClosed,
    RemoteHangUp,
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("closed locally"),
            Self::RemoteClosed => f.write_str("server closed the stream"),
            Self::RemoteHangUp => f.write_str("server hung up"),
            Self::Failed(reason) => f.write_str(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Opened,
    Batch(Vec<SentimentPoint>),
    Error(String),
    Closed(CloseReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_id: u64,
    pub event: StreamEvent,
}

/// One transport session. Never reopened: recovery builds a new instance.
///
/// Events are delivered on the channel given to [`StreamConnection::open`];
/// `Closed` is always the last event of a session and is sent exactly once.
#[derive(Debug)]
pub struct StreamConnection {
    session_id: u64,
    state: Arc<Mutex<ConnectionState>>,
    outbound: mpsc::UnboundedSender<String>,
    cancel_token: CancellationToken,
}

impl StreamConnection {
    pub fn open(
        endpoint: String,
        session_id: u64,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();

        let session = SessionTask {
            endpoint,
            session_id,
            state: Arc::clone(&state),
            outbound_rx,
            events,
            cancel_token: cancel_token.clone(),
        };
        tokio::spawn(session.run());

        Self {
            session_id,
            state,
            outbound,
            cancel_token,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Queues a subscription request. Returns `false` without sending when the
    /// session is not open or the window has no instruments.
    pub fn send(&self, window: &SubscriptionWindow) -> bool {
        if self.state() != ConnectionState::Open {
            debug!(
                session_id = self.session_id,
                "dropping subscription request, session not open"
            );
            return false;
        }
        if window.instruments.is_empty() {
            return false;
        }

        let payload = match encode_subscription(window) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(session_id = self.session_id, %error, "failed to encode subscription request");
                return false;
            }
        };
        self.outbound.send(payload).is_ok()
    }

    pub fn close(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct SessionTask {
    endpoint: String,
    session_id: u64,
    state: Arc<Mutex<ConnectionState>>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel_token: CancellationToken,
}

impl SessionTask {
    async fn run(mut self) {
        let reason = self.drive().await;

        *self.state.lock() = ConnectionState::Closed;
        info!(session_id = self.session_id, %reason, "sentiment stream closed");
        self.emit(StreamEvent::Closed(reason));
    }

    async fn drive(&mut self) -> CloseReason {
        let connect_result = tokio::select! {
            _ = self.cancel_token.cancelled() => return CloseReason::Local,
            result = connect_sentiment_stream(&self.endpoint) => result,
        };

        let websocket_stream = match connect_result {
            Ok(stream) => stream,
            Err(error) => {
                let reason = format!("websocket connect error: {error}");
                warn!(session_id = self.session_id, endpoint = %self.endpoint, %error, "sentiment stream connect failed");
                self.emit(StreamEvent::Error(reason.clone()));
                return CloseReason::Failed(reason);
            }
        };

        if self.cancel_token.is_cancelled() {
            return CloseReason::Local;
        }

        *self.state.lock() = ConnectionState::Open;
        info!(session_id = self.session_id, endpoint = %self.endpoint, "sentiment stream connected");
        self.emit(StreamEvent::Opened);

        let (mut sink, mut source) = websocket_stream.split();
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return CloseReason::Local;
                }
                outbound = self.outbound_rx.recv() => {
                    let Some(payload) = outbound else {
                        let _ = sink.send(Message::Close(None)).await;
                        return CloseReason::Local;
                    };
                    debug!(session_id = self.session_id, %payload, "sending subscription request");
                    if let Err(error) = sink.send(Message::Text(payload)).await {
                        let reason = format!("websocket send error: {error}");
                        self.emit(StreamEvent::Error(reason.clone()));
                        return CloseReason::Failed(reason);
                    }
                }
                frame = source.next() => {
                    let Some(frame_result) = frame else {
                        return CloseReason::RemoteHangUp;
                    };

                    match frame_result {
                        Ok(Message::Text(text_payload)) => {
                            let mut owned_payload = text_payload.into_bytes();
                            self.forward_payload(owned_payload.as_mut_slice());
                        }
                        Ok(Message::Binary(mut binary_payload)) => {
                            self.forward_payload(binary_payload.as_mut_slice());
                        }
                        Ok(Message::Close(_)) => return CloseReason::RemoteClosed,
                        Ok(_) => {}
                        Err(error) => {
                            let reason = format!("websocket frame error: {error}");
                            warn!(session_id = self.session_id, %error, "sentiment stream frame error");
                            self.emit(StreamEvent::Error(reason.clone()));
                            return CloseReason::Failed(reason);
                        }
                    }
                }
            }
        }
    }

    fn forward_payload(&self, payload: &mut [u8]) {
        match parse_push_payload(payload) {
            Ok(PushPayload::Batch(points)) if points.is_empty() => {
                debug!(session_id = self.session_id, "ignoring empty sentiment batch");
            }
            Ok(PushPayload::Batch(points)) => self.emit(StreamEvent::Batch(points)),
            Ok(PushPayload::Rejected(reason)) => {
                warn!(session_id = self.session_id, %reason, "server rejected subscription request");
            }
            Err(error) => {
                warn!(session_id = self.session_id, %error, "dropping malformed sentiment payload");
            }
        }
    }

    fn emit(&self, event: StreamEvent) {
        // The receiver disappears only when the controller is gone; nothing left to notify.
        let _ = self.events.send(SessionEvent {
            session_id: self.session_id,
            event,
        });
    }
}
