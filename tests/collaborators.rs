use futures_util::StreamExt;
use reqwest::Client;
use sentiment_pulse_lib::commands::explain::{explain_sentiment, ExplainSentimentArgs};
use sentiment_pulse_lib::commands::live_stream::start_live_stream;
use sentiment_pulse_lib::sentiment::config::{LiveStreamConfig, StartLiveStreamArgs};
use sentiment_pulse_lib::sentiment::controller::LiveSentimentController;
use sentiment_pulse_lib::sentiment::events::NoopObserver;
use sentiment_pulse_lib::sentiment::explain::{
    fetch_explanation, ExplainRequestWire, NO_EXPLANATION,
};
use sentiment_pulse_lib::sentiment::profile::{
    resolve_initial_selection, HttpProfileSource, ProfileSource,
};
use sentiment_pulse_lib::sentiment::types::{
    parse_wire_time, LiveStatusSnapshot, SubscriptionRequestWire,
};
use sentiment_pulse_lib::state::AppState;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

/// Answers exactly one HTTP request with `body` and hands back the raw request.
async fn serve_http_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("test listener should bind");
    let address = listener.local_addr().expect("listener has an address");

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("client should connect");
        let request = read_http_request(&mut stream).await;
        let response = format!(
            "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream
            .write_all(response.as_bytes())
            .await
            .expect("response should write");
        let _ = stream.shutdown().await;
        request
    });

    (format!("http://{address}"), server)
}

async fn read_http_request(stream: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let read = stream.read(&mut chunk).await.expect("request should read");
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);

        let Some(header_end) = buffer.windows(4).position(|window| window == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buffer[..header_end]).to_ascii_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buffer.len() >= header_end + 4 + content_length {
            break;
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[tokio::test]
async fn http_profile_sends_token_and_reads_coin_list() {
    let (base_url, server) = serve_http_once(
        "HTTP/1.1 200 OK",
        r#"{"success":true,"user":{"name":"ada","coins":"sol, ETH"}}"#,
    )
    .await;

    let source = HttpProfileSource::new(
        Client::new(),
        format!("{base_url}/api/users/profile"),
        Some("Bearer test-token".to_string()),
    );
    let symbols = source
        .fetch_instruments()
        .await
        .expect("profile should load");
    assert_eq!(symbols, vec!["sol".to_string(), "ETH".to_string()]);

    let request = server.await.expect("server task should finish");
    assert!(request.starts_with("GET /api/users/profile"));
    assert!(request
        .to_ascii_lowercase()
        .contains("authorization: bearer test-token"));
}

#[tokio::test]
async fn failing_profile_falls_back_to_default_selection() {
    let (base_url, server) = serve_http_once(
        "HTTP/1.1 401 Unauthorized",
        r#"{"error":"Invalid authentication token"}"#,
    )
    .await;

    let source = HttpProfileSource::new(
        Client::new(),
        format!("{base_url}/api/users/profile"),
        Some("expired".to_string()),
    );
    let selection = resolve_initial_selection(&source, WAIT).await;
    assert_eq!(
        selection,
        ["BTC", "ETH", "USDT", "XRP", "BNB"]
            .into_iter()
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
    );
    server.await.expect("server task should finish");
}

#[tokio::test]
async fn controller_subscribes_with_profile_selection() {
    let (profile_url, profile_server) = serve_http_once(
        "HTTP/1.1 200 OK",
        r#"{"success":true,"user":{"coins":["DOGE","PEPE","ada"]}}"#,
    )
    .await;
    let feed_listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("feed listener should bind");
    let feed_address = feed_listener.local_addr().expect("listener has an address");

    let config = LiveStreamConfig::new(format!("ws://{feed_address}/ws"));
    let profile = HttpProfileSource::new(
        Client::new(),
        format!("{profile_url}/api/users/profile"),
        Some("token".to_string()),
    );
    let status_store = Arc::new(RwLock::new(LiveStatusSnapshot::stopped(None)));
    let (controller, _view) =
        LiveSentimentController::new(config, profile, Arc::new(NoopObserver), status_store);
    let (_commands, commands_rx) = mpsc::unbounded_channel();
    let cancel_token = CancellationToken::new();
    let task = tokio::spawn(controller.run(commands_rx, cancel_token.clone()));

    let (tcp_stream, _) = tokio::time::timeout(WAIT, feed_listener.accept())
        .await
        .expect("controller should connect")
        .expect("accept should succeed");
    let mut feed = accept_async(tcp_stream)
        .await
        .expect("websocket handshake should succeed");
    let frame = tokio::time::timeout(WAIT, feed.next())
        .await
        .expect("initial request expected")
        .expect("client stream open")
        .expect("frame should be valid");
    let Message::Text(text) = frame else {
        panic!("expected a text request");
    };
    let mut bytes = text.into_bytes();
    let request: SubscriptionRequestWire =
        simd_json::serde::from_slice(&mut bytes).expect("request should decode");
    assert_eq!(request.tokens, vec!["ADA".to_string(), "DOGE".to_string()]);

    profile_server.await.expect("profile server should finish");
    cancel_token.cancel();
    task.await.expect("controller task should finish");
}

#[tokio::test]
async fn explanation_posts_window_and_reads_text() {
    let (base_url, server) = serve_http_once(
        "HTTP/1.1 200 OK",
        r#"{"explanation":"Large transfers moved to exchanges."}"#,
    )
    .await;

    let point = parse_wire_time("2025-04-21 15:05").expect("point key parses");
    let request = ExplainRequestWire::for_point(1, point);
    let explanation = fetch_explanation(&Client::new(), &format!("{base_url}/explain"), &request)
        .await
        .expect("explanation should load");
    assert_eq!(explanation, "Large transfers moved to exchanges.");

    let raw_request = server.await.expect("server task should finish");
    assert!(raw_request.starts_with("POST /explain"));
    assert!(raw_request.contains(r#""coin_id":1"#));
    assert!(raw_request.contains(r#""start_time":"2025-04-21T15:00:00.000Z""#));
    assert!(raw_request.contains(r#""end_time":"2025-04-21T15:05:00.000Z""#));
}

#[tokio::test]
async fn explain_command_falls_back_when_backend_is_silent() {
    let (base_url, server) = serve_http_once("HTTP/1.1 200 OK", "{}").await;

    let state = AppState::default();
    start_live_stream(
        &state,
        Arc::new(NoopObserver),
        Some(StartLiveStreamArgs {
            endpoint: Some("ws://127.0.0.1:9/ws".to_string()),
            instruments: Some(vec!["BTC".to_string()]),
            explain_endpoint: Some(format!("{base_url}/explain")),
            ..Default::default()
        }),
    )
    .await
    .expect("arguments are valid");

    let response = explain_sentiment(
        &state,
        ExplainSentimentArgs {
            coin_id: 2,
            point: "2025-04-21 00:03".to_string(),
        },
    )
    .await
    .expect("explain should answer");
    assert_eq!(response.explanation, NO_EXPLANATION);
    assert_eq!(response.start_time, "2025-04-20T23:58:00.000Z");
    assert_eq!(response.end_time, "2025-04-21T00:03:00.000Z");

    server.await.expect("server task should finish");
}
