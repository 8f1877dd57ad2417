//! Live tests against an in-process SSE server

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::Router;
use download_stream::{kinds, ConnectionState, EventStreamClient, StreamConfig, StreamMessage};
use futures::Stream;
use parking_lot::Mutex;
use serde_json::json;

// ============================================================================
// Server
// ============================================================================

#[derive(Default)]
struct ServerState {
    connections: AtomicUsize,
    authorization: Mutex<Vec<String>>,
}

fn frame(value: serde_json::Value) -> Result<Event, Infallible> {
    Ok(Event::default().data(value.to_string()))
}

/// First connection: a scripted burst, then the server hangs up.
/// Later connections: a greeting, then heartbeats until the client leaves.
async fn events(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let n = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(auth) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        state.authorization.lock().push(auth.to_string());
    }

    let stream = async_stream::stream! {
        yield frame(json!({"type": "connection", "status": "connected"}));

        if n == 1 {
            yield frame(json!({"type": "heartbeat", "queue_size": 0}));
            yield Ok(Event::default().data("not json"));
            yield frame(json!({"type": "status_update", "data": {"id": 1, "status": "downloading", "progress": 0}}));
            yield Ok(Event::default().comment("keep-alive"));
            yield frame(json!({"type": "status_update", "data": {"id": 1, "status": "proxying", "progress": 0}}));
            yield Ok(Event::default().event("ping").data("{\"type\":\"test_message\"}"));
            yield frame(json!({"type": "force_refresh"}));
            tokio::time::sleep(Duration::from_millis(200)).await;
        } else {
            yield frame(json!({"type": "test_message", "connection": n}));
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                yield frame(json!({"type": "heartbeat"}));
            }
        }
    };

    Sse::new(stream)
}

/// Emits a progress update for job 7 every 20ms, forever
async fn chatty() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut progress = 0u64;
        loop {
            progress += 1;
            yield frame(json!({"type": "status_update", "data": {"id": 7, "status": "waiting", "progress": progress}}));
            yield frame(json!({"type": "test_message"}));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    Sse::new(stream)
}

async fn start_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

// ============================================================================
// Helpers
// ============================================================================

fn fast_config(base_url: String) -> StreamConfig {
    StreamConfig {
        coalesce_window_ms: 30,
        reconnect_base_ms: 50,
        reconnect_increment_ms: 0,
        reconnect_cap_ms: 50,
        ..StreamConfig::new(base_url)
    }
}

type Seen = Arc<Mutex<Vec<StreamMessage>>>;

fn collect(client: &EventStreamClient) -> Seen {
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    client.connect(move |m| sink.lock().push(m)).unwrap();
    seen
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn count_type(seen: &Seen, kind: &str) -> usize {
    seen.lock().iter().filter(|m| m.message_type() == kind).count()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_filters_batches_and_reconnects() {
    let state = Arc::new(ServerState::default());
    let router = Router::new()
        .route("/api/events", get(events))
        .with_state(state.clone());
    let base_url = start_server(router).await;

    let mut config = fast_config(base_url);
    config.auth_token = Some("secret-token".to_string());
    let client = EventStreamClient::spawn(&config).unwrap();
    let seen = collect(&client);

    wait_until("the coalesced batch", || {
        count_type(&seen, kinds::BATCH_STATUS_UPDATE) == 1
    })
    .await;
    {
        let seen = seen.lock();
        assert_eq!(seen[0].message_type(), kinds::FORCE_REFRESH);
        let batch = seen[1].as_batch().unwrap();
        assert_eq!(batch.data, vec![json!({"id": 1, "status": "proxying", "progress": 0})]);
        assert!(seen
            .iter()
            .all(|m| m.message_type() != kinds::HEARTBEAT && m.message_type() != kinds::CONNECTION));
    }

    // The first stream ends; the client comes back on its own
    wait_until("the second connection", || {
        count_type(&seen, kinds::TEST_MESSAGE) == 1
    })
    .await;
    assert_eq!(state.connections.load(Ordering::SeqCst), 2);
    let forwarded = seen.lock().last().cloned().unwrap();
    assert_eq!(forwarded.as_single().unwrap().extra["connection"], json!(2));

    wait_until("status to settle", || client.is_connected()).await;
    let status = client.status();
    assert_eq!(status.state, ConnectionState::Open);
    assert_eq!(status.attempt, 0);

    assert_eq!(
        *state.authorization.lock(),
        vec!["Bearer secret-token".to_string(); 2]
    );

    client.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_stops_delivery() {
    let router = Router::new().route("/api/events", get(chatty));
    let base_url = start_server(router).await;

    let client = EventStreamClient::spawn(&fast_config(base_url)).unwrap();
    let seen = collect(&client);

    wait_until("a few messages", || seen.lock().len() >= 4).await;
    client.disconnect().unwrap();
    wait_until("the closed state", || {
        client.status().state == ConnectionState::Closed
    })
    .await;

    let delivered = seen.lock().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(seen.lock().len(), delivered);
    assert!(!client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn test_gives_up_against_unreachable_server() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = StreamConfig {
        reconnect_base_ms: 10,
        reconnect_increment_ms: 0,
        reconnect_cap_ms: 10,
        max_reconnect_attempts: 2,
        ..StreamConfig::new(format!("http://{}", addr))
    };
    let client = EventStreamClient::spawn(&config).unwrap();
    let seen = collect(&client);
    let mut status = client.subscribe_status();

    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.exhausted))
        .await
        .expect("exhaustion within 5s")
        .unwrap();

    let final_status = client.status();
    assert_eq!(final_status.attempt, 3);
    assert_eq!(final_status.state, ConnectionState::Reconnecting);
    assert!(!final_status.connected);
    assert!(seen.lock().is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn test_rejected_stream_is_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let router = Router::new().route(
        "/api/events",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                axum::http::StatusCode::UNAUTHORIZED
            }
        }),
    );
    let base_url = start_server(router).await;

    let config = StreamConfig {
        max_reconnect_attempts: 1,
        ..fast_config(base_url)
    };
    let client = EventStreamClient::spawn(&config).unwrap();
    let _seen = collect(&client);

    wait_until("exhaustion", || client.status().exhausted).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    client.shutdown().await;
}
