//! HTTP and WebSocket surface
//!
//! `/ws` is the terminal endpoint. The `/api/sessions` routes, `/health`
//! and `/metrics` are the administrative view over the registry.

use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use wsmux_protocol::{ConnectParams, SessionId, SessionSummary};
use wsmux_utils::Result;

use crate::bridge::serve_socket;
use crate::observability::Metrics;
use crate::project::ProjectResolver;
use crate::session::SessionRegistry;

/// Default number of lines returned by the tail route
const DEFAULT_TAIL_LINES: usize = 40;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub resolver: Arc<dyn ProjectResolver>,
}

impl AppState {
    pub fn new(registry: SessionRegistry, resolver: Arc<dyn ProjectResolver>) -> Self {
        Self { registry, resolver }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id", delete(destroy_session))
        .route("/api/sessions/:id/tail", get(session_tail))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state, params))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.registry.list())
}

async fn destroy_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match SessionId::parse(&id) {
        Some(id) if state.registry.destroy(&id) => StatusCode::NO_CONTENT,
        _ => StatusCode::NOT_FOUND,
    }
}

#[derive(Debug, Deserialize)]
struct TailQuery {
    lines: Option<usize>,
    strip: Option<bool>,
}

async fn session_tail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TailQuery>,
) -> Response {
    let Some(id) = SessionId::parse(&id).filter(|id| state.registry.get(id).is_some()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let text = state.registry.capture_tail(
        &id,
        query.lines.unwrap_or(DEFAULT_TAIL_LINES),
        query.strip.unwrap_or(true),
    );
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response()
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.registry.len(),
    })
}

async fn metrics(State(state): State<AppState>) -> Response {
    let mut gauges = state.registry.gauges();
    gauges.collect_process_metrics();
    let body = Metrics::global().to_prometheus(&gauges);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use futures::{SinkExt, StreamExt};
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    use crate::config::SessionsConfig;
    use crate::project::DirectoryResolver;
    use wsmux_protocol::{close_code, ServerMessage};

    type Client =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    fn test_state(idle_timeout_secs: u64) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(SessionsConfig {
            shell: "/bin/sh".into(),
            idle_timeout_secs,
            kill_grace_ms: 500,
            exit_drain_ms: 100,
            ..Default::default()
        });
        let resolver = Arc::new(DirectoryResolver::new(dir.path(), true));
        (AppState::new(registry, resolver), dir)
    }

    async fn spawn_server(state: AppState) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state, std::future::pending()));
        addr
    }

    async fn connect(addr: SocketAddr, query: &str) -> Client {
        let url = format!("ws://{}/ws?{}", addr, query);
        let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        client
    }

    /// Next server message, skipping control frames; `None` on close
    async fn next_message(client: &mut Client) -> Option<ServerMessage> {
        loop {
            let frame = timeout(Duration::from_secs(10), client.next())
                .await
                .expect("timed out waiting for a frame")?
                .ok()?;
            match frame {
                WsMessage::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
                WsMessage::Close(_) => return None,
                _ => continue,
            }
        }
    }

    async fn send_json(client: &mut Client, value: serde_json::Value) {
        client.send(WsMessage::Text(value.to_string())).await.unwrap();
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        timeout(Duration::from_secs(10), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_end_to_end_session() {
        let (state, dir) = test_state(1);
        let registry = state.registry.clone();
        let addr = spawn_server(state).await;

        let mut client = connect(addr, "project=demo&cols=80&rows=24").await;

        let id = match next_message(&mut client).await {
            Some(ServerMessage::SessionId { session_id }) => session_id,
            other => panic!("Expected sessionID, got {:?}", other),
        };
        let summary = registry.list().into_iter().find(|s| s.id == id).unwrap();
        assert_eq!(summary.cwd, dir.path().join("demo").display().to_string());
        assert_eq!((summary.cols, summary.rows), (80, 24));

        send_json(&mut client, serde_json::json!({"type": "input", "data": "echo hi\n"})).await;

        let mut output = String::new();
        while !output.contains("\nhi\r\n") {
            match next_message(&mut client).await {
                Some(ServerMessage::Output { data }) => output.push_str(&data),
                Some(ServerMessage::SessionId { .. }) => panic!("Duplicate sessionID"),
                other => panic!("Unexpected message: {:?}", other),
            }
        }

        send_json(&mut client, serde_json::json!({"type": "resize", "cols": 100, "rows": 30})).await;
        wait_for(|| registry.pty_size(&id) == Some((100, 30))).await;

        client.close(None).await.unwrap();
        wait_for(|| registry.get(&id).is_none()).await;
    }

    #[tokio::test]
    async fn test_non_numeric_size_falls_back_to_defaults() {
        let (state, _dir) = test_state(3600);
        let registry = state.registry.clone();
        let addr = spawn_server(state).await;

        let mut client = connect(addr, "cols=abc&rows=30").await;

        let id = match next_message(&mut client).await {
            Some(ServerMessage::SessionId { session_id }) => session_id,
            other => panic!("Expected sessionID, got {:?}", other),
        };
        let summary = registry.list().into_iter().find(|s| s.id == id).unwrap();
        let config = registry.config();
        assert_eq!(
            (summary.cols, summary.rows),
            (config.default_cols, config.default_rows)
        );

        client.close(None).await.unwrap();
        registry.destroy(&id);
    }

    #[tokio::test]
    async fn test_unknown_session_closes_with_4004() {
        let (state, _dir) = test_state(3600);
        let registry = state.registry.clone();
        let addr = spawn_server(state).await;

        let mut client = connect(addr, "sessionId=no-such-session").await;

        match timeout(Duration::from_secs(10), client.next()).await.unwrap() {
            Some(Ok(WsMessage::Text(text))) => {
                let msg: ServerMessage = serde_json::from_str(&text).unwrap();
                assert!(matches!(msg, ServerMessage::Error { .. }));
            }
            other => panic!("Expected error message, got {:?}", other),
        }
        match timeout(Duration::from_secs(10), client.next()).await.unwrap() {
            Some(Ok(WsMessage::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), close_code::UNKNOWN_SESSION);
            }
            other => panic!("Expected close frame, got {:?}", other),
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reattach_replays_without_session_id() {
        let (state, _dir) = test_state(3600);
        let registry = state.registry.clone();
        let addr = spawn_server(state).await;

        let mut first = connect(addr, "").await;
        let id = match next_message(&mut first).await {
            Some(ServerMessage::SessionId { session_id }) => session_id,
            other => panic!("Expected sessionID, got {:?}", other),
        };

        send_json(&mut first, serde_json::json!({"type": "input", "data": "echo marker\n"})).await;
        let mut seen = String::new();
        while !seen.contains("\nmarker\r\n") {
            if let Some(ServerMessage::Output { data }) = next_message(&mut first).await {
                seen.push_str(&data);
            }
        }
        first.close(None).await.unwrap();
        wait_for(|| registry.get(&id).is_some_and(|r| r.attached_count() == 0)).await;

        let mut second = connect(addr, &format!("sessionId={}", id)).await;
        match next_message(&mut second).await {
            Some(ServerMessage::Output { data }) => assert!(data.contains("marker")),
            other => panic!("Expected replay, got {:?}", other),
        }

        registry.destroy(&id);
    }

    #[tokio::test]
    async fn test_bad_frames_get_error_and_connection_survives() {
        let (state, _dir) = test_state(3600);
        let registry = state.registry.clone();
        let addr = spawn_server(state).await;

        let mut client = connect(addr, "").await;
        let id = match next_message(&mut client).await {
            Some(ServerMessage::SessionId { session_id }) => session_id,
            other => panic!("Expected sessionID, got {:?}", other),
        };

        client.send(WsMessage::Text("{nope".into())).await.unwrap();
        client.send(WsMessage::Binary(vec![1, 2, 3])).await.unwrap();

        let mut errors = 0;
        while errors < 2 {
            match next_message(&mut client).await {
                Some(ServerMessage::Error { .. }) => errors += 1,
                Some(ServerMessage::Output { .. }) => {}
                other => panic!("Unexpected message: {:?}", other),
            }
        }
        assert_eq!(registry.get(&id).unwrap().attached_count(), 1);

        registry.destroy(&id);
    }

    #[tokio::test]
    async fn test_shell_exit_sends_exit_and_closes_normally() {
        let (state, _dir) = test_state(3600);
        let registry = state.registry.clone();
        let addr = spawn_server(state).await;

        let mut client = connect(addr, "").await;
        let id = match next_message(&mut client).await {
            Some(ServerMessage::SessionId { session_id }) => session_id,
            other => panic!("Expected sessionID, got {:?}", other),
        };

        send_json(&mut client, serde_json::json!({"type": "input", "data": "exit 3\n"})).await;

        loop {
            match timeout(Duration::from_secs(10), client.next()).await.unwrap() {
                Some(Ok(WsMessage::Text(text))) => {
                    let msg: ServerMessage = serde_json::from_str(&text).unwrap();
                    if let ServerMessage::Exit { exit_code, signal } = msg {
                        assert_eq!(exit_code, 3);
                        assert_eq!(signal, None);
                    }
                }
                Some(Ok(WsMessage::Close(Some(frame)))) => {
                    assert_eq!(u16::from(frame.code), close_code::NORMAL);
                    break;
                }
                other => panic!("Unexpected frame: {:?}", other),
            }
        }
        assert!(registry.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_admin_routes() {
        let (state, dir) = test_state(3600);
        let registry = state.registry.clone();
        let outcome = registry
            .create(None, dir.path().to_path_buf(), 80, 24)
            .await
            .unwrap();
        let id = outcome.record.id().clone();
        drop(outcome);
        let app = router(state);

        let response = app
            .clone()
            .oneshot(Request::get("/api/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let sessions: Vec<SessionSummary> = serde_json::from_slice(&body).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, id);

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/sessions/{}/tail?lines=5", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health, serde_json::json!({"status": "ok", "sessions": 1}));

        let response = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("wsmux_active_sessions 1"));

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/sessions/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(registry.get(&id).is_none());

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/sessions/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::get("/api/sessions/missing/tail")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
