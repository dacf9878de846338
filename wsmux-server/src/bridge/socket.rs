//! WebSocket pump for one connection

use std::borrow::Cow;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use wsmux_protocol::{close_code, encode_server, ConnectParams, ServerMessage};

use super::{ConnectionBridge, Rejection};
use crate::http::AppState;
use crate::observability::Metrics;

type WsSink = SplitSink<WebSocket, Message>;

/// Serve an upgraded socket until either side goes away
pub async fn serve_socket(socket: WebSocket, state: AppState, params: ConnectParams) {
    Metrics::global().record_connection_opened();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (bridge, mut outbound) =
        match ConnectionBridge::open(&state.registry, state.resolver.as_ref(), &params).await {
            Ok(bound) => bound,
            Err(rejection) => {
                reject(&mut ws_tx, rejection).await;
                return;
            }
        };

    let mut exited = false;

    loop {
        tokio::select! {
            message = outbound.recv() => {
                match message {
                    Some(message) => {
                        exited |= matches!(message, ServerMessage::Exit { .. });
                        if send_message(&mut ws_tx, &message).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // The session dropped our queue: either it exited or we fell behind
                        let (code, reason) = if exited {
                            (close_code::NORMAL, "session exited")
                        } else {
                            (close_code::DETACHED, "connection fell behind")
                        };
                        close(&mut ws_tx, code, reason).await;
                        break;
                    }
                }
            }

            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = bridge.handle_text(&text) {
                            if send_message(&mut ws_tx, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        Metrics::global().record_rejected_frame();
                        let reply = ServerMessage::error("Binary frames are not supported");
                        if send_message(&mut ws_tx, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ping/Pong handled automatically
                    Some(Err(e)) => {
                        debug!(client_id = %bridge.client_id(), error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        }
    }

    debug!(session_id = %bridge.session_id(), client_id = %bridge.client_id(), "Connection closed");
}

async fn send_message(ws_tx: &mut WsSink, message: &ServerMessage) -> Result<(), axum::Error> {
    match encode_server(message) {
        Ok(text) => ws_tx.send(Message::Text(text)).await,
        Err(e) => {
            warn!(error = %e, "Failed to encode server message");
            Ok(())
        }
    }
}

async fn close(ws_tx: &mut WsSink, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    };
    let _ = ws_tx.send(Message::Close(Some(frame))).await;
    let _ = ws_tx.flush().await;
}

/// Report a failed resolution and close with its code
async fn reject(ws_tx: &mut WsSink, rejection: Rejection) {
    debug!(code = rejection.close_code, message = %rejection.message, "Rejecting connection");
    let reason = match rejection.close_code {
        close_code::UNKNOWN_SESSION => "unknown session",
        _ => "session unavailable",
    };
    let _ = send_message(ws_tx, &ServerMessage::error(rejection.message)).await;
    close(ws_tx, rejection.close_code, reason).await;
}
