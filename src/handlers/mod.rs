//! HTTP and WebSocket handlers
//!
//! Two endpoints: the `/session` duplex socket that carries the whole
//! judging protocol, and `GET /status` for liveness checks. Only one client
//! may hold the session; a second upgrade attempt is closed with 1013
//! ("Try Again Later").

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};

use crate::constants::WS_CLOSE_TRY_AGAIN_LATER;
use crate::session::{OutboundMessage, SessionManager};
use crate::state::AppState;

/// Application routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/session", get(session_ws))
        .route("/status", get(status))
}

/// Session status endpoint; 503 while no client is connected
async fn status(State(state): State<AppState>) -> Response {
    let manager = state.manager();
    if manager.is_disconnected().await {
        (StatusCode::SERVICE_UNAVAILABLE, "no session is running").into_response()
    } else {
        Json(manager.status().await).into_response()
    }
}

/// Duplex session endpoint
async fn session_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let manager = state.manager();

    // Single-tenant rule: one connection in idle|busy at a time
    if !manager.is_disconnected().await {
        tracing::warn!("Rejecting connection, session is busy");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: WS_CLOSE_TRY_AGAIN_LATER,
                reason: "busy".into(),
            })))
            .await;
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<OutboundMessage>();

    let heartbeat_tx = outbound_tx.clone();
    manager.connect(outbound_tx).await;

    // Writer: the only task touching the sink, so sends never interleave
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let outcome = match message {
                OutboundMessage::Frame(text) => sender.send(Message::Text(text.into())).await,
                OutboundMessage::Ping => sender.send(Message::Ping(Bytes::new())).await,
                OutboundMessage::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };
            if outcome.is_err() {
                break;
            }
        }
    });

    // Reader: inbound frames drive the session state machine
    let recv_manager: Arc<SessionManager> = Arc::clone(manager);
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            if recv_manager.should_stop_recv() {
                break;
            }
            match message {
                Ok(Message::Text(text)) => {
                    if recv_manager.handle(text.as_str()).await.is_break() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!("WebSocket error: {e}");
                    break;
                }
                _ => {}
            }
        }
    });

    // is_alive: probe the peer on every heartbeat tick; a dead writer means
    // a dead peer
    let interval = state.config().session.heartbeat_interval;
    let mut heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if heartbeat_tx.send(OutboundMessage::Ping).is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            heartbeat_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
            heartbeat_task.abort();
        }
        _ = &mut heartbeat_task => {
            send_task.abort();
            recv_task.abort();
        }
    }

    manager.disconnect().await;
}
