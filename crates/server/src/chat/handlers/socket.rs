//! WebSocket transport
//!
//! Each socket gets a bounded outbound queue drained by a writer task. The
//! reader loop hands frames to the relay one at a time, so a connection's
//! events are processed in arrival order.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::chat::protocol::ServerEvent;
use crate::chat::role::Role;
use crate::core::config::{AppState, CorsOrigins};
use crate::core::error::{Error, Result};

/// GET /ws
pub async fn user_socket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response> {
    upgrade(ws, &headers, state, Role::User)
}

/// GET /ws/developer
pub async fn developer_socket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response> {
    upgrade(ws, &headers, state, Role::Developer)
}

fn upgrade(ws: WebSocketUpgrade, headers: &HeaderMap, state: AppState, role: Role) -> Result<Response> {
    check_origin(headers, &state.config.cors_origins)?;
    Ok(ws.on_upgrade(move |socket| serve_socket(socket, role, state)))
}

/// Browsers always send `Origin`; clients without one are not cross-site.
fn check_origin(headers: &HeaderMap, allowed: &CorsOrigins) -> Result<()> {
    let CorsOrigins::List(list) = allowed else {
        return Ok(());
    };
    let Some(origin) = headers.get(header::ORIGIN) else {
        return Ok(());
    };
    let origin = origin.to_str().unwrap_or_default();
    if list.iter().any(|o| o == origin) {
        Ok(())
    } else {
        warn!("[Socket] Rejected upgrade from origin '{}'", origin);
        Err(Error::Forbidden("websocket"))
    }
}

async fn serve_socket(socket: WebSocket, role: Role, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.outbound_buffer);

    let relay = state.relay.clone();
    let conn = relay.connect(role, tx);
    info!("[Socket] {} connected as {}", conn, role.as_str());

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("[Socket] Failed to encode event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => relay.handle_frame(conn, text.as_str()).await,
            Ok(Message::Binary(_)) => debug!("[Socket] Ignoring binary frame from {}", conn),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("[Socket] Read error on {}: {}", conn, e);
                break;
            }
        }
        if writer.is_finished() {
            break;
        }
    }

    relay.disconnect(conn).await;
    writer.abort();
    info!("[Socket] {} disconnected", conn);
}
