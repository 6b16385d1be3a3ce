pub mod board;
pub mod channels;
pub mod invites;
pub mod presence;
pub mod workspaces;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use serde::Serialize;
use serde_json::json;

use crate::error::AppError;

/// Serialize `value` and push it as a text frame.
pub(crate) async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).map_err(axum::Error::new)?;
    socket.send(WsMessage::Text(text)).await
}

/// Error frame for socket clients, shaped like the HTTP error body.
pub(crate) fn error_frame(err: &AppError) -> serde_json::Value {
    let message = if err.is_infrastructure() {
        tracing::error!("Socket operation failed: {:?}", err);
        "Internal error".to_string()
    } else {
        err.to_string()
    };
    json!({ "event": "error", "error": message, "kind": err.kind() })
}
