use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use collab_shared::{
    api::{OnlineUsersResponse, PresenceParams},
    Session,
};
use uuid::Uuid;

use super::{error_frame, send_json};
use crate::error::AppError;
use crate::extract::{Json, Path, Query};
use crate::membership::MembershipWatch;
use crate::permission::ANY_MEMBER;
use crate::presence::PresenceTracker;
use crate::routes::AppState;

/// GET /api/v1/workspaces/:id/presence
pub async fn online_users(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<OnlineUsersResponse>, AppError> {
    state
        .members
        .require(session.user_id, workspace_id, ANY_MEMBER)
        .await?;

    Ok(Json(OnlineUsersResponse {
        workspace_id,
        online: state.presence.online_users(workspace_id),
    }))
}

/// GET /api/v1/workspaces/:id/presence/ws?connection_id=
///
/// Every frame the client sends counts as a heartbeat. The socket is closed
/// when the user stops being a member.
pub async fn presence_ws(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
    Query(params): Query<PresenceParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let watch = state.members.watch(session.user_id, workspace_id).await?;
    let connection_id = params.connection_id.unwrap_or_else(Uuid::new_v4);

    Ok(ws.on_upgrade(move |socket| presence_socket(socket, state, watch, connection_id)))
}

/// Refresh a connection after a client frame. A connection the sweeper already
/// expired is tracked again, but only while the user is still a member.
/// Returns false when the socket should be closed.
pub(crate) async fn refresh_connection(
    presence: &PresenceTracker,
    watch: &MembershipWatch,
    connection_id: Uuid,
) -> bool {
    let (workspace_id, user_id) = (watch.workspace_id(), watch.user_id());
    if presence.heartbeat(workspace_id, user_id, connection_id) {
        return true;
    }
    if !watch.is_member().await {
        return false;
    }

    presence.track(workspace_id, user_id, connection_id);
    true
}

async fn presence_socket(
    mut socket: WebSocket,
    state: AppState,
    mut watch: MembershipWatch,
    connection_id: Uuid,
) {
    let (workspace_id, user_id) = (watch.workspace_id(), watch.user_id());
    let presence = state.presence.clone();
    presence.track(workspace_id, user_id, connection_id);
    let mut events = presence.subscribe(workspace_id);

    loop {
        tokio::select! {
            _ = watch.revoked() => {
                let _ = send_json(&mut socket, &error_frame(&AppError::Forbidden)).await;
                break;
            }
            event = events.next() => {
                let Some(event) = event else { break };
                if send_json(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            frame = socket.recv() => match frame {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {
                    if !refresh_connection(&presence, &watch, connection_id).await {
                        let _ = send_json(&mut socket, &error_frame(&AppError::Forbidden)).await;
                        break;
                    }
                }
            },
        }
    }

    presence.disconnect(workspace_id, user_id, connection_id);
    tracing::debug!(%workspace_id, %user_id, %connection_id, "presence socket closed");
}
