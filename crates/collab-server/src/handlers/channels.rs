use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use collab_shared::{
    api::{
        ChannelClientFrame, CreateChannelRequest, HistoryParams, SendMessageRequest,
        TypingRequest,
    },
    Channel, Message, Session,
};
use uuid::Uuid;

use super::{error_frame, send_json};
use crate::bus::ChannelSubscription;
use crate::membership::MembershipWatch;
use crate::error::AppError;
use crate::extract::{Json, Path, Query};
use crate::routes::AppState;

/// GET /api/v1/workspaces/:id/channels
pub async fn list_channels(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Vec<Channel>>, AppError> {
    Ok(Json(
        state
            .channels
            .list_channels(session.user_id, workspace_id)
            .await?,
    ))
}

/// POST /api/v1/workspaces/:id/channels
pub async fn create_channel(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<Json<Channel>, AppError> {
    let channel = state
        .channels
        .create_channel(
            session.user_id,
            workspace_id,
            &req.name,
            req.description,
            req.channel_type,
        )
        .await?;

    Ok(Json(channel))
}

/// GET /api/v1/channels/:id/messages?after=&limit=
pub async fn history(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(channel_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Message>>, AppError> {
    let messages = state
        .bus
        .history(session.user_id, channel_id, params.after, params.limit)
        .await?;

    Ok(Json(messages))
}

/// POST /api/v1/channels/:id/messages
pub async fn send_message(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Message>, AppError> {
    let message = state
        .bus
        .send_message(session.user_id, channel_id, &req.content, req.message_type)
        .await?;

    Ok(Json(message))
}

/// POST /api/v1/channels/:id/typing
pub async fn typing(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<TypingRequest>,
) -> Result<(), AppError> {
    state
        .bus
        .typing(session.user_id, channel_id, req.is_typing)
        .await
}

/// GET /api/v1/channels/:id/ws
///
/// Closed when the user stops being a member of the channel's workspace.
pub async fn channel_ws(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(channel_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    // Subscribe before the upgrade so authorization failures are plain HTTP errors.
    let subscription = state.bus.subscribe(session.user_id, channel_id).await?;
    let watch = state
        .members
        .watch(session.user_id, subscription.workspace_id())
        .await?;

    Ok(ws.on_upgrade(move |socket| channel_socket(socket, state, session, subscription, watch)))
}

async fn channel_socket(
    mut socket: WebSocket,
    state: AppState,
    session: Session,
    mut subscription: ChannelSubscription,
    mut watch: MembershipWatch,
) {
    let channel_id = subscription.channel_id();
    tracing::debug!(%channel_id, user_id = %session.user_id, "channel socket open");

    loop {
        tokio::select! {
            _ = watch.revoked() => {
                let _ = send_json(&mut socket, &error_frame(&AppError::Forbidden)).await;
                break;
            }
            event = subscription.next() => {
                let Some(event) = event else { break };
                if send_json(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            frame = socket.recv() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Err(err) = handle_frame(&state, session, channel_id, &text).await {
                        let forbidden = matches!(err, AppError::Forbidden);
                        if send_json(&mut socket, &error_frame(&err)).await.is_err() || forbidden {
                            break;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(%channel_id, user_id = %session.user_id, "channel socket closed");
}

async fn handle_frame(
    state: &AppState,
    session: Session,
    channel_id: Uuid,
    text: &str,
) -> Result<(), AppError> {
    let frame: ChannelClientFrame = serde_json::from_str(text)
        .map_err(|e| AppError::Validation(format!("Malformed frame: {}", e)))?;

    match frame {
        ChannelClientFrame::Send {
            content,
            message_type,
        } => {
            // The message comes back to this socket through the subscription.
            state
                .bus
                .send_message(session.user_id, channel_id, &content, message_type)
                .await?;
        }
        ChannelClientFrame::Typing { is_typing } => {
            state
                .bus
                .typing(session.user_id, channel_id, is_typing)
                .await?;
        }
    }

    Ok(())
}
