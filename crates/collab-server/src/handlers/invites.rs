use axum::{extract::State, Extension};
use collab_shared::{
    api::{InviteMemberRequest, RedeemInviteRequest},
    InviteToken, Membership, Session,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{Json, Path};
use crate::routes::AppState;

/// POST /api/v1/workspaces/:id/invites
pub async fn create_invite(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<InviteMemberRequest>,
) -> Result<Json<InviteToken>, AppError> {
    let invite = state
        .members
        .invite(session.user_id, workspace_id, &req.email)
        .await?;

    Ok(Json(invite))
}

/// POST /api/v1/invites/redeem
pub async fn redeem_invite(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<RedeemInviteRequest>,
) -> Result<Json<Membership>, AppError> {
    Ok(Json(state.members.redeem(&req.token, session.user_id).await?))
}

/// POST /api/v1/invites/decline
pub async fn decline_invite(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<RedeemInviteRequest>,
) -> Result<(), AppError> {
    state.members.decline(&req.token, session.user_id).await
}
