use axum::{extract::State, Extension};
use collab_shared::{
    api::{CreateWorkspaceRequest, UpdateMemberRoleRequest},
    Membership, Session, Workspace, WorkspaceWithRole,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{Json, Path};
use crate::routes::AppState;

/// POST /api/v1/workspaces
pub async fn create_workspace(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<Json<Workspace>, AppError> {
    let workspace = state
        .members
        .create_workspace(session.user_id, &req.name, req.description)
        .await?;

    Ok(Json(workspace))
}

/// GET /api/v1/workspaces
pub async fn list_workspaces(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<WorkspaceWithRole>>, AppError> {
    Ok(Json(state.members.list_workspaces(session.user_id).await?))
}

/// GET /api/v1/workspaces/:id
pub async fn get_workspace(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<WorkspaceWithRole>, AppError> {
    Ok(Json(
        state
            .members
            .get_workspace(session.user_id, workspace_id)
            .await?,
    ))
}

/// DELETE /api/v1/workspaces/:id
pub async fn delete_workspace(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
) -> Result<(), AppError> {
    state
        .members
        .delete_workspace(session.user_id, workspace_id)
        .await
}

/// GET /api/v1/workspaces/:id/members
pub async fn list_members(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Vec<Membership>>, AppError> {
    Ok(Json(
        state
            .members
            .list_members(session.user_id, workspace_id)
            .await?,
    ))
}

/// PATCH /api/v1/workspaces/:id/members/:user_id
pub async fn update_member_role(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((workspace_id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateMemberRoleRequest>,
) -> Result<Json<Membership>, AppError> {
    let membership = state
        .members
        .change_role(session.user_id, workspace_id, user_id, req.role)
        .await?;

    Ok(Json(membership))
}

/// POST /api/v1/workspaces/:id/leave
pub async fn leave_workspace(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
) -> Result<(), AppError> {
    state.members.leave(session.user_id, workspace_id).await?;
    state.presence.leave(workspace_id, session.user_id);

    Ok(())
}
