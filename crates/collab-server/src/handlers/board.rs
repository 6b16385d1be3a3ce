use axum::{extract::State, Extension};
use collab_shared::{
    api::{
        CreateCardRequest, CreateColumnRequest, CreateTagRequest, MoveCardRequest,
        ReorderColumnRequest, SetCardTagsRequest, UpdateCardRequest, UpdateColumnRequest,
        UpdateTagRequest,
    },
    Board, KanbanCard, KanbanColumn, KanbanTag, Session,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{Json, Path};
use crate::routes::AppState;

/// GET /api/v1/workspaces/:id/board
pub async fn get_board(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Board>, AppError> {
    Ok(Json(state.board.board(session.user_id, workspace_id).await?))
}

/// POST /api/v1/workspaces/:id/board/columns
pub async fn create_column(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<CreateColumnRequest>,
) -> Result<Json<KanbanColumn>, AppError> {
    let column = state
        .board
        .create_column(session.user_id, workspace_id, &req.title, req.category)
        .await?;

    Ok(Json(column))
}

/// PATCH /api/v1/workspaces/:id/board/columns/:column_id
pub async fn update_column(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((workspace_id, column_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateColumnRequest>,
) -> Result<Json<KanbanColumn>, AppError> {
    let column = state
        .board
        .update_column(session.user_id, workspace_id, column_id, req)
        .await?;

    Ok(Json(column))
}

/// POST /api/v1/workspaces/:id/board/columns/:column_id/reorder
pub async fn reorder_column(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((workspace_id, column_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ReorderColumnRequest>,
) -> Result<Json<Vec<KanbanColumn>>, AppError> {
    let columns = state
        .board
        .reorder_column(session.user_id, workspace_id, column_id, req.position)
        .await?;

    Ok(Json(columns))
}

/// DELETE /api/v1/workspaces/:id/board/columns/:column_id
pub async fn delete_column(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((workspace_id, column_id)): Path<(Uuid, Uuid)>,
) -> Result<(), AppError> {
    state
        .board
        .delete_column(session.user_id, workspace_id, column_id)
        .await
}

/// GET /api/v1/workspaces/:id/tags
pub async fn list_tags(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Vec<KanbanTag>>, AppError> {
    Ok(Json(state.board.list_tags(session.user_id, workspace_id).await?))
}

/// POST /api/v1/workspaces/:id/tags
pub async fn create_tag(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<CreateTagRequest>,
) -> Result<Json<KanbanTag>, AppError> {
    let tag = state
        .board
        .create_tag(session.user_id, workspace_id, &req.name, req.color)
        .await?;

    Ok(Json(tag))
}

/// PATCH /api/v1/workspaces/:id/tags/:tag_id
pub async fn update_tag(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((workspace_id, tag_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateTagRequest>,
) -> Result<Json<KanbanTag>, AppError> {
    let tag = state
        .board
        .update_tag(session.user_id, workspace_id, tag_id, req)
        .await?;

    Ok(Json(tag))
}

/// DELETE /api/v1/workspaces/:id/tags/:tag_id
pub async fn delete_tag(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((workspace_id, tag_id)): Path<(Uuid, Uuid)>,
) -> Result<(), AppError> {
    state
        .board
        .delete_tag(session.user_id, workspace_id, tag_id)
        .await
}

/// POST /api/v1/workspaces/:id/board/cards
pub async fn create_card(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<CreateCardRequest>,
) -> Result<Json<KanbanCard>, AppError> {
    let card = state
        .board
        .create_card(session.user_id, workspace_id, req)
        .await?;

    Ok(Json(card))
}

/// PATCH /api/v1/workspaces/:id/board/cards/:card_id
pub async fn update_card(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((workspace_id, card_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateCardRequest>,
) -> Result<Json<KanbanCard>, AppError> {
    let card = state
        .board
        .update_card(session.user_id, workspace_id, card_id, req)
        .await?;

    Ok(Json(card))
}

/// POST /api/v1/workspaces/:id/board/cards/:card_id/move
pub async fn move_card(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((workspace_id, card_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<MoveCardRequest>,
) -> Result<Json<KanbanCard>, AppError> {
    let card = state
        .board
        .move_card(
            session.user_id,
            workspace_id,
            card_id,
            req.column_id,
            req.position,
        )
        .await?;

    Ok(Json(card))
}

/// PUT /api/v1/workspaces/:id/board/cards/:card_id/tags
pub async fn set_card_tags(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((workspace_id, card_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<SetCardTagsRequest>,
) -> Result<Json<KanbanCard>, AppError> {
    let card = state
        .board
        .set_card_tags(session.user_id, workspace_id, card_id, &req.tag_ids)
        .await?;

    Ok(Json(card))
}

/// DELETE /api/v1/workspaces/:id/board/cards/:card_id
pub async fn delete_card(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((workspace_id, card_id)): Path<(Uuid, Uuid)>,
) -> Result<(), AppError> {
    state
        .board
        .delete_card(session.user_id, workspace_id, card_id)
        .await
}
