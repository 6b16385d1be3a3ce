//! Persistence port for the collaboration core.
//!
//! Every method is atomic: operations that touch several rows either commit
//! completely or not at all. Uniqueness constraints are enforced here, not by
//! callers scanning for duplicates.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collab_shared::{
    Channel, InviteRecord, KanbanCard, KanbanColumn, KanbanTag, Membership, Message, NewMessage,
    Workspace, WorkspaceRole,
};
use uuid::Uuid;

use crate::error::AppError;

/// Everything created together when a workspace is bootstrapped.
#[derive(Debug, Clone)]
pub struct WorkspaceSeed {
    pub workspace: Workspace,
    pub owner: Membership,
    pub columns: Vec<KanbanColumn>,
    pub tags: Vec<KanbanTag>,
    pub channels: Vec<Channel>,
}

/// Result of inserting a membership that may already exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipInsert {
    Created(Membership),
    Existing(Membership),
}

#[async_trait]
pub trait Store: Send + Sync {
    // Workspaces and memberships
    async fn create_workspace(&self, seed: &WorkspaceSeed) -> Result<(), AppError>;
    async fn get_workspace(&self, workspace_id: Uuid) -> Result<Option<Workspace>, AppError>;
    /// Removes the workspace and everything it owns. Returns false if absent.
    async fn delete_workspace(&self, workspace_id: Uuid) -> Result<bool, AppError>;
    async fn list_workspaces_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(Workspace, WorkspaceRole)>, AppError>;

    async fn get_membership(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Option<Membership>, AppError>;
    async fn list_memberships(&self, workspace_id: Uuid) -> Result<Vec<Membership>, AppError>;
    /// Inserting an existing (user, workspace) pair is not an error.
    async fn insert_membership(&self, membership: &Membership)
        -> Result<MembershipInsert, AppError>;
    async fn update_membership_role(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<Option<Membership>, AppError>;
    async fn delete_membership(&self, user_id: Uuid, workspace_id: Uuid)
        -> Result<bool, AppError>;

    // Invites
    async fn insert_invite(&self, invite: &InviteRecord) -> Result<(), AppError>;
    async fn get_invite(&self, token_hash: &str) -> Result<Option<InviteRecord>, AppError>;
    /// Consume the invite and make `user_id` a member in one step.
    ///
    /// Fails with `NotFound`, `Expired` or `AlreadyConsumed`; an existing
    /// membership is returned unchanged.
    async fn redeem_invite(
        &self,
        token_hash: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Membership, AppError>;
    /// Consume the invite without joining. Same failure rules as `redeem_invite`.
    async fn decline_invite(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), AppError>;

    // Channels and messages
    async fn insert_channel(&self, channel: &Channel) -> Result<(), AppError>;
    async fn get_channel(&self, channel_id: Uuid) -> Result<Option<Channel>, AppError>;
    async fn list_channels(&self, workspace_id: Uuid) -> Result<Vec<Channel>, AppError>;
    /// Record a message with the next sequence number of its channel.
    async fn append_message(&self, message: NewMessage) -> Result<Message, AppError>;
    async fn list_messages(
        &self,
        channel_id: Uuid,
        after_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Message>, AppError>;

    // Kanban columns
    /// Columns of a workspace sorted by `order`.
    async fn list_columns(&self, workspace_id: Uuid) -> Result<Vec<KanbanColumn>, AppError>;
    async fn get_column(&self, column_id: Uuid) -> Result<Option<KanbanColumn>, AppError>;
    async fn insert_column(&self, column: &KanbanColumn) -> Result<(), AppError>;
    /// Persists title and category; `order` is only changed via `set_column_orders`.
    async fn update_column(&self, column: &KanbanColumn) -> Result<(), AppError>;
    /// Apply several order changes at once. The resulting orders must stay unique.
    async fn set_column_orders(
        &self,
        workspace_id: Uuid,
        orders: &[(Uuid, f64)],
    ) -> Result<(), AppError>;
    async fn delete_column(&self, column_id: Uuid) -> Result<bool, AppError>;

    // Kanban tags
    async fn list_tags(&self, workspace_id: Uuid) -> Result<Vec<KanbanTag>, AppError>;
    async fn get_tag(&self, tag_id: Uuid) -> Result<Option<KanbanTag>, AppError>;
    async fn insert_tag(&self, tag: &KanbanTag) -> Result<(), AppError>;
    async fn update_tag(&self, tag: &KanbanTag) -> Result<(), AppError>;
    /// Deletes the tag and detaches it from every card.
    async fn delete_tag(&self, tag_id: Uuid) -> Result<bool, AppError>;

    // Kanban cards
    /// Cards of a workspace sorted by column order, then card order.
    async fn list_cards(&self, workspace_id: Uuid) -> Result<Vec<KanbanCard>, AppError>;
    async fn list_cards_in_column(&self, column_id: Uuid) -> Result<Vec<KanbanCard>, AppError>;
    async fn get_card(&self, card_id: Uuid) -> Result<Option<KanbanCard>, AppError>;
    async fn insert_card(&self, card: &KanbanCard) -> Result<(), AppError>;
    /// Persists every mutable field, including `tag_ids`.
    async fn update_card(&self, card: &KanbanCard) -> Result<(), AppError>;
    /// Rewrite the orders of cards that already sit in `column_id`, atomically.
    async fn set_card_orders(
        &self,
        column_id: Uuid,
        orders: &[(Uuid, f64)],
    ) -> Result<(), AppError>;
    async fn delete_card(&self, card_id: Uuid) -> Result<bool, AppError>;
}
