//! In-memory store. Used by tests and when no database is configured.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collab_shared::{
    Channel, InviteRecord, KanbanCard, KanbanColumn, KanbanTag, Membership, Message, NewMessage,
    Workspace, WorkspaceRole,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{MembershipInsert, Store, WorkspaceSeed};
use crate::error::AppError;

#[derive(Default)]
struct MemoryState {
    workspaces: HashMap<Uuid, Workspace>,
    /// Keyed by (workspace_id, user_id); one row per pair.
    memberships: HashMap<(Uuid, Uuid), Membership>,
    invites: HashMap<String, InviteRecord>,
    channels: HashMap<Uuid, Channel>,
    /// (workspace_id, name) -> channel_id
    channel_names: HashMap<(Uuid, String), Uuid>,
    /// Messages per channel, index i holds sequence i + 1.
    messages: HashMap<Uuid, Vec<Message>>,
    columns: HashMap<Uuid, KanbanColumn>,
    tags: HashMap<Uuid, KanbanTag>,
    cards: HashMap<Uuid, KanbanCard>,
}

impl MemoryState {
    fn tag_name_taken(&self, workspace_id: Uuid, name: &str, except: Option<Uuid>) -> bool {
        self.tags.values().any(|t| {
            t.workspace_id == workspace_id && t.name == name && Some(t.id) != except
        })
    }

    fn check_invite(&self, token_hash: &str, now: DateTime<Utc>) -> Result<InviteRecord, AppError> {
        let invite = self
            .invites
            .get(token_hash)
            .ok_or(AppError::NotFound("Invite"))?;
        if invite.is_consumed() {
            return Err(AppError::AlreadyConsumed);
        }
        if invite.is_expired(now) {
            return Err(AppError::Expired);
        }
        Ok(invite.clone())
    }

    fn column_order(&self, column_id: Uuid) -> f64 {
        self.columns.get(&column_id).map(|c| c.order).unwrap_or(f64::MAX)
    }
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_workspace(&self, seed: &WorkspaceSeed) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let ws = &seed.workspace;
        if state.workspaces.contains_key(&ws.id) {
            return Err(AppError::Conflict("Workspace already exists".to_string()));
        }

        state.workspaces.insert(ws.id, ws.clone());
        state
            .memberships
            .insert((ws.id, seed.owner.user_id), seed.owner.clone());
        for column in &seed.columns {
            state.columns.insert(column.id, column.clone());
        }
        for tag in &seed.tags {
            state.tags.insert(tag.id, tag.clone());
        }
        for channel in &seed.channels {
            state
                .channel_names
                .insert((ws.id, channel.name.clone()), channel.id);
            state.channels.insert(channel.id, channel.clone());
            state.messages.insert(channel.id, Vec::new());
        }
        Ok(())
    }

    async fn get_workspace(&self, workspace_id: Uuid) -> Result<Option<Workspace>, AppError> {
        Ok(self.state.lock().await.workspaces.get(&workspace_id).cloned())
    }

    async fn delete_workspace(&self, workspace_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.workspaces.remove(&workspace_id).is_none() {
            return Ok(false);
        }

        state.memberships.retain(|(ws, _), _| *ws != workspace_id);
        state.invites.retain(|_, i| i.workspace_id != workspace_id);
        let channel_ids: Vec<Uuid> = state
            .channels
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .map(|c| c.id)
            .collect();
        for id in channel_ids {
            state.channels.remove(&id);
            state.messages.remove(&id);
        }
        state.channel_names.retain(|(ws, _), _| *ws != workspace_id);
        state.columns.retain(|_, c| c.workspace_id != workspace_id);
        state.tags.retain(|_, t| t.workspace_id != workspace_id);
        state.cards.retain(|_, c| c.workspace_id != workspace_id);
        Ok(true)
    }

    async fn list_workspaces_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(Workspace, WorkspaceRole)>, AppError> {
        let state = self.state.lock().await;
        let mut rows: Vec<(Workspace, WorkspaceRole)> = state
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                state
                    .workspaces
                    .get(&m.workspace_id)
                    .map(|w| (w.clone(), m.role))
            })
            .collect();
        rows.sort_by(|a, b| b.0.created_at.cmp(&a.0.created_at));
        Ok(rows)
    }

    async fn get_membership(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Option<Membership>, AppError> {
        Ok(self
            .state
            .lock()
            .await
            .memberships
            .get(&(workspace_id, user_id))
            .cloned())
    }

    async fn list_memberships(&self, workspace_id: Uuid) -> Result<Vec<Membership>, AppError> {
        let state = self.state.lock().await;
        let mut members: Vec<Membership> = state
            .memberships
            .values()
            .filter(|m| m.workspace_id == workspace_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(members)
    }

    async fn insert_membership(
        &self,
        membership: &Membership,
    ) -> Result<MembershipInsert, AppError> {
        let mut state = self.state.lock().await;
        if !state.workspaces.contains_key(&membership.workspace_id) {
            return Err(AppError::NotFound("Workspace"));
        }
        let key = (membership.workspace_id, membership.user_id);
        if let Some(existing) = state.memberships.get(&key) {
            return Ok(MembershipInsert::Existing(existing.clone()));
        }
        state.memberships.insert(key, membership.clone());
        Ok(MembershipInsert::Created(membership.clone()))
    }

    async fn update_membership_role(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<Option<Membership>, AppError> {
        let mut state = self.state.lock().await;
        Ok(state
            .memberships
            .get_mut(&(workspace_id, user_id))
            .map(|m| {
                m.role = role;
                m.clone()
            }))
    }

    async fn delete_membership(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<bool, AppError> {
        Ok(self
            .state
            .lock()
            .await
            .memberships
            .remove(&(workspace_id, user_id))
            .is_some())
    }

    async fn insert_invite(&self, invite: &InviteRecord) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if !state.workspaces.contains_key(&invite.workspace_id) {
            return Err(AppError::NotFound("Workspace"));
        }
        if state.invites.contains_key(&invite.token_hash) {
            return Err(AppError::Conflict("Invite already exists".to_string()));
        }
        state
            .invites
            .insert(invite.token_hash.clone(), invite.clone());
        Ok(())
    }

    async fn get_invite(&self, token_hash: &str) -> Result<Option<InviteRecord>, AppError> {
        Ok(self.state.lock().await.invites.get(token_hash).cloned())
    }

    async fn redeem_invite(
        &self,
        token_hash: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Membership, AppError> {
        let mut state = self.state.lock().await;
        let invite = state.check_invite(token_hash, now)?;
        if !state.workspaces.contains_key(&invite.workspace_id) {
            return Err(AppError::NotFound("Workspace"));
        }

        if let Some(record) = state.invites.get_mut(token_hash) {
            record.consumed_at = Some(now);
        }

        let key = (invite.workspace_id, user_id);
        let membership = state
            .memberships
            .entry(key)
            .or_insert_with(|| Membership {
                user_id,
                workspace_id: invite.workspace_id,
                role: WorkspaceRole::Member,
                joined_at: now,
            })
            .clone();
        Ok(membership)
    }

    async fn decline_invite(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.check_invite(token_hash, now)?;
        if let Some(record) = state.invites.get_mut(token_hash) {
            record.consumed_at = Some(now);
        }
        Ok(())
    }

    async fn insert_channel(&self, channel: &Channel) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if !state.workspaces.contains_key(&channel.workspace_id) {
            return Err(AppError::NotFound("Workspace"));
        }
        let name_key = (channel.workspace_id, channel.name.clone());
        if state.channel_names.contains_key(&name_key) {
            return Err(AppError::Conflict(format!(
                "Channel #{} already exists",
                channel.name
            )));
        }
        state.channel_names.insert(name_key, channel.id);
        state.channels.insert(channel.id, channel.clone());
        state.messages.insert(channel.id, Vec::new());
        Ok(())
    }

    async fn get_channel(&self, channel_id: Uuid) -> Result<Option<Channel>, AppError> {
        Ok(self.state.lock().await.channels.get(&channel_id).cloned())
    }

    async fn list_channels(&self, workspace_id: Uuid) -> Result<Vec<Channel>, AppError> {
        let state = self.state.lock().await;
        let mut channels: Vec<Channel> = state
            .channels
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(channels)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, AppError> {
        let mut state = self.state.lock().await;
        let log = state
            .messages
            .get_mut(&message.channel_id)
            .ok_or(AppError::NotFound("Channel"))?;

        let recorded = Message {
            id: Uuid::new_v4(),
            channel_id: message.channel_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type: message.message_type,
            timestamp: message.timestamp,
            sequence: log.len() as i64 + 1,
        };
        log.push(recorded.clone());
        Ok(recorded)
    }

    async fn list_messages(
        &self,
        channel_id: Uuid,
        after_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Message>, AppError> {
        let state = self.state.lock().await;
        let Some(log) = state.messages.get(&channel_id) else {
            return Ok(Vec::new());
        };
        let start = after_sequence.max(0) as usize;
        Ok(log.iter().skip(start).take(limit).cloned().collect())
    }

    async fn list_columns(&self, workspace_id: Uuid) -> Result<Vec<KanbanColumn>, AppError> {
        let state = self.state.lock().await;
        let mut columns: Vec<KanbanColumn> = state
            .columns
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .cloned()
            .collect();
        columns.sort_by(|a, b| a.order.total_cmp(&b.order));
        Ok(columns)
    }

    async fn get_column(&self, column_id: Uuid) -> Result<Option<KanbanColumn>, AppError> {
        Ok(self.state.lock().await.columns.get(&column_id).cloned())
    }

    async fn insert_column(&self, column: &KanbanColumn) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if !state.workspaces.contains_key(&column.workspace_id) {
            return Err(AppError::NotFound("Workspace"));
        }
        let order_taken = state
            .columns
            .values()
            .any(|c| c.workspace_id == column.workspace_id && c.order == column.order);
        if order_taken {
            return Err(AppError::Conflict("Column order already taken".to_string()));
        }
        state.columns.insert(column.id, column.clone());
        Ok(())
    }

    async fn update_column(&self, column: &KanbanColumn) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let existing = state
            .columns
            .get_mut(&column.id)
            .ok_or(AppError::NotFound("Column"))?;
        existing.title = column.title.clone();
        existing.category = column.category.clone();
        Ok(())
    }

    async fn set_column_orders(
        &self,
        workspace_id: Uuid,
        orders: &[(Uuid, f64)],
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;

        // Validate the final state before touching anything.
        let mut next: HashMap<Uuid, f64> = state
            .columns
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .map(|c| (c.id, c.order))
            .collect();
        for (id, order) in orders {
            let slot = next.get_mut(id).ok_or(AppError::NotFound("Column"))?;
            *slot = *order;
        }
        let mut seen = HashSet::new();
        if !next.values().all(|o| seen.insert(o.to_bits())) {
            return Err(AppError::Conflict("Column order already taken".to_string()));
        }

        for (id, order) in orders {
            if let Some(column) = state.columns.get_mut(id) {
                column.order = *order;
            }
        }
        Ok(())
    }

    async fn delete_column(&self, column_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.cards.values().any(|c| c.column_id == column_id) {
            return Err(AppError::Conflict(
                "Cannot delete a column that still holds cards".to_string(),
            ));
        }
        Ok(state.columns.remove(&column_id).is_some())
    }

    async fn list_tags(&self, workspace_id: Uuid) -> Result<Vec<KanbanTag>, AppError> {
        let state = self.state.lock().await;
        let mut tags: Vec<KanbanTag> = state
            .tags
            .values()
            .filter(|t| t.workspace_id == workspace_id)
            .cloned()
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn get_tag(&self, tag_id: Uuid) -> Result<Option<KanbanTag>, AppError> {
        Ok(self.state.lock().await.tags.get(&tag_id).cloned())
    }

    async fn insert_tag(&self, tag: &KanbanTag) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if !state.workspaces.contains_key(&tag.workspace_id) {
            return Err(AppError::NotFound("Workspace"));
        }
        if state.tag_name_taken(tag.workspace_id, &tag.name, None) {
            return Err(AppError::Conflict(format!("Tag {} already exists", tag.name)));
        }
        state.tags.insert(tag.id, tag.clone());
        Ok(())
    }

    async fn update_tag(&self, tag: &KanbanTag) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if !state.tags.contains_key(&tag.id) {
            return Err(AppError::NotFound("Tag"));
        }
        if state.tag_name_taken(tag.workspace_id, &tag.name, Some(tag.id)) {
            return Err(AppError::Conflict(format!("Tag {} already exists", tag.name)));
        }
        state.tags.insert(tag.id, tag.clone());
        Ok(())
    }

    async fn delete_tag(&self, tag_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.tags.remove(&tag_id).is_none() {
            return Ok(false);
        }
        for card in state.cards.values_mut() {
            card.tag_ids.retain(|id| *id != tag_id);
        }
        Ok(true)
    }

    async fn list_cards(&self, workspace_id: Uuid) -> Result<Vec<KanbanCard>, AppError> {
        let state = self.state.lock().await;
        let mut cards: Vec<KanbanCard> = state
            .cards
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .cloned()
            .collect();
        cards.sort_by(|a, b| {
            state
                .column_order(a.column_id)
                .total_cmp(&state.column_order(b.column_id))
                .then(a.order.total_cmp(&b.order))
        });
        Ok(cards)
    }

    async fn list_cards_in_column(&self, column_id: Uuid) -> Result<Vec<KanbanCard>, AppError> {
        let state = self.state.lock().await;
        let mut cards: Vec<KanbanCard> = state
            .cards
            .values()
            .filter(|c| c.column_id == column_id)
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.order.total_cmp(&b.order));
        Ok(cards)
    }

    async fn get_card(&self, card_id: Uuid) -> Result<Option<KanbanCard>, AppError> {
        Ok(self.state.lock().await.cards.get(&card_id).cloned())
    }

    async fn insert_card(&self, card: &KanbanCard) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if !state.columns.contains_key(&card.column_id) {
            return Err(AppError::NotFound("Column"));
        }
        if !card.tag_ids.iter().all(|id| state.tags.contains_key(id)) {
            return Err(AppError::NotFound("Tag"));
        }
        state.cards.insert(card.id, card.clone());
        Ok(())
    }

    async fn update_card(&self, card: &KanbanCard) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if !state.columns.contains_key(&card.column_id) {
            return Err(AppError::NotFound("Column"));
        }
        if !card.tag_ids.iter().all(|id| state.tags.contains_key(id)) {
            return Err(AppError::NotFound("Tag"));
        }
        let existing = state
            .cards
            .get_mut(&card.id)
            .ok_or(AppError::NotFound("Card"))?;
        *existing = card.clone();
        Ok(())
    }

    async fn set_card_orders(
        &self,
        column_id: Uuid,
        orders: &[(Uuid, f64)],
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let all_present = orders.iter().all(|(id, _)| {
            state
                .cards
                .get(id)
                .is_some_and(|c| c.column_id == column_id)
        });
        if !all_present {
            return Err(AppError::NotFound("Card"));
        }

        for (card_id, order) in orders {
            if let Some(card) = state.cards.get_mut(card_id) {
                card.order = *order;
            }
        }
        Ok(())
    }

    async fn delete_card(&self, card_id: Uuid) -> Result<bool, AppError> {
        Ok(self.state.lock().await.cards.remove(&card_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use collab_shared::CardPriority;

    fn seed(owner: Uuid) -> WorkspaceSeed {
        let now = Utc::now();
        let workspace = Workspace {
            id: Uuid::new_v4(),
            name: "p-1".to_string(),
            description: None,
            owner_id: owner,
            created_at: now,
        };
        WorkspaceSeed {
            owner: Membership {
                user_id: owner,
                workspace_id: workspace.id,
                role: WorkspaceRole::Owner,
                joined_at: now,
            },
            columns: vec![KanbanColumn {
                id: Uuid::new_v4(),
                workspace_id: workspace.id,
                title: "To Do".to_string(),
                category: "todo".to_string(),
                order: 1.0,
            }],
            tags: Vec::new(),
            channels: Vec::new(),
            workspace,
        }
    }

    #[tokio::test]
    async fn duplicate_membership_insert_is_not_an_error() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let seed = seed(owner);
        store.create_workspace(&seed).await.unwrap();

        let again = store.insert_membership(&seed.owner).await.unwrap();
        assert!(matches!(again, MembershipInsert::Existing(_)));
        assert_eq!(store.list_memberships(seed.workspace.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn redeem_checks_consumption_before_expiry() {
        let store = MemoryStore::new();
        let seed = seed(Uuid::new_v4());
        store.create_workspace(&seed).await.unwrap();

        let now = Utc::now();
        let invite = InviteRecord {
            token_hash: "digest".to_string(),
            workspace_id: seed.workspace.id,
            email: "bob@example.com".to_string(),
            invited_by: seed.owner.user_id,
            issued_at: now,
            expires_at: now + Duration::hours(1),
            consumed_at: None,
        };
        store.insert_invite(&invite).await.unwrap();

        let bob = Uuid::new_v4();
        store.redeem_invite("digest", bob, now).await.unwrap();

        let late = now + Duration::hours(2);
        let err = store.redeem_invite("digest", bob, late).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyConsumed));
    }

    #[tokio::test]
    async fn set_column_orders_rejects_collisions_atomically() {
        let store = MemoryStore::new();
        let seed = seed(Uuid::new_v4());
        store.create_workspace(&seed).await.unwrap();
        let ws = seed.workspace.id;
        let first = seed.columns[0].id;

        let second = KanbanColumn {
            id: Uuid::new_v4(),
            workspace_id: ws,
            title: "Done".to_string(),
            category: "done".to_string(),
            order: 2.0,
        };
        store.insert_column(&second).await.unwrap();

        let err = store
            .set_column_orders(ws, &[(first, 2.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let columns = store.list_columns(ws).await.unwrap();
        assert_eq!(columns[0].order, 1.0);
        assert_eq!(columns[1].order, 2.0);

        store
            .set_column_orders(ws, &[(first, 3.0), (second.id, 1.0)])
            .await
            .unwrap();
        let columns = store.list_columns(ws).await.unwrap();
        assert_eq!(columns[0].id, second.id);
    }

    #[tokio::test]
    async fn deleting_a_tag_detaches_it_from_cards() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let seed = seed(owner);
        store.create_workspace(&seed).await.unwrap();
        let ws = seed.workspace.id;

        let tag = KanbanTag {
            id: Uuid::new_v4(),
            workspace_id: ws,
            name: "Bug".to_string(),
            color: "red".to_string(),
        };
        store.insert_tag(&tag).await.unwrap();

        let now = Utc::now();
        let card = KanbanCard {
            id: Uuid::new_v4(),
            workspace_id: ws,
            column_id: seed.columns[0].id,
            title: "crash on save".to_string(),
            description: None,
            order: 1.0,
            tag_ids: vec![tag.id],
            assignee_id: None,
            due_date: None,
            priority: CardPriority::High,
            created_by: owner,
            created_at: now,
            updated_at: now,
        };
        store.insert_card(&card).await.unwrap();

        assert!(store.delete_tag(tag.id).await.unwrap());
        let stored = store.get_card(card.id).await.unwrap().unwrap();
        assert!(stored.tag_ids.is_empty());
        assert_eq!(stored.priority, CardPriority::High);

        // A write carrying the deleted tag is refused like a dangling foreign key.
        let err = store.update_card(&card).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Tag")));
    }
}
