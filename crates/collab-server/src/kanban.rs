//! Ordered columns, tags and cards of a workspace board.
//!
//! Column orders and every card write happen while holding the workspace's
//! keyed lock, so every reorder sees a consistent snapshot of its siblings and
//! a card is never written back from a stale read.

use std::collections::BTreeSet;
use std::sync::Arc;

use collab_shared::api::{
    CreateCardRequest, UpdateCardRequest, UpdateColumnRequest, UpdateTagRequest,
};
use collab_shared::{Board, KanbanCard, KanbanColumn, KanbanTag};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AppError;
use crate::locks::KeyedLocks;
use crate::membership::MembershipRegistry;
use crate::permission::ANY_MEMBER;
use crate::store::Store;

const DEFAULT_TAG_COLOR: &str = "gray";
const MAX_TITLE_LEN: usize = 200;
const MAX_TAG_NAME_LEN: usize = 50;

/// Sort key strictly between `prev` and `next`, or `None` if no finite f64 fits.
pub fn order_between(prev: Option<f64>, next: Option<f64>) -> Option<f64> {
    let candidate = match (prev, next) {
        (None, None) => 1.0,
        (Some(p), None) => p + 1.0,
        (None, Some(n)) => n - 1.0,
        (Some(p), Some(n)) => p + (n - p) / 2.0,
    };

    let above = prev.map_or(true, |p| candidate > p);
    let below = next.map_or(true, |n| candidate < n);
    (candidate.is_finite() && above && below).then_some(candidate)
}

fn required_text(value: &str, what: &str, max: usize) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", what)));
    }
    if value.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{} must be at most {} characters",
            what, max
        )));
    }
    Ok(value.to_string())
}

/// Lowercase, dash-separated form of a column title.
fn category_for(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn next_order<'a>(orders: impl Iterator<Item = &'a f64>) -> f64 {
    orders
        .copied()
        .fold(None, |max: Option<f64>, o| Some(max.map_or(o, |m| m.max(o))))
        .map_or(1.0, |max| max + 1.0)
}

pub struct BoardEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    members: MembershipRegistry,
    locks: KeyedLocks<Uuid>,
}

impl BoardEngine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, members: MembershipRegistry) -> Self {
        Self {
            store,
            clock,
            members,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn board(&self, actor_id: Uuid, workspace_id: Uuid) -> Result<Board, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;

        Ok(Board {
            workspace_id,
            columns: self.store.list_columns(workspace_id).await?,
            cards: self.store.list_cards(workspace_id).await?,
            tags: self.store.list_tags(workspace_id).await?,
        })
    }

    async fn column_in(&self, workspace_id: Uuid, column_id: Uuid) -> Result<KanbanColumn, AppError> {
        self.store
            .get_column(column_id)
            .await?
            .filter(|c| c.workspace_id == workspace_id)
            .ok_or(AppError::NotFound("Column"))
    }

    async fn tag_in(&self, workspace_id: Uuid, tag_id: Uuid) -> Result<KanbanTag, AppError> {
        self.store
            .get_tag(tag_id)
            .await?
            .filter(|t| t.workspace_id == workspace_id)
            .ok_or(AppError::NotFound("Tag"))
    }

    async fn card_in(&self, workspace_id: Uuid, card_id: Uuid) -> Result<KanbanCard, AppError> {
        self.store
            .get_card(card_id)
            .await?
            .filter(|c| c.workspace_id == workspace_id)
            .ok_or(AppError::NotFound("Card"))
    }

    /// Deduplicated tag ids, each checked to belong to the workspace.
    async fn workspace_tags(&self, workspace_id: Uuid, tag_ids: &[Uuid]) -> Result<Vec<Uuid>, AppError> {
        let unique: BTreeSet<Uuid> = tag_ids.iter().copied().collect();
        for tag_id in &unique {
            if self.tag_in(workspace_id, *tag_id).await.is_err() {
                return Err(AppError::Validation(format!(
                    "Tag {} does not belong to this workspace",
                    tag_id
                )));
            }
        }
        Ok(unique.into_iter().collect())
    }

    // Columns

    pub async fn create_column(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        title: &str,
        category: Option<String>,
    ) -> Result<KanbanColumn, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;
        let title = required_text(title, "Column title", MAX_TITLE_LEN)?;
        let category = category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| category_for(&title));

        let _guard = self.locks.lock(&workspace_id).await;

        let columns = self.store.list_columns(workspace_id).await?;
        let column = KanbanColumn {
            id: Uuid::new_v4(),
            workspace_id,
            title,
            category,
            order: next_order(columns.iter().map(|c| &c.order)),
        };
        self.store.insert_column(&column).await?;

        tracing::info!(column_id = %column.id, %workspace_id, order = column.order, "column created");
        Ok(column)
    }

    pub async fn update_column(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        column_id: Uuid,
        req: UpdateColumnRequest,
    ) -> Result<KanbanColumn, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;
        let mut column = self.column_in(workspace_id, column_id).await?;

        if let Some(title) = req.title {
            column.title = required_text(&title, "Column title", MAX_TITLE_LEN)?;
        }
        if let Some(category) = req.category {
            column.category = required_text(&category, "Column category", MAX_TITLE_LEN)?;
        }

        self.store.update_column(&column).await?;
        Ok(column)
    }

    /// Move a column to zero-based `position` among its siblings. Returns the
    /// workspace's columns in their new order.
    ///
    /// The column gets the midpoint of its new neighbours' orders. When no
    /// value fits between them the whole workspace is renumbered 1..=n in one
    /// store call.
    pub async fn reorder_column(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        column_id: Uuid,
        position: usize,
    ) -> Result<Vec<KanbanColumn>, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;

        let _guard = self.locks.lock(&workspace_id).await;

        let mut columns = self.store.list_columns(workspace_id).await?;
        let current = columns
            .iter()
            .position(|c| c.id == column_id)
            .ok_or(AppError::NotFound("Column"))?;

        let mut moving = columns.remove(current);
        let target = position.min(columns.len());
        if target == current {
            columns.insert(current, moving);
            return Ok(columns);
        }

        let prev = target.checked_sub(1).map(|i| columns[i].order);
        let next = columns.get(target).map(|c| c.order);

        match order_between(prev, next) {
            Some(order) => {
                moving.order = order;
                columns.insert(target, moving);
                self.store
                    .set_column_orders(workspace_id, &[(column_id, order)])
                    .await?;
            }
            None => {
                columns.insert(target, moving);
                let renumbered: Vec<(Uuid, f64)> = columns
                    .iter_mut()
                    .zip(1..)
                    .map(|(column, n)| {
                        column.order = f64::from(n);
                        (column.id, column.order)
                    })
                    .collect();
                self.store
                    .set_column_orders(workspace_id, &renumbered)
                    .await?;
                tracing::info!(%workspace_id, columns = renumbered.len(), "columns renumbered");
            }
        }

        tracing::debug!(%column_id, %workspace_id, position = target, "column reordered");
        Ok(columns)
    }

    pub async fn delete_column(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        column_id: Uuid,
    ) -> Result<(), AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;

        let _guard = self.locks.lock(&workspace_id).await;

        let columns = self.store.list_columns(workspace_id).await?;
        if !columns.iter().any(|c| c.id == column_id) {
            return Err(AppError::NotFound("Column"));
        }
        if columns.len() == 1 {
            return Err(AppError::InvariantViolation(
                "a board must keep at least one column".to_string(),
            ));
        }

        if !self.store.delete_column(column_id).await? {
            return Err(AppError::NotFound("Column"));
        }
        tracing::info!(%column_id, %workspace_id, "column deleted");

        Ok(())
    }

    // Tags

    pub async fn list_tags(&self, actor_id: Uuid, workspace_id: Uuid) -> Result<Vec<KanbanTag>, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;
        self.store.list_tags(workspace_id).await
    }

    pub async fn create_tag(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        name: &str,
        color: Option<String>,
    ) -> Result<KanbanTag, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;

        let tag = KanbanTag {
            id: Uuid::new_v4(),
            workspace_id,
            name: required_text(name, "Tag name", MAX_TAG_NAME_LEN)?,
            color: color
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_TAG_COLOR.to_string()),
        };
        self.store.insert_tag(&tag).await?;

        tracing::info!(tag_id = %tag.id, %workspace_id, name = %tag.name, "tag created");
        Ok(tag)
    }

    pub async fn update_tag(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        tag_id: Uuid,
        req: UpdateTagRequest,
    ) -> Result<KanbanTag, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;
        let mut tag = self.tag_in(workspace_id, tag_id).await?;

        if let Some(name) = req.name {
            tag.name = required_text(&name, "Tag name", MAX_TAG_NAME_LEN)?;
        }
        if let Some(color) = req.color {
            tag.color = required_text(&color, "Tag color", MAX_TAG_NAME_LEN)?;
        }

        self.store.update_tag(&tag).await?;
        Ok(tag)
    }

    /// Deletes the tag and detaches it from every card.
    pub async fn delete_tag(&self, actor_id: Uuid, workspace_id: Uuid, tag_id: Uuid) -> Result<(), AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;

        let _guard = self.locks.lock(&workspace_id).await;

        self.tag_in(workspace_id, tag_id).await?;
        if !self.store.delete_tag(tag_id).await? {
            return Err(AppError::NotFound("Tag"));
        }
        tracing::info!(%tag_id, %workspace_id, "tag deleted");

        Ok(())
    }

    // Cards

    /// The assignee has to be a member of the workspace the card lives in.
    async fn check_assignee(&self, workspace_id: Uuid, assignee_id: Option<Uuid>) -> Result<(), AppError> {
        let Some(user_id) = assignee_id else {
            return Ok(());
        };
        if self.members.check_permission(user_id, workspace_id, ANY_MEMBER).await? {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "User {} is not a member of this workspace",
                user_id
            )))
        }
    }

    pub async fn create_card(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        req: CreateCardRequest,
    ) -> Result<KanbanCard, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;
        let title = required_text(&req.title, "Card title", MAX_TITLE_LEN)?;
        self.check_assignee(workspace_id, req.assignee_id).await?;

        let _guard = self.locks.lock(&workspace_id).await;

        let tag_ids = self.workspace_tags(workspace_id, &req.tag_ids).await?;
        self.column_in(workspace_id, req.column_id).await?;
        let siblings = self.store.list_cards_in_column(req.column_id).await?;
        let now = self.clock.now();

        let card = KanbanCard {
            id: Uuid::new_v4(),
            workspace_id,
            column_id: req.column_id,
            title,
            description: req.description.filter(|d| !d.trim().is_empty()),
            order: next_order(siblings.iter().map(|c| &c.order)),
            tag_ids,
            assignee_id: req.assignee_id,
            due_date: req.due_date,
            priority: req.priority.unwrap_or_default(),
            created_by: actor_id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_card(&card).await?;

        tracing::info!(card_id = %card.id, column_id = %card.column_id, %workspace_id, "card created");
        Ok(card)
    }

    pub async fn update_card(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        card_id: Uuid,
        req: UpdateCardRequest,
    ) -> Result<KanbanCard, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;
        if let Some(assignee_id) = req.assignee_id {
            self.check_assignee(workspace_id, assignee_id).await?;
        }

        // Held across read and write so a concurrent move is not reverted.
        let _guard = self.locks.lock(&workspace_id).await;

        let mut card = self.card_in(workspace_id, card_id).await?;

        if let Some(title) = req.title {
            card.title = required_text(&title, "Card title", MAX_TITLE_LEN)?;
        }
        if let Some(description) = req.description {
            card.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(assignee_id) = req.assignee_id {
            card.assignee_id = assignee_id;
        }
        if let Some(due_date) = req.due_date {
            card.due_date = due_date;
        }
        if let Some(priority) = req.priority {
            card.priority = priority;
        }
        card.updated_at = self.clock.now();

        self.store.update_card(&card).await?;
        Ok(card)
    }

    /// Move a card to zero-based `position` in `column_id`, or to its end when
    /// `position` is `None`. Works within a column and across columns.
    ///
    /// Same scheme as column reordering: the card takes the midpoint of its new
    /// neighbours, and the target column is renumbered 1..=n when no value fits.
    pub async fn move_card(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        card_id: Uuid,
        column_id: Uuid,
        position: Option<usize>,
    ) -> Result<KanbanCard, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;

        let _guard = self.locks.lock(&workspace_id).await;

        let mut card = self.card_in(workspace_id, card_id).await?;
        self.column_in(workspace_id, column_id).await?;

        let siblings: Vec<KanbanCard> = self
            .store
            .list_cards_in_column(column_id)
            .await?
            .into_iter()
            .filter(|c| c.id != card_id)
            .collect();
        let target = position.map_or(siblings.len(), |p| p.min(siblings.len()));

        let prev = target.checked_sub(1).map(|i| siblings[i].order);
        let next = siblings.get(target).map(|c| c.order);

        card.order = match order_between(prev, next) {
            Some(order) => order,
            None => {
                // Slot `target + 1` is left free for the moving card.
                let renumbered: Vec<(Uuid, f64)> = siblings
                    .iter()
                    .enumerate()
                    .map(|(i, sibling)| {
                        let slot = if i < target { i + 1 } else { i + 2 };
                        (sibling.id, slot as f64)
                    })
                    .collect();
                self.store.set_card_orders(column_id, &renumbered).await?;
                tracing::info!(%column_id, cards = renumbered.len() + 1, "cards renumbered");

                (target + 1) as f64
            }
        };
        card.column_id = column_id;
        card.updated_at = self.clock.now();

        self.store.update_card(&card).await?;
        tracing::debug!(%card_id, %column_id, position = target, "card moved");

        Ok(card)
    }

    pub async fn set_card_tags(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        card_id: Uuid,
        tag_ids: &[Uuid],
    ) -> Result<KanbanCard, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;

        // Tags are validated under the lock `delete_tag` also takes.
        let _guard = self.locks.lock(&workspace_id).await;

        let mut card = self.card_in(workspace_id, card_id).await?;
        card.tag_ids = self.workspace_tags(workspace_id, tag_ids).await?;
        card.updated_at = self.clock.now();

        self.store.update_card(&card).await?;
        Ok(card)
    }

    pub async fn delete_card(&self, actor_id: Uuid, workspace_id: Uuid, card_id: Uuid) -> Result<(), AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;

        let _guard = self.locks.lock(&workspace_id).await;

        self.card_in(workspace_id, card_id).await?;
        if !self.store.delete_card(card_id).await? {
            return Err(AppError::NotFound("Card"));
        }
        tracing::info!(%card_id, %workspace_id, "card deleted");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::store::MemoryStore;
    use collab_shared::CardPriority;

    struct Fixture {
        engine: BoardEngine,
        store: Arc<MemoryStore>,
        owner: Uuid,
        ws: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let members = MembershipRegistry::new(store.clone(), clock.clone(), &Config::default());
        let owner = Uuid::new_v4();
        let ws = members.create_workspace(owner, "team", None).await.unwrap().id;
        let engine = BoardEngine::new(store.clone(), clock, members);
        Fixture {
            engine,
            store,
            owner,
            ws,
        }
    }

    fn card_request(column_id: Uuid, title: &str) -> CreateCardRequest {
        CreateCardRequest {
            column_id,
            title: title.to_string(),
            description: None,
            tag_ids: Vec::new(),
            assignee_id: None,
            due_date: None,
            priority: None,
        }
    }

    async fn cards_in(f: &Fixture, column_id: Uuid) -> Vec<(String, f64)> {
        f.store
            .list_cards_in_column(column_id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| (c.title, c.order))
            .collect()
    }

    fn titles(columns: &[KanbanColumn]) -> Vec<&str> {
        columns.iter().map(|c| c.title.as_str()).collect()
    }

    #[test]
    fn midpoints_and_edges() {
        assert_eq!(order_between(None, None), Some(1.0));
        assert_eq!(order_between(Some(3.0), None), Some(4.0));
        assert_eq!(order_between(None, Some(1.0)), Some(0.0));
        assert_eq!(order_between(Some(1.0), Some(2.0)), Some(1.5));

        let tight = 1.0 + f64::EPSILON;
        assert_eq!(order_between(Some(1.0), Some(tight)), None);
        assert_eq!(order_between(Some(f64::MAX), None), None);
    }

    #[test]
    fn categories_are_slugged() {
        assert_eq!(category_for("In Progress"), "in-progress");
        assert_eq!(category_for("  QA / Review "), "qa-review");
    }

    #[tokio::test]
    async fn new_columns_append_after_the_max() {
        let f = fixture().await;
        let column = f
            .engine
            .create_column(f.owner, f.ws, "Review", None)
            .await
            .unwrap();
        assert_eq!(column.order, 4.0);
        assert_eq!(column.category, "review");
    }

    #[tokio::test]
    async fn reorder_uses_midpoints() {
        let f = fixture().await;
        let columns = f.store.list_columns(f.ws).await.unwrap();
        let done = columns[2].id;

        let reordered = f.engine.reorder_column(f.owner, f.ws, done, 0).await.unwrap();
        assert_eq!(titles(&reordered), ["Done", "To Do", "In Progress"]);
        assert_eq!(reordered[0].order, 0.0);

        let todo = reordered[1].id;
        let reordered = f.engine.reorder_column(f.owner, f.ws, todo, 2).await.unwrap();
        assert_eq!(titles(&reordered), ["Done", "In Progress", "To Do"]);
        assert_eq!(reordered[2].order, 3.0);

        let stored = f.store.list_columns(f.ws).await.unwrap();
        assert_eq!(stored, reordered);
    }

    #[tokio::test]
    async fn exhausted_gap_renumbers_every_column() {
        let f = fixture().await;
        let columns = f.store.list_columns(f.ws).await.unwrap();
        let (a, b, c) = (columns[0].id, columns[1].id, columns[2].id);
        f.store
            .set_column_orders(f.ws, &[(b, 1.0 + f64::EPSILON)])
            .await
            .unwrap();

        let reordered = f.engine.reorder_column(f.owner, f.ws, c, 1).await.unwrap();
        let ids: Vec<_> = reordered.iter().map(|col| col.id).collect();
        assert_eq!(ids, [a, c, b]);

        let stored: Vec<_> = f
            .store
            .list_columns(f.ws)
            .await
            .unwrap()
            .into_iter()
            .map(|col| (col.id, col.order))
            .collect();
        assert_eq!(stored, [(a, 1.0), (c, 2.0), (b, 3.0)]);
    }

    #[tokio::test]
    async fn last_column_cannot_be_deleted() {
        let f = fixture().await;
        let columns = f.store.list_columns(f.ws).await.unwrap();

        f.engine.delete_column(f.owner, f.ws, columns[0].id).await.unwrap();
        f.engine.delete_column(f.owner, f.ws, columns[1].id).await.unwrap();
        let err = f
            .engine
            .delete_column(f.owner, f.ws, columns[2].id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn column_with_cards_cannot_be_deleted() {
        let f = fixture().await;
        let column = f.store.list_columns(f.ws).await.unwrap()[0].clone();
        f.engine
            .create_card(f.owner, f.ws, card_request(column.id, "Ship it"))
            .await
            .unwrap();

        let err = f
            .engine
            .delete_column(f.owner, f.ws, column.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn tags_default_to_gray_and_names_are_unique() {
        let f = fixture().await;
        let tag = f.engine.create_tag(f.owner, f.ws, "Docs", None).await.unwrap();
        assert_eq!(tag.color, "gray");

        let err = f
            .engine
            .create_tag(f.owner, f.ws, "Bug", Some("red".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let renamed = f
            .engine
            .update_tag(
                f.owner,
                f.ws,
                tag.id,
                UpdateTagRequest {
                    name: Some("Documentation".to_string()),
                    color: Some("green".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Documentation");
        assert_eq!(renamed.color, "green");
    }

    #[tokio::test]
    async fn cards_move_to_the_end_and_keep_tags_valid() {
        let f = fixture().await;
        let columns = f.store.list_columns(f.ws).await.unwrap();
        let tags = f.store.list_tags(f.ws).await.unwrap();
        let (todo, doing) = (columns[0].id, columns[1].id);

        let first = f
            .engine
            .create_card(f.owner, f.ws, card_request(doing, "Existing"))
            .await
            .unwrap();
        let card = f
            .engine
            .create_card(
                f.owner,
                f.ws,
                CreateCardRequest {
                    tag_ids: vec![tags[0].id, tags[0].id],
                    ..card_request(todo, "Login page")
                },
            )
            .await
            .unwrap();
        assert_eq!(card.tag_ids, [tags[0].id]);

        let moved = f
            .engine
            .move_card(f.owner, f.ws, card.id, doing, None)
            .await
            .unwrap();
        assert_eq!(moved.column_id, doing);
        assert!(moved.order > first.order);

        let err = f
            .engine
            .set_card_tags(f.owner, f.ws, card.id, &[Uuid::new_v4()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        f.engine.delete_tag(f.owner, f.ws, tags[0].id).await.unwrap();
        let board = f.engine.board(f.owner, f.ws).await.unwrap();
        let stored = board.cards.iter().find(|c| c.id == card.id).unwrap();
        assert!(stored.tag_ids.is_empty());
    }

    #[tokio::test]
    async fn cards_move_to_a_position_within_and_across_columns() {
        let f = fixture().await;
        let columns = f.store.list_columns(f.ws).await.unwrap();
        let (todo, doing) = (columns[0].id, columns[1].id);

        let mut ids = Vec::new();
        for title in ["a", "b", "c"] {
            let card = f
                .engine
                .create_card(f.owner, f.ws, card_request(todo, title))
                .await
                .unwrap();
            ids.push(card.id);
        }

        // c to the top of its own column.
        f.engine
            .move_card(f.owner, f.ws, ids[2], todo, Some(0))
            .await
            .unwrap();
        let order: Vec<_> = cards_in(&f, todo).await.into_iter().map(|(t, _)| t).collect();
        assert_eq!(order, ["c", "a", "b"]);

        // a into the other column, before the card already there.
        f.engine
            .create_card(f.owner, f.ws, card_request(doing, "x"))
            .await
            .unwrap();
        let moved = f
            .engine
            .move_card(f.owner, f.ws, ids[0], doing, Some(0))
            .await
            .unwrap();
        assert_eq!(moved.column_id, doing);
        let order: Vec<_> = cards_in(&f, doing).await.into_iter().map(|(t, _)| t).collect();
        assert_eq!(order, ["a", "x"]);

        // Positions past the end clamp to the end.
        f.engine
            .move_card(f.owner, f.ws, ids[2], doing, Some(99))
            .await
            .unwrap();
        let order: Vec<_> = cards_in(&f, doing).await.into_iter().map(|(t, _)| t).collect();
        assert_eq!(order, ["a", "x", "c"]);
    }

    #[tokio::test]
    async fn exhausted_card_gap_renumbers_the_column() {
        let f = fixture().await;
        let todo = f.store.list_columns(f.ws).await.unwrap()[0].id;

        let mut ids = Vec::new();
        for title in ["a", "b", "c"] {
            let card = f
                .engine
                .create_card(f.owner, f.ws, card_request(todo, title))
                .await
                .unwrap();
            ids.push(card.id);
        }
        f.store
            .set_card_orders(todo, &[(ids[1], 1.0 + f64::EPSILON)])
            .await
            .unwrap();

        f.engine
            .move_card(f.owner, f.ws, ids[2], todo, Some(1))
            .await
            .unwrap();

        assert_eq!(
            cards_in(&f, todo).await,
            [
                ("a".to_string(), 1.0),
                ("c".to_string(), 2.0),
                ("b".to_string(), 3.0)
            ]
        );
    }

    #[tokio::test]
    async fn card_details_default_and_can_be_cleared() {
        let f = fixture().await;
        let todo = f.store.list_columns(f.ws).await.unwrap()[0].id;
        let bob = Uuid::new_v4();
        f.engine
            .members
            .add_member(bob, f.ws, collab_shared::WorkspaceRole::Member)
            .await
            .unwrap();

        let card = f
            .engine
            .create_card(f.owner, f.ws, card_request(todo, "Plain"))
            .await
            .unwrap();
        assert_eq!(card.priority, CardPriority::Medium);
        assert_eq!(card.assignee_id, None);

        let due = chrono::Utc::now();
        let updated = f
            .engine
            .update_card(
                f.owner,
                f.ws,
                card.id,
                UpdateCardRequest {
                    assignee_id: Some(Some(bob)),
                    due_date: Some(Some(due)),
                    priority: Some(CardPriority::Urgent),
                    ..UpdateCardRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.assignee_id, Some(bob));
        assert_eq!(updated.due_date, Some(due));
        assert_eq!(updated.priority, CardPriority::Urgent);

        let cleared = f
            .engine
            .update_card(
                f.owner,
                f.ws,
                card.id,
                UpdateCardRequest {
                    assignee_id: Some(None),
                    due_date: Some(None),
                    ..UpdateCardRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.assignee_id, None);
        assert_eq!(cleared.due_date, None);
        assert_eq!(cleared.priority, CardPriority::Urgent);

        let err = f
            .engine
            .create_card(
                f.owner,
                f.ws,
                CreateCardRequest {
                    assignee_id: Some(Uuid::new_v4()),
                    ..card_request(todo, "Stranger")
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_edits_do_not_revert_a_move() {
        let f = fixture().await;
        let columns = f.store.list_columns(f.ws).await.unwrap();
        let (todo, doing) = (columns[0].id, columns[1].id);
        let engine = Arc::new(f.engine);

        for round in 0..50 {
            let card_id = engine
                .create_card(f.owner, f.ws, card_request(todo, &format!("card {round}")))
                .await
                .unwrap()
                .id;

            let mover = {
                let engine = engine.clone();
                let (owner, ws) = (f.owner, f.ws);
                tokio::spawn(async move {
                    engine.move_card(owner, ws, card_id, doing, None).await
                })
            };
            let editor = {
                let engine = engine.clone();
                let (owner, ws) = (f.owner, f.ws);
                tokio::spawn(async move {
                    let req = UpdateCardRequest {
                        title: Some(format!("edited {round}")),
                        ..UpdateCardRequest::default()
                    };
                    engine.update_card(owner, ws, card_id, req).await
                })
            };
            mover.await.unwrap().unwrap();
            editor.await.unwrap().unwrap();

            let stored = f.store.get_card(card_id).await.unwrap().unwrap();
            assert_eq!(stored.column_id, doing, "round {round}");
            assert_eq!(stored.title, format!("edited {round}"));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn tagging_racing_a_tag_delete_leaves_no_dangling_ids() {
        let f = fixture().await;
        let todo = f.store.list_columns(f.ws).await.unwrap()[0].id;
        let engine = Arc::new(f.engine);

        for round in 0..50 {
            let tag_id = engine
                .create_tag(f.owner, f.ws, &format!("t{round}"), None)
                .await
                .unwrap()
                .id;
            let card_id = engine
                .create_card(f.owner, f.ws, card_request(todo, "tagged"))
                .await
                .unwrap()
                .id;

            let tagger = {
                let engine = engine.clone();
                let (owner, ws) = (f.owner, f.ws);
                tokio::spawn(async move { engine.set_card_tags(owner, ws, card_id, &[tag_id]).await })
            };
            let deleter = {
                let engine = engine.clone();
                let (owner, ws) = (f.owner, f.ws);
                tokio::spawn(async move { engine.delete_tag(owner, ws, tag_id).await })
            };
            deleter.await.unwrap().unwrap();
            match tagger.await.unwrap() {
                Ok(_) | Err(AppError::Validation(_)) => {}
                Err(other) => panic!("unexpected error {other:?}"),
            }

            let stored = f.store.get_card(card_id).await.unwrap().unwrap();
            assert!(stored.tag_ids.is_empty(), "round {round}");
        }
    }

    #[tokio::test]
    async fn board_requires_membership() {
        let f = fixture().await;
        let err = f.engine.board(Uuid::new_v4(), f.ws).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }
}
