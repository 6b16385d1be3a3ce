use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collab_shared::{
    Channel, InviteRecord, KanbanCard, KanbanColumn, KanbanTag, Membership, Message, NewMessage,
    Workspace, WorkspaceRole,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{MembershipInsert, Store, WorkspaceSeed};
use crate::error::{map_unique_violation, AppError};

type MembershipRow = (Uuid, Uuid, String, DateTime<Utc>);
type WorkspaceRow = (Uuid, String, Option<String>, Uuid, DateTime<Utc>);
type InviteRow = (
    String,
    Uuid,
    String,
    Uuid,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

const CARD_COLUMNS: &str = r#"
    c.id, c.workspace_id, c.column_id, c.title, c.description, c."order",
    ARRAY(SELECT ct.tag_id FROM kanban_card_tags ct WHERE ct.card_id = c.id ORDER BY ct.tag_id) AS tag_ids,
    c.assignee_id, c.due_date, c.priority,
    c.created_by, c.created_at, c.updated_at
"#;

fn membership_from_row((user_id, workspace_id, role, joined_at): MembershipRow) -> Membership {
    Membership {
        user_id,
        workspace_id,
        role: WorkspaceRole::from_db(&role),
        joined_at,
    }
}

fn workspace_from_row((id, name, description, owner_id, created_at): WorkspaceRow) -> Workspace {
    Workspace {
        id,
        name,
        description,
        owner_id,
        created_at,
    }
}

fn invite_from_row(row: InviteRow) -> InviteRecord {
    let (token_hash, workspace_id, email, invited_by, issued_at, expires_at, consumed_at) = row;
    InviteRecord {
        token_hash,
        workspace_id,
        email,
        invited_by,
        issued_at,
        expires_at,
        consumed_at,
    }
}

/// Foreign-key violations (SQLSTATE 23503) mean the parent row is gone.
fn map_missing_parent(err: sqlx::Error, parent: &'static str) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23503") {
            return AppError::NotFound(parent);
        }
    }
    AppError::Database(err)
}

fn check_invite(row: InviteRow, now: DateTime<Utc>) -> Result<InviteRecord, AppError> {
    let invite = invite_from_row(row);
    if invite.is_consumed() {
        return Err(AppError::AlreadyConsumed);
    }
    if invite.is_expired(now) {
        return Err(AppError::Expired);
    }
    Ok(invite)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_workspace(&self, seed: &WorkspaceSeed) -> Result<(), AppError> {
        let ws = &seed.workspace;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workspaces (id, name, description, owner_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(ws.id)
        .bind(&ws.name)
        .bind(&ws.description)
        .bind(ws.owner_id)
        .bind(ws.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "Workspace"))?;

        sqlx::query(
            r#"
            INSERT INTO memberships (user_id, workspace_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(seed.owner.user_id)
        .bind(ws.id)
        .bind(seed.owner.role.as_str())
        .bind(seed.owner.joined_at)
        .execute(&mut *tx)
        .await?;

        for column in &seed.columns {
            sqlx::query(
                r#"
                INSERT INTO kanban_columns (id, workspace_id, title, category, "order")
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(column.id)
            .bind(ws.id)
            .bind(&column.title)
            .bind(&column.category)
            .bind(column.order)
            .execute(&mut *tx)
            .await?;
        }

        for tag in &seed.tags {
            sqlx::query(
                "INSERT INTO kanban_tags (id, workspace_id, name, color) VALUES ($1, $2, $3, $4)",
            )
            .bind(tag.id)
            .bind(ws.id)
            .bind(&tag.name)
            .bind(&tag.color)
            .execute(&mut *tx)
            .await?;
        }

        for channel in &seed.channels {
            sqlx::query(
                r#"
                INSERT INTO channels (id, workspace_id, name, description, type, created_by, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(channel.id)
            .bind(ws.id)
            .bind(&channel.name)
            .bind(&channel.description)
            .bind(channel.channel_type)
            .bind(channel.created_by)
            .bind(channel.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_workspace(&self, workspace_id: Uuid) -> Result<Option<Workspace>, AppError> {
        let row: Option<WorkspaceRow> = sqlx::query_as(
            "SELECT id, name, description, owner_id, created_at FROM workspaces WHERE id = $1",
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(workspace_from_row))
    }

    async fn delete_workspace(&self, workspace_id: Uuid) -> Result<bool, AppError> {
        // Memberships, invites, channels, messages and the board cascade.
        let result = sqlx::query("DELETE FROM workspaces WHERE id = $1")
            .bind(workspace_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_workspaces_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(Workspace, WorkspaceRole)>, AppError> {
        let rows: Vec<(Uuid, String, Option<String>, Uuid, DateTime<Utc>, String)> =
            sqlx::query_as(
                r#"
                SELECT w.id, w.name, w.description, w.owner_id, w.created_at, m.role
                FROM workspaces w
                JOIN memberships m ON m.workspace_id = w.id
                WHERE m.user_id = $1
                ORDER BY w.created_at DESC
                "#,
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, description, owner_id, created_at, role)| {
                (
                    workspace_from_row((id, name, description, owner_id, created_at)),
                    WorkspaceRole::from_db(&role),
                )
            })
            .collect())
    }

    async fn get_membership(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Option<Membership>, AppError> {
        let row: Option<MembershipRow> = sqlx::query_as(
            r#"
            SELECT user_id, workspace_id, role, joined_at
            FROM memberships
            WHERE user_id = $1 AND workspace_id = $2
            "#,
        )
        .bind(user_id)
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(membership_from_row))
    }

    async fn list_memberships(&self, workspace_id: Uuid) -> Result<Vec<Membership>, AppError> {
        let rows: Vec<MembershipRow> = sqlx::query_as(
            r#"
            SELECT user_id, workspace_id, role, joined_at
            FROM memberships
            WHERE workspace_id = $1
            ORDER BY joined_at
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(membership_from_row).collect())
    }

    async fn insert_membership(
        &self,
        membership: &Membership,
    ) -> Result<MembershipInsert, AppError> {
        let created: Option<MembershipRow> = sqlx::query_as(
            r#"
            INSERT INTO memberships (user_id, workspace_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, workspace_id) DO NOTHING
            RETURNING user_id, workspace_id, role, joined_at
            "#,
        )
        .bind(membership.user_id)
        .bind(membership.workspace_id)
        .bind(membership.role.as_str())
        .bind(membership.joined_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_missing_parent(e, "Workspace"))?;

        if let Some(row) = created {
            return Ok(MembershipInsert::Created(membership_from_row(row)));
        }

        let existing = self
            .get_membership(membership.user_id, membership.workspace_id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("membership vanished after conflict")))?;
        Ok(MembershipInsert::Existing(existing))
    }

    async fn update_membership_role(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<Option<Membership>, AppError> {
        let row: Option<MembershipRow> = sqlx::query_as(
            r#"
            UPDATE memberships SET role = $3
            WHERE user_id = $1 AND workspace_id = $2
            RETURNING user_id, workspace_id, role, joined_at
            "#,
        )
        .bind(user_id)
        .bind(workspace_id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(membership_from_row))
    }

    async fn delete_membership(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM memberships WHERE user_id = $1 AND workspace_id = $2")
                .bind(user_id)
                .bind(workspace_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_invite(&self, invite: &InviteRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO invite_tokens
                (token_hash, workspace_id, email, invited_by, issued_at, expires_at, consumed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&invite.token_hash)
        .bind(invite.workspace_id)
        .bind(&invite.email)
        .bind(invite.invited_by)
        .bind(invite.issued_at)
        .bind(invite.expires_at)
        .bind(invite.consumed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match map_missing_parent(e, "Workspace") {
            AppError::Database(e) => map_unique_violation(e, "Invite"),
            other => other,
        })?;

        Ok(())
    }

    async fn get_invite(&self, token_hash: &str) -> Result<Option<InviteRecord>, AppError> {
        let row: Option<InviteRow> = sqlx::query_as(
            r#"
            SELECT token_hash, workspace_id, email, invited_by, issued_at, expires_at, consumed_at
            FROM invite_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(invite_from_row))
    }

    async fn redeem_invite(
        &self,
        token_hash: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Membership, AppError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<InviteRow> = sqlx::query_as(
            r#"
            SELECT token_hash, workspace_id, email, invited_by, issued_at, expires_at, consumed_at
            FROM invite_tokens
            WHERE token_hash = $1
            FOR UPDATE
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let invite = check_invite(row.ok_or(AppError::NotFound("Invite"))?, now)?;

        sqlx::query("UPDATE invite_tokens SET consumed_at = $2 WHERE token_hash = $1")
            .bind(token_hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO memberships (user_id, workspace_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, workspace_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(invite.workspace_id)
        .bind(WorkspaceRole::Member.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row: MembershipRow = sqlx::query_as(
            r#"
            SELECT user_id, workspace_id, role, joined_at
            FROM memberships
            WHERE user_id = $1 AND workspace_id = $2
            "#,
        )
        .bind(user_id)
        .bind(invite.workspace_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(membership_from_row(row))
    }

    async fn decline_invite(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<InviteRow> = sqlx::query_as(
            r#"
            SELECT token_hash, workspace_id, email, invited_by, issued_at, expires_at, consumed_at
            FROM invite_tokens
            WHERE token_hash = $1
            FOR UPDATE
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await?;

        check_invite(row.ok_or(AppError::NotFound("Invite"))?, now)?;

        sqlx::query("UPDATE invite_tokens SET consumed_at = $2 WHERE token_hash = $1")
            .bind(token_hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_channel(&self, channel: &Channel) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO channels (id, workspace_id, name, description, type, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(channel.id)
        .bind(channel.workspace_id)
        .bind(&channel.name)
        .bind(&channel.description)
        .bind(channel.channel_type)
        .bind(channel.created_by)
        .bind(channel.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match map_missing_parent(e, "Workspace") {
            AppError::Database(e) => map_unique_violation(e, &format!("Channel #{}", channel.name)),
            other => other,
        })?;

        Ok(())
    }

    async fn get_channel(&self, channel_id: Uuid) -> Result<Option<Channel>, AppError> {
        let channel = sqlx::query_as::<_, Channel>(
            r#"
            SELECT id, workspace_id, name, description, type, created_by, created_at
            FROM channels
            WHERE id = $1
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(channel)
    }

    async fn list_channels(&self, workspace_id: Uuid) -> Result<Vec<Channel>, AppError> {
        let channels = sqlx::query_as::<_, Channel>(
            r#"
            SELECT id, workspace_id, name, description, type, created_by, created_at
            FROM channels
            WHERE workspace_id = $1
            ORDER BY created_at, name
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(channels)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, AppError> {
        let mut tx = self.pool.begin().await?;

        // The row lock on the channel serializes concurrent writers.
        let next: Option<(i64,)> = sqlx::query_as(
            "UPDATE channels SET last_sequence = last_sequence + 1 WHERE id = $1 RETURNING last_sequence",
        )
        .bind(message.channel_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (sequence,) = next.ok_or(AppError::NotFound("Channel"))?;

        let recorded = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, channel_id, sequence, sender_id, content, type, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, channel_id, sender_id, content, type, timestamp, sequence
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.channel_id)
        .bind(sequence)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.message_type)
        .bind(message.timestamp)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(recorded)
    }

    async fn list_messages(
        &self,
        channel_id: Uuid,
        after_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Message>, AppError> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, channel_id, sender_id, content, type, timestamp, sequence
            FROM messages
            WHERE channel_id = $1 AND sequence > $2
            ORDER BY sequence
            LIMIT $3
            "#,
        )
        .bind(channel_id)
        .bind(after_sequence)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn list_columns(&self, workspace_id: Uuid) -> Result<Vec<KanbanColumn>, AppError> {
        let columns = sqlx::query_as::<_, KanbanColumn>(
            r#"
            SELECT id, workspace_id, title, category, "order"
            FROM kanban_columns
            WHERE workspace_id = $1
            ORDER BY "order"
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(columns)
    }

    async fn get_column(&self, column_id: Uuid) -> Result<Option<KanbanColumn>, AppError> {
        let column = sqlx::query_as::<_, KanbanColumn>(
            r#"SELECT id, workspace_id, title, category, "order" FROM kanban_columns WHERE id = $1"#,
        )
        .bind(column_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(column)
    }

    async fn insert_column(&self, column: &KanbanColumn) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO kanban_columns (id, workspace_id, title, category, "order")
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(column.id)
        .bind(column.workspace_id)
        .bind(&column.title)
        .bind(&column.category)
        .bind(column.order)
        .execute(&self.pool)
        .await
        .map_err(|e| match map_missing_parent(e, "Workspace") {
            AppError::Database(e) => map_unique_violation(e, "Column order"),
            other => other,
        })?;

        Ok(())
    }

    async fn update_column(&self, column: &KanbanColumn) -> Result<(), AppError> {
        let result =
            sqlx::query("UPDATE kanban_columns SET title = $2, category = $3 WHERE id = $1")
                .bind(column.id)
                .bind(&column.title)
                .bind(&column.category)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Column"));
        }
        Ok(())
    }

    async fn set_column_orders(
        &self,
        workspace_id: Uuid,
        orders: &[(Uuid, f64)],
    ) -> Result<(), AppError> {
        // The (workspace_id, "order") constraint is deferred, so intermediate
        // collisions while renumbering are fine as long as the end state is unique.
        let mut tx = self.pool.begin().await?;

        for (column_id, order) in orders {
            let result = sqlx::query(
                r#"UPDATE kanban_columns SET "order" = $1 WHERE id = $2 AND workspace_id = $3"#,
            )
            .bind(order)
            .bind(column_id)
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(AppError::NotFound("Column"));
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_unique_violation(e, "Column order"))?;
        Ok(())
    }

    async fn delete_column(&self, column_id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let (cards,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM kanban_cards WHERE column_id = $1")
                .bind(column_id)
                .fetch_one(&mut *tx)
                .await?;

        if cards > 0 {
            return Err(AppError::Conflict(
                "Cannot delete a column that still holds cards".to_string(),
            ));
        }

        let result = sqlx::query("DELETE FROM kanban_columns WHERE id = $1")
            .bind(column_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_tags(&self, workspace_id: Uuid) -> Result<Vec<KanbanTag>, AppError> {
        let tags = sqlx::query_as::<_, KanbanTag>(
            "SELECT id, workspace_id, name, color FROM kanban_tags WHERE workspace_id = $1 ORDER BY name",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tags)
    }

    async fn get_tag(&self, tag_id: Uuid) -> Result<Option<KanbanTag>, AppError> {
        let tag = sqlx::query_as::<_, KanbanTag>(
            "SELECT id, workspace_id, name, color FROM kanban_tags WHERE id = $1",
        )
        .bind(tag_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tag)
    }

    async fn insert_tag(&self, tag: &KanbanTag) -> Result<(), AppError> {
        sqlx::query("INSERT INTO kanban_tags (id, workspace_id, name, color) VALUES ($1, $2, $3, $4)")
            .bind(tag.id)
            .bind(tag.workspace_id)
            .bind(&tag.name)
            .bind(&tag.color)
            .execute(&self.pool)
            .await
            .map_err(|e| match map_missing_parent(e, "Workspace") {
                AppError::Database(e) => map_unique_violation(e, &format!("Tag {}", tag.name)),
                other => other,
            })?;

        Ok(())
    }

    async fn update_tag(&self, tag: &KanbanTag) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE kanban_tags SET name = $2, color = $3 WHERE id = $1")
            .bind(tag.id)
            .bind(&tag.name)
            .bind(&tag.color)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, &format!("Tag {}", tag.name)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Tag"));
        }
        Ok(())
    }

    async fn delete_tag(&self, tag_id: Uuid) -> Result<bool, AppError> {
        // kanban_card_tags rows go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM kanban_tags WHERE id = $1")
            .bind(tag_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_cards(&self, workspace_id: Uuid) -> Result<Vec<KanbanCard>, AppError> {
        let query = format!(
            r#"
            SELECT {CARD_COLUMNS}
            FROM kanban_cards c
            JOIN kanban_columns col ON col.id = c.column_id
            WHERE c.workspace_id = $1
            ORDER BY col."order", c."order"
            "#
        );
        let cards = sqlx::query_as::<_, KanbanCard>(&query)
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(cards)
    }

    async fn list_cards_in_column(&self, column_id: Uuid) -> Result<Vec<KanbanCard>, AppError> {
        let query = format!(
            r#"SELECT {CARD_COLUMNS} FROM kanban_cards c WHERE c.column_id = $1 ORDER BY c."order""#
        );
        let cards = sqlx::query_as::<_, KanbanCard>(&query)
            .bind(column_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(cards)
    }

    async fn get_card(&self, card_id: Uuid) -> Result<Option<KanbanCard>, AppError> {
        let query = format!("SELECT {CARD_COLUMNS} FROM kanban_cards c WHERE c.id = $1");
        let card = sqlx::query_as::<_, KanbanCard>(&query)
            .bind(card_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(card)
    }

    async fn insert_card(&self, card: &KanbanCard) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO kanban_cards
                (id, workspace_id, column_id, title, description, "order",
                 assignee_id, due_date, priority, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(card.id)
        .bind(card.workspace_id)
        .bind(card.column_id)
        .bind(&card.title)
        .bind(&card.description)
        .bind(card.order)
        .bind(card.assignee_id)
        .bind(card.due_date)
        .bind(card.priority)
        .bind(card.created_by)
        .bind(card.created_at)
        .bind(card.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_missing_parent(e, "Column"))?;

        for tag_id in &card.tag_ids {
            sqlx::query("INSERT INTO kanban_card_tags (card_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(card.id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_missing_parent(e, "Tag"))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_card(&self, card: &KanbanCard) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE kanban_cards
            SET column_id = $2, title = $3, description = $4, "order" = $5,
                assignee_id = $6, due_date = $7, priority = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(card.id)
        .bind(card.column_id)
        .bind(&card.title)
        .bind(&card.description)
        .bind(card.order)
        .bind(card.assignee_id)
        .bind(card.due_date)
        .bind(card.priority)
        .bind(card.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_missing_parent(e, "Column"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Card"));
        }

        sqlx::query("DELETE FROM kanban_card_tags WHERE card_id = $1")
            .bind(card.id)
            .execute(&mut *tx)
            .await?;

        for tag_id in &card.tag_ids {
            sqlx::query("INSERT INTO kanban_card_tags (card_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(card.id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_missing_parent(e, "Tag"))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_card_orders(
        &self,
        column_id: Uuid,
        orders: &[(Uuid, f64)],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        for (card_id, order) in orders {
            let result = sqlx::query(
                r#"UPDATE kanban_cards SET "order" = $1 WHERE id = $2 AND column_id = $3"#,
            )
            .bind(order)
            .bind(card_id)
            .bind(column_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(AppError::NotFound("Card"));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_card(&self, card_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM kanban_cards WHERE id = $1")
            .bind(card_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
