//! Membership facts, workspace bootstrap and the invite lifecycle.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Duration;
use collab_shared::{
    Channel, ChannelType, InviteRecord, InviteToken, KanbanColumn, KanbanTag, Membership,
    Workspace, WorkspaceRole, WorkspaceWithRole,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::AppError;
use crate::permission::{authorize, ANY_MEMBER, OWNER_ONLY};
use crate::store::{MembershipInsert, Store, WorkspaceSeed};

const MAX_WORKSPACE_NAME_LEN: usize = 100;

const DEFAULT_COLUMNS: [(&str, &str); 3] = [
    ("To Do", "todo"),
    ("In Progress", "in-progress"),
    ("Done", "done"),
];

const DEFAULT_TAGS: [(&str, &str); 3] = [
    ("Bug", "red"),
    ("Feature", "blue"),
    ("Enhancement", "purple"),
];

const DEFAULT_CHANNEL: &str = "general";

const REVOCATION_BUFFER: usize = 64;

/// Generate an unguessable invite token: 32 bytes from the OS-seeded CSPRNG,
/// URL-safe base64 without padding.
pub fn generate_invite_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256 of the token; the only form that is stored.
pub fn hash_invite_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Lowercased, trimmed address if it looks deliverable.
fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    let invalid = || AppError::Validation(format!("'{}' is not a valid email address", email));

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }

    Ok(email)
}

/// A membership that stopped existing. `user_id` is `None` when the whole
/// workspace was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revocation {
    pub workspace_id: Uuid,
    pub user_id: Option<Uuid>,
}

impl Revocation {
    fn covers(&self, workspace_id: Uuid, user_id: Uuid) -> bool {
        self.workspace_id == workspace_id && self.user_id.map_or(true, |u| u == user_id)
    }
}

/// Held by long-lived connections so they can end when the user's
/// membership goes away.
pub struct MembershipWatch {
    registry: MembershipRegistry,
    workspace_id: Uuid,
    user_id: Uuid,
    rx: broadcast::Receiver<Revocation>,
    recheck: bool,
}

impl std::fmt::Debug for MembershipWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipWatch")
            .field("workspace_id", &self.workspace_id)
            .field("user_id", &self.user_id)
            .field("recheck", &self.recheck)
            .finish_non_exhaustive()
    }
}

impl MembershipWatch {
    pub fn workspace_id(&self) -> Uuid {
        self.workspace_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Whether the membership still authorizes anything. Store failures count
    /// as revoked.
    pub async fn is_member(&self) -> bool {
        self.registry
            .check_permission(self.user_id, self.workspace_id, ANY_MEMBER)
            .await
            .unwrap_or(false)
    }

    /// Resolves once the membership has been revoked. Pending forever if the
    /// registry goes away. Safe to cancel and call again.
    pub async fn revoked(&mut self) {
        loop {
            if self.recheck {
                if !self.is_member().await {
                    return;
                }
                self.recheck = false;
            }

            match self.rx.recv().await {
                Ok(revocation) if revocation.covers(self.workspace_id, self.user_id) => return,
                Ok(_) => {}
                // The missed events may have included ours.
                Err(RecvError::Lagged(_)) => self.recheck = true,
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}

#[derive(Clone)]
pub struct MembershipRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    invite_ttl: Duration,
    invite_base_url: Option<String>,
    revocations: broadcast::Sender<Revocation>,
}

impl MembershipRegistry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self {
            store,
            clock,
            invite_ttl: Duration::hours(config.invite_ttl_hours),
            invite_base_url: config.invite_base_url.clone(),
            revocations: broadcast::channel(REVOCATION_BUFFER).0,
        }
    }

    fn revoke(&self, workspace_id: Uuid, user_id: Option<Uuid>) {
        // No receivers just means no open connections.
        let _ = self.revocations.send(Revocation {
            workspace_id,
            user_id,
        });
    }

    /// Start watching a membership for revocation. Fails with `Forbidden` if
    /// the user is not a member right now; the subscription is taken before
    /// that check so a revocation between the two is not missed.
    pub async fn watch(&self, user_id: Uuid, workspace_id: Uuid) -> Result<MembershipWatch, AppError> {
        let rx = self.revocations.subscribe();
        self.require(user_id, workspace_id, ANY_MEMBER).await?;

        Ok(MembershipWatch {
            registry: self.clone(),
            workspace_id,
            user_id,
            rx,
            recheck: false,
        })
    }

    pub async fn get_membership(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Option<Membership>, AppError> {
        self.store.get_membership(user_id, workspace_id).await
    }

    pub async fn check_permission(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        required: &[WorkspaceRole],
    ) -> Result<bool, AppError> {
        let membership = self.store.get_membership(user_id, workspace_id).await?;
        Ok(authorize(membership.as_ref(), required))
    }

    /// The capability check every mutating entry point goes through.
    ///
    /// Non-members get `Forbidden` as well, so workspace ids are not disclosed.
    pub async fn require(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        required: &[WorkspaceRole],
    ) -> Result<Membership, AppError> {
        let membership = self.store.get_membership(user_id, workspace_id).await?;

        match membership {
            Some(m) if authorize(Some(&m), required) => Ok(m),
            _ => {
                tracing::debug!(%user_id, %workspace_id, ?required, "capability check failed");
                Err(AppError::Forbidden)
            }
        }
    }

    /// Create a workspace together with its owner membership, default board,
    /// default tags and the `general` channel.
    pub async fn create_workspace(
        &self,
        owner_id: Uuid,
        name: &str,
        description: Option<String>,
    ) -> Result<Workspace, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Workspace name is required".to_string()));
        }
        if name.chars().count() > MAX_WORKSPACE_NAME_LEN {
            return Err(AppError::Validation(format!(
                "Workspace name must be at most {} characters",
                MAX_WORKSPACE_NAME_LEN
            )));
        }

        let now = self.clock.now();
        let workspace_id = Uuid::new_v4();
        let workspace = Workspace {
            id: workspace_id,
            name: name.to_string(),
            description: description.filter(|d| !d.trim().is_empty()),
            owner_id,
            created_at: now,
        };

        let columns = DEFAULT_COLUMNS
            .iter()
            .zip(1..)
            .map(|((title, category), order)| KanbanColumn {
                id: Uuid::new_v4(),
                workspace_id,
                title: title.to_string(),
                category: category.to_string(),
                order: f64::from(order),
            })
            .collect();

        let tags = DEFAULT_TAGS
            .iter()
            .map(|(name, color)| KanbanTag {
                id: Uuid::new_v4(),
                workspace_id,
                name: name.to_string(),
                color: color.to_string(),
            })
            .collect();

        let general = Channel {
            id: Uuid::new_v4(),
            workspace_id,
            name: DEFAULT_CHANNEL.to_string(),
            description: Some("Workspace-wide announcements and chatter".to_string()),
            channel_type: ChannelType::Public,
            created_by: owner_id,
            created_at: now,
        };

        let seed = WorkspaceSeed {
            workspace: workspace.clone(),
            owner: Membership {
                user_id: owner_id,
                workspace_id,
                role: WorkspaceRole::Owner,
                joined_at: now,
            },
            columns,
            tags,
            channels: vec![general],
        };

        self.store.create_workspace(&seed).await?;
        tracing::info!(%workspace_id, %owner_id, "workspace created");

        Ok(workspace)
    }

    pub async fn get_workspace(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<WorkspaceWithRole, AppError> {
        let membership = self.require(actor_id, workspace_id, ANY_MEMBER).await?;
        let workspace = self
            .store
            .get_workspace(workspace_id)
            .await?
            .ok_or(AppError::NotFound("Workspace"))?;

        Ok(WorkspaceWithRole {
            workspace,
            role: membership.role,
        })
    }

    pub async fn list_workspaces(&self, user_id: Uuid) -> Result<Vec<WorkspaceWithRole>, AppError> {
        let rows = self.store.list_workspaces_for_user(user_id).await?;

        Ok(rows
            .into_iter()
            .filter(|(_, role)| role.is_known())
            .map(|(workspace, role)| WorkspaceWithRole { workspace, role })
            .collect())
    }

    pub async fn delete_workspace(&self, actor_id: Uuid, workspace_id: Uuid) -> Result<(), AppError> {
        self.require(actor_id, workspace_id, OWNER_ONLY).await?;

        if !self.store.delete_workspace(workspace_id).await? {
            return Err(AppError::NotFound("Workspace"));
        }
        self.revoke(workspace_id, None);
        tracing::info!(%workspace_id, %actor_id, "workspace deleted");

        Ok(())
    }

    pub async fn list_members(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Vec<Membership>, AppError> {
        self.require(actor_id, workspace_id, ANY_MEMBER).await?;
        self.store.list_memberships(workspace_id).await
    }

    /// Add a membership directly. Adding an existing member succeeds and
    /// returns the stored row unchanged.
    pub async fn add_member(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<Membership, AppError> {
        if matches!(role, WorkspaceRole::Owner | WorkspaceRole::Unknown) {
            return Err(AppError::InvariantViolation(format!(
                "role '{}' cannot be granted",
                role
            )));
        }

        let membership = Membership {
            user_id,
            workspace_id,
            role,
            joined_at: self.clock.now(),
        };

        match self.store.insert_membership(&membership).await? {
            MembershipInsert::Created(m) => {
                tracing::info!(%user_id, %workspace_id, role = %m.role, "member added");
                Ok(m)
            }
            MembershipInsert::Existing(m) => {
                tracing::debug!(%user_id, %workspace_id, "already a member");
                Ok(m)
            }
        }
    }

    pub async fn change_role(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        target_user_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<Membership, AppError> {
        self.require(actor_id, workspace_id, OWNER_ONLY).await?;

        match role {
            WorkspaceRole::Owner => {
                return Err(AppError::InvariantViolation(
                    "the owner role cannot be granted".to_string(),
                ))
            }
            WorkspaceRole::Unknown => {
                return Err(AppError::Validation("unknown role".to_string()));
            }
            WorkspaceRole::Member | WorkspaceRole::Viewer => {}
        }

        let target = self
            .store
            .get_membership(target_user_id, workspace_id)
            .await?
            .ok_or(AppError::NotFound("Member"))?;

        if target.role.is_owner() {
            return Err(AppError::InvariantViolation(
                "the owner cannot be demoted".to_string(),
            ));
        }

        let updated = self
            .store
            .update_membership_role(target_user_id, workspace_id, role)
            .await?
            .ok_or(AppError::NotFound("Member"))?;

        tracing::info!(%workspace_id, %target_user_id, role = %role, "member role changed");
        Ok(updated)
    }

    /// Issue a single-use invite. Only the owner may invite.
    pub async fn invite(
        &self,
        inviter_id: Uuid,
        workspace_id: Uuid,
        email: &str,
    ) -> Result<InviteToken, AppError> {
        self.require(inviter_id, workspace_id, OWNER_ONLY).await?;
        let email = normalize_email(email)?;

        let token = generate_invite_token();
        let issued_at = self.clock.now();
        let expires_at = issued_at + self.invite_ttl;

        let record = InviteRecord {
            token_hash: hash_invite_token(&token),
            workspace_id,
            email: email.clone(),
            invited_by: inviter_id,
            issued_at,
            expires_at,
            consumed_at: None,
        };
        self.store.insert_invite(&record).await?;

        tracing::info!(%workspace_id, %inviter_id, %email, %expires_at, "invite issued");

        let link = self
            .invite_base_url
            .as_ref()
            .map(|base| format!("{}/invite/{}", base.trim_end_matches('/'), token));

        Ok(InviteToken {
            token,
            workspace_id,
            email,
            issued_at,
            expires_at,
            link,
        })
    }

    /// Consume the token and join its workspace as `member`.
    pub async fn redeem(&self, token: &str, user_id: Uuid) -> Result<Membership, AppError> {
        let token_hash = hash_invite_token(token.trim());
        let membership = self
            .store
            .redeem_invite(&token_hash, user_id, self.clock.now())
            .await
            .map_err(|e| {
                tracing::debug!(%user_id, kind = e.kind(), "invite redemption rejected");
                e
            })?;

        tracing::info!(
            %user_id,
            workspace_id = %membership.workspace_id,
            role = %membership.role,
            "invite redeemed"
        );
        Ok(membership)
    }

    /// Consume the token without joining.
    pub async fn decline(&self, token: &str, user_id: Uuid) -> Result<(), AppError> {
        let token_hash = hash_invite_token(token.trim());
        self.store.decline_invite(&token_hash, self.clock.now()).await?;

        tracing::info!(%user_id, "invite declined");
        Ok(())
    }

    pub async fn leave(&self, user_id: Uuid, workspace_id: Uuid) -> Result<(), AppError> {
        let membership = self
            .store
            .get_membership(user_id, workspace_id)
            .await?
            .ok_or(AppError::NotFound("Membership"))?;

        if membership.role.is_owner() {
            return Err(AppError::Forbidden);
        }

        if !self.store.delete_membership(user_id, workspace_id).await? {
            return Err(AppError::NotFound("Membership"));
        }
        self.revoke(workspace_id, Some(user_id));
        tracing::info!(%user_id, %workspace_id, "member left");

        Ok(())
    }
}
