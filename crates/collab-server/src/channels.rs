use std::sync::Arc;

use collab_shared::{Channel, ChannelType, Membership};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AppError;
use crate::membership::MembershipRegistry;
use crate::permission::ANY_MEMBER;
use crate::store::Store;

const MAX_CHANNEL_NAME_LEN: usize = 80;

/// Channel names are lowercase, without whitespace, at most 80 characters.
fn normalize_channel_name(name: &str) -> Result<String, AppError> {
    let name = name.trim().trim_start_matches('#').to_lowercase();

    if name.is_empty() {
        return Err(AppError::Validation("Channel name is required".to_string()));
    }
    if name.chars().count() > MAX_CHANNEL_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Channel name must be at most {} characters",
            MAX_CHANNEL_NAME_LEN
        )));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(AppError::Validation(
            "Channel name cannot contain spaces".to_string(),
        ));
    }

    Ok(name)
}

#[derive(Clone)]
pub struct ChannelRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    members: MembershipRegistry,
}

impl ChannelRegistry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, members: MembershipRegistry) -> Self {
        Self {
            store,
            clock,
            members,
        }
    }

    pub async fn create_channel(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
        name: &str,
        description: Option<String>,
        channel_type: ChannelType,
    ) -> Result<Channel, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;
        let name = normalize_channel_name(name)?;

        let channel = Channel {
            id: Uuid::new_v4(),
            workspace_id,
            name,
            description: description.filter(|d| !d.trim().is_empty()),
            channel_type,
            created_by: actor_id,
            created_at: self.clock.now(),
        };
        self.store.insert_channel(&channel).await?;

        tracing::info!(
            channel_id = %channel.id,
            %workspace_id,
            name = %channel.name,
            kind = ?channel.channel_type,
            "channel created"
        );
        Ok(channel)
    }

    /// Public channels plus the private channels `actor_id` created.
    pub async fn list_channels(
        &self,
        actor_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Vec<Channel>, AppError> {
        self.members.require(actor_id, workspace_id, ANY_MEMBER).await?;

        let channels = self.store.list_channels(workspace_id).await?;
        Ok(channels
            .into_iter()
            .filter(|c| c.is_visible_to(actor_id))
            .collect())
    }

    /// Resolve a channel the actor may read and post to.
    ///
    /// Channels the actor cannot see are reported as missing.
    pub async fn get_visible(
        &self,
        actor_id: Uuid,
        channel_id: Uuid,
    ) -> Result<(Channel, Membership), AppError> {
        let channel = self
            .store
            .get_channel(channel_id)
            .await?
            .ok_or(AppError::NotFound("Channel"))?;

        let membership = self
            .members
            .require(actor_id, channel.workspace_id, ANY_MEMBER)
            .await?;

        if !channel.is_visible_to(actor_id) {
            return Err(AppError::NotFound("Channel"));
        }

        Ok((channel, membership))
    }
}
