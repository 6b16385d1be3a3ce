use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PresenceParams {
    /// Reuse a connection id across reconnects; a fresh one is issued otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineUsersResponse {
    pub workspace_id: Uuid,
    pub online: Vec<Uuid>,
}
