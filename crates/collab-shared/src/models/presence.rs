use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Presence stream element.
///
/// Clients replace their online-set on `Sync` and add/remove on `Join`/`Leave`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PresenceEvent {
    Sync { workspace_id: Uuid, online: Vec<Uuid> },
    Join { workspace_id: Uuid, user_id: Uuid },
    Leave { workspace_id: Uuid, user_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Offline,
}
