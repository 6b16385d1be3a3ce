use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity resolved for the caller of an operation.
///
/// Users are owned by the identity provider; the core only ever sees the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
}

impl Session {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }
}
