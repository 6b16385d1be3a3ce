use serde::{Deserialize, Serialize};

use crate::models::WorkspaceRole;

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InviteMemberRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemInviteRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateMemberRoleRequest {
    pub role: WorkspaceRole,
}
