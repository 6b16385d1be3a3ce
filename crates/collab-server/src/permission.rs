//! Authorization over membership facts. Pure; no I/O.

use collab_shared::{Membership, WorkspaceRole};

/// Any member, whatever the role.
pub const ANY_MEMBER: &[WorkspaceRole] = &[];

/// Only the workspace owner.
pub const OWNER_ONLY: &[WorkspaceRole] = &[WorkspaceRole::Owner];

/// Decide whether `membership` satisfies `required`.
///
/// - no membership: denied
/// - empty `required`: granted to any membership with a known role
/// - otherwise: granted iff the role is listed
///
/// Unknown roles are always denied.
pub fn authorize(membership: Option<&Membership>, required: &[WorkspaceRole]) -> bool {
    let Some(membership) = membership else {
        return false;
    };

    if !membership.role.is_known() {
        return false;
    }

    required.is_empty() || required.contains(&membership.role)
}
