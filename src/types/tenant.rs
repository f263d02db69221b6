//! Tenant context passed into every import operation

use uuid::Uuid;

/// Caller identity resolved from the request token.
///
/// All job and contact data is scoped by `tenant_id`; `user_id` is only
/// recorded for audit (`created_by`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid, user_id: Uuid) -> Self {
        Self { tenant_id, user_id }
    }
}
