//! Explicit tenant context threaded through every ledger call.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{TenantId, UserId};

/// Tenant + acting user for one unit of work.
///
/// Validated once at construction; downstream components trust it and never
/// re-derive the tenant per query.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    tenant_id: TenantId,
    actor: UserId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, actor: UserId) -> DomainResult<Self> {
        if tenant_id.is_nil() {
            return Err(DomainError::invalid_id("tenant id cannot be nil"));
        }
        if actor.is_nil() {
            return Err(DomainError::invalid_id("actor id cannot be nil"));
        }
        Ok(Self { tenant_id, actor })
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }
}
