//! Tenant contexts threaded explicitly through every repository call.
//!
//! A [`TenantScope`] is built once per request from the resolved tenant id and
//! passed by reference. Repositories bind its id into every statement and run
//! every decoded row through [`TenantScope::admit`], so a missing predicate
//! surfaces as [`RepositoryError::TenantIsolation`] instead of leaking rows.
//! [`AdminScope`] is the only way to reach tenant-spanning operations.

use concierge_core::TenantId;

use crate::repositories::RepositoryError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantScope {
    tenant_id: TenantId,
}

impl TenantScope {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn as_str(&self) -> &str {
        &self.tenant_id.0
    }

    /// Fails closed when `owner` is not this scope's tenant.
    pub fn admit(&self, owner: &str) -> Result<(), RepositoryError> {
        if owner == self.tenant_id.0 {
            return Ok(());
        }
        tracing::error!(
            event_name = "db.tenant_isolation.violation",
            tenant_id = %self.tenant_id,
            "row outside the active tenant context was reached"
        );
        Err(RepositoryError::TenantIsolation { scope: self.tenant_id.0.clone() })
    }
}

/// Operator context for tenant creation, listing and soft deletion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminScope {
    actor: String,
}

impl AdminScope {
    pub fn new(actor: impl Into<String>) -> Self {
        Self { actor: actor.into() }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn scope_for(&self, tenant_id: TenantId) -> TenantScope {
        TenantScope::new(tenant_id)
    }
}
