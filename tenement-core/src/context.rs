//! Per-execution tenant context

use crate::connection_name::ConnectionName;
use crate::driver::ConnectionHandle;
use crate::tenant::ConnectionKey;
use std::fmt;
use std::sync::Arc;

/// The tenant in effect for one logical unit of work.
///
/// Every task that switches tenants owns its own context, so concurrent work
/// never observes another task's tenant. Contexts are created by
/// [`TenantAdapter::context`](crate::TenantAdapter::context) and updated only
/// through adapter operations.
pub struct TenantContext {
    default: ConnectionKey,
    current: ConnectionKey,
    admin: Option<Arc<dyn ConnectionHandle>>,
    bound: bool,
}

/// Saved state rewound by `process` on every exit path.
#[derive(Clone)]
pub(crate) struct Snapshot {
    pub(crate) current: ConnectionKey,
    pub(crate) admin: Option<Arc<dyn ConnectionHandle>>,
}

impl TenantContext {
    pub(crate) fn new(default: ConnectionKey) -> Self {
        Self {
            current: default.clone(),
            default,
            admin: None,
            bound: false,
        }
    }

    /// Context whose changes are published to [`ConnectionName`].
    pub(crate) fn bound(default: ConnectionKey) -> Self {
        let ctx = Self {
            bound: true,
            ..Self::new(default)
        };
        ConnectionName::set(ctx.current.as_str());
        ctx
    }

    /// Tenant currently connected
    pub fn current(&self) -> &ConnectionKey {
        &self.current
    }

    /// Tenant this context falls back to
    pub fn default_key(&self) -> &ConnectionKey {
        &self.default
    }

    pub fn is_default(&self) -> bool {
        self.current == self.default
    }

    /// Administrative connection opened by a base switch, if any
    pub fn admin(&self) -> Option<&Arc<dyn ConnectionHandle>> {
        self.admin.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub(crate) fn enter(&mut self, key: ConnectionKey) {
        if self.bound {
            ConnectionName::set(key.as_str());
        }
        self.current = key;
    }

    pub(crate) fn set_admin(&mut self, admin: Option<Arc<dyn ConnectionHandle>>) {
        self.admin = admin;
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            current: self.current.clone(),
            admin: self.admin.clone(),
        }
    }

    pub(crate) fn rewind(&mut self, snapshot: Snapshot) {
        self.enter(snapshot.current);
        self.admin = snapshot.admin;
    }
}

impl fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantContext")
            .field("current", &self.current)
            .field("default", &self.default)
            .field("admin", &self.admin.is_some())
            .field("bound", &self.bound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_starts_on_default() {
        let ctx = TenantContext::new(ConnectionKey::new("app"));
        assert!(ctx.is_default());
        assert_eq!(ctx.current().as_str(), "app");
        assert!(ctx.admin().is_none());
    }

    #[test]
    fn test_snapshot_rewind() {
        let mut ctx = TenantContext::new(ConnectionKey::new("app"));
        let saved = ctx.snapshot();

        ctx.enter(ConnectionKey::new("test_acme"));
        assert!(!ctx.is_default());

        ctx.rewind(saved);
        assert_eq!(ctx.current().as_str(), "app");
    }

    #[tokio::test]
    async fn test_bound_context_publishes_name() {
        ConnectionName::scope(async {
            let mut ctx = TenantContext::bound(ConnectionKey::new("app"));
            assert_eq!(ConnectionName::get(), "app");

            ctx.enter(ConnectionKey::new("test_acme"));
            assert_eq!(ConnectionName::get(), "test_acme");
        })
        .await;
    }
}
