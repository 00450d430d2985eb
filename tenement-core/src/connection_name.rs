//! Active connection name, scoped per task
//!
//! Code that has not adopted an explicit [`TenantContext`](crate::TenantContext)
//! asks [`ConnectionName::get`] which named connection is in effect. Inside a
//! [`ConnectionName::scope`] the answer is private to that scope; outside of
//! any scope (the primary context) it is the process-wide name.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::future::Future;

/// Name in effect before anything is selected
pub const PRIMARY_CONNECTION_NAME: &str = "primary";

tokio::task_local! {
    static ACTIVE: RefCell<Option<String>>;
}

static PROCESS_WIDE: Lazy<RwLock<String>> =
    Lazy::new(|| RwLock::new(PRIMARY_CONNECTION_NAME.to_string()));

/// Accessor for the active connection name
pub struct ConnectionName;

impl ConnectionName {
    /// The scope's override if one is set, else the process-wide name.
    pub fn get() -> String {
        ACTIVE
            .try_with(|slot| slot.borrow().clone())
            .ok()
            .flatten()
            .unwrap_or_else(|| PROCESS_WIDE.read().clone())
    }

    /// Set the active name.
    ///
    /// Inside a scope this only affects the scope. On the primary context it
    /// replaces the process-wide name.
    pub fn set(name: impl Into<String>) {
        let name = name.into();
        let scoped = ACTIVE.try_with(|slot| *slot.borrow_mut() = Some(name.clone()));
        if scoped.is_err() {
            *PROCESS_WIDE.write() = name;
        }
    }

    /// Drop the scope's override so the process-wide name shows through again.
    pub fn clear() {
        let _ = ACTIVE.try_with(|slot| slot.borrow_mut().take());
    }

    /// Whether the caller runs outside every scope.
    pub fn is_primary() -> bool {
        ACTIVE.try_with(|_| ()).is_err()
    }

    /// Run `fut` with its own, initially empty, override slot.
    pub async fn scope<F: Future>(fut: F) -> F::Output {
        ACTIVE.scope(RefCell::new(None), fut).await
    }
}
