//! Connect failure hooks
//!
//! Some drivers leave the session unusable after a failed connect. A hook
//! decides whether the adapter should reconnect the default tenant before
//! reporting the failure.

use crate::error::DriverError;
use crate::tenant::ConnectionKey;
use std::fmt;

/// What to do after a tenant connection failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Leave the context on the tenant it was on and report the error
    Propagate,
    /// Reconnect the default tenant, then report the error
    ResetToDefault,
}

/// Decides how to recover from a failed tenant connection.
pub trait ConnectFailureHook: Send + Sync + fmt::Debug {
    fn on_connect_failure(&self, key: &ConnectionKey, error: &DriverError) -> RecoveryAction;
}

/// Report the failure and leave the context alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepCurrent;

impl ConnectFailureHook for KeepCurrent {
    fn on_connect_failure(&self, _key: &ConnectionKey, _error: &DriverError) -> RecoveryAction {
        RecoveryAction::Propagate
    }
}

/// Reset to the default tenant on any failure.
///
/// Matches drivers (SQL Server) whose session is left pointing at nothing
/// once a `USE` against a missing database fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetOnFailure;

impl ConnectFailureHook for ResetOnFailure {
    fn on_connect_failure(&self, _key: &ConnectionKey, _error: &DriverError) -> RecoveryAction {
        RecoveryAction::ResetToDefault
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_actions() {
        let key = ConnectionKey::new("test_acme");
        let err = DriverError::connection("refused");

        assert_eq!(
            KeepCurrent.on_connect_failure(&key, &err),
            RecoveryAction::Propagate
        );
        assert_eq!(
            ResetOnFailure.on_connect_failure(&key, &err),
            RecoveryAction::ResetToDefault
        );
    }
}
