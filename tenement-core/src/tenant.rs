//! Tenant Names
//!
//! Tenant identifiers and their environment-decorated connection keys.

use crate::error::{Result, TenantError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tenement_config::{EnvironmentPolicy, TenancyConfig};

/// Tenant identifier as supplied by callers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantName(String);

impl TenantName {
    /// Create a tenant name, rejecting empty or blank input
    ///
    /// # Examples
    ///
    /// ```
    /// use tenement_core::TenantName;
    ///
    /// let tenant = TenantName::new("acme").unwrap();
    /// assert_eq!(tenant.as_str(), "acme");
    /// assert!(TenantName::new("  ").is_err());
    /// ```
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(TenantError::InvalidName(name));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantName {
    type Error = TenantError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TenantName {
    type Error = TenantError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TenantName> for String {
    fn from(name: TenantName) -> Self {
        name.0
    }
}

/// Environment-decorated tenant name; names the database or schema that is
/// actually connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey(Arc<str>);

impl ConnectionKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Decorate `name` with `environment` according to `policy`.
///
/// Names that already carry the environment as a `_`-delimited component are
/// returned unchanged, which makes decoration idempotent.
///
/// # Examples
///
/// ```
/// use tenement_core::tenant::environmentify;
/// use tenement_core::EnvironmentPolicy;
///
/// assert_eq!(environmentify("acme", "test", EnvironmentPolicy::Prepend), "test_acme");
/// assert_eq!(environmentify("test_acme", "test", EnvironmentPolicy::Prepend), "test_acme");
/// assert_eq!(environmentify("acme", "test", EnvironmentPolicy::Append), "acme_test");
/// ```
pub fn environmentify(name: &str, environment: &str, policy: EnvironmentPolicy) -> String {
    if environment.is_empty() || has_environment_token(name, environment) {
        return name.to_string();
    }

    match policy {
        EnvironmentPolicy::Prepend => format!("{}_{}", environment, name),
        EnvironmentPolicy::Append => format!("{}_{}", name, environment),
        EnvironmentPolicy::None => name.to_string(),
    }
}

fn has_environment_token(name: &str, environment: &str) -> bool {
    name == environment
        || name.starts_with(&format!("{}_", environment))
        || name.ends_with(&format!("_{}", environment))
        || name.contains(&format!("_{}_", environment))
}

/// The running environment and how it decorates tenant names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    name: String,
    policy: EnvironmentPolicy,
}

impl Environment {
    pub fn new(name: impl Into<String>, policy: EnvironmentPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }

    pub fn from_config(config: &TenancyConfig) -> Self {
        Self::new(config.environment.clone(), config.environment_policy())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> EnvironmentPolicy {
        self.policy
    }

    /// Connection key for a tenant
    pub fn decorate(&self, tenant: &TenantName) -> ConnectionKey {
        ConnectionKey::new(environmentify(tenant.as_str(), &self.name, self.policy))
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn arb_policy() -> impl Strategy<Value = EnvironmentPolicy> {
        prop_oneof![
            Just(EnvironmentPolicy::None),
            Just(EnvironmentPolicy::Prepend),
            Just(EnvironmentPolicy::Append),
        ]
    }

    proptest! {
        #[test]
        fn decoration_is_idempotent(
            name in "\\PC{0,24}",
            environment in "[a-z][a-z0-9_]{0,11}",
            policy in arb_policy(),
        ) {
            let once = environmentify(&name, &environment, policy);
            let twice = environmentify(&once, &environment, policy);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn decorated_names_carry_the_environment(
            name in "[a-z][a-z0-9]{0,15}",
            environment in "[a-z]{1,8}",
        ) {
            let prepended = environmentify(&name, &environment, EnvironmentPolicy::Prepend);
            let appended = environmentify(&name, &environment, EnvironmentPolicy::Append);
            prop_assert!(has_environment_token(&prepended, &environment));
            prop_assert!(has_environment_token(&appended, &environment));
        }
    }
}
