//! Connection descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A fully specified connection descriptor.
///
/// The `database` field names the database the connection targets. For
/// schema-per-tenant deployments `search_path` carries the tenant schema
/// instead and `database` stays fixed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Driver/adapter name (e.g. `postgresql`, `sqlserver`).
    #[serde(default = "default_adapter")]
    pub adapter: String,

    /// Server host.
    #[serde(default)]
    pub host: Option<String>,

    /// Server port.
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name. Doubles as the default tenant in database mode.
    pub database: String,

    /// Login user.
    #[serde(default)]
    pub username: Option<String>,

    /// Login password.
    #[serde(default)]
    pub password: Option<String>,

    /// Schema search path applied after connecting.
    #[serde(default)]
    pub search_path: Option<String>,

    /// Driver specific options, passed through untouched.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_adapter() -> String {
    "postgresql".to_string()
}

impl ConnectionSpec {
    /// Create a spec for the given database with default settings.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            adapter: default_adapter(),
            host: None,
            port: None,
            database: database.into(),
            username: None,
            password: None,
            search_path: None,
            options: BTreeMap::new(),
        }
    }

    /// Set the adapter name.
    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = adapter.into();
        self
    }

    /// Set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Add a driver option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Copy of this spec pointed at another database.
    pub fn for_database(&self, database: impl Into<String>) -> Self {
        let mut spec = self.clone();
        spec.database = database.into();
        spec
    }

    /// Copy of this spec with the given schema search path.
    pub fn for_search_path(&self, schema: impl Into<String>) -> Self {
        let mut spec = self.clone();
        spec.search_path = Some(schema.into());
        spec
    }
}

impl Default for ConnectionSpec {
    fn default() -> Self {
        Self::new("tenement")
    }
}

// Keep passwords out of logs.
impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("adapter", &self.adapter)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("search_path", &self.search_path)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_database_keeps_other_fields() {
        let spec = ConnectionSpec::new("app")
            .with_host("db.internal")
            .with_port(5433)
            .with_credentials("app", "secret");

        let tenant = spec.for_database("test_acme");
        assert_eq!(tenant.database, "test_acme");
        assert_eq!(tenant.host.as_deref(), Some("db.internal"));
        assert_eq!(tenant.port, Some(5433));
        assert_eq!(spec.database, "app");
    }

    #[test]
    fn test_debug_redacts_password() {
        let spec = ConnectionSpec::new("app").with_credentials("app", "hunter2");
        let rendered = format!("{:?}", spec);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let spec: ConnectionSpec = serde_json::from_str(r#"{"database": "app"}"#).unwrap();
        assert_eq!(spec.adapter, "postgresql");
        assert!(spec.search_path.is_none());
        assert!(spec.options.is_empty());
    }
}
