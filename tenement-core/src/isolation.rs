//! Tenant isolation strategies
//!
//! How a tenant is separated from its neighbours: a database per tenant, or
//! a schema per tenant inside the default database. The adapter is written
//! against [`Isolation`] and never branches on the mode itself.

use crate::driver::ConnectionHandle;
use crate::error::DriverError;
use crate::pool::ConnectionPool;
use crate::tenant::{ConnectionKey, Environment, TenantName};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tenement_config::{ConnectionSpec, TenancyConfig};
use tracing::debug;

/// Isolation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationMode {
    /// Each tenant has its own database
    Database,
    /// Each tenant has its own schema in the default database
    Schema,
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::Schema => write!(f, "schema"),
        }
    }
}

/// Strategy for reaching and provisioning tenant storage
#[async_trait]
pub trait Isolation: Send + Sync + fmt::Debug {
    fn mode(&self) -> IsolationMode;

    /// Whether every model routes to the default connection, with the tenant
    /// carried by the search path rather than by a separate database.
    fn routes_through_default(&self) -> bool;

    /// Descriptor for the shared default connection.
    fn default_spec(&self, config: &TenancyConfig) -> ConnectionSpec {
        config.connection.clone()
    }

    /// Key of the tenant a fresh context starts on.
    fn default_key(&self, config: &TenancyConfig, environment: &Environment) -> ConnectionKey;

    /// Descriptor for an unpooled administrative connection to `key`.
    fn root_spec(&self, base: &ConnectionSpec, key: &ConnectionKey) -> ConnectionSpec;

    /// Handle serving `key`, with the tenant selected on it.
    async fn connect(
        &self,
        pool: &ConnectionPool,
        key: &ConnectionKey,
    ) -> Result<Arc<dyn ConnectionHandle>, DriverError>;

    /// Create the tenant's database or schema.
    async fn create_tenant(&self, pool: &ConnectionPool, key: &ConnectionKey)
    -> Result<(), DriverError>;

    /// Remove the tenant's database or schema.
    async fn drop_tenant(&self, pool: &ConnectionPool, key: &ConnectionKey)
    -> Result<(), DriverError>;
}

/// Database-per-tenant
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseIsolation;

#[async_trait]
impl Isolation for DatabaseIsolation {
    fn mode(&self) -> IsolationMode {
        IsolationMode::Database
    }

    fn routes_through_default(&self) -> bool {
        false
    }

    fn default_key(&self, config: &TenancyConfig, environment: &Environment) -> ConnectionKey {
        match TenantName::new(config.connection.database.as_str()) {
            Ok(name) => environment.decorate(&name),
            Err(_) => ConnectionKey::new(&config.connection.database),
        }
    }

    fn root_spec(&self, base: &ConnectionSpec, key: &ConnectionKey) -> ConnectionSpec {
        base.for_database(key.as_str())
    }

    async fn connect(
        &self,
        pool: &ConnectionPool,
        key: &ConnectionKey,
    ) -> Result<Arc<dyn ConnectionHandle>, DriverError> {
        if key.as_str() == pool.default_spec().database {
            return pool.default_handle().await;
        }
        let spec = pool.default_spec().for_database(key.as_str());
        pool.use_spec(&spec).await
    }

    async fn create_tenant(
        &self,
        pool: &ConnectionPool,
        key: &ConnectionKey,
    ) -> Result<(), DriverError> {
        pool.default_handle().await?.create_database(key.as_str()).await
    }

    async fn drop_tenant(
        &self,
        pool: &ConnectionPool,
        key: &ConnectionKey,
    ) -> Result<(), DriverError> {
        pool.default_handle().await?.drop_database(key.as_str()).await
    }
}

/// Schema-per-tenant
///
/// All tenants live in the default database. Each schema gets its own pooled
/// handle with the search path fixed when it is established, so a handle is
/// never re-pointed while another context uses it. The default handle is
/// pinned to the default schema, which is used verbatim, never decorated.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaIsolation;

#[async_trait]
impl Isolation for SchemaIsolation {
    fn mode(&self) -> IsolationMode {
        IsolationMode::Schema
    }

    fn routes_through_default(&self) -> bool {
        true
    }

    fn default_key(&self, config: &TenancyConfig, _environment: &Environment) -> ConnectionKey {
        ConnectionKey::new(&config.default_schema)
    }

    fn default_spec(&self, config: &TenancyConfig) -> ConnectionSpec {
        config.connection.for_search_path(&config.default_schema)
    }

    fn root_spec(&self, base: &ConnectionSpec, key: &ConnectionKey) -> ConnectionSpec {
        base.for_search_path(key.as_str())
    }

    async fn connect(
        &self,
        pool: &ConnectionPool,
        key: &ConnectionKey,
    ) -> Result<Arc<dyn ConnectionHandle>, DriverError> {
        if pool.default_spec().search_path.as_deref() == Some(key.as_str()) {
            return pool.default_handle().await;
        }
        let spec = pool.default_spec().for_search_path(key.as_str());
        let handle = pool.use_spec_as(key.as_str(), &spec).await?;
        debug!(schema = %key, "Using schema handle");
        Ok(handle)
    }

    async fn create_tenant(
        &self,
        pool: &ConnectionPool,
        key: &ConnectionKey,
    ) -> Result<(), DriverError> {
        pool.default_handle().await?.create_schema(key.as_str()).await
    }

    async fn drop_tenant(
        &self,
        pool: &ConnectionPool,
        key: &ConnectionKey,
    ) -> Result<(), DriverError> {
        pool.default_handle().await?.drop_schema(key.as_str()).await
    }
}

/// Isolation strategy selected by `use_schemas`
pub fn from_config(config: &TenancyConfig) -> Arc<dyn Isolation> {
    if config.use_schemas {
        Arc::new(SchemaIsolation)
    } else {
        Arc::new(DatabaseIsolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDriver;
    use tenement_config::EnvironmentPolicy;

    fn pool(driver: &Arc<InMemoryDriver>) -> ConnectionPool {
        ConnectionPool::new(driver.clone(), ConnectionSpec::new("app"))
    }

    #[test]
    fn test_default_keys() {
        let config = TenancyConfig::new(ConnectionSpec::new("app")).with_environment("test");
        let env = Environment::new("test", EnvironmentPolicy::Prepend);

        assert_eq!(DatabaseIsolation.default_key(&config, &env).as_str(), "test_app");
        assert_eq!(SchemaIsolation.default_key(&config, &env).as_str(), "public");
    }

    #[tokio::test]
    async fn test_database_connect_uses_pool() {
        let driver = Arc::new(InMemoryDriver::with_databases(["app", "test_acme"]));
        let pool = pool(&driver);

        DatabaseIsolation
            .connect(&pool, &ConnectionKey::new("test_acme"))
            .await
            .unwrap();
        assert!(pool.contains("test_acme"));

        // The default database is served by the shared default handle.
        DatabaseIsolation
            .connect(&pool, &ConnectionKey::new("app"))
            .await
            .unwrap();
        assert!(!pool.contains("app"));
        assert!(pool.stats().default_connected);
    }

    #[tokio::test]
    async fn test_database_create_and_drop() {
        let driver = Arc::new(InMemoryDriver::with_databases(["app"]));
        let pool = pool(&driver);
        let key = ConnectionKey::new("test_acme");

        DatabaseIsolation.create_tenant(&pool, &key).await.unwrap();
        assert!(driver.has_database("test_acme"));

        let err = DatabaseIsolation.create_tenant(&pool, &key).await.unwrap_err();
        assert_eq!(err.kind, crate::error::DriverErrorKind::AlreadyExists);

        DatabaseIsolation.drop_tenant(&pool, &key).await.unwrap();
        assert!(!driver.has_database("test_acme"));
    }

    #[tokio::test]
    async fn test_schema_connect_pins_search_path() {
        let driver = Arc::new(
            InMemoryDriver::with_databases(["app"]).with_schemas(["public", "acme", "globex"]),
        );
        let pool = pool(&driver);

        let acme = SchemaIsolation
            .connect(&pool, &ConnectionKey::new("acme"))
            .await
            .unwrap();
        let globex = SchemaIsolation
            .connect(&pool, &ConnectionKey::new("globex"))
            .await
            .unwrap();
        acme.execute("SELECT 1").await.unwrap();

        let last = driver.statements().pop().unwrap();
        assert_eq!(last.search_path.as_deref(), Some("acme"));
        assert!(!Arc::ptr_eq(&acme, &globex));
        assert_eq!(pool.stats().pooled, 2);
        assert!(!pool.stats().default_connected);
    }

    #[tokio::test]
    async fn test_schema_default_key_uses_default_handle() {
        let driver = Arc::new(InMemoryDriver::with_databases(["app"]).with_schemas(["public"]));
        let config = TenancyConfig::new(ConnectionSpec::new("app")).with_schemas(true);
        let pool = ConnectionPool::new(driver.clone(), SchemaIsolation.default_spec(&config));

        let handle = SchemaIsolation
            .connect(&pool, &ConnectionKey::new("public"))
            .await
            .unwrap();
        handle.execute("SELECT 1").await.unwrap();

        assert_eq!(pool.stats().pooled, 0);
        assert!(pool.stats().default_connected);
        let last = driver.statements().pop().unwrap();
        assert_eq!(last.search_path.as_deref(), Some("public"));
    }

    #[test]
    fn test_default_specs() {
        let config = TenancyConfig::new(ConnectionSpec::new("app")).with_default_schema("dbo");

        assert_eq!(DatabaseIsolation.default_spec(&config).search_path, None);
        let spec = SchemaIsolation.default_spec(&config);
        assert_eq!(spec.database, "app");
        assert_eq!(spec.search_path.as_deref(), Some("dbo"));
    }

    #[tokio::test]
    async fn test_schema_connect_missing_schema() {
        let driver = Arc::new(InMemoryDriver::with_databases(["app"]).with_schemas(["public"]));
        let pool = pool(&driver);

        let err = SchemaIsolation
            .connect(&pool, &ConnectionKey::new("nope"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::DriverErrorKind::NotFound);
    }

    #[test]
    fn test_root_specs() {
        let base = ConnectionSpec::new("app");
        let key = ConnectionKey::new("acme");

        assert_eq!(DatabaseIsolation.root_spec(&base, &key).database, "acme");
        let schema = SchemaIsolation.root_spec(&base, &key);
        assert_eq!(schema.database, "app");
        assert_eq!(schema.search_path.as_deref(), Some("acme"));
    }

    #[test]
    fn test_from_config() {
        let config = TenancyConfig::default();
        assert_eq!(from_config(&config).mode(), IsolationMode::Database);
        assert_eq!(
            from_config(&config.with_schemas(true)).mode(),
            IsolationMode::Schema
        );
    }
}
