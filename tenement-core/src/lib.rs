//! Tenant connection routing for Tenement
//!
//! Routes each unit of work to an isolated tenant database (or schema) while
//! the rest of the application keeps a single model layer.
//!
//! # Features
//!
//! - **Connection Pool** - One cached handle per tenant, created on first
//!   use and discarded when establishment fails
//! - **Database or Schema Isolation** - Pluggable [`Isolation`] strategies
//! - **Save / Switch / Restore** - [`TenantAdapter::process`] always puts the
//!   previous tenant back, even when the work fails or is cancelled
//! - **Model Routing** - Excluded models stay on the shared default connection
//! - **Migrations** - Per-tenant migrations through an administrative
//!   connection
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tenement_core::prelude::*;
//!
//! let config = TenancyConfig::load("config/tenancy.toml")?;
//! let adapter = TenantAdapter::new(config, Arc::new(PgDriver::new()))?;
//!
//! let mut ctx = adapter.context();
//! adapter.create(&mut ctx, "acme").await?;
//! adapter.switch(&mut ctx, Some("acme")).await?;
//!
//! let widgets = adapter
//!     .connection(&ctx, ModelClass::Named("Widget"))
//!     .await?;
//! ```
//!
//! # Migrations
//!
//! ```rust,ignore
//! let migrator = Migrator::new(adapter.clone(), Arc::new(MyRunner))
//!     .with_options(MigrateOptions::from_env()?);
//!
//! for (tenant, outcome) in migrator.migrate_all(&mut ctx, tenants).await {
//!     println!("{tenant}: {outcome:?}");
//! }
//! ```

pub mod adapter;
pub mod connection_name;
pub mod context;
pub mod driver;
pub mod error;
pub mod isolation;
pub mod loader;
pub mod memory;
pub mod migrator;
pub mod pool;
pub mod recovery;
pub mod router;
pub mod tenant;

pub use adapter::{TenantAdapter, TenantAdapterBuilder, TenantFuture};
pub use connection_name::{ConnectionName, PRIMARY_CONNECTION_NAME};
pub use context::TenantContext;
pub use driver::{ConnectionDriver, ConnectionHandle};
pub use error::{BoxError, DriverError, DriverErrorKind, Result, TenantError};
pub use isolation::{DatabaseIsolation, Isolation, IsolationMode, SchemaIsolation};
pub use loader::{SchemaLoader, SqlScriptLoader};
pub use migrator::{Direction, MigrateOptions, MigrationRunner, Migrator};
pub use pool::{ConnectionPool, PoolEntryInfo, PoolKey, PoolStats};
pub use recovery::{ConnectFailureHook, KeepCurrent, RecoveryAction, ResetOnFailure};
pub use router::{ConnectionRouter, ModelClass, Route};
pub use tenant::{ConnectionKey, Environment, TenantName};

pub use tenement_config::{ConnectionSpec, EnvironmentPolicy, TenancyConfig};

/// Prelude for common imports.
///
/// ```
/// use tenement_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::adapter::{TenantAdapter, TenantFuture};
    pub use crate::context::TenantContext;
    pub use crate::driver::{ConnectionDriver, ConnectionHandle};
    pub use crate::error::{DriverError, TenantError};
    pub use crate::migrator::{MigrateOptions, MigrationRunner, Migrator};
    pub use crate::router::{ConnectionRouter, ModelClass, Route};
    pub use tenement_config::{ConnectionSpec, TenancyConfig};
}
