//! Tenant migrations
//!
//! Runs the application's migrations against one tenant at a time through
//! the administrative connection, restoring the caller's tenant afterwards.
//! The migration engine itself is a [`MigrationRunner`].

use crate::adapter::TenantAdapter;
use crate::context::TenantContext;
use crate::driver::ConnectionHandle;
use crate::error::{BoxError, Result, TenantError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome reported by a migration runner
pub type MigrationResult = std::result::Result<(), BoxError>;

/// Migration direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// The migration engine
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Migrate to `version`, or to the latest when `None`.
    ///
    /// When `scope` is set only migrations in that scope run.
    async fn migrate(
        &self,
        conn: &dyn ConnectionHandle,
        path: &Path,
        version: Option<i64>,
        scope: Option<&str>,
    ) -> MigrationResult;

    /// Run a single migration up or down.
    async fn run(
        &self,
        conn: &dyn ConnectionHandle,
        direction: Direction,
        path: &Path,
        version: i64,
    ) -> MigrationResult;

    /// Roll back the latest `steps` migrations.
    async fn rollback(&self, conn: &dyn ConnectionHandle, path: &Path, steps: u32) -> MigrationResult;
}

/// Target version and scope for [`Migrator::migrate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    pub version: Option<i64>,
    pub scope: Option<String>,
}

impl MigrateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Read `VERSION` and `SCOPE` from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Read `VERSION` and `SCOPE` from the given variables.
    ///
    /// Blank values count as unset.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let present = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let version = present("VERSION")
            .map(|v| {
                v.parse::<i64>().map_err(|_| {
                    TenantError::Configuration(format!("VERSION must be an integer, got {:?}", v))
                })
            })
            .transpose()?;

        Ok(Self {
            version,
            scope: present("SCOPE"),
        })
    }
}

/// Applies migrations tenant by tenant.
#[derive(Clone)]
pub struct Migrator {
    adapter: TenantAdapter,
    runner: Arc<dyn MigrationRunner>,
    migrations_path: PathBuf,
    options: MigrateOptions,
}

impl Migrator {
    /// Migrator using the adapter's configured migrations path
    pub fn new(adapter: TenantAdapter, runner: Arc<dyn MigrationRunner>) -> Self {
        let migrations_path = adapter.config().migrations_path.clone();
        Self {
            adapter,
            runner,
            migrations_path,
            options: MigrateOptions::default(),
        }
    }

    pub fn with_migrations_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_path = path.into();
        self
    }

    pub fn with_options(mut self, options: MigrateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &MigrateOptions {
        &self.options
    }

    /// Migrate a tenant to the configured version (latest by default).
    pub async fn migrate(&self, ctx: &mut TenantContext, tenant: &str) -> Result<()> {
        let runner = Arc::clone(&self.runner);
        let path = self.migrations_path.clone();
        let options = self.options.clone();

        info!(tenant, version = ?options.version, scope = ?options.scope, "Migrating tenant");
        self.adapter
            .base_process(ctx, Some(tenant), move |ctx| {
                Box::pin(async move {
                    let conn = admin_connection(ctx)?;
                    runner
                        .migrate(conn.as_ref(), &path, options.version, options.scope.as_deref())
                        .await
                        .map_err(|source| migration_error(ctx, source))
                })
            })
            .await
    }

    /// Run a single migration up or down on a tenant.
    pub async fn run(
        &self,
        ctx: &mut TenantContext,
        direction: Direction,
        tenant: &str,
        version: i64,
    ) -> Result<()> {
        let runner = Arc::clone(&self.runner);
        let path = self.migrations_path.clone();

        info!(tenant, ?direction, version, "Running migration");
        self.adapter
            .base_process(ctx, Some(tenant), move |ctx| {
                Box::pin(async move {
                    let conn = admin_connection(ctx)?;
                    runner
                        .run(conn.as_ref(), direction, &path, version)
                        .await
                        .map_err(|source| migration_error(ctx, source))
                })
            })
            .await
    }

    /// Roll back the latest `steps` migrations on a tenant.
    pub async fn rollback(&self, ctx: &mut TenantContext, tenant: &str, steps: u32) -> Result<()> {
        let runner = Arc::clone(&self.runner);
        let path = self.migrations_path.clone();

        info!(tenant, steps, "Rolling back migrations");
        self.adapter
            .base_process(ctx, Some(tenant), move |ctx| {
                Box::pin(async move {
                    let conn = admin_connection(ctx)?;
                    runner
                        .rollback(conn.as_ref(), &path, steps)
                        .await
                        .map_err(|source| migration_error(ctx, source))
                })
            })
            .await
    }

    /// Migrate every tenant in turn, returning each tenant's outcome.
    ///
    /// A failing tenant does not stop the rest.
    pub async fn migrate_all<I, S>(&self, ctx: &mut TenantContext, tenants: I) -> Vec<(String, Result<()>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut outcomes = Vec::new();
        for tenant in tenants {
            let tenant = tenant.into();
            let outcome = self.migrate(ctx, &tenant).await;
            if let Err(err) = &outcome {
                warn!(tenant = %tenant, error = %err, "Tenant migration failed");
            }
            outcomes.push((tenant, outcome));
        }
        outcomes
    }

    /// [`migrate_all`](Self::migrate_all) over the tenants listed in
    /// `tenant_names`.
    pub async fn migrate_configured(&self, ctx: &mut TenantContext) -> Vec<(String, Result<()>)> {
        let tenants = self.adapter.config().tenant_names.clone();
        if tenants.is_empty() {
            warn!("No tenants configured, nothing to migrate");
        }
        self.migrate_all(ctx, tenants).await
    }
}

fn admin_connection(ctx: &TenantContext) -> Result<Arc<dyn ConnectionHandle>> {
    ctx.admin()
        .cloned()
        .ok_or_else(|| TenantError::Configuration("no administrative connection".into()))
}

fn migration_error(ctx: &TenantContext, source: BoxError) -> TenantError {
    TenantError::Migration {
        tenant: ctx.current().to_string(),
        source,
    }
}
