//! Tenant Adapter
//!
//! Lifecycle operations for tenants: create, switch, process, drop and reset,
//! plus the administrative ("base") variants used by migration tooling.
//!
//! # Usage
//!
//! ```rust,ignore
//! let adapter = TenantAdapter::builder(config)
//!     .with_driver(Arc::new(PgDriver::new()))
//!     .build()?;
//!
//! let mut ctx = adapter.context();
//! adapter.create(&mut ctx, "acme").await?;
//!
//! let total = adapter
//!     .process(&mut ctx, Some("acme"), |ctx| {
//!         Box::pin(async move { count_widgets(ctx).await })
//!     })
//!     .await?;
//! ```
//!
//! Work closures run on a `&mut TenantContext` for an arbitrary borrow, so
//! they must own what they capture: clone the adapter (it is cheap) rather
//! than borrowing it.

use crate::connection_name::ConnectionName;
use crate::context::{Snapshot, TenantContext};
use crate::driver::{ConnectionDriver, ConnectionHandle};
use crate::error::{DriverError, DriverErrorKind, Result, TenantError};
use crate::isolation::{self, Isolation, IsolationMode};
use crate::loader::{self, DEFAULT_SEED_FILE, SchemaLoader, SqlScriptLoader};
use crate::pool::ConnectionPool;
use crate::recovery::{ConnectFailureHook, KeepCurrent, RecoveryAction, ResetOnFailure};
use crate::router::ModelClass;
use crate::tenant::{ConnectionKey, Environment, TenantName};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tenement_config::{TenancyConfig, Validate};
use tracing::{debug, error, info, warn};

/// Future returned by work closures passed to `process` and friends.
pub type TenantFuture<'c, T, E> =
    Pin<Box<dyn Future<Output = std::result::Result<T, E>> + Send + 'c>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mechanism {
    /// Pooled per-tenant handles
    Pooled,
    /// Unpooled administrative handle stored on the context
    Root,
}

struct Inner {
    config: TenancyConfig,
    environment: Environment,
    pool: ConnectionPool,
    isolation: Arc<dyn Isolation>,
    failure_hook: Arc<dyn ConnectFailureHook>,
    loader: Arc<dyn SchemaLoader>,
    default_key: ConnectionKey,
}

/// Orchestrates tenant lifecycle operations.
///
/// Cloning is cheap and every clone shares the same pool.
#[derive(Clone)]
pub struct TenantAdapter {
    inner: Arc<Inner>,
}

impl TenantAdapter {
    /// Start building an adapter for `config`.
    pub fn builder(config: TenancyConfig) -> TenantAdapterBuilder {
        TenantAdapterBuilder::new(config)
    }

    /// Adapter with the isolation implied by `config` and default hooks.
    pub fn new(config: TenancyConfig, driver: Arc<dyn ConnectionDriver>) -> Result<Self> {
        Self::builder(config).with_driver(driver).build()
    }

    /// Adapter for SQL Server.
    ///
    /// A default schema of `public` becomes `dbo`, and a failed connect
    /// resets the context to the default tenant before reporting the error.
    pub fn sqlserver(mut config: TenancyConfig, driver: Arc<dyn ConnectionDriver>) -> Result<Self> {
        if config.default_schema == "public" {
            config.default_schema = "dbo".to_string();
        }
        Self::builder(config)
            .with_driver(driver)
            .with_failure_hook(Arc::new(ResetOnFailure))
            .build()
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    pub fn isolation(&self) -> &dyn Isolation {
        self.inner.isolation.as_ref()
    }

    pub fn isolation_mode(&self) -> IsolationMode {
        self.inner.isolation.mode()
    }

    pub fn environment(&self) -> &Environment {
        &self.inner.environment
    }

    /// Key of the configured default tenant
    pub fn default_tenant(&self) -> &ConnectionKey {
        &self.inner.default_key
    }

    /// Fresh context on the default tenant
    pub fn context(&self) -> TenantContext {
        TenantContext::new(self.inner.default_key.clone())
    }

    /// Tenant the context is connected to
    pub fn current<'c>(&self, ctx: &'c TenantContext) -> &'c ConnectionKey {
        ctx.current()
    }

    /// Decorate a tenant name with the running environment.
    pub fn environmentify(&self, tenant: &str) -> Result<ConnectionKey> {
        Ok(self.inner.environment.decorate(&TenantName::new(tenant)?))
    }

    /// Connect the context to `tenant`, or to the default tenant for `None`.
    ///
    /// Query caches for whatever the context ends up on are cleared whether
    /// or not the connect succeeded.
    pub async fn switch(&self, ctx: &mut TenantContext, tenant: Option<&str>) -> Result<()> {
        let outcome = match tenant {
            None => self.reset(ctx).await,
            Some(name) => {
                let key = self.environmentify(name)?;
                self.connect_to_new(ctx, &key).await
            }
        };
        self.inner.pool.clear_query_cache(ctx.current().as_str());
        outcome
    }

    /// Reconnect the default tenant.
    pub async fn reset(&self, ctx: &mut TenantContext) -> Result<()> {
        let key = self.inner.default_key.clone();
        self.attach(ctx, &key)
            .await
            .map_err(|err| not_found(&key, err))
    }

    /// Run `work` on `tenant` and switch back to the previous tenant after.
    ///
    /// Switching back is best effort: if the previous tenant cannot be
    /// reconnected the context falls back to the default tenant. Neither
    /// outcome replaces the result of `work`. Dropping the returned future
    /// part way rewinds the context as well.
    pub async fn process<F, T, E>(
        &self,
        ctx: &mut TenantContext,
        tenant: Option<&str>,
        work: F,
    ) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut TenantContext) -> TenantFuture<'c, T, E> + Send,
        T: Send,
        E: From<TenantError> + Send,
    {
        self.run_restoring(ctx, tenant, Mechanism::Pooled, work)
            .await
    }

    /// Point the context's administrative connection at `tenant`.
    ///
    /// Opens an unpooled handle and checks it is live before recording it.
    pub async fn base_switch(&self, ctx: &mut TenantContext, tenant: Option<&str>) -> Result<()> {
        let key = match tenant {
            Some(name) => self.environmentify(name)?,
            None => self.inner.default_key.clone(),
        };
        let outcome = self
            .base_attach(ctx, &key)
            .await
            .map_err(|err| not_found(&key, err));
        self.inner.pool.clear_query_cache(key.as_str());
        outcome
    }

    /// [`process`](Self::process) through the administrative connection.
    pub async fn base_process<F, T, E>(
        &self,
        ctx: &mut TenantContext,
        tenant: Option<&str>,
        work: F,
    ) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut TenantContext) -> TenantFuture<'c, T, E> + Send,
        T: Send,
        E: From<TenantError> + Send,
    {
        self.run_restoring(ctx, tenant, Mechanism::Root, work).await
    }

    /// Create a tenant, import the schema and seed it if configured.
    pub async fn create(&self, ctx: &mut TenantContext, tenant: &str) -> Result<()> {
        self.create_with(ctx, tenant, |_| Box::pin(async { Ok(()) }))
            .await
    }

    /// [`create`](Self::create), then run `on_ready` while still on the new
    /// tenant.
    pub async fn create_with<F, T, E>(
        &self,
        ctx: &mut TenantContext,
        tenant: &str,
        on_ready: F,
    ) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut TenantContext) -> TenantFuture<'c, T, E> + Send + 'static,
        T: Send + 'static,
        E: From<TenantError> + Send + 'static,
    {
        let key = self.environmentify(tenant)?;

        if let Err(err) = self
            .inner
            .isolation
            .create_tenant(&self.inner.pool, &key)
            .await
        {
            return Err(match err.kind {
                DriverErrorKind::Connection => not_found(&key, err),
                _ => TenantError::already_exists(key.as_str()).caused_by(err),
            }
            .into());
        }
        info!(tenant = %key, mode = %self.isolation_mode(), "Created tenant");

        let adapter = self.clone();
        self.process(ctx, Some(key.as_str()), move |ctx| {
            Box::pin(async move {
                adapter.import_schema(ctx).await?;
                if adapter.config().seed_after_create {
                    adapter.seed(ctx).await?;
                }
                on_ready(ctx).await
            })
        })
        .await
    }

    /// Drop a tenant's database or schema.
    ///
    /// Every pooled connection is closed first. A context left on the
    /// dropped tenant is moved back to the default tenant.
    pub async fn drop(&self, ctx: &mut TenantContext, tenant: &str) -> Result<()> {
        let key = self.environmentify(tenant)?;

        self.inner.pool.clear_all().await;
        if *ctx.current() == key {
            ctx.set_admin(None);
            ctx.enter(self.inner.default_key.clone());
        }

        self.inner
            .isolation
            .drop_tenant(&self.inner.pool, &key)
            .await
            .map_err(|err| not_found(&key, err))?;

        info!(tenant = %key, mode = %self.isolation_mode(), "Dropped tenant");
        Ok(())
    }

    /// Load the seed file into the context's tenant.
    pub async fn seed(&self, ctx: &TenantContext) -> Result<()> {
        let path = self
            .inner
            .config
            .seed_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SEED_FILE));
        loader::ensure_exists(&path).await?;

        let conn = self.tenant_handle(ctx).await?;
        self.inner
            .loader
            .load_seed(conn.as_ref(), &path)
            .await
            .map_err(|source| TenantError::Load {
                path: path.clone(),
                source,
            })?;

        debug!(tenant = %ctx.current(), path = %path.display(), "Seeded tenant");
        Ok(())
    }

    /// Import the configured schema file into the context's tenant.
    ///
    /// Does nothing when no schema file is configured.
    pub async fn import_schema(&self, ctx: &TenantContext) -> Result<()> {
        let Some(path) = self.inner.config.database_schema_file.clone() else {
            return Ok(());
        };
        loader::ensure_exists(&path).await?;

        let conn = self.tenant_handle(ctx).await?;
        self.inner
            .loader
            .load_schema(conn.as_ref(), &path)
            .await
            .map_err(|source| TenantError::Load {
                path: path.clone(),
                source,
            })?;

        debug!(tenant = %ctx.current(), path = %path.display(), "Imported schema");
        Ok(())
    }

    /// Establish the shared connection used by excluded models.
    pub async fn process_excluded_models(&self) -> Result<()> {
        let excluded = &self.inner.config.excluded_models;
        if excluded.is_empty() {
            return Ok(());
        }

        self.inner.pool.default_handle().await.map_err(|err| {
            TenantError::NotFound {
                tenant: self.inner.pool.default_spec().database.clone(),
                source: Some(err),
            }
        })?;

        debug!(models = ?excluded, "Excluded models use the default connection");
        Ok(())
    }

    /// Handle that `model`'s queries should use in this context.
    ///
    /// The base model and excluded models get the shared default handle,
    /// which in schema mode stays on the default schema. Every other model
    /// gets the handle serving the context's tenant.
    pub async fn connection(
        &self,
        ctx: &TenantContext,
        model: ModelClass<'_>,
    ) -> Result<Arc<dyn ConnectionHandle>> {
        let shared = match model {
            ModelClass::Base => true,
            ModelClass::Named(name) => self.inner.config.is_excluded(name),
        };
        if !shared {
            return self.tenant_handle(ctx).await;
        }
        self.inner.pool.default_handle().await.map_err(|err| {
            TenantError::NotFound {
                tenant: self.inner.pool.default_spec().database.clone(),
                source: Some(err),
            }
        })
    }

    /// Run `work` on `tenant` in a fresh context of its own.
    ///
    /// The context is published through [`ConnectionName`] for the duration,
    /// so ambient routing inside `work` follows it.
    pub async fn within<F, T, E>(&self, tenant: Option<&str>, work: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut TenantContext) -> TenantFuture<'c, T, E> + Send,
        T: Send,
        E: From<TenantError> + Send,
    {
        ConnectionName::scope(async move {
            let mut ctx = TenantContext::bound(self.inner.default_key.clone());
            self.process(&mut ctx, tenant, work).await
        })
        .await
    }

    async fn tenant_handle(&self, ctx: &TenantContext) -> Result<Arc<dyn ConnectionHandle>> {
        let key = ctx.current();
        self.inner
            .isolation
            .connect(&self.inner.pool, key)
            .await
            .map_err(|err| not_found(key, err))
    }

    async fn run_restoring<F, T, E>(
        &self,
        ctx: &mut TenantContext,
        tenant: Option<&str>,
        mechanism: Mechanism,
        work: F,
    ) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut TenantContext) -> TenantFuture<'c, T, E> + Send,
        T: Send,
        E: From<TenantError> + Send,
    {
        let mut guard = RestoreGuard::new(ctx);

        let switched = match mechanism {
            Mechanism::Pooled => self.switch(guard.ctx(), tenant).await,
            Mechanism::Root => self.base_switch(guard.ctx(), tenant).await,
        };
        let outcome = match switched {
            Ok(()) => work(guard.ctx()).await,
            Err(err) => Err(E::from(err)),
        };

        let saved = guard.saved();
        match mechanism {
            Mechanism::Pooled => self.restore(guard.ctx(), saved).await,
            Mechanism::Root => self.restore_root(guard.ctx(), saved).await,
        }
        guard.disarm();

        outcome
    }

    async fn restore(&self, ctx: &mut TenantContext, saved: Snapshot) {
        let Snapshot { current, admin } = saved;

        if let Err(err) = self.attach(ctx, &current).await {
            warn!(
                tenant = %current,
                error = %err,
                "Failed to restore previous tenant, resetting to default"
            );
            let default = self.inner.default_key.clone();
            if let Err(err) = self.attach(ctx, &default).await {
                error!(tenant = %default, error = %err, "Failed to reset to default tenant");
                ctx.enter(default);
            }
        }

        ctx.set_admin(admin);
        self.inner.pool.clear_query_cache(ctx.current().as_str());
    }

    async fn restore_root(&self, ctx: &mut TenantContext, saved: Snapshot) {
        if saved.admin.is_none() {
            ctx.rewind(saved);
            return;
        }

        let current = saved.current;
        if let Err(err) = self.base_attach(ctx, &current).await {
            warn!(
                tenant = %current,
                error = %err,
                "Failed to restore previous root connection, resetting to default"
            );
            let default = self.inner.default_key.clone();
            if let Err(err) = self.base_attach(ctx, &default).await {
                error!(tenant = %default, error = %err, "Failed to reset root connection");
                ctx.set_admin(None);
                ctx.enter(default);
            }
        }
    }

    async fn connect_to_new(&self, ctx: &mut TenantContext, key: &ConnectionKey) -> Result<()> {
        let Err(err) = self.attach(ctx, key).await else {
            return Ok(());
        };

        let default = &self.inner.default_key;
        if key != default
            && self.inner.failure_hook.on_connect_failure(key, &err) == RecoveryAction::ResetToDefault
        {
            if let Err(reset_err) = self.attach(ctx, default).await {
                warn!(
                    tenant = %default,
                    error = %reset_err,
                    "Reset after failed connect also failed"
                );
            }
        }

        Err(not_found(key, err))
    }

    async fn attach(
        &self,
        ctx: &mut TenantContext,
        key: &ConnectionKey,
    ) -> std::result::Result<(), DriverError> {
        self.inner
            .isolation
            .connect(&self.inner.pool, key)
            .await?;
        debug!(tenant = %key, "Switched tenant");
        ctx.enter(key.clone());
        Ok(())
    }

    async fn base_attach(
        &self,
        ctx: &mut TenantContext,
        key: &ConnectionKey,
    ) -> std::result::Result<(), DriverError> {
        let spec = self
            .inner
            .isolation
            .root_spec(self.inner.pool.default_spec(), key);
        let handle = self.inner.pool.establish_unpooled(&spec).await?;
        if !handle.is_active().await {
            return Err(DriverError::connection(format!(
                "connection to {} is not active",
                key
            )));
        }
        debug!(tenant = %key, "Switched root connection");
        ctx.set_admin(Some(handle));
        ctx.enter(key.clone());
        Ok(())
    }
}

impl fmt::Debug for TenantAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantAdapter")
            .field("mode", &self.isolation_mode())
            .field("environment", &self.inner.environment)
            .field("default_tenant", &self.inner.default_key)
            .field("failure_hook", &self.inner.failure_hook)
            .finish()
    }
}

fn not_found(key: &ConnectionKey, err: DriverError) -> TenantError {
    TenantError::not_found(key.as_str()).caused_by(err)
}

/// Rewinds the context if `process` is dropped before it restores.
struct RestoreGuard<'a> {
    ctx: &'a mut TenantContext,
    saved: Snapshot,
    armed: bool,
}

impl<'a> RestoreGuard<'a> {
    fn new(ctx: &'a mut TenantContext) -> Self {
        let saved = ctx.snapshot();
        Self {
            ctx,
            saved,
            armed: true,
        }
    }

    fn ctx(&mut self) -> &mut TenantContext {
        &mut *self.ctx
    }

    fn saved(&self) -> Snapshot {
        self.saved.clone()
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(tenant = %self.saved.current, "Tenant work cancelled, rewinding context");
            self.ctx.rewind(self.saved.clone());
        }
    }
}

/// Builder for [`TenantAdapter`]
pub struct TenantAdapterBuilder {
    config: TenancyConfig,
    driver: Option<Arc<dyn ConnectionDriver>>,
    isolation: Option<Arc<dyn Isolation>>,
    failure_hook: Arc<dyn ConnectFailureHook>,
    loader: Arc<dyn SchemaLoader>,
}

impl TenantAdapterBuilder {
    pub fn new(config: TenancyConfig) -> Self {
        Self {
            config,
            driver: None,
            isolation: None,
            failure_hook: Arc::new(KeepCurrent),
            loader: Arc::new(SqlScriptLoader),
        }
    }

    /// Set the connection driver (required)
    pub fn with_driver(mut self, driver: Arc<dyn ConnectionDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Override the isolation strategy implied by `use_schemas`
    pub fn with_isolation(mut self, isolation: Arc<dyn Isolation>) -> Self {
        self.isolation = Some(isolation);
        self
    }

    /// Set the connect failure hook
    pub fn with_failure_hook(mut self, hook: Arc<dyn ConnectFailureHook>) -> Self {
        self.failure_hook = hook;
        self
    }

    /// Set the schema and seed loader
    pub fn with_schema_loader(mut self, loader: Arc<dyn SchemaLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn build(self) -> Result<TenantAdapter> {
        self.config.validate()?;
        let driver = self
            .driver
            .ok_or_else(|| TenantError::Configuration("no connection driver configured".into()))?;

        let isolation = self
            .isolation
            .unwrap_or_else(|| isolation::from_config(&self.config));
        let environment = Environment::from_config(&self.config);
        let default_key = isolation.default_key(&self.config, &environment);
        let pool = ConnectionPool::new(driver, isolation.default_spec(&self.config));

        info!(
            mode = %isolation.mode(),
            environment = %environment.name(),
            default_tenant = %default_key,
            "Tenant adapter ready"
        );

        Ok(TenantAdapter {
            inner: Arc::new(Inner {
                config: self.config,
                environment,
                pool,
                isolation,
                failure_hook: self.failure_hook,
                loader: self.loader,
                default_key,
            }),
        })
    }
}
