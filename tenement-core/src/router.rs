//! Model routing
//!
//! Decides whether a model's queries go to the shared default connection or
//! to the pooled handle of the active tenant.

use crate::adapter::TenantAdapter;
use crate::connection_name::{ConnectionName, PRIMARY_CONNECTION_NAME};
use crate::context::TenantContext;
use crate::pool::PoolKey;

/// The model a query is issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass<'a> {
    /// The root model every other model derives from
    Base,
    /// A named application model
    Named(&'a str),
}

/// Where a model's queries go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The shared default connection
    Default,
    /// The pooled handle for a tenant
    Tenant(PoolKey),
}

/// Resolves models to connections.
pub trait ConnectionRouter {
    fn route(&self, model: ModelClass<'_>, ctx: &TenantContext) -> Route;
}

impl TenantAdapter {
    /// Base model, schema isolation and excluded models, in that order,
    /// pin a model to the default connection.
    pub(crate) fn routes_to_default(&self, model: ModelClass<'_>) -> bool {
        match model {
            ModelClass::Base => true,
            ModelClass::Named(_) if self.isolation().routes_through_default() => true,
            ModelClass::Named(name) => self.config().is_excluded(name),
        }
    }

    /// Route using the task's [`ConnectionName`] instead of an explicit
    /// context.
    pub fn route_ambient(&self, model: ModelClass<'_>) -> Route {
        if self.routes_to_default(model) {
            return Route::Default;
        }
        let name = ConnectionName::get();
        if name == PRIMARY_CONNECTION_NAME {
            Route::Default
        } else {
            Route::Tenant(self.pool().pool_key_for(&name))
        }
    }
}

impl ConnectionRouter for TenantAdapter {
    fn route(&self, model: ModelClass<'_>, ctx: &TenantContext) -> Route {
        if self.routes_to_default(model) {
            Route::Default
        } else {
            Route::Tenant(self.pool().pool_key_for(ctx.current().as_str()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDriver;
    use std::sync::Arc;
    use tenement_config::{ConnectionSpec, EnvironmentPolicy, TenancyConfig};

    fn adapter(use_schemas: bool) -> TenantAdapter {
        let config = TenancyConfig::new(ConnectionSpec::new("app"))
            .with_environment("test")
            .with_environment_policy(EnvironmentPolicy::Prepend)
            .with_excluded_model("User")
            .with_schemas(use_schemas);
        let driver = Arc::new(
            InMemoryDriver::with_databases(["app", "test_app", "test_acme"])
                .with_schemas(["public", "test_acme"]),
        );
        TenantAdapter::new(config, driver).unwrap()
    }

    #[tokio::test]
    async fn test_database_mode_routing() {
        let adapter = adapter(false);
        let mut ctx = adapter.context();
        adapter.switch(&mut ctx, Some("acme")).await.unwrap();

        assert_eq!(adapter.route(ModelClass::Base, &ctx), Route::Default);
        assert_eq!(adapter.route(ModelClass::Named("User"), &ctx), Route::Default);

        let route = adapter.route(ModelClass::Named("Widget"), &ctx);
        assert_eq!(
            route,
            Route::Tenant(adapter.pool().pool_key_for("test_acme"))
        );
    }

    #[tokio::test]
    async fn test_schema_mode_routes_everything_to_default() {
        let adapter = adapter(true);
        let mut ctx = adapter.context();
        adapter.switch(&mut ctx, Some("acme")).await.unwrap();

        for model in [
            ModelClass::Base,
            ModelClass::Named("User"),
            ModelClass::Named("Widget"),
        ] {
            assert_eq!(adapter.route(model, &ctx), Route::Default);
        }
    }

    #[tokio::test]
    async fn test_ambient_routing_follows_connection_name() {
        let adapter = adapter(false);

        ConnectionName::scope(async {
            ConnectionName::set(PRIMARY_CONNECTION_NAME);
            assert_eq!(adapter.route_ambient(ModelClass::Named("Widget")), Route::Default);

            ConnectionName::set("test_acme");
            assert_eq!(
                adapter.route_ambient(ModelClass::Named("Widget")),
                Route::Tenant(adapter.pool().pool_key_for("test_acme"))
            );
            assert_eq!(adapter.route_ambient(ModelClass::Named("User")), Route::Default);
        })
        .await;
    }
}
