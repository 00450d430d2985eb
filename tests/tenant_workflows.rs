//! Integration tests for common Tenement workflows.
//!
//! These run the full stack (config, adapter, pool, migrator) against the
//! in-memory driver.

use std::sync::Arc;
use std::time::Duration;
use tenement::config::Validate;
use tenement::memory::{InMemoryDriver, MigrationCall, RecordingMigrationRunner};
use tenement::prelude::*;

fn test_config() -> TenancyConfig {
    TenancyConfig::new(ConnectionSpec::new("test_app"))
        .with_environment("test")
        .with_environment_policy(EnvironmentPolicy::Prepend)
        .with_excluded_model("User")
}

fn setup() -> (Arc<InMemoryDriver>, TenantAdapter) {
    let driver = Arc::new(InMemoryDriver::with_databases(["test_app"]));
    let adapter = TenantAdapter::new(test_config(), driver.clone()).unwrap();
    (driver, adapter)
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_create_then_process_runs_on_tenant() {
    let (driver, adapter) = setup();
    let mut ctx = adapter.context();

    adapter.create(&mut ctx, "acme").await.unwrap();
    assert!(driver.has_database("test_acme"));

    let worker = adapter.clone();
    adapter
        .process(&mut ctx, Some("acme"), move |ctx| {
            Box::pin(async move {
                let conn = worker
                    .connection(ctx, ModelClass::Named("Widget"))
                    .await?;
                conn.execute("SELECT * FROM widgets").await.map_err(|e| {
                    TenantError::NotFound {
                        tenant: ctx.current().to_string(),
                        source: Some(e),
                    }
                })?;
                Ok::<_, TenantError>(())
            })
        })
        .await
        .unwrap();

    assert_eq!(driver.statements_for("test_acme"), vec!["SELECT * FROM widgets"]);
    assert_eq!(adapter.current(&ctx).as_str(), "test_app");
}

#[tokio::test]
async fn test_drop_then_switch_fails() {
    let (_driver, adapter) = setup();
    let mut ctx = adapter.context();

    adapter.create(&mut ctx, "acme").await.unwrap();
    adapter.switch(&mut ctx, Some("acme")).await.unwrap();
    adapter.drop(&mut ctx, "acme").await.unwrap();

    let err = adapter.switch(&mut ctx, Some("acme")).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(ctx.is_default());
}

#[tokio::test]
async fn test_environment_decoration_is_applied_once() {
    let (driver, adapter) = setup();
    let mut ctx = adapter.context();

    adapter.create(&mut ctx, "test_acme").await.unwrap();
    assert!(driver.has_database("test_acme"));
    assert!(!driver.has_database("test_test_acme"));

    adapter.switch(&mut ctx, Some("acme")).await.unwrap();
    assert_eq!(ctx.current().as_str(), "test_acme");
}

// =============================================================================
// Pool behaviour
// =============================================================================

#[tokio::test]
async fn test_pooled_connection_is_reused_across_contexts() {
    let (driver, adapter) = setup();
    driver.add_database("test_acme");

    let mut first = adapter.context();
    let mut second = adapter.context();
    adapter.switch(&mut first, Some("acme")).await.unwrap();
    adapter.switch(&mut second, Some("acme")).await.unwrap();

    assert_eq!(driver.establish_count("test_acme"), 1);
    assert_eq!(adapter.pool().stats().pooled, 1);
}

#[tokio::test]
async fn test_transient_failure_is_not_cached() {
    let (driver, adapter) = setup();
    driver.add_database("test_acme");
    let mut ctx = adapter.context();

    driver.fail_next(1);
    assert!(adapter.switch(&mut ctx, Some("acme")).await.is_err());
    assert!(!adapter.pool().contains("test_acme"));

    adapter.switch(&mut ctx, Some("acme")).await.unwrap();
    assert_eq!(ctx.current().as_str(), "test_acme");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_shares_one_connection() {
    let driver = Arc::new(
        InMemoryDriver::with_databases(["test_app", "test_acme"])
            .with_latency(Duration::from_millis(10)),
    );
    let adapter = TenantAdapter::new(test_config(), driver.clone()).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let adapter = adapter.clone();
        tasks.push(tokio::spawn(async move {
            let mut ctx = adapter.context();
            adapter.switch(&mut ctx, Some("acme")).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(driver.establish_count("test_acme"), 1);
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test]
async fn test_excluded_models_use_default_connection() {
    let (driver, adapter) = setup();
    driver.add_database("test_acme");
    adapter.process_excluded_models().await.unwrap();

    let router = adapter.clone();
    adapter
        .within(Some("acme"), move |ctx| {
            Box::pin(async move {
                assert_eq!(ConnectionName::get(), "test_acme");
                assert_eq!(router.route(ModelClass::Named("User"), ctx), Route::Default);
                assert_eq!(
                    router.route_ambient(ModelClass::Named("Widget")),
                    Route::Tenant(router.pool().pool_key_for("test_acme"))
                );
                Ok::<_, TenantError>(())
            })
        })
        .await
        .unwrap();
}

// =============================================================================
// Migrations
// =============================================================================

#[tokio::test]
async fn test_migrate_configured_tenants() {
    let (driver, adapter) = setup();
    for tenant in ["test_acme", "test_globex"] {
        driver.add_database(tenant);
    }
    let runner = Arc::new(RecordingMigrationRunner::new());
    let migrator = Migrator::new(adapter.clone(), runner.clone())
        .with_options(MigrateOptions::new().with_version(7));
    let mut ctx = adapter.context();

    let outcomes = migrator.migrate_all(&mut ctx, ["acme", "globex"]).await;

    assert!(outcomes.iter().all(|(_, outcome)| outcome.is_ok()));
    assert!(runner.calls().iter().all(|call| matches!(
        call,
        MigrationCall::Migrate { version: Some(7), .. }
    )));
    assert_eq!(driver.statements_for("test_acme").len(), 1);
    assert_eq!(driver.statements_for("test_globex").len(), 1);
    assert!(ctx.is_default());
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_config_from_toml() {
    let config: TenancyConfig = toml_config(
        r#"
        environment = "test"
        prepend_environment = true
        excluded_models = ["User", "Company"]
        seed_after_create = true

        [connection]
        database = "test_app"
        "#,
    );

    assert_eq!(config.environment_policy(), EnvironmentPolicy::Prepend);
    assert!(config.is_excluded("Company"));
    tokio_test::assert_ok!(config.validate());
}

fn toml_config(source: &str) -> TenancyConfig {
    tenement::config::ConfigLoader::new(tenement::config::FileFormat::Toml)
        .parse(source)
        .unwrap()
}
