//! In-memory driver and collaborators
//!
//! A fake database server that tracks which databases and schemas exist and
//! logs every statement with the database and search path it ran against.
//! Used by the test suites; also handy for running an application without a
//! real database during development.

use crate::driver::{ConnectionDriver, ConnectionHandle};
use crate::error::{BoxError, DriverError};
use crate::loader::{LoadResult, SchemaLoader};
use crate::migrator::{Direction, MigrationResult, MigrationRunner};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tenement_config::ConnectionSpec;
use uuid::Uuid;

/// A statement seen by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub connection: Uuid,
    pub database: String,
    pub search_path: Option<String>,
    pub sql: String,
}

#[derive(Debug, Default)]
struct Server {
    databases: BTreeSet<String>,
    schemas: BTreeSet<String>,
    stale: BTreeSet<String>,
    statements: Vec<Statement>,
    establish_counts: HashMap<String, usize>,
    fail_next: usize,
}

/// In-memory [`ConnectionDriver`]
#[derive(Debug, Default)]
pub struct InMemoryDriver {
    server: Arc<Mutex<Server>>,
    connections: Mutex<Vec<Arc<InMemoryConnection>>>,
    latency: Option<Duration>,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver whose server already has the given databases
    pub fn with_databases<I, S>(databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let driver = Self::new();
        driver
            .server
            .lock()
            .databases
            .extend(databases.into_iter().map(Into::into));
        driver
    }

    /// Add existing schemas
    pub fn with_schemas<I, S>(self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server
            .lock()
            .schemas
            .extend(schemas.into_iter().map(Into::into));
        self
    }

    /// Delay every establishment, to widen race windows in tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_database(&self, name: impl Into<String>) {
        self.server.lock().databases.insert(name.into());
    }

    pub fn remove_database(&self, name: &str) {
        self.server.lock().databases.remove(name);
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.server.lock().databases.contains(name)
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.server.lock().schemas.contains(name)
    }

    /// Fail the next `count` establishments with a connection error
    pub fn fail_next(&self, count: usize) {
        self.server.lock().fail_next = count;
    }

    /// Connections to `database` are established but report inactive
    pub fn mark_stale(&self, database: impl Into<String>) {
        self.server.lock().stale.insert(database.into());
    }

    /// Establishment attempts for a database, failed ones included
    pub fn establish_count(&self, database: &str) -> usize {
        self.server
            .lock()
            .establish_counts
            .get(database)
            .copied()
            .unwrap_or(0)
    }

    /// Connections handed out for a database, oldest first
    pub fn connections_to(&self, database: &str) -> Vec<Arc<InMemoryConnection>> {
        self.connections
            .lock()
            .iter()
            .filter(|c| c.database == database)
            .cloned()
            .collect()
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.server.lock().statements.clone()
    }

    /// SQL run against a database, in order
    pub fn statements_for(&self, database: &str) -> Vec<String> {
        self.server
            .lock()
            .statements
            .iter()
            .filter(|s| s.database == database)
            .map(|s| s.sql.clone())
            .collect()
    }
}

#[async_trait]
impl ConnectionDriver for InMemoryDriver {
    async fn establish(
        &self,
        spec: &ConnectionSpec,
    ) -> Result<Arc<dyn ConnectionHandle>, DriverError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let active = {
            let mut server = self.server.lock();
            *server
                .establish_counts
                .entry(spec.database.clone())
                .or_default() += 1;

            if server.fail_next > 0 {
                server.fail_next -= 1;
                return Err(DriverError::connection(format!(
                    "could not connect to {}",
                    spec.database
                )));
            }
            if !server.databases.contains(&spec.database) {
                return Err(DriverError::not_found(format!(
                    "database \"{}\" does not exist",
                    spec.database
                )));
            }
            if let Some(schema) = &spec.search_path {
                if !server.schemas.contains(schema) {
                    return Err(DriverError::not_found(format!(
                        "schema \"{}\" does not exist",
                        schema
                    )));
                }
            }
            !server.stale.contains(&spec.database)
        };

        let conn = Arc::new(InMemoryConnection {
            id: Uuid::new_v4(),
            database: spec.database.clone(),
            search_path: spec.search_path.clone(),
            active: AtomicBool::new(active),
            query_cache: AtomicBool::new(false),
            cache_clears: AtomicUsize::new(0),
            server: Arc::clone(&self.server),
        });
        self.connections.lock().push(Arc::clone(&conn));
        Ok(conn)
    }
}

/// Connection handed out by [`InMemoryDriver`]
#[derive(Debug)]
pub struct InMemoryConnection {
    id: Uuid,
    database: String,
    search_path: Option<String>,
    active: AtomicBool,
    query_cache: AtomicBool,
    cache_clears: AtomicUsize,
    server: Arc<Mutex<Server>>,
}

impl InMemoryConnection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn search_path(&self) -> Option<String> {
        self.search_path.clone()
    }

    pub fn query_cache_enabled(&self) -> bool {
        self.query_cache.load(Ordering::Relaxed)
    }

    pub fn cache_clears(&self) -> usize {
        self.cache_clears.load(Ordering::Relaxed)
    }

    /// Simulate the server closing the connection
    pub fn close(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    fn log(&self, server: &mut Server, sql: &str) {
        server.statements.push(Statement {
            connection: self.id,
            database: self.database.clone(),
            search_path: self.search_path.clone(),
            sql: sql.to_string(),
        });
    }

    fn ensure_active(&self) -> Result<(), DriverError> {
        if self.active.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(DriverError::connection("connection is closed"))
        }
    }
}

#[async_trait]
impl ConnectionHandle for InMemoryConnection {
    async fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    async fn execute(&self, sql: &str) -> Result<u64, DriverError> {
        self.ensure_active()?;
        let mut server = self.server.lock();
        self.log(&mut server, sql);
        Ok(0)
    }

    fn enable_query_cache(&self) {
        self.query_cache.store(true, Ordering::Relaxed);
    }

    fn clear_query_cache(&self) {
        self.cache_clears.fetch_add(1, Ordering::Relaxed);
    }

    async fn create_database(&self, name: &str) -> Result<(), DriverError> {
        self.ensure_active()?;
        let mut server = self.server.lock();
        self.log(&mut server, &format!("CREATE DATABASE {}", name));
        if !server.databases.insert(name.to_string()) {
            return Err(DriverError::already_exists(format!(
                "database \"{}\" already exists",
                name
            )));
        }
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), DriverError> {
        self.ensure_active()?;
        let mut server = self.server.lock();
        self.log(&mut server, &format!("DROP DATABASE {}", name));
        if !server.databases.remove(name) {
            return Err(DriverError::not_found(format!(
                "database \"{}\" does not exist",
                name
            )));
        }
        Ok(())
    }

    async fn create_schema(&self, name: &str) -> Result<(), DriverError> {
        self.ensure_active()?;
        let mut server = self.server.lock();
        self.log(&mut server, &format!("CREATE SCHEMA {}", name));
        if !server.schemas.insert(name.to_string()) {
            return Err(DriverError::already_exists(format!(
                "schema \"{}\" already exists",
                name
            )));
        }
        Ok(())
    }

    async fn drop_schema(&self, name: &str) -> Result<(), DriverError> {
        self.ensure_active()?;
        let mut server = self.server.lock();
        self.log(&mut server, &format!("DROP SCHEMA {} CASCADE", name));
        if !server.schemas.remove(name) {
            return Err(DriverError::not_found(format!(
                "schema \"{}\" does not exist",
                name
            )));
        }
        Ok(())
    }

}

/// A call seen by [`RecordingMigrationRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationCall {
    Migrate {
        path: PathBuf,
        version: Option<i64>,
        scope: Option<String>,
    },
    Run {
        path: PathBuf,
        direction: Direction,
        version: i64,
    },
    Rollback {
        path: PathBuf,
        steps: u32,
    },
}

/// Migration runner that records its calls and marks the connection it ran
/// on with a `-- migrate` statement.
#[derive(Debug, Default)]
pub struct RecordingMigrationRunner {
    calls: Mutex<Vec<MigrationCall>>,
    failing: bool,
}

impl RecordingMigrationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner whose every call fails after recording
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<MigrationCall> {
        self.calls.lock().clone()
    }

    async fn record(&self, conn: &dyn ConnectionHandle, call: MigrationCall) -> MigrationResult {
        let marker = format!("-- migrate {:?}", call);
        self.calls.lock().push(call);
        conn.execute(&marker).await?;
        if self.failing {
            return Err(BoxError::from("migration failed"));
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationRunner for RecordingMigrationRunner {
    async fn migrate(
        &self,
        conn: &dyn ConnectionHandle,
        path: &Path,
        version: Option<i64>,
        scope: Option<&str>,
    ) -> MigrationResult {
        let call = MigrationCall::Migrate {
            path: path.to_path_buf(),
            version,
            scope: scope.map(str::to_string),
        };
        self.record(conn, call).await
    }

    async fn run(
        &self,
        conn: &dyn ConnectionHandle,
        direction: Direction,
        path: &Path,
        version: i64,
    ) -> MigrationResult {
        let call = MigrationCall::Run {
            path: path.to_path_buf(),
            direction,
            version,
        };
        self.record(conn, call).await
    }

    async fn rollback(&self, conn: &dyn ConnectionHandle, path: &Path, steps: u32) -> MigrationResult {
        let call = MigrationCall::Rollback {
            path: path.to_path_buf(),
            steps,
        };
        self.record(conn, call).await
    }
}

/// Which kind of file a [`RecordingSchemaLoader`] was asked to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Schema,
    Seed,
}

/// Schema loader that records the files it was given without reading them.
#[derive(Debug, Default)]
pub struct RecordingSchemaLoader {
    loads: Mutex<Vec<(LoadKind, PathBuf)>>,
}

impl RecordingSchemaLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loads(&self) -> Vec<(LoadKind, PathBuf)> {
        self.loads.lock().clone()
    }

    async fn record(&self, conn: &dyn ConnectionHandle, kind: LoadKind, path: &Path) -> LoadResult {
        self.loads.lock().push((kind, path.to_path_buf()));
        conn.execute(&format!("-- load {:?} {}", kind, path.display()))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaLoader for RecordingSchemaLoader {
    async fn load_schema(&self, conn: &dyn ConnectionHandle, path: &Path) -> LoadResult {
        self.record(conn, LoadKind::Schema, path).await
    }

    async fn load_seed(&self, conn: &dyn ConnectionHandle, path: &Path) -> LoadResult {
        self.record(conn, LoadKind::Seed, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_establish_missing_database() {
        let driver = InMemoryDriver::new();
        let err = driver
            .establish(&ConnectionSpec::new("nope"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::DriverErrorKind::NotFound);
        assert_eq!(driver.establish_count("nope"), 1);
    }

    #[tokio::test]
    async fn test_fail_next_injects_connection_errors() {
        let driver = InMemoryDriver::with_databases(["app"]);
        driver.fail_next(1);

        let spec = ConnectionSpec::new("app");
        assert!(driver.establish(&spec).await.is_err());
        assert!(driver.establish(&spec).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_statements() {
        let driver = InMemoryDriver::with_databases(["app"]);
        driver.establish(&ConnectionSpec::new("app")).await.unwrap();
        let conn = driver.connections_to("app").pop().unwrap();

        conn.close();
        assert!(!conn.is_active().await);
        assert!(conn.execute("SELECT 1").await.is_err());
    }

    #[tokio::test]
    async fn test_statement_log_tracks_search_path() {
        let driver = InMemoryDriver::with_databases(["app"]).with_schemas(["acme"]);
        let plain = driver.establish(&ConnectionSpec::new("app")).await.unwrap();
        let scoped = driver
            .establish(&ConnectionSpec::new("app").for_search_path("acme"))
            .await
            .unwrap();

        plain.execute("SELECT 1").await.unwrap();
        scoped.execute("SELECT 2").await.unwrap();

        let paths: Vec<Option<String>> =
            driver.statements().into_iter().map(|s| s.search_path).collect();
        assert_eq!(paths, vec![None, Some("acme".to_string())]);
    }
}
