//! Schema and seed loading
//!
//! New tenants get the application schema imported and, optionally, seed
//! data loaded. How a file is applied is up to the [`SchemaLoader`]; the
//! adapter only guarantees the file exists and the right tenant is active.

use crate::driver::ConnectionHandle;
use crate::error::{BoxError, Result, TenantError};
use async_trait::async_trait;
use std::path::Path;
use tracing::error;

/// Outcome of applying one file
pub type LoadResult = std::result::Result<(), BoxError>;

/// Seed file used when none is configured
pub const DEFAULT_SEED_FILE: &str = "db/seeds.sql";

/// Applies schema and seed files to the active tenant.
#[async_trait]
pub trait SchemaLoader: Send + Sync {
    async fn load_schema(&self, conn: &dyn ConnectionHandle, path: &Path) -> LoadResult;

    async fn load_seed(&self, conn: &dyn ConnectionHandle, path: &Path) -> LoadResult;
}

/// Executes each file as one SQL batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlScriptLoader;

impl SqlScriptLoader {
    async fn apply(conn: &dyn ConnectionHandle, path: &Path) -> LoadResult {
        let script = tokio::fs::read_to_string(path).await?;
        if !script.trim().is_empty() {
            conn.execute(&script).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaLoader for SqlScriptLoader {
    async fn load_schema(&self, conn: &dyn ConnectionHandle, path: &Path) -> LoadResult {
        Self::apply(conn, path).await
    }

    async fn load_seed(&self, conn: &dyn ConnectionHandle, path: &Path) -> LoadResult {
        Self::apply(conn, path).await
    }
}

/// Fail with [`TenantError::MissingFile`] unless `path` exists.
pub(crate) async fn ensure_exists(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    error!(path = %path.display(), "Required file is missing");
    Err(TenantError::MissingFile(path.to_path_buf()))
}
