//! Connection Driver
//!
//! The boundary to the actual database client. Tenement never opens sockets
//! itself: it decides *which* named handle is active and asks the driver to
//! establish one when none exists yet.
//!
//! # Usage
//!
//! ```rust,ignore
//! struct PgDriver;
//!
//! #[async_trait]
//! impl ConnectionDriver for PgDriver {
//!     async fn establish(
//!         &self,
//!         spec: &ConnectionSpec,
//!     ) -> Result<Arc<dyn ConnectionHandle>, DriverError> {
//!         let pool = PgPoolOptions::new().connect_with(options_from(spec)).await?;
//!         Ok(Arc::new(PgHandle::new(pool)))
//!     }
//! }
//! ```

use crate::error::DriverError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tenement_config::ConnectionSpec;

/// Establishes connection handles.
///
/// Implementations wrap a real client library; the in-memory driver in
/// [`crate::memory`] covers tests.
#[async_trait]
pub trait ConnectionDriver: Send + Sync {
    /// Open a handle for the given descriptor.
    async fn establish(&self, spec: &ConnectionSpec)
    -> Result<Arc<dyn ConnectionHandle>, DriverError>;
}

/// A live, poolable connection bound to one database (or schema).
///
/// The DDL helpers have portable default implementations on top of
/// [`execute`](Self::execute); drivers override them for dialects that need
/// different statements.
#[async_trait]
pub trait ConnectionHandle: Send + Sync + fmt::Debug {
    /// Whether the underlying connection is usable.
    async fn is_active(&self) -> bool;

    /// Execute a statement, returning the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64, DriverError>;

    /// Turn on result caching for repeated reads.
    fn enable_query_cache(&self);

    /// Drop cached results.
    fn clear_query_cache(&self);

    async fn create_database(&self, name: &str) -> Result<(), DriverError> {
        self.execute(&format!("CREATE DATABASE {}", quote_ident(name)))
            .await
            .map(|_| ())
    }

    async fn drop_database(&self, name: &str) -> Result<(), DriverError> {
        self.execute(&format!("DROP DATABASE {}", quote_ident(name)))
            .await
            .map(|_| ())
    }

    async fn create_schema(&self, name: &str) -> Result<(), DriverError> {
        self.execute(&format!("CREATE SCHEMA {}", quote_ident(name)))
            .await
            .map(|_| ())
    }

    async fn drop_schema(&self, name: &str) -> Result<(), DriverError> {
        self.execute(&format!("DROP SCHEMA {} CASCADE", quote_ident(name)))
            .await
            .map(|_| ())
    }
}

/// Quote an SQL identifier with double quotes, doubling embedded quotes.
///
/// # Examples
///
/// ```
/// use tenement_core::driver::quote_ident;
///
/// assert_eq!(quote_ident("test_acme"), "\"test_acme\"");
/// assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
/// ```
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct StatementLog {
        statements: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ConnectionHandle for StatementLog {
        async fn is_active(&self) -> bool {
            true
        }

        async fn execute(&self, sql: &str) -> Result<u64, DriverError> {
            self.statements.lock().push(sql.to_string());
            Ok(0)
        }

        fn enable_query_cache(&self) {}

        fn clear_query_cache(&self) {}
    }

    #[tokio::test]
    async fn test_default_ddl_statements() {
        let handle = StatementLog::default();

        handle.create_database("test_acme").await.unwrap();
        handle.drop_schema("acme").await.unwrap();

        let statements = handle.statements.lock().clone();
        assert_eq!(
            statements,
            vec![
                "CREATE DATABASE \"test_acme\"",
                "DROP SCHEMA \"acme\" CASCADE",
            ]
        );
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("x\"; DROP"), "\"x\"\"; DROP\"");
    }
}
