//! Error types.
//!
//! Drivers report [`DriverError`]s; the adapter translates them into
//! [`TenantError`] so callers never match on driver specifics.

use std::fmt;
use std::path::PathBuf;
use tenement_config::ConfigError;
use thiserror::Error;

/// Opaque error passed through from a migration runner or schema loader.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Tenant operation errors
#[derive(Debug, Error)]
pub enum TenantError {
    /// The tenant database/schema does not exist or cannot be reached
    #[error("Tenant not found: {tenant}")]
    NotFound {
        tenant: String,
        #[source]
        source: Option<DriverError>,
    },

    /// Creating a tenant whose database/schema already exists
    #[error("Tenant already exists: {tenant}")]
    AlreadyExists {
        tenant: String,
        #[source]
        source: Option<DriverError>,
    },

    /// Adapter or driver missing or misconfigured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure reported by the migration runner
    #[error("Migration failed for {tenant}: {source}")]
    Migration {
        tenant: String,
        #[source]
        source: BoxError,
    },

    /// Schema or seed file could not be applied
    #[error("Failed to load {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// Schema or seed file is missing
    #[error("{} doesn't exist yet", .0.display())]
    MissingFile(PathBuf),

    /// Empty or otherwise unusable tenant name
    #[error("Invalid tenant name: {0:?}")]
    InvalidName(String),
}

impl TenantError {
    pub fn not_found(tenant: impl Into<String>) -> Self {
        Self::NotFound {
            tenant: tenant.into(),
            source: None,
        }
    }

    pub fn already_exists(tenant: impl Into<String>) -> Self {
        Self::AlreadyExists {
            tenant: tenant.into(),
            source: None,
        }
    }

    /// Attach the driver failure behind a not-found or already-exists error.
    pub fn caused_by(self, err: DriverError) -> Self {
        match self {
            Self::NotFound { tenant, .. } => Self::NotFound {
                tenant,
                source: Some(err),
            },
            Self::AlreadyExists { tenant, .. } => Self::AlreadyExists {
                tenant,
                source: Some(err),
            },
            other => other,
        }
    }

    /// Misconfiguration the process cannot recover from at request level.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingFile(_) | Self::Configuration(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<ConfigError> for TenantError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type alias for tenant operations.
pub type Result<T> = std::result::Result<T, TenantError>;

/// Broad classification of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Could not connect, or the connection dropped
    Connection,
    /// A statement was rejected
    Statement,
    /// The target database/schema does not exist
    NotFound,
    /// The target database/schema already exists
    AlreadyExists,
    /// Anything else
    Other,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection error"),
            Self::Statement => write!(f, "statement error"),
            Self::NotFound => write!(f, "not found"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::Other => write!(f, "driver error"),
        }
    }
}

/// Error reported by a [`ConnectionDriver`](crate::driver::ConnectionDriver)
/// or one of its handles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Connection, message)
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Statement, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::AlreadyExists, message)
    }
}
