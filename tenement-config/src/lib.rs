// Configuration for Tenement tenant routing
//
// A `TenancyConfig` is assembled once at startup (file, then environment
// overrides, then validation) and treated as read-only afterwards.

pub mod connection;
pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use connection::ConnectionSpec;
pub use env::{ENV_PREFIX, EnvOverrides};
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Where the running environment name goes in a tenant's connection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentPolicy {
    /// Tenant names are used as-is
    #[default]
    None,
    /// `acme` becomes `test_acme`
    Prepend,
    /// `acme` becomes `acme_test`
    Append,
}

/// Process-wide tenancy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    /// Running environment name (e.g. `development`, `test`)
    pub environment: String,

    /// Models that always use the shared default connection
    pub excluded_models: BTreeSet<String>,

    /// Schema-per-tenant instead of database-per-tenant
    pub use_schemas: bool,

    /// Prefix tenant names with the environment
    pub prepend_environment: bool,

    /// Suffix tenant names with the environment
    pub append_environment: bool,

    /// Load the seed file after creating a tenant
    pub seed_after_create: bool,

    /// Schema definition imported into new tenants
    pub database_schema_file: Option<PathBuf>,

    /// Seed data file
    pub seed_file: Option<PathBuf>,

    /// Default schema for schema-per-tenant deployments
    pub default_schema: String,

    /// Known tenants, used by bulk operations such as migrating every tenant
    pub tenant_names: Vec<String>,

    /// Directory handed to the migration runner
    pub migrations_path: PathBuf,

    /// Connection to the default database
    pub connection: ConnectionSpec,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            excluded_models: BTreeSet::new(),
            use_schemas: false,
            prepend_environment: false,
            append_environment: false,
            seed_after_create: false,
            database_schema_file: None,
            seed_file: None,
            default_schema: "public".to_string(),
            tenant_names: Vec::new(),
            migrations_path: PathBuf::from("db/migrate"),
            connection: ConnectionSpec::default(),
        }
    }
}

impl TenancyConfig {
    /// Create a config for the given default connection
    pub fn new(connection: ConnectionSpec) -> Self {
        Self {
            connection,
            ..Self::default()
        }
    }

    /// Load from a file, apply `TENEMENT_*` overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = ConfigLoader::auto(path)?.load_file(path)?;
        EnvOverrides::default().apply_process_env(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Build purely from the environment (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        EnvOverrides::load_dotenv(None)?;
        let mut config = Self::default();
        EnvOverrides::default().apply_process_env(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the environment name
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Add an excluded model
    pub fn with_excluded_model(mut self, model: impl Into<String>) -> Self {
        self.excluded_models.insert(model.into());
        self
    }

    /// Switch schema-per-tenant on or off
    pub fn with_schemas(mut self, use_schemas: bool) -> Self {
        self.use_schemas = use_schemas;
        self
    }

    /// Set the environment decoration policy
    pub fn with_environment_policy(mut self, policy: EnvironmentPolicy) -> Self {
        self.prepend_environment = policy == EnvironmentPolicy::Prepend;
        self.append_environment = policy == EnvironmentPolicy::Append;
        self
    }

    /// Seed new tenants after creation
    pub fn with_seed_after_create(mut self, seed: bool) -> Self {
        self.seed_after_create = seed;
        self
    }

    /// Set the schema definition file
    pub fn with_schema_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_schema_file = Some(path.into());
        self
    }

    /// Set the seed file
    pub fn with_seed_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.seed_file = Some(path.into());
        self
    }

    /// Set the default schema
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    /// Add a known tenant
    pub fn with_tenant(mut self, name: impl Into<String>) -> Self {
        self.tenant_names.push(name.into());
        self
    }

    /// Set the migrations directory
    pub fn with_migrations_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_path = path.into();
        self
    }

    /// Decoration policy derived from the prepend/append flags.
    ///
    /// Prepend wins when both are set; `validate` rejects that combination.
    pub fn environment_policy(&self) -> EnvironmentPolicy {
        if self.prepend_environment {
            EnvironmentPolicy::Prepend
        } else if self.append_environment {
            EnvironmentPolicy::Append
        } else {
            EnvironmentPolicy::None
        }
    }

    /// Name of the tenant used when nothing else is selected
    pub fn default_tenant(&self) -> &str {
        if self.use_schemas {
            &self.default_schema
        } else {
            &self.connection.database
        }
    }

    /// Whether the model always uses the default connection
    pub fn is_excluded(&self, model: &str) -> bool {
        self.excluded_models.contains(model)
    }
}

impl Validate for TenancyConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.connection.database, "connection.database")?;
        ConfigValidator::not_empty(&self.environment, "environment")?;
        ConfigValidator::no_whitespace(&self.environment, "environment")?;
        ConfigValidator::mutually_exclusive(&[
            (self.prepend_environment, "prepend_environment"),
            (self.append_environment, "append_environment"),
        ])?;
        if self.use_schemas {
            ConfigValidator::not_empty(&self.default_schema, "default_schema")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TenancyConfig::default();
        assert_eq!(config.environment, "development");
        assert_eq!(config.default_schema, "public");
        assert_eq!(config.environment_policy(), EnvironmentPolicy::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = TenancyConfig::new(ConnectionSpec::new("app"))
            .with_environment("test")
            .with_environment_policy(EnvironmentPolicy::Append)
            .with_excluded_model("User")
            .with_seed_after_create(true)
            .with_tenant("acme");

        assert_eq!(config.environment_policy(), EnvironmentPolicy::Append);
        assert!(config.is_excluded("User"));
        assert!(!config.is_excluded("Widget"));
        assert!(config.seed_after_create);
        assert_eq!(config.tenant_names, vec!["acme"]);
    }

    #[test]
    fn test_default_tenant_follows_mode() {
        let config = TenancyConfig::new(ConnectionSpec::new("app"));
        assert_eq!(config.default_tenant(), "app");

        let config = config.with_schemas(true);
        assert_eq!(config.default_tenant(), "public");
    }

    #[test]
    fn test_validation_rejects_both_policies() {
        let mut config = TenancyConfig::default();
        config.prepend_environment = true;
        config.append_environment = true;

        assert_eq!(config.environment_policy(), EnvironmentPolicy::Prepend);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_requires_database() {
        let config = TenancyConfig::new(ConnectionSpec::new(""));
        assert!(config.validate().is_err());
    }
}
