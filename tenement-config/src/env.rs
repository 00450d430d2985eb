// Environment variable overrides

use crate::{ConfigError, Result, TenancyConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Default prefix for tenancy environment variables.
pub const ENV_PREFIX: &str = "TENEMENT";

/// Applies `TENEMENT_*` style variables on top of a configuration.
///
/// Recognised keys (after the prefix): `ENVIRONMENT`, `EXCLUDED_MODELS`,
/// `USE_SCHEMAS`, `PREPEND_ENVIRONMENT`, `APPEND_ENVIRONMENT`,
/// `SEED_AFTER_CREATE`, `DATABASE_SCHEMA_FILE`, `SEED_FILE`,
/// `DEFAULT_SCHEMA`, `TENANT_NAMES`, `MIGRATIONS_PATH`, `ADAPTER`,
/// `DATABASE`, `DATABASE_HOST`, `DATABASE_PORT`, `DATABASE_USER`,
/// `DATABASE_PASSWORD`. List values are comma separated.
pub struct EnvOverrides {
    prefix: String,
}

impl EnvOverrides {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load a `.env` file into the process environment.
    ///
    /// With no path the usual `.env` lookup is used and a missing file is
    /// ignored; an explicit path must exist.
    pub fn load_dotenv(path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => dotenvy::from_path(path)
                .map(|_| ())
                .map_err(|e| ConfigError::LoadError(e.to_string())),
            None => {
                dotenvy::dotenv().ok();
                Ok(())
            }
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_process_env(&self, config: &mut TenancyConfig) -> Result<()> {
        self.apply(config, env::vars())
    }

    /// Apply overrides from an explicit set of variables.
    pub fn apply<I, K, V>(&self, config: &mut TenancyConfig, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let prefix = format!("{}_", self.prefix);

        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(&prefix) else {
                continue;
            };
            let value = value.as_ref().trim();
            let full_key = key.as_ref();

            match name {
                "ENVIRONMENT" => config.environment = value.to_string(),
                "EXCLUDED_MODELS" => {
                    config.excluded_models = split_list(value).into_iter().collect()
                }
                "USE_SCHEMAS" => config.use_schemas = parse_bool(full_key, value)?,
                "PREPEND_ENVIRONMENT" => {
                    config.prepend_environment = parse_bool(full_key, value)?
                }
                "APPEND_ENVIRONMENT" => config.append_environment = parse_bool(full_key, value)?,
                "SEED_AFTER_CREATE" => config.seed_after_create = parse_bool(full_key, value)?,
                "DATABASE_SCHEMA_FILE" => config.database_schema_file = optional_path(value),
                "SEED_FILE" => config.seed_file = optional_path(value),
                "DEFAULT_SCHEMA" => config.default_schema = value.to_string(),
                "TENANT_NAMES" => config.tenant_names = split_list(value),
                "MIGRATIONS_PATH" => config.migrations_path = PathBuf::from(value),
                "ADAPTER" => config.connection.adapter = value.to_string(),
                "DATABASE" => config.connection.database = value.to_string(),
                "DATABASE_HOST" => config.connection.host = Some(value.to_string()),
                "DATABASE_PORT" => {
                    config.connection.port =
                        Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                            key: full_key.to_string(),
                            value: value.to_string(),
                        })?)
                }
                "DATABASE_USER" => config.connection.username = Some(value.to_string()),
                "DATABASE_PASSWORD" => config.connection.password = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(())
    }
}

impl Default for EnvOverrides {
    fn default() -> Self {
        Self::new(ENV_PREFIX)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn optional_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overrides() {
        let mut config = TenancyConfig::default();
        let vars = [
            ("TENEMENT_ENVIRONMENT", "test"),
            ("TENEMENT_PREPEND_ENVIRONMENT", "true"),
            ("TENEMENT_EXCLUDED_MODELS", "User, Company ,"),
            ("TENEMENT_DATABASE", "app"),
            ("TENEMENT_DATABASE_PORT", "5433"),
            ("UNRELATED", "ignored"),
        ];

        EnvOverrides::default().apply(&mut config, vars).unwrap();

        assert_eq!(config.environment, "test");
        assert!(config.prepend_environment);
        assert_eq!(config.excluded_models.len(), 2);
        assert!(config.excluded_models.contains("Company"));
        assert_eq!(config.connection.database, "app");
        assert_eq!(config.connection.port, Some(5433));
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        let mut config = TenancyConfig::default();
        let err = EnvOverrides::default()
            .apply(&mut config, [("TENEMENT_USE_SCHEMAS", "maybe")])
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_custom_prefix() {
        let mut config = TenancyConfig::default();
        EnvOverrides::new("MY_APP")
            .apply(
                &mut config,
                [("MY_APP_USE_SCHEMAS", "1"), ("TENEMENT_SEED_AFTER_CREATE", "1")],
            )
            .unwrap();

        assert!(config.use_schemas);
        assert!(!config.seed_after_create);
    }

    #[test]
    fn test_empty_path_clears_file() {
        let mut config = TenancyConfig::default().with_schema_file("db/schema.sql");
        EnvOverrides::default()
            .apply(&mut config, [("TENEMENT_DATABASE_SCHEMA_FILE", "")])
            .unwrap();

        assert!(config.database_schema_file.is_none());
    }

    #[test]
    fn test_missing_dotenv_path_fails() {
        let result = EnvOverrides::load_dotenv(Some(Path::new("/nonexistent/tenement.env")));
        assert!(result.is_err());
    }
}
