// Configuration validation

use crate::{ConfigError, Result};

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable validation rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Validate that at most one of the flags is set
    pub fn mutually_exclusive(flags: &[(bool, &str)]) -> Result<()> {
        let set: Vec<&str> = flags
            .iter()
            .filter(|(enabled, _)| *enabled)
            .map(|(_, name)| *name)
            .collect();

        if set.len() > 1 {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be enabled together",
                set.join(" and ")
            )));
        }
        Ok(())
    }

    /// Validate that a value contains no whitespace
    pub fn no_whitespace(value: &str, field: &str) -> Result<()> {
        if value.chars().any(char::is_whitespace) {
            return Err(ConfigError::ValidationError(format!(
                "{} must not contain whitespace",
                field
            )));
        }
        Ok(())
    }
}
