use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Settings for a [`RuleService`](crate::RuleService).
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleServiceConfig {
    /// Global switch. When off no rule fires.
    #[serde(default = "default_true")]
    pub rules_enabled: bool,

    /// Result cap for the folder traversal helpers when the caller passes none.
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,

    /// Upper bound on event-pumping rounds within one processing pass.
    #[serde(default = "default_max_trigger_rounds")]
    pub max_trigger_rounds: usize,

    /// Whether the "ignore inherited rules" aspect on the node being resolved
    /// cuts off its own ancestors. Off by default: the aspect only breaks the
    /// chain when found on an ancestor.
    #[serde(default)]
    pub ignore_aspect_on_target: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_results() -> usize {
    1000
}

fn default_max_trigger_rounds() -> usize {
    64
}

impl Default for RuleServiceConfig {
    fn default() -> Self {
        Self {
            rules_enabled: true,
            default_max_results: default_max_results(),
            max_trigger_rounds: default_max_trigger_rounds(),
            ignore_aspect_on_target: false,
        }
    }
}

impl RuleServiceConfig {
    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] on malformed input and
    /// [`ConfigError::Zero`] when a limit is zero.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_yaml_str()`](Self::from_yaml_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if serialization fails.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_max_results == 0 {
            return Err(ConfigError::Zero {
                field: "default_max_results",
            });
        }
        if self.max_trigger_rounds == 0 {
            return Err(ConfigError::Zero {
                field: "max_trigger_rounds",
            });
        }
        Ok(())
    }
}
