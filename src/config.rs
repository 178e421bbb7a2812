use crate::backends::eval_backend::EvalBackend;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Settings carried by every graph store and inherited by derived stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub backend: EvalBackend,
    /// Back-fill fields that have no initializer with zeros instead of failing.
    pub zero_fill_missing_fields: bool,
    /// Check that user functions return one row per selected node or edge.
    pub check_row_counts: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: EvalBackend::NDArray,
            zero_fill_missing_fields: true,
            check_row_counts: true,
        }
    }
}

impl GraphConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config = GraphConfig::from_json_str(r#"{"check_row_counts": false}"#).unwrap();
        assert!(!config.check_row_counts);
        assert!(config.zero_fill_missing_fields);
        assert_eq!(config.backend, EvalBackend::NDArray);
    }
}
