//! Engine configuration
//!
//! Loaded from TOML. Every key is optional; missing keys fall back to
//! [`RepositoryConfig::default`].
//!
//! ```toml
//! path_separator = "__"
//! default_sort_field = "created_at"
//! default_sort_direction = "desc"
//! batch_error_sample = 3
//! reject_unknown_filters = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, Result};
use crate::find_options::SortDirection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Separator that marks a filter keyword as a nested path (`company__name`)
    pub path_separator: String,
    pub default_sort_field: String,
    pub default_sort_direction: SortDirection,
    /// How many per-document failures a rejected batch reports
    pub batch_error_sample: usize,
    /// Reject filter keywords that are neither schema fields nor nested paths
    pub reject_unknown_filters: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path_separator: "__".to_string(),
            default_sort_field: crate::document::CREATED_AT.to_string(),
            default_sort_direction: SortDirection::Desc,
            batch_error_sample: 3,
            reject_unknown_filters: true,
        }
    }
}

impl RepositoryConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RepositoryConfig = toml::from_str(content)
            .map_err(|e| RepositoryError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RepositoryError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.path_separator.is_empty() {
            return Err(RepositoryError::Config(
                "path_separator must not be empty".to_string(),
            ));
        }
        if self.path_separator.contains('.') {
            return Err(RepositoryError::Config(
                "path_separator must not contain '.'".to_string(),
            ));
        }
        if self.default_sort_field.is_empty() {
            return Err(RepositoryError::Config(
                "default_sort_field must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
