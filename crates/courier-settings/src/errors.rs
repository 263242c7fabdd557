//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("reading {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON.
    #[error("parsing {}: {source}", path.display())]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// Merged values do not fit the settings schema.
    #[error("settings schema: {0}")]
    Schema(#[from] serde_json::Error),
    /// A value is out of range or conflicts with another.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// camelCase path of the offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
