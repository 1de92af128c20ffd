//! Error types for sift configuration.

use std::{io, path::PathBuf};

use thiserror::Error;
use toml::de;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Failed to parse TOML configuration.
    #[error("failed to parse config file {path}: {source}")]
    ParseToml {
        /// Path to the file that could not be parsed.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: de::Error,
    },

    /// Failed to parse an in-memory TOML document.
    #[error("failed to parse config: {0}")]
    ParseStr(#[from] de::Error),

    /// A field references an analyzer that is not defined.
    #[error("field '{field}' references undefined analyzer '{analyzer}'")]
    UndefinedAnalyzer {
        /// Field (or field pattern) name.
        field: String,
        /// The missing analyzer name.
        analyzer: String,
    },

    /// A field definition is inconsistent with its kind.
    #[error("invalid definition for field '{field}': {message}")]
    InvalidField {
        /// Field (or field pattern) name.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Failed to compile a field glob pattern.
    #[error("invalid field pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The invalid pattern.
        pattern: String,
        /// Underlying glob error.
        source: globset::Error,
    },

    /// A setting holds a value outside its accepted range.
    #[error("invalid setting {name}: {message}")]
    InvalidSetting {
        /// Dotted setting name, e.g. `index.writer_heap_bytes`.
        name: &'static str,
        /// Why the value was rejected.
        message: String,
    },

    /// The replication master reference is not of the form `schema/index`.
    #[error("invalid replication master '{0}': expected 'schema/index'")]
    InvalidMaster(String),
}
