//! Error types for the sift-index crate.

use std::{io, path::PathBuf};

use sift_config::ConfigError;
use sift_query::QueryError;
use thiserror::Error;

/// How an error should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request or setup is wrong; retrying will not help.
    Configuration,
    /// I/O or refresh failure; the next attempt may succeed.
    Transient,
    /// Missing data for one part of a result.
    Data,
    /// The index itself is unusable.
    Fatal,
}

/// Errors that can occur when working with an index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Failed to open or create the index.
    #[error("failed to open index at {path}: {message}")]
    OpenIndex {
        /// Path to the index directory.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Failed to write to the index.
    #[error("failed to write to index: {0}")]
    Write(String),

    /// Failed to commit changes to the index.
    #[error("failed to commit index: {0}")]
    Commit(String),

    /// Failed while executing a search.
    #[error("search failed: {0}")]
    Search(String),

    /// Failed to reload the reader after a commit or replication.
    #[error("failed to refresh reader: {0}")]
    Refresh(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid stemmer language.
    #[error("unsupported stemmer language: {0}")]
    InvalidLanguage(String),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid request.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A request or document names a field the index does not define.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// A field cannot be used the way the request uses it.
    #[error("field '{field}' cannot be used here: {message}")]
    FieldUsage {
        /// Field name.
        field: String,
        /// Why the usage is rejected.
        message: String,
    },

    /// A document does not fit the field definitions.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// A query could not be compiled.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A collector identifier is not registered.
    #[error("unknown collector type '{0}'")]
    UnknownCollector(String),

    /// A collector was given arguments its factory does not accept.
    #[error("invalid arguments for collector '{name}': {message}")]
    CollectorArguments {
        /// Collector name in the request.
        name: String,
        /// What is wrong with the arguments.
        message: String,
    },

    /// A request mixes parallel-capable and classic collectors.
    #[error(
        "collectors cannot be mixed: '{parallel}' is parallel-capable but '{classic}' is classic"
    )]
    MixedCollectors {
        /// A parallel-capable collector in the request.
        parallel: String,
        /// A classic collector in the request.
        classic: String,
    },

    /// No index is registered under this name.
    #[error("unknown index: {0}")]
    UnknownIndex(String),

    /// A slave's replication master is missing or unusable.
    #[error("invalid replication master '{master}' for index '{index}': {message}")]
    InvalidMaster {
        /// Slave index name.
        index: String,
        /// Configured master reference.
        master: String,
        /// What is wrong with it.
        message: String,
    },

    /// A write was attempted on a replication slave.
    #[error("index '{0}' is a replication slave and is read-only")]
    ReadOnly(String),

    /// Replication failed; the previously applied revision is still serving.
    #[error("replication failed: {0}")]
    Replication(String),

    /// A replication session is unknown or expired.
    #[error("unknown or expired replication session {0}")]
    UnknownSession(String),

    /// The index has been closed.
    #[error("index '{0}' is closed")]
    Closed(String),
}

impl IndexError {
    /// Creates an `OpenIndex` error from a path and Tantivy error.
    pub(crate) fn open_index(path: PathBuf, source: &tantivy::TantivyError) -> Self {
        Self::OpenIndex {
            path,
            message: source.to_string(),
        }
    }

    /// Creates a `Write` error from a Tantivy error.
    pub(crate) fn write(source: &tantivy::TantivyError) -> Self {
        Self::Write(source.to_string())
    }

    /// Creates a `Commit` error from a Tantivy error.
    pub(crate) fn commit(source: &tantivy::TantivyError) -> Self {
        Self::Commit(source.to_string())
    }

    /// Creates a `Search` error from a Tantivy error.
    pub(crate) fn search(source: &tantivy::TantivyError) -> Self {
        Self::Search(source.to_string())
    }

    /// Creates a `Refresh` error from a Tantivy error.
    pub(crate) fn refresh(source: &tantivy::TantivyError) -> Self {
        Self::Refresh(source.to_string())
    }

    /// Classifies the error for retry and reporting decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_)
            | Self::Query(_)
            | Self::InvalidLanguage(_)
            | Self::UnknownField(_)
            | Self::FieldUsage { .. }
            | Self::InvalidDocument(_)
            | Self::InvalidQuery(_)
            | Self::UnknownCollector(_)
            | Self::CollectorArguments { .. }
            | Self::MixedCollectors { .. }
            | Self::UnknownIndex(_)
            | Self::InvalidMaster { .. }
            | Self::ReadOnly(_)
            | Self::Json(_) => ErrorKind::Configuration,
            Self::Io(_)
            | Self::Refresh(_)
            | Self::Replication(_)
            | Self::UnknownSession(_) => ErrorKind::Transient,
            Self::OpenIndex { .. }
            | Self::Write(_)
            | Self::Commit(_)
            | Self::Search(_)
            | Self::Closed(_) => ErrorKind::Fatal,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mixed_collectors_are_configuration_errors() {
        let err = IndexError::MixedCollectors {
            parallel: "max".into(),
            classic: "first".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("'max'"));
    }

    #[test]
    fn replication_errors_are_transient() {
        assert_eq!(
            IndexError::Replication("reset".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            IndexError::Io(io::Error::other("boom")).kind(),
            ErrorKind::Transient
        );
    }
}
