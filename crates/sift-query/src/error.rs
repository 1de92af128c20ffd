//! Error types for request validation.

use thiserror::Error;

/// A request that cannot be executed as written.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query tree is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A multi-range query has lower and upper bound arrays of different lengths.
    #[error("multi-range query on '{field}' has {lower} lower bounds but {upper} upper bounds")]
    RangeLengthMismatch {
        /// Field the ranges apply to.
        field: String,
        /// Number of lower bounds.
        lower: usize,
        /// Number of upper bounds.
        upper: usize,
    },

    /// A facet definition is inconsistent.
    #[error("invalid facet '{dimension}': {message}")]
    InvalidFacet {
        /// Dimension name.
        dimension: String,
        /// What is wrong with it.
        message: String,
    },

    /// A collector definition is inconsistent.
    #[error("invalid collector '{name}': {message}")]
    InvalidCollector {
        /// Collector name in the request.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// A highlighter definition is inconsistent.
    #[error("invalid highlighter '{name}': {message}")]
    InvalidHighlighter {
        /// Highlighter name in the request.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// The request body is not valid JSON for this model.
    #[error("failed to parse query definition: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueryError {
    /// Shorthand for [`QueryError::InvalidQuery`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }
}
