//! Configuration system for sift.
//!
//! A sift index is configured by a single TOML document holding four sections:
//! `[index]` (writer and execution settings), `[replication]` (master/slave role),
//! `[analyzers.*]` (named text analysis pipelines) and `[fields.*]` (field definitions,
//! where a name containing glob metacharacters defines a family of dynamic facet dimensions).
//!
//! # Example
//!
//! ```
//! use sift_config::{Config, FieldKind};
//!
//! let config = Config::from_toml_str(
//!     r#"
//!     [analyzers.english]
//!     language = "english"
//!
//!     [fields.title]
//!     kind = "text"
//!     analyzer = "english"
//!     stored = true
//!
//!     [fields.category]
//!     kind = "sorted_set_facet"
//!     multi_valued = true
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.fields["category"].kind, FieldKind::SortedSetFacet);
//! ```

#![warn(missing_docs)]

mod error;
mod fields;
mod parse;
mod patterns;
mod validate;

use std::{
    collections::BTreeMap,
    fmt,
    path::Path,
    str::FromStr,
    time::Duration,
};

pub use error::ConfigError;
pub use fields::{FieldDefinition, FieldKind};
pub use parse::{parse_config_file, parse_config_str};
pub use patterns::FieldPatterns;
pub use validate::{BUILTIN_ANALYZERS, SUPPORTED_LANGUAGES};
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};

/// Name of the built-in analyzer used when a text field names none.
pub const DEFAULT_ANALYZER: &str = "default";

/// Minimum writer heap accepted by the index engine (15 MB).
pub const MIN_WRITER_HEAP_BYTES: usize = 15_000_000;

/// Top-level configuration of one index.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Writer and query execution settings.
    pub index: IndexSettings,
    /// Replication role and timing.
    pub replication: ReplicationSettings,
    /// Named analyzers available to text fields.
    pub analyzers: BTreeMap<String, AnalyzerDefinition>,
    /// Field definitions keyed by field name or glob pattern.
    pub fields: BTreeMap<String, FieldDefinition>,
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = parse_config_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config = parse_config_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-references and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate::validate_config(self)
    }

    /// Compiles the field definitions into a name resolver.
    pub fn compile_fields(&self) -> Result<FieldPatterns, ConfigError> {
        FieldPatterns::compile(&self.fields)
    }

    /// Adds (or replaces) a field definition. Convenience for programmatic setup.
    pub fn with_field(mut self, name: impl Into<String>, definition: FieldDefinition) -> Self {
        self.fields.insert(name.into(), definition);
        self
    }

    /// Adds (or replaces) an analyzer definition.
    pub fn with_analyzer(mut self, name: impl Into<String>, language: impl Into<String>) -> Self {
        self.analyzers.insert(
            name.into(),
            AnalyzerDefinition {
                language: language.into(),
                ..AnalyzerDefinition::default()
            },
        );
        self
    }
}

/// Writer and query execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexSettings {
    /// Memory budget handed to the index writer.
    pub writer_heap_bytes: usize,
    /// Threads in the shared segment-parallel search pool (0 runs segments inline).
    pub search_threads: usize,
    /// Rows returned when a request does not say.
    pub default_rows: usize,
    /// Facet labels returned per dimension when a facet definition does not say.
    pub default_facet_top: usize,
    /// Whether a taxonomy index is kept next to the data index.
    pub enable_taxonomy: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            writer_heap_bytes: 50_000_000,
            search_threads: 4,
            default_rows: 10,
            default_facet_top: 10,
            enable_taxonomy: true,
        }
    }
}

/// Replication role and timing.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicationSettings {
    /// Master this index replicates from, as `schema/index`. Absent on masters.
    pub master: Option<String>,
    /// Period of background pulls; zero disables them.
    #[serde(rename = "interval_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    /// Inactivity after which a master drops a replication session.
    #[serde(rename = "session_expiration_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub session_expiration: Duration,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            master: None,
            interval: Duration::ZERO,
            session_expiration: Duration::from_secs(30 * 60),
        }
    }
}

impl ReplicationSettings {
    /// Returns true if this index is a replication slave.
    pub fn is_slave(&self) -> bool {
        self.master.is_some()
    }

    /// Parses the master reference, if any.
    pub fn master_ref(&self) -> Result<Option<IndexRef>, ConfigError> {
        self.master.as_deref().map(str::parse).transpose()
    }

    /// Returns the background pull period, or `None` when pulling is on demand only.
    pub fn pull_interval(&self) -> Option<Duration> {
        (!self.interval.is_zero()).then_some(self.interval)
    }
}

/// A named text analysis pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerDefinition {
    /// Stemmer language, e.g. `english`.
    pub language: String,
    /// Tokens longer than this many bytes are dropped.
    pub max_token_length: usize,
}

impl Default for AnalyzerDefinition {
    fn default() -> Self {
        Self {
            language: String::from("english"),
            max_token_length: 40,
        }
    }
}

/// A `schema/index` pair naming one index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexRef {
    /// Schema (namespace) name.
    pub schema: String,
    /// Index name inside the schema.
    pub index: String,
}

impl IndexRef {
    /// Creates a reference from its two parts.
    pub fn new(schema: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            index: index.into(),
        }
    }
}

impl FromStr for IndexRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((schema, index))
                if !schema.is_empty() && !index.is_empty() && !index.contains('/') =>
            {
                Ok(Self::new(schema, index))
            }
            _ => Err(ConfigError::InvalidMaster(s.to_string())),
        }
    }
}

impl fmt::Display for IndexRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.schema, self.index)
    }
}
