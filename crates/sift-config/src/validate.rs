//! Configuration validation.
//!
//! Checks the settings that deserialization alone cannot: value ranges, analyzer references
//! and the consistency of each field definition with its kind.

use crate::{
    Config, ConfigError, DEFAULT_ANALYZER, FieldDefinition, FieldKind, IndexRef,
    MIN_WRITER_HEAP_BYTES,
    patterns::{FieldPatterns, is_pattern},
};

/// Analyzers that exist without being declared.
pub const BUILTIN_ANALYZERS: &[&str] = &[DEFAULT_ANALYZER, "raw"];

/// Stemmer languages accepted by analyzer definitions.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "arabic",
    "danish",
    "dutch",
    "english",
    "finnish",
    "french",
    "german",
    "greek",
    "hungarian",
    "italian",
    "norwegian",
    "portuguese",
    "romanian",
    "russian",
    "spanish",
    "swedish",
    "tamil",
    "turkish",
];

/// Validates a parsed configuration.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_settings(config)?;
    for (name, analyzer) in &config.analyzers {
        if !SUPPORTED_LANGUAGES.contains(&analyzer.language.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidSetting {
                name: "analyzers.language",
                message: format!(
                    "analyzer '{name}' uses unsupported language '{}'",
                    analyzer.language
                ),
            });
        }
        if analyzer.max_token_length == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "analyzers.max_token_length",
                message: format!("analyzer '{name}' must allow tokens of at least one byte"),
            });
        }
    }
    for (name, field) in &config.fields {
        validate_field(config, name, field)?;
    }
    FieldPatterns::compile(&config.fields)?;
    if let Some(master) = &config.replication.master {
        master.parse::<IndexRef>()?;
    }
    Ok(())
}

/// Checks numeric ranges in the `[index]` and `[replication]` sections.
fn validate_settings(config: &Config) -> Result<(), ConfigError> {
    let index = &config.index;
    if index.writer_heap_bytes < MIN_WRITER_HEAP_BYTES {
        return Err(ConfigError::InvalidSetting {
            name: "index.writer_heap_bytes",
            message: format!(
                "{} is below the minimum of {MIN_WRITER_HEAP_BYTES}",
                index.writer_heap_bytes
            ),
        });
    }
    if index.default_rows == 0 {
        return Err(ConfigError::InvalidSetting {
            name: "index.default_rows",
            message: "must be at least 1".to_string(),
        });
    }
    if index.default_facet_top == 0 {
        return Err(ConfigError::InvalidSetting {
            name: "index.default_facet_top",
            message: "must be at least 1".to_string(),
        });
    }
    if config.replication.session_expiration.is_zero() {
        return Err(ConfigError::InvalidSetting {
            name: "replication.session_expiration_secs",
            message: "must be positive".to_string(),
        });
    }
    Ok(())
}

/// Checks one field definition against its kind.
fn validate_field(config: &Config, name: &str, field: &FieldDefinition) -> Result<(), ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidField {
        field: name.to_string(),
        message: message.to_string(),
    };

    if name.is_empty() || name.starts_with('$') {
        return Err(invalid("names starting with '$' are reserved"));
    }
    if is_pattern(name) && !field.kind.is_facet() {
        return Err(invalid("only facet fields can be declared by pattern"));
    }

    match (&field.analyzer, field.kind) {
        (Some(analyzer), FieldKind::Text) => {
            if !config.analyzers.contains_key(analyzer)
                && !BUILTIN_ANALYZERS.contains(&analyzer.as_str())
            {
                return Err(ConfigError::UndefinedAnalyzer {
                    field: name.to_string(),
                    analyzer: analyzer.clone(),
                });
            }
        }
        (Some(_), _) => return Err(invalid("only text fields take an analyzer")),
        (None, _) => {}
    }

    if field.sortable && !matches!(field.kind, FieldKind::String | FieldKind::Long | FieldKind::Double)
    {
        return Err(invalid("only string, long and double fields can be sortable"));
    }
    if (field.multi_valued || field.hierarchical) && !field.kind.is_facet() {
        return Err(invalid("multi_valued and hierarchical apply to facet fields only"));
    }
    if field.kind.is_facet() && field.stored {
        return Err(invalid("facet fields are not stored"));
    }
    if field.kind.needs_taxonomy() && !config.index.enable_taxonomy {
        return Err(invalid("taxonomy facets require index.enable_taxonomy"));
    }
    Ok(())
}
