//! Mapping between configured fields and the Tantivy schema.
//!
//! Every non-facet field definition becomes one Tantivy field of the same name. Facet fields
//! have no field of their own: their values are folded into a handful of reserved fields
//! shared by all dimensions, so dimensions declared by pattern need no schema change:
//! - `$id`: document identifier (string, stored)
//! - `$facets`: sorted-set facet values as `dim<US>label` (string doc values)
//! - `$taxonomy`: taxonomy ordinals of each path and its ancestors (u64 doc values)
//! - `$int_assoc` / `$float_assoc`: `ordinal << 32 | value bits` (u64 doc values)
//! - `$drilldown`: `dim<US>path...` terms for every facet path prefix

use std::collections::HashMap;

use sift_config::{
    Config, ConfigError, DEFAULT_ANALYZER, FieldDefinition, FieldKind, FieldPatterns,
};
use tantivy::schema::{
    FAST, Field, IndexRecordOption, NumericOptions, STORED, STRING, Schema, TextFieldIndexing,
    TextOptions,
};

use crate::{IndexError, analyzer::RAW_ANALYZER, facet::FacetBackend};

/// Separator between the components of an encoded facet path.
pub const PATH_DELIMITER: char = '\u{1f}';

/// Names of the reserved fields.
pub mod reserved {
    /// Document identifier.
    pub const ID: &str = "$id";
    /// Sorted-set facet values.
    pub const FACETS: &str = "$facets";
    /// Taxonomy ordinals.
    pub const TAXONOMY: &str = "$taxonomy";
    /// Integer association weights.
    pub const INT_ASSOC: &str = "$int_assoc";
    /// Float association weights.
    pub const FLOAT_ASSOC: &str = "$float_assoc";
    /// Drill-down terms.
    pub const DRILLDOWN: &str = "$drilldown";
}

/// Encodes a dimension and path as one string.
pub fn encode_path<S: AsRef<str>>(dimension: &str, path: &[S]) -> String {
    let mut encoded = dimension.to_string();
    for component in path {
        encoded.push(PATH_DELIMITER);
        encoded.push_str(component.as_ref());
    }
    encoded
}

/// Builds the Tantivy schema for a set of field definitions.
pub fn build_schema(fields: &FieldPatterns) -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field(reserved::ID, STRING | STORED);
    builder.add_text_field(reserved::FACETS, STRING | FAST);
    builder.add_u64_field(reserved::TAXONOMY, NumericOptions::default().set_fast());
    builder.add_u64_field(reserved::INT_ASSOC, NumericOptions::default().set_fast());
    builder.add_u64_field(reserved::FLOAT_ASSOC, NumericOptions::default().set_fast());
    builder.add_text_field(reserved::DRILLDOWN, STRING);

    for (name, definition) in fields.exact() {
        match definition.kind {
            FieldKind::Text => {
                let analyzer = definition.analyzer.as_deref().unwrap_or(DEFAULT_ANALYZER);
                let mut options = TextOptions::default().set_indexing_options(
                    TextFieldIndexing::default()
                        .set_tokenizer(analyzer)
                        .set_index_option(IndexRecordOption::WithFreqsAndPositions),
                );
                if definition.stored {
                    options = options.set_stored();
                }
                builder.add_text_field(name, options);
            }
            FieldKind::String => {
                let options = match (definition.stored, definition.sortable) {
                    (false, false) => STRING,
                    (true, false) => STRING | STORED,
                    (false, true) => STRING | FAST,
                    (true, true) => STRING | STORED | FAST,
                };
                builder.add_text_field(name, options);
            }
            FieldKind::Long => {
                builder.add_i64_field(name, numeric_options(definition));
            }
            FieldKind::Double => {
                builder.add_f64_field(name, numeric_options(definition));
            }
            FieldKind::Stored => {
                builder.add_text_field(name, STORED);
            }
            FieldKind::SortedSetFacet
            | FieldKind::TaxonomyFacet
            | FieldKind::IntAssocFacet
            | FieldKind::FloatAssocFacet => {}
        }
    }
    builder.build()
}

/// Numeric fields are always indexed and kept in doc values.
fn numeric_options(definition: &FieldDefinition) -> NumericOptions {
    let options = NumericOptions::default().set_indexed().set_fast();
    if definition.stored {
        options.set_stored()
    } else {
        options
    }
}

/// A resolved, searchable field.
#[derive(Debug, Clone, Copy)]
pub struct IndexedField<'a> {
    /// Tantivy field handle.
    pub field: Field,
    /// Configured definition.
    pub definition: &'a FieldDefinition,
}

/// Configured fields bound to a Tantivy schema.
#[derive(Debug, Clone)]
pub struct FieldMap {
    /// Field definitions with pattern resolution.
    patterns: FieldPatterns,
    /// Schema of the index.
    schema: Schema,
    /// Handles of the configured non-facet fields.
    fields: HashMap<String, Field>,
    /// `$id` field.
    pub id: Field,
    /// `$facets` field.
    pub facets: Field,
    /// `$taxonomy` field.
    pub taxonomy: Field,
    /// `$int_assoc` field.
    pub int_assoc: Field,
    /// `$float_assoc` field.
    pub float_assoc: Field,
    /// `$drilldown` field.
    pub drilldown: Field,
}

impl FieldMap {
    /// Builds the schema for a configuration and binds to it.
    pub fn new(config: &Config) -> Result<Self, IndexError> {
        let patterns = compile(config)?;
        let schema = build_schema(&patterns);
        Self::bind(patterns, schema)
    }

    /// Binds a configuration to the schema of an existing index.
    pub fn for_schema(config: &Config, schema: Schema) -> Result<Self, IndexError> {
        Self::bind(compile(config)?, schema)
    }

    /// Resolves every handle, failing if the schema lacks a configured field.
    fn bind(patterns: FieldPatterns, schema: Schema) -> Result<Self, IndexError> {
        let lookup = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| IndexError::UnknownField(name.to_string()))
        };
        let mut fields = HashMap::new();
        for (name, definition) in patterns.exact() {
            if !definition.kind.is_facet() {
                fields.insert(name.to_string(), lookup(name)?);
            }
        }
        Ok(Self {
            id: lookup(reserved::ID)?,
            facets: lookup(reserved::FACETS)?,
            taxonomy: lookup(reserved::TAXONOMY)?,
            int_assoc: lookup(reserved::INT_ASSOC)?,
            float_assoc: lookup(reserved::FLOAT_ASSOC)?,
            drilldown: lookup(reserved::DRILLDOWN)?,
            patterns,
            schema,
            fields,
        })
    }

    /// Returns the Tantivy schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Resolves the definition for a field or facet dimension name.
    pub fn definition(&self, name: &str) -> Option<&FieldDefinition> {
        self.patterns.resolve(name)
    }

    /// Resolves a searchable (non-facet) field.
    pub fn indexed(&self, name: &str) -> Result<IndexedField<'_>, IndexError> {
        match (self.fields.get(name), self.patterns.resolve(name)) {
            (Some(field), Some(definition)) => Ok(IndexedField {
                field: *field,
                definition,
            }),
            (None, Some(definition)) if definition.kind.is_facet() => Err(IndexError::FieldUsage {
                field: name.to_string(),
                message: "facet fields can only be counted or drilled into".to_string(),
            }),
            _ => Err(IndexError::UnknownField(name.to_string())),
        }
    }

    /// Returns the facet storage backend of a dimension, if it is a facet.
    pub fn facet_backend(&self, dimension: &str) -> Option<FacetBackend> {
        self.patterns
            .resolve(dimension)
            .and_then(|definition| FacetBackend::for_kind(definition.kind))
    }

    /// Returns the analyzer name of a text or string field.
    pub fn analyzer_name<'a>(&self, definition: &'a FieldDefinition) -> &'a str {
        match definition.kind {
            FieldKind::Text => definition.analyzer.as_deref().unwrap_or(DEFAULT_ANALYZER),
            _ => RAW_ANALYZER,
        }
    }

    /// Handles of all text fields, in name order.
    pub fn text_fields(&self) -> Vec<Field> {
        let mut names: Vec<_> = self
            .patterns
            .exact()
            .filter(|(_, definition)| definition.kind == FieldKind::Text)
            .map(|(name, _)| name)
            .collect();
        names.sort_unstable();
        names
            .into_iter()
            .filter_map(|name| self.fields.get(name).copied())
            .collect()
    }

    /// Returns true if any facet dimension uses a taxonomy backend.
    pub fn needs_taxonomy(&self) -> bool {
        self.patterns
            .definitions()
            .any(|definition| definition.kind.needs_taxonomy())
    }
}

/// Compiles field patterns, rejecting names Tantivy cannot hold.
fn compile(config: &Config) -> Result<FieldPatterns, IndexError> {
    if let Some(name) = config.fields.keys().find(|name| name.starts_with('-')) {
        return Err(ConfigError::InvalidField {
            field: name.clone(),
            message: "field names cannot start with '-'".to_string(),
        }
        .into());
    }
    Ok(config.compile_fields()?)
}
