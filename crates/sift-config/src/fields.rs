//! Field definitions.
//!
//! A field definition tells the index how a document value is stored: as analyzed text, as an
//! exact string, as a number, stored-only, or as one of the four facet storage backends.

use serde::{Deserialize, Serialize};

/// How a field is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Analyzed full text.
    Text,
    /// A single untokenized string.
    String,
    /// A signed 64-bit integer.
    Long,
    /// A 64-bit float.
    Double,
    /// Stored only, never searched.
    Stored,
    /// Facet counted from sorted-set doc values.
    SortedSetFacet,
    /// Facet counted through the taxonomy.
    TaxonomyFacet,
    /// Taxonomy facet aggregating integer association weights.
    IntAssocFacet,
    /// Taxonomy facet aggregating float association weights.
    FloatAssocFacet,
}

impl FieldKind {
    /// Returns true for the four facet kinds.
    pub fn is_facet(self) -> bool {
        matches!(
            self,
            Self::SortedSetFacet | Self::TaxonomyFacet | Self::IntAssocFacet | Self::FloatAssocFacet
        )
    }

    /// Returns true for the facet kinds that need a taxonomy index.
    pub fn needs_taxonomy(self) -> bool {
        matches!(
            self,
            Self::TaxonomyFacet | Self::IntAssocFacet | Self::FloatAssocFacet
        )
    }
}

/// Definition of one field, or of every field matching a glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    /// Storage kind.
    pub kind: FieldKind,
    /// Analyzer name for text fields.
    #[serde(default)]
    pub analyzer: Option<String>,
    /// Whether values are kept for retrieval.
    #[serde(default)]
    pub stored: bool,
    /// Whether values are kept in doc values for sorting and joins.
    #[serde(default)]
    pub sortable: bool,
    /// Whether a document may hold several values (facets only).
    #[serde(default)]
    pub multi_valued: bool,
    /// Whether facet values are paths rather than flat labels.
    #[serde(default)]
    pub hierarchical: bool,
}

impl FieldDefinition {
    /// Creates a definition of the given kind with every option off.
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            analyzer: None,
            stored: false,
            sortable: false,
            multi_valued: false,
            hierarchical: false,
        }
    }

    /// Sets the analyzer.
    pub fn analyzer(mut self, name: impl Into<String>) -> Self {
        self.analyzer = Some(name.into());
        self
    }

    /// Marks the field stored.
    pub fn stored(mut self) -> Self {
        self.stored = true;
        self
    }

    /// Marks the field sortable.
    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    /// Marks a facet field multi-valued.
    pub fn multi_valued(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    /// Marks a facet field hierarchical.
    pub fn hierarchical(mut self) -> Self {
        self.hierarchical = true;
        self
    }
}
