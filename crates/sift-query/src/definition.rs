//! The search request.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{FacetDefinition, QueryDef, QueryError, SortDirection};

/// A complete search request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueryDefinition {
    /// Query tree.
    pub query: QueryDef,
    /// First hit returned.
    #[serde(default)]
    pub start: usize,
    /// Hits returned; the index default applies when absent.
    #[serde(default)]
    pub rows: Option<usize>,
    /// Sort keys in priority order; relevance when empty.
    #[serde(default)]
    pub sorts: IndexMap<String, SortDirection>,
    /// Facet dimensions in response order.
    #[serde(default)]
    pub facets: IndexMap<String, FacetDefinition>,
    /// Named collectors in response order.
    #[serde(default)]
    pub collectors: IndexMap<String, CollectorDefinition>,
    /// Named highlighters.
    #[serde(default)]
    pub highlighters: IndexMap<String, HighlighterDefinition>,
    /// Stored fields returned with each hit; `*` returns all of them.
    #[serde(default)]
    pub returned_fields: Vec<String>,
    /// Echo the compiled query in the response.
    #[serde(default)]
    pub query_debug: bool,
}

/// A collector instantiated by registry identifier.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CollectorDefinition {
    /// Registry identifier, e.g. `max_long`.
    pub collector: String,
    /// Positional arguments after the name.
    #[serde(default)]
    pub arguments: Vec<Value>,
}

/// Snippet extraction for one stored text field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HighlighterDefinition {
    /// Field to extract from.
    pub field: String,
    /// Snippet length limit in characters.
    #[serde(default = "default_max_num_chars")]
    pub max_num_chars: usize,
}

/// Snippet length when a highlighter does not say.
fn default_max_num_chars() -> usize {
    150
}

impl QueryDefinition {
    /// Starts a request around a query with every other setting at its default.
    pub fn of(query: QueryDef) -> Self {
        Self {
            query,
            start: 0,
            rows: None,
            sorts: IndexMap::new(),
            facets: IndexMap::new(),
            collectors: IndexMap::new(),
            highlighters: IndexMap::new(),
            returned_fields: Vec::new(),
            query_debug: false,
        }
    }

    /// Parses a JSON request body and validates it.
    pub fn from_json(json: &str) -> Result<Self, QueryError> {
        let definition: Self = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Sets the first hit returned.
    pub fn start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    /// Sets the number of hits returned.
    pub fn rows(mut self, rows: usize) -> Self {
        self.rows = Some(rows);
        self
    }

    /// Appends a sort key.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sorts.insert(field.into(), direction);
        self
    }

    /// Requests a facet dimension.
    pub fn facet(mut self, dimension: impl Into<String>, definition: FacetDefinition) -> Self {
        self.facets.insert(dimension.into(), definition);
        self
    }

    /// Requests a named collector.
    pub fn collector(
        mut self,
        name: impl Into<String>,
        collector: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        self.collectors.insert(
            name.into(),
            CollectorDefinition {
                collector: collector.into(),
                arguments,
            },
        );
        self
    }

    /// Requests a highlighter.
    pub fn highlighter(
        mut self,
        name: impl Into<String>,
        field: impl Into<String>,
        max_num_chars: usize,
    ) -> Self {
        self.highlighters.insert(
            name.into(),
            HighlighterDefinition {
                field: field.into(),
                max_num_chars,
            },
        );
        self
    }

    /// Adds stored fields to return.
    pub fn returned_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.returned_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Echoes the compiled query in the response.
    pub fn query_debug(mut self) -> Self {
        self.query_debug = true;
        self
    }

    /// Returns true when facets must be counted sideways.
    pub fn uses_drill_sideways(&self) -> bool {
        !self.facets.is_empty()
            && self
                .query
                .as_drill_down()
                .is_some_and(|drill| drill.use_drill_sideways)
    }

    /// Checks the request before any index access.
    pub fn validate(&self) -> Result<(), QueryError> {
        self.query.validate()?;
        for (dimension, facet) in &self.facets {
            if facet.top == Some(0) {
                return Err(QueryError::InvalidFacet {
                    dimension: dimension.clone(),
                    message: "top must be at least 1".to_string(),
                });
            }
            if facet.is_query_backed() && !facet.path.is_empty() {
                return Err(QueryError::InvalidFacet {
                    dimension: dimension.clone(),
                    message: "a query-backed dimension cannot have a path".to_string(),
                });
            }
            for query in facet.queries.values() {
                query.validate()?;
            }
        }
        for (name, collector) in &self.collectors {
            if collector.collector.trim().is_empty() {
                return Err(QueryError::InvalidCollector {
                    name: name.clone(),
                    message: "collector identifier is empty".to_string(),
                });
            }
        }
        for (name, highlighter) in &self.highlighters {
            if highlighter.max_num_chars == 0 {
                return Err(QueryError::InvalidHighlighter {
                    name: name.clone(),
                    message: "max_num_chars must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }
}
