//! Facet definitions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::QueryDef;

/// One requested facet dimension.
///
/// A dimension is index-backed (counted from the facet storage of its field) unless it names
/// sub-queries, in which case each sub-query becomes a label counted as its match count
/// intersected with the main query.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FacetDefinition {
    /// Labels returned; the index default applies when absent.
    pub top: Option<usize>,
    /// Parent path inside a hierarchical dimension; children of the root when empty.
    pub path: Vec<String>,
    /// Label to sub-query, for query-backed dimensions.
    pub queries: IndexMap<String, QueryDef>,
}

impl FacetDefinition {
    /// Index-backed dimension returning `top` labels.
    pub fn top(top: usize) -> Self {
        Self {
            top: Some(top),
            ..Self::default()
        }
    }

    /// Narrows a hierarchical dimension to the children of `path`.
    pub fn under<S: Into<String>>(mut self, path: impl IntoIterator<Item = S>) -> Self {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a named sub-query, making the dimension query-backed.
    pub fn query(mut self, label: impl Into<String>, query: QueryDef) -> Self {
        self.queries.insert(label.into(), query);
        self
    }

    /// Returns true when the dimension is computed from sub-queries.
    pub fn is_query_backed(&self) -> bool {
        !self.queries.is_empty()
    }

    /// Labels to return, falling back to `default_top`.
    pub fn top_or(&self, default_top: usize) -> usize {
        self.top.unwrap_or(default_top)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_backed_when_queries_present() {
        let def = FacetDefinition::default();
        assert!(!def.is_query_backed());
        assert_eq!(def.top_or(10), 10);

        let def = FacetDefinition::top(3).query("all", QueryDef::MatchAll);
        assert!(def.is_query_backed());
        assert_eq!(def.top_or(10), 3);
    }
}
