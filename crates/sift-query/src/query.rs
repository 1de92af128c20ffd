//! The query tree.
//!
//! Variants are tagged by a `type` field in JSON, e.g.
//! `{"type": "long_range", "field": "price", "lower": 10}`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::QueryError;

/// One node of a query tree.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryDef {
    /// Matches every live document.
    MatchAll,

    /// Exact term on an untokenized or pre-analyzed field.
    Term {
        /// Field name.
        field: String,
        /// Term text.
        value: String,
    },

    /// Any of several exact terms.
    Terms {
        /// Field name.
        field: String,
        /// Accepted terms.
        values: Vec<String>,
    },

    /// Text analyzed with the query analyzer of the field.
    Match {
        /// Field name.
        field: String,
        /// Free text.
        text: String,
        /// How the analyzed tokens combine.
        #[serde(default)]
        operator: MatchOperator,
    },

    /// Query string parsed by the engine's parser.
    QueryString {
        /// Query text.
        query: String,
        /// Fields searched by unqualified terms; all text fields when empty.
        #[serde(default)]
        default_fields: Vec<String>,
    },

    /// Boolean combination of clauses.
    Bool(BoolQuery),

    /// Glob-style pattern with `*` and `?`.
    Wildcard {
        /// Field name.
        field: String,
        /// Pattern.
        pattern: String,
    },

    /// Terms starting with a prefix.
    Prefix {
        /// Field name.
        field: String,
        /// Required prefix.
        prefix: String,
    },

    /// Terms within an edit distance.
    Fuzzy {
        /// Field name.
        field: String,
        /// Term text.
        value: String,
        /// Maximum Levenshtein distance (0 to 2).
        #[serde(default = "default_max_edits")]
        max_edits: u8,
        /// Whether a transposition counts as one edit.
        #[serde(default = "default_transpositions")]
        transpositions: bool,
    },

    /// Analyzed phrase.
    Phrase {
        /// Field name.
        field: String,
        /// Phrase text, analyzed with the query analyzer.
        text: String,
        /// Allowed positional slop.
        #[serde(default)]
        slop: u32,
    },

    /// Range over a long field. Absent bounds are open.
    LongRange {
        /// Field name.
        field: String,
        /// Lower bound.
        #[serde(default)]
        lower: Option<i64>,
        /// Upper bound.
        #[serde(default)]
        upper: Option<i64>,
        /// Whether the lower bound is inclusive.
        #[serde(default = "default_inclusive")]
        include_lower: bool,
        /// Whether the upper bound is inclusive.
        #[serde(default = "default_inclusive")]
        include_upper: bool,
    },

    /// Range over a double field. Absent bounds are open.
    DoubleRange {
        /// Field name.
        field: String,
        /// Lower bound.
        #[serde(default)]
        lower: Option<f64>,
        /// Upper bound.
        #[serde(default)]
        upper: Option<f64>,
        /// Whether the lower bound is inclusive.
        #[serde(default = "default_inclusive")]
        include_lower: bool,
        /// Whether the upper bound is inclusive.
        #[serde(default = "default_inclusive")]
        include_upper: bool,
    },

    /// Exact long value.
    LongExact {
        /// Field name.
        field: String,
        /// Value.
        value: i64,
    },

    /// Any of several long values.
    LongSet {
        /// Field name.
        field: String,
        /// Accepted values.
        values: Vec<i64>,
    },

    /// Union of inclusive ranges over an int field.
    IntMultiRange {
        /// Field name.
        field: String,
        /// Lower bounds, pairwise with `upper`.
        lower: Vec<i32>,
        /// Upper bounds, pairwise with `lower`.
        upper: Vec<i32>,
    },

    /// Union of inclusive ranges over a long field.
    LongMultiRange {
        /// Field name.
        field: String,
        /// Lower bounds, pairwise with `upper`.
        lower: Vec<i64>,
        /// Upper bounds, pairwise with `lower`.
        upper: Vec<i64>,
    },

    /// Union of inclusive ranges over a double field.
    DoubleMultiRange {
        /// Field name.
        field: String,
        /// Lower bounds, pairwise with `upper`.
        lower: Vec<f64>,
        /// Upper bounds, pairwise with `lower`.
        upper: Vec<f64>,
    },

    /// Cross-index join on string doc values.
    Join(JoinQuery),

    /// Base query narrowed by facet paths.
    DrillDown(DrillDownQuery),

    /// Multiplies the score of the inner query.
    Boost {
        /// Inner query.
        query: Box<Self>,
        /// Factor.
        boost: f32,
    },

    /// Gives every match of the inner query the same score.
    ConstantScore {
        /// Inner query.
        query: Box<Self>,
        /// Score assigned to matches.
        #[serde(default = "default_constant_score")]
        score: f32,
    },
}

/// How analyzed tokens of a [`QueryDef::Match`] combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    /// Any token may match.
    #[default]
    Or,
    /// Every token must match.
    And,
}

/// Boolean combination of clauses.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BoolQuery {
    /// Clauses that must match and contribute to the score.
    pub must: Vec<QueryDef>,
    /// Optional clauses.
    pub should: Vec<QueryDef>,
    /// Clauses that must not match.
    pub must_not: Vec<QueryDef>,
    /// Clauses that must match without scoring.
    pub filter: Vec<QueryDef>,
    /// How many `should` clauses must match. Zero means one is required only when there is no
    /// other positive clause.
    pub minimum_should_match: usize,
}

/// Documents whose `to_field` holds a value that `from_field` holds in matches of `query`
/// against `from_index`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JoinQuery {
    /// Other index, as `schema/index`.
    pub from_index: String,
    /// String field read from the other index.
    pub from_field: String,
    /// String field matched in this index.
    pub to_field: String,
    /// Query run against the other index.
    pub query: Box<QueryDef>,
}

/// Base query narrowed by facet paths: paths of one dimension are OR'ed, dimensions are AND'ed.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DrillDownQuery {
    /// Query being narrowed; match-all when absent.
    #[serde(default)]
    pub base: Option<Box<QueryDef>>,
    /// Facet paths per dimension, in drill order.
    #[serde(default)]
    pub dimensions: IndexMap<String, Vec<Vec<String>>>,
    /// Whether facet counts are computed sideways.
    #[serde(default)]
    pub use_drill_sideways: bool,
}

impl DrillDownQuery {
    /// Starts a drill-down over `base`.
    pub fn new(base: QueryDef) -> Self {
        Self {
            base: Some(Box::new(base)),
            dimensions: IndexMap::new(),
            use_drill_sideways: false,
        }
    }

    /// Adds a path under a dimension.
    pub fn add<S: Into<String>>(
        mut self,
        dimension: impl Into<String>,
        path: impl IntoIterator<Item = S>,
    ) -> Self {
        self.dimensions
            .entry(dimension.into())
            .or_default()
            .push(path.into_iter().map(Into::into).collect());
        self
    }

    /// Enables sideways facet counting.
    pub fn sideways(mut self) -> Self {
        self.use_drill_sideways = true;
        self
    }
}

/// Default fuzzy distance.
fn default_max_edits() -> u8 {
    1
}

/// Transpositions count as one edit by default.
fn default_transpositions() -> bool {
    true
}

/// Range bounds are inclusive by default.
fn default_inclusive() -> bool {
    true
}

/// Score of a constant-score query when not given.
fn default_constant_score() -> f32 {
    1.0
}

impl QueryDef {
    /// Exact term query.
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Analyzed match query with the `or` operator.
    pub fn matching(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Match {
            field: field.into(),
            text: text.into(),
            operator: MatchOperator::Or,
        }
    }

    /// Inclusive long range.
    pub fn long_range(field: impl Into<String>, lower: Option<i64>, upper: Option<i64>) -> Self {
        Self::LongRange {
            field: field.into(),
            lower,
            upper,
            include_lower: true,
            include_upper: true,
        }
    }

    /// Double range with explicit bound inclusion.
    pub fn double_range(
        field: impl Into<String>,
        lower: Option<f64>,
        upper: Option<f64>,
        include_lower: bool,
        include_upper: bool,
    ) -> Self {
        Self::DoubleRange {
            field: field.into(),
            lower,
            upper,
            include_lower,
            include_upper,
        }
    }

    /// Conjunction of clauses.
    pub fn all_of(clauses: Vec<Self>) -> Self {
        Self::Bool(BoolQuery {
            must: clauses,
            ..BoolQuery::default()
        })
    }

    /// Disjunction of clauses.
    pub fn any_of(clauses: Vec<Self>) -> Self {
        Self::Bool(BoolQuery {
            should: clauses,
            minimum_should_match: 1,
            ..BoolQuery::default()
        })
    }

    /// Wraps the query with a score multiplier.
    pub fn boosted(self, boost: f32) -> Self {
        Self::Boost {
            query: Box::new(self),
            boost,
        }
    }

    /// Returns the drill-down node if this is one.
    pub fn as_drill_down(&self) -> Option<&DrillDownQuery> {
        match self {
            Self::DrillDown(drill) => Some(drill),
            _ => None,
        }
    }

    /// Checks the structural invariants of the tree.
    pub fn validate(&self) -> Result<(), QueryError> {
        match self {
            Self::MatchAll
            | Self::Term { .. }
            | Self::Wildcard { .. }
            | Self::Prefix { .. }
            | Self::Phrase { .. }
            | Self::LongExact { .. }
            | Self::Match { .. }
            | Self::LongSet { .. }
            | Self::Terms { .. } => Ok(()),
            Self::QueryString { query, .. } => {
                if query.trim().is_empty() {
                    Err(QueryError::invalid("query string is empty"))
                } else {
                    Ok(())
                }
            }
            Self::Fuzzy { max_edits, .. } => {
                if *max_edits > 2 {
                    Err(QueryError::invalid(format!(
                        "fuzzy max_edits must be at most 2, got {max_edits}"
                    )))
                } else {
                    Ok(())
                }
            }
            Self::LongRange { .. } => Ok(()),
            Self::DoubleRange { lower, upper, .. } => {
                if lower.is_some_and(f64::is_nan) || upper.is_some_and(f64::is_nan) {
                    Err(QueryError::invalid("double range bound is NaN"))
                } else {
                    Ok(())
                }
            }
            Self::IntMultiRange {
                field,
                lower,
                upper,
            } => check_ranges(field, lower.len(), upper.len()),
            Self::LongMultiRange {
                field,
                lower,
                upper,
            } => check_ranges(field, lower.len(), upper.len()),
            Self::DoubleMultiRange {
                field,
                lower,
                upper,
            } => check_ranges(field, lower.len(), upper.len()),
            Self::Bool(bool_query) => {
                let positive = bool_query.must.len() + bool_query.filter.len();
                if positive + bool_query.should.len() == 0 {
                    return Err(QueryError::invalid("bool query has no positive clause"));
                }
                if bool_query.minimum_should_match > bool_query.should.len() {
                    return Err(QueryError::invalid(format!(
                        "minimum_should_match {} exceeds {} should clauses",
                        bool_query.minimum_should_match,
                        bool_query.should.len()
                    )));
                }
                bool_query
                    .must
                    .iter()
                    .chain(&bool_query.should)
                    .chain(&bool_query.must_not)
                    .chain(&bool_query.filter)
                    .try_for_each(Self::validate)
            }
            Self::Join(join) => {
                if join.from_index.split_once('/').is_none() {
                    return Err(QueryError::invalid(format!(
                        "join from_index '{}' is not of the form schema/index",
                        join.from_index
                    )));
                }
                join.query.validate()
            }
            Self::DrillDown(drill) => {
                for (dimension, paths) in &drill.dimensions {
                    if paths.is_empty() || paths.iter().any(Vec::is_empty) {
                        return Err(QueryError::invalid(format!(
                            "drill-down dimension '{dimension}' has an empty path"
                        )));
                    }
                }
                drill.base.as_deref().map_or(Ok(()), Self::validate)
            }
            Self::Boost { query, boost } => {
                if !boost.is_finite() || *boost < 0.0 {
                    return Err(QueryError::invalid(format!("invalid boost {boost}")));
                }
                query.validate()
            }
            Self::ConstantScore { query, .. } => query.validate(),
        }
    }
}

/// Multi-range bound arrays must pair up.
fn check_ranges(field: &str, lower: usize, upper: usize) -> Result<(), QueryError> {
    if lower == upper {
        Ok(())
    } else {
        Err(QueryError::RangeLengthMismatch {
            field: field.to_string(),
            lower,
            upper,
        })
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_tagged_json() {
        let query: QueryDef = serde_json::from_value(json!({
            "type": "bool",
            "must": [{"type": "term", "field": "cat", "value": "news"}],
            "filter": [{"type": "long_range", "field": "price", "lower": 10}]
        }))
        .unwrap();
        let QueryDef::Bool(bool_query) = &query else {
            panic!("expected bool, got {query:?}");
        };
        assert_eq!(bool_query.must[0], QueryDef::term("cat", "news"));
        assert_eq!(
            bool_query.filter[0],
            QueryDef::long_range("price", Some(10), None)
        );
    }

    #[test]
    fn multi_range_lengths_must_match() {
        let query = QueryDef::LongMultiRange {
            field: "price".into(),
            lower: vec![1, 5],
            upper: vec![3],
        };
        assert!(matches!(
            query.validate(),
            Err(QueryError::RangeLengthMismatch {
                lower: 2,
                upper: 1,
                ..
            })
        ));
    }

    #[test]
    fn nested_errors_surface() {
        let query = QueryDef::all_of(vec![
            QueryDef::MatchAll,
            QueryDef::Fuzzy {
                field: "title".into(),
                value: "x".into(),
                max_edits: 3,
                transpositions: true,
            },
        ]);
        assert!(query.validate().is_err());
    }

    #[test]
    fn empty_bool_is_invalid() {
        let query = QueryDef::Bool(BoolQuery {
            must_not: vec![QueryDef::MatchAll],
            ..BoolQuery::default()
        });
        assert!(query.validate().is_err());
    }

    #[test]
    fn drill_down_builder_groups_paths() {
        let drill = DrillDownQuery::new(QueryDef::MatchAll)
            .add("cat", ["news"])
            .add("cat", ["science"])
            .add("year", ["2024"])
            .sideways();
        assert_eq!(drill.dimensions.len(), 2);
        assert_eq!(drill.dimensions["cat"].len(), 2);
        assert!(drill.use_drill_sideways);
        assert!(QueryDef::DrillDown(drill).validate().is_ok());
    }

    #[test]
    fn join_requires_qualified_index() {
        let query = QueryDef::Join(JoinQuery {
            from_index: "products".into(),
            from_field: "id".into(),
            to_field: "product_id".into(),
            query: Box::new(QueryDef::MatchAll),
        });
        assert!(query.validate().is_err());
    }
}
