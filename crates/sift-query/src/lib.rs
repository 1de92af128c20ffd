//! Request model for sift search.
//!
//! A [`QueryDefinition`] is everything a caller sends to run one search: the query tree, the
//! paging window, sort fields, facet dimensions, named collectors, highlighters and the stored
//! fields to return. The model is JSON-shaped (serde) and insertion-ordered where the response
//! has to preserve the caller's order (facet dimensions, collectors, sorts).
//!
//! # Example
//!
//! ```
//! use sift_query::{FacetDefinition, QueryDef, QueryDefinition, SortDirection};
//!
//! let request = QueryDefinition::of(QueryDef::term("category", "news"))
//!     .rows(20)
//!     .sort("price", SortDirection::Descending)
//!     .facet("category", FacetDefinition::top(5))
//!     .collector("cheapest", "min_double", vec![serde_json::json!("price")]);
//! assert!(request.validate().is_ok());
//! ```

#![warn(missing_docs)]

mod definition;
mod error;
mod facet;
mod query;
mod sort;

pub use definition::{CollectorDefinition, HighlighterDefinition, QueryDefinition};
pub use error::QueryError;
pub use facet::FacetDefinition;
pub use query::{BoolQuery, DrillDownQuery, JoinQuery, MatchOperator, QueryDef};
pub use sort::{DOC_FIELD, SCORE_FIELD, SortDirection};
