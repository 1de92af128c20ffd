//! Query execution.
//!
//! A search runs in these phases:
//!
//! 1. **Plan**: compile the query tree, resolve sorts, collectors and facet dimensions, and
//!    clamp the paging window. Every configuration error surfaces here, before any document
//!    is scanned. See [`plan`].
//!
//! 2. **Collect**: one collection pass produces top hits, the total count, named collector
//!    results and, when facets are requested, the matching documents. The pass is
//!    segment-parallel unless a classic collector needs the unified stream. See [`execute`].
//!
//! 3. **Facets**: count dimensions over the matches. Drill-sideways requests add one pass per
//!    drilled dimension with that dimension's own filter removed.
//!
//! 4. **Assemble**: load returned fields and highlights for the page of hits. See
//!    [`response`].

mod compile;
mod execute;
mod join;
mod plan;
mod response;
#[cfg(test)]
mod tests;
mod timer;

use std::{collections::BTreeSet, sync::Arc};

pub use compile::QueryCompiler;
pub use execute::{explain, search};
pub use join::collect_string_values;
pub use plan::QueryExecutionPlan;
pub(crate) use response::stored_document;
pub use response::{SearchHit, SearchResponse};
use sift_query::QueryDef;
use tantivy::Executor;
pub use timer::TimeTracker;

use crate::{
    IndexError, analyzer::AnalyzerHandle, collector::CollectorRegistry, schema::FieldMap,
    snapshot::IndexSnapshot,
};

/// Resolves the values a join reads from another index.
pub trait JoinResolver: Send + Sync {
    /// Values of the string field `from_field` in the documents of `from_index` matching
    /// `query`.
    fn join_values(
        &self,
        from_index: &str,
        from_field: &str,
        query: &QueryDef,
    ) -> Result<BTreeSet<String>, IndexError>;
}

/// Index defaults applied to requests that leave a setting out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchDefaults {
    /// Hits per page.
    pub rows: usize,
    /// Labels per facet dimension.
    pub facet_top: usize,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            rows: 10,
            facet_top: 10,
        }
    }
}

/// Everything one request reads, pinned at request start.
///
/// The context is never mutated; an analyzer update or a new reader generation published
/// while the request runs does not affect it.
pub struct QueryContext<'a> {
    /// Reader generation searched by the request.
    pub snapshot: Arc<IndexSnapshot>,
    /// Field definitions bound to the schema.
    pub fields: Arc<FieldMap>,
    /// Index-time analyzers, used where query text must match indexed positions exactly.
    pub index_analyzers: AnalyzerHandle,
    /// Query-time analyzers.
    pub query_analyzers: AnalyzerHandle,
    /// Executor for segment-parallel collection.
    pub executor: Arc<Executor>,
    /// Named collector factories.
    pub registry: Arc<CollectorRegistry>,
    /// Other indexes, for joins.
    pub joins: Option<&'a dyn JoinResolver>,
    /// Index defaults.
    pub defaults: SearchDefaults,
}

impl QueryContext<'_> {
    /// Compiler bound to this context.
    pub fn compiler(&self) -> QueryCompiler<'_> {
        QueryCompiler::new(self)
    }
}
