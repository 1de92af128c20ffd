//! Classification of requested dimensions and counting against one set of matches.

use std::collections::HashMap;

use indexmap::IndexMap;
use sift_query::{FacetDefinition, QueryDef};
use tantivy::{
    collector::Count,
    query::{BooleanQuery, Query},
};
use tracing::debug;

use super::{FacetBackend, FacetNumber, FacetResult, TaxonomyCounts};
use crate::{
    IndexError, collector::MatchingDocs, schema::FieldMap, snapshot::IndexSnapshot,
};

/// Where the labels of a dimension come from.
pub enum DimensionSource {
    /// Counted from the storage of a facet backend.
    Index(FacetBackend),
    /// Label to compiled sub-query.
    Queries(Vec<(String, Box<dyn Query>)>),
}

/// One requested dimension, ready to count.
pub struct DimensionRequest {
    /// Dimension name.
    pub dimension: String,
    /// Parent path of the returned labels.
    pub path: Vec<String>,
    /// Labels returned.
    pub top: usize,
    /// Label source.
    pub source: DimensionSource,
}

impl DimensionRequest {
    /// Backend of an index-backed dimension.
    pub fn backend(&self) -> Option<FacetBackend> {
        match self.source {
            DimensionSource::Index(backend) => Some(backend),
            DimensionSource::Queries(_) => None,
        }
    }
}

/// Resolves every requested dimension to its source, in request order.
///
/// Query-backed dimensions have their sub-queries compiled here, so a malformed sub-query
/// fails the request before collection. Index-backed dimensions without a facet field are
/// dropped: they produce no result rather than an error.
pub fn classify_dimensions<F>(
    fields: &FieldMap,
    facets: &IndexMap<String, FacetDefinition>,
    default_top: usize,
    mut compile: F,
) -> Result<Vec<DimensionRequest>, IndexError>
where
    F: FnMut(&QueryDef) -> Result<Box<dyn Query>, IndexError>,
{
    let mut requests = Vec::with_capacity(facets.len());
    for (dimension, definition) in facets {
        let source = if definition.is_query_backed() {
            let queries = definition
                .queries
                .iter()
                .map(|(label, query)| Ok((label.clone(), compile(query)?)))
                .collect::<Result<Vec<_>, IndexError>>()?;
            DimensionSource::Queries(queries)
        } else if let Some(backend) = fields.facet_backend(dimension) {
            debug!(dimension = %dimension, ?backend, "facet backend selected");
            DimensionSource::Index(backend)
        } else {
            debug!(dimension = %dimension, "no facet backend, dimension skipped");
            continue;
        };
        requests.push(DimensionRequest {
            dimension: dimension.clone(),
            path: definition.path.clone(),
            top: definition.top_or(default_top),
            source,
        });
    }
    Ok(requests)
}

/// Counts dimensions against the matches of one collection pass.
pub struct FacetCounter<'a> {
    /// Reader generation being searched.
    snapshot: &'a IndexSnapshot,
}

impl<'a> FacetCounter<'a> {
    /// Creates a counter over a reader generation.
    pub fn new(snapshot: &'a IndexSnapshot) -> Self {
        Self { snapshot }
    }

    /// Counts `requests` over `matching`, the documents matched by `query`.
    ///
    /// Accumulators are built only for backends used by at least one request. Dimensions
    /// without data are left out of the result.
    pub fn count(
        &self,
        requests: &[&DimensionRequest],
        matching: &MatchingDocs,
        query: &dyn Query,
    ) -> Result<IndexMap<String, FacetResult>, IndexError> {
        let searcher = self.snapshot.searcher();

        let sorted_set = if requests
            .iter()
            .any(|request| request.backend() == Some(FacetBackend::SortedSet))
        {
            let state = self.snapshot.sorted_set_state()?;
            let counts = state
                .count(searcher, matching)
                .map_err(|e| IndexError::search(&e))?;
            Some((state, counts))
        } else {
            None
        };

        let mut taxonomy_counts = HashMap::new();
        if let Some(taxonomy) = self.snapshot.taxonomy() {
            for backend in requests.iter().filter_map(|request| request.backend()) {
                if backend.uses_taxonomy() && !taxonomy_counts.contains_key(&backend) {
                    let counts = TaxonomyCounts::count(backend, taxonomy, searcher, matching)
                        .map_err(|e| IndexError::search(&e))?;
                    taxonomy_counts.insert(backend, counts);
                }
            }
        }

        let mut results = IndexMap::with_capacity(requests.len());
        for request in requests {
            let result = match &request.source {
                DimensionSource::Queries(queries) => Some(self.count_queries(query, queries)?),
                DimensionSource::Index(FacetBackend::SortedSet) => {
                    sorted_set.as_ref().and_then(|(state, counts)| {
                        state.top_children(counts, &request.dimension, &request.path, request.top)
                    })
                }
                DimensionSource::Index(backend) => {
                    match (self.snapshot.taxonomy(), taxonomy_counts.get(backend)) {
                        (Some(taxonomy), Some(counts)) => counts.top_children(
                            taxonomy,
                            &request.dimension,
                            &request.path,
                            request.top,
                        ),
                        _ => None,
                    }
                }
            };
            match result {
                Some(result) => {
                    results.insert(request.dimension.clone(), result);
                }
                None => debug!(dimension = %request.dimension, "no facet data for dimension"),
            }
        }
        Ok(results)
    }

    /// Counts each sub-query intersected with the main query, in definition order.
    fn count_queries(
        &self,
        query: &dyn Query,
        queries: &[(String, Box<dyn Query>)],
    ) -> Result<FacetResult, IndexError> {
        let searcher = self.snapshot.searcher();
        let mut result = FacetResult::with_capacity(queries.len());
        for (label, sub_query) in queries {
            let filtered = BooleanQuery::intersection(vec![query.box_clone(), sub_query.box_clone()]);
            let count = searcher
                .search(&filtered, &Count)
                .map_err(|e| IndexError::search(&e))?;
            result.insert(label.clone(), FacetNumber::Count(count as u64));
        }
        Ok(result)
    }
}
