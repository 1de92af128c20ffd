//! The collection pass and the request pipeline around it.

use std::mem;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sift_query::{QueryDef, QueryDefinition};
use tantivy::{
    DocAddress, SegmentOrdinal,
    collector::{Collector, SegmentCollector},
    query::{EnableScoring, Query},
};
use tracing::debug;

use super::{
    QueryContext, TimeTracker,
    plan::QueryExecutionPlan,
    response::{SearchResponse, assemble_hits},
};
use crate::{
    IndexError,
    collector::{
        ClassicCollector, CollectorValue, MatchingDocs, MatchingDocsCollector,
        MatchingSegmentCollector, ParallelCollector, ParallelCollectors, ResolvedCollectors,
        TopHits, TopHitsCollector,
    },
    facet::{DimensionRequest, FacetCounter, FacetResult, drill_down_query},
};

/// Output of one collection pass.
struct CollectionPass {
    /// Top hits and total count.
    top_hits: TopHits,
    /// Named collector results, in request order.
    collectors: IndexMap<String, CollectorValue>,
    /// Matching documents, empty unless recorded.
    matching: MatchingDocs,
}

/// Runs a search request.
pub fn search(
    context: &QueryContext<'_>,
    definition: &QueryDefinition,
) -> Result<SearchResponse, IndexError> {
    let mut timer = TimeTracker::new();
    let mut plan = QueryExecutionPlan::build(context, definition)?;
    timer.next("query_plan");

    let collectors = mem::replace(&mut plan.collectors, ResolvedCollectors::None);
    let top = TopHitsCollector::new(
        plan.sort_keys.clone(),
        plan.top_limit(),
        context.snapshot.doc_bases(),
        plan.need_score,
    );
    let pass = collect(
        context,
        &*plan.query,
        top,
        collectors,
        plan.needs_matching_docs(),
    )?;
    timer.next("search_query");

    let facets = if plan.facets.is_empty() {
        IndexMap::new()
    } else {
        let facets = count_facets(context, &plan, &pass.matching)?;
        timer.next("facet_count");
        facets
    };

    let total_hits = pass.top_hits.total;
    let end = plan
        .end
        .min(usize::try_from(total_hits).unwrap_or(usize::MAX));
    let start = plan.start.min(end);
    let page = pass
        .top_hits
        .hits
        .into_iter()
        .skip(start)
        .take(end - start)
        .collect();
    let hits = assemble_hits(context, &plan, page)?;
    timer.next("documents");

    Ok(SearchResponse {
        total_hits,
        num_docs: context.snapshot.num_docs(),
        start,
        end,
        max_score: pass.top_hits.max_score,
        hits,
        facets,
        collectors: pass.collectors,
        timings: timer.finish(),
        query: plan.query_debug,
    })
}

/// Explains the score of a document for a query.
pub fn explain(
    context: &QueryContext<'_>,
    query: &QueryDef,
    global_doc: u64,
) -> Result<JsonValue, IndexError> {
    query.validate()?;
    let compiled = context.compiler().compile(query)?;
    let (segment_ord, doc) = context.snapshot.locate(global_doc).ok_or_else(|| {
        IndexError::InvalidQuery(format!("document {global_doc} does not exist"))
    })?;
    let explanation = compiled
        .explain(context.snapshot.searcher(), DocAddress::new(segment_ord, doc))
        .map_err(|e| IndexError::search(&e))?;
    Ok(serde_json::to_value(&explanation)?)
}

/// Runs one collection pass, segment-parallel unless the collectors are classic.
fn collect(
    context: &QueryContext<'_>,
    query: &dyn Query,
    top: TopHitsCollector,
    collectors: ResolvedCollectors,
    record_matches: bool,
) -> Result<CollectionPass, IndexError> {
    match collectors {
        ResolvedCollectors::None => collect_parallel(context, query, top, Vec::new(), record_matches),
        ResolvedCollectors::Parallel(collectors) => {
            collect_parallel(context, query, top, collectors, record_matches)
        }
        ResolvedCollectors::Classic(collectors) => {
            collect_classic(context, query, &top, collectors, record_matches)
        }
    }
}

/// Collects every segment as an independent task on the shared executor and merges.
fn collect_parallel(
    context: &QueryContext<'_>,
    query: &dyn Query,
    top: TopHitsCollector,
    collectors: Vec<(String, Box<dyn ParallelCollector>)>,
    record_matches: bool,
) -> Result<CollectionPass, IndexError> {
    let searcher = context.snapshot.searcher();
    let (names, collectors): (Vec<_>, Vec<_>) = collectors.into_iter().unzip();
    let collector = (
        top,
        ParallelCollectors::new(collectors),
        MatchingDocsCollector::new(record_matches),
    );
    let scoring = if collector.requires_scoring() {
        EnableScoring::enabled_from_searcher(searcher)
    } else {
        EnableScoring::disabled_from_searcher(searcher)
    };
    debug!(
        mode = "parallel",
        segments = searcher.segment_readers().len(),
        collectors = names.len(),
        "collecting"
    );
    let (top_hits, values, matching) = searcher
        .search_with_executor(query, &collector, &context.executor, scoring)
        .map_err(|e| IndexError::search(&e))?;
    Ok(CollectionPass {
        top_hits,
        collectors: names.into_iter().zip(values).collect(),
        matching,
    })
}

/// Collects the whole result set as one stream on the calling thread.
fn collect_classic(
    context: &QueryContext<'_>,
    query: &dyn Query,
    top: &TopHitsCollector,
    mut collectors: Vec<(String, Box<dyn ClassicCollector>)>,
    record_matches: bool,
) -> Result<CollectionPass, IndexError> {
    let searcher = context.snapshot.searcher();
    let needs_score = top.requires_scoring()
        || collectors
            .iter()
            .any(|(_, collector)| collector.requires_scoring());
    let scoring = if needs_score {
        EnableScoring::enabled_from_searcher(searcher)
    } else {
        EnableScoring::disabled_from_searcher(searcher)
    };
    debug!(
        mode = "classic",
        segments = searcher.segment_readers().len(),
        collectors = collectors.len(),
        "collecting"
    );
    let weight = query.weight(scoring).map_err(|e| IndexError::search(&e))?;
    let doc_bases = context.snapshot.doc_bases();

    let mut segment_fruits = Vec::with_capacity(doc_bases.len());
    let mut matching = MatchingDocs::default();
    for (segment_ord, reader) in searcher.segment_readers().iter().enumerate() {
        let segment_ord = segment_ord as SegmentOrdinal;
        let doc_base = doc_bases.get(segment_ord as usize).copied().unwrap_or_default();
        let mut top_segment = top
            .for_segment(segment_ord, reader)
            .map_err(|e| IndexError::search(&e))?;
        let mut matches = MatchingSegmentCollector::new(segment_ord, record_matches);
        for (_, collector) in &mut collectors {
            collector
                .set_segment(segment_ord, doc_base, reader)
                .map_err(|e| IndexError::search(&e))?;
        }
        let alive = reader.alive_bitset();
        weight
            .for_each(reader, &mut |doc, score| {
                if alive.is_some_and(|alive| !alive.is_alive(doc)) {
                    return;
                }
                top_segment.collect(doc, score);
                matches.collect(doc, score);
                for (_, collector) in &mut collectors {
                    collector.collect(doc, score);
                }
            })
            .map_err(|e| IndexError::search(&e))?;
        segment_fruits.push(top_segment.harvest());
        if let Some(segment) = matches.harvest() {
            matching.push(segment);
        }
    }

    let top_hits = top
        .merge_fruits(segment_fruits)
        .map_err(|e| IndexError::search(&e))?;
    Ok(CollectionPass {
        top_hits,
        collectors: collectors
            .into_iter()
            .map(|(name, collector)| (name, collector.finish()))
            .collect(),
        matching,
    })
}

/// Counts the requested dimensions, sideways when the request drills down sideways.
///
/// Sideways, dimensions that are not drilled are counted over the baseline matches. Each
/// drilled dimension gets its own facet-only pass over the drill-down with that dimension's
/// filter removed.
fn count_facets(
    context: &QueryContext<'_>,
    plan: &QueryExecutionPlan,
    matching: &MatchingDocs,
) -> Result<IndexMap<String, FacetResult>, IndexError> {
    let counter = FacetCounter::new(&context.snapshot);
    let Some(sideways) = &plan.sideways else {
        let requests: Vec<&DimensionRequest> = plan.facets.iter().collect();
        return counter.count(&requests, matching, &*plan.query);
    };

    let (drilled, others): (Vec<&DimensionRequest>, Vec<&DimensionRequest>) = plan
        .facets
        .iter()
        .partition(|request| sideways.dimensions.contains_key(&request.dimension));
    let mut results = counter.count(&others, matching, &*plan.query)?;
    for request in drilled {
        let query = drill_down_query(
            context.fields.drilldown,
            sideways.base.box_clone(),
            &sideways.dimensions,
            Some(&request.dimension),
        );
        debug!(dimension = %request.dimension, "sideways pass");
        let top = TopHitsCollector::new(Vec::new(), 0, context.snapshot.doc_bases(), false);
        let pass = collect_parallel(context, &*query, top, Vec::new(), true)?;
        results.extend(counter.count(&[request], &pass.matching, &*query)?);
    }

    Ok(plan
        .facets
        .iter()
        .filter_map(|request| {
            results
                .shift_remove(&request.dimension)
                .map(|result| (request.dimension.clone(), result))
        })
        .collect())
}
