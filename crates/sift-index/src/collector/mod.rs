//! Collectors run during the single collection pass of a search.
//!
//! Named collectors come in two kinds. A [`ParallelCollector`] is instantiated once per
//! segment (as a [`PartialCollector`]) and its partial results are merged, so it can run on
//! the shared segment-parallel executor. A [`ClassicCollector`] must see the whole result set
//! as one ordered stream and forces single-threaded execution. A request may use one kind or
//! the other, never both.

mod builtin;
mod matching;
mod registry;
mod top_hits;

use serde::Serialize;
use tantivy::{
    DocId, Score, SegmentOrdinal, SegmentReader,
    collector::{Collector, SegmentCollector},
};

pub use matching::{MatchingDocs, MatchingDocsCollector, MatchingSegmentCollector, SegmentDocs};
pub use registry::{
    ClassicFactory, CollectorFactory, CollectorRegistry, ParallelFactory, ResolvedCollectors,
    field_argument, optional_usize_argument,
};
pub use top_hits::{ScoredHit, SortKey, SortSource, SortValue, TopHits, TopHitsCollector};

/// Result of a named collector.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CollectorValue {
    /// No document contributed a value.
    Null,
    /// A long aggregate.
    Long(i64),
    /// A double aggregate.
    Double(f64),
    /// A document count.
    Count(u64),
    /// Global document ids.
    DocIds(Vec<u64>),
}

/// A collector that can run per segment and merge.
pub trait ParallelCollector: Send + Sync {
    /// Creates the per-segment part.
    fn for_segment(
        &self,
        segment_ord: SegmentOrdinal,
        reader: &SegmentReader,
    ) -> tantivy::Result<Box<dyn PartialCollector>>;

    /// Merges the partial results of every segment.
    fn merge(&self, partials: Vec<CollectorValue>) -> CollectorValue;

    /// Whether the collector reads scores.
    fn requires_scoring(&self) -> bool {
        false
    }
}

/// The per-segment part of a [`ParallelCollector`].
pub trait PartialCollector: Send {
    /// Receives one matching document of the segment.
    fn collect(&mut self, doc: DocId, score: Score);

    /// Returns the partial result for the segment.
    fn harvest(self: Box<Self>) -> CollectorValue;
}

/// A collector that sees all matching documents as one stream, segment by segment.
pub trait ClassicCollector: Send {
    /// Moves to the next segment. `doc_base` is the global id of the segment's first document.
    fn set_segment(
        &mut self,
        segment_ord: SegmentOrdinal,
        doc_base: u64,
        reader: &SegmentReader,
    ) -> tantivy::Result<()>;

    /// Receives one matching document of the current segment.
    fn collect(&mut self, doc: DocId, score: Score);

    /// Returns the final result.
    fn finish(self: Box<Self>) -> CollectorValue;

    /// Whether the collector reads scores.
    fn requires_scoring(&self) -> bool {
        false
    }
}

/// Runs a list of parallel-capable collectors as one Tantivy collector.
pub struct ParallelCollectors {
    /// Collectors in request order.
    collectors: Vec<Box<dyn ParallelCollector>>,
}

impl ParallelCollectors {
    /// Wraps collectors in request order.
    pub fn new(collectors: Vec<Box<dyn ParallelCollector>>) -> Self {
        Self { collectors }
    }
}

/// Per-segment parts of [`ParallelCollectors`].
pub struct ParallelSegmentCollectors {
    /// Parts in request order.
    partials: Vec<Box<dyn PartialCollector>>,
}

impl Collector for ParallelCollectors {
    type Fruit = Vec<CollectorValue>;
    type Child = ParallelSegmentCollectors;

    fn for_segment(
        &self,
        segment_ord: SegmentOrdinal,
        reader: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        let partials = self
            .collectors
            .iter()
            .map(|collector| collector.for_segment(segment_ord, reader))
            .collect::<tantivy::Result<Vec<_>>>()?;
        Ok(ParallelSegmentCollectors { partials })
    }

    fn requires_scoring(&self) -> bool {
        self.collectors
            .iter()
            .any(|collector| collector.requires_scoring())
    }

    fn merge_fruits(&self, segment_fruits: Vec<Vec<CollectorValue>>) -> tantivy::Result<Self::Fruit> {
        let mut per_collector: Vec<Vec<CollectorValue>> = self
            .collectors
            .iter()
            .map(|_| Vec::with_capacity(segment_fruits.len()))
            .collect();
        for fruit in segment_fruits {
            for (slot, value) in per_collector.iter_mut().zip(fruit) {
                slot.push(value);
            }
        }
        Ok(self
            .collectors
            .iter()
            .zip(per_collector)
            .map(|(collector, partials)| collector.merge(partials))
            .collect())
    }
}

impl SegmentCollector for ParallelSegmentCollectors {
    type Fruit = Vec<CollectorValue>;

    fn collect(&mut self, doc: DocId, score: Score) {
        for partial in &mut self.partials {
            partial.collect(doc, score);
        }
    }

    fn harvest(self) -> Self::Fruit {
        self.partials
            .into_iter()
            .map(PartialCollector::harvest)
            .collect()
    }
}
