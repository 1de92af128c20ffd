//! Recording of matching documents for facet counting.

use tantivy::{
    DocId, Score, SegmentOrdinal, SegmentReader,
    collector::{Collector, SegmentCollector},
};

/// Matching documents of one segment, in doc id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentDocs {
    /// Ordinal of the segment in the searcher.
    pub segment_ord: SegmentOrdinal,
    /// Matching doc ids.
    pub docs: Vec<DocId>,
}

/// Matching documents of a whole search, by segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchingDocs {
    /// Segments with at least one match, in ordinal order.
    pub segments: Vec<SegmentDocs>,
}

impl MatchingDocs {
    /// Total number of matching documents.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|segment| segment.docs.len()).sum()
    }

    /// Returns true if nothing matched.
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|segment| segment.docs.is_empty())
    }

    /// Adds the matches of one segment.
    pub fn push(&mut self, segment: SegmentDocs) {
        if !segment.docs.is_empty() {
            self.segments.push(segment);
        }
    }

    /// Keeps segments in ordinal order after a parallel merge.
    fn sort(&mut self) {
        self.segments.sort_by_key(|segment| segment.segment_ord);
    }
}

/// Records matching documents when facets need them.
///
/// When disabled the collector records nothing, so searches without facets pay only for the
/// per-document call.
#[derive(Debug, Clone, Copy)]
pub struct MatchingDocsCollector {
    /// Whether documents are recorded.
    enabled: bool,
}

impl MatchingDocsCollector {
    /// Creates a collector that records only when `enabled` is set.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

/// Per-segment part of [`MatchingDocsCollector`].
pub struct MatchingSegmentCollector {
    /// Matches recorded so far, `None` when disabled.
    docs: Option<SegmentDocs>,
}

impl MatchingSegmentCollector {
    /// Creates a segment recorder.
    pub fn new(segment_ord: SegmentOrdinal, enabled: bool) -> Self {
        Self {
            docs: enabled.then(|| SegmentDocs {
                segment_ord,
                docs: Vec::new(),
            }),
        }
    }
}

impl Collector for MatchingDocsCollector {
    type Fruit = MatchingDocs;
    type Child = MatchingSegmentCollector;

    fn for_segment(
        &self,
        segment_ord: SegmentOrdinal,
        _reader: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        Ok(MatchingSegmentCollector::new(segment_ord, self.enabled))
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(&self, segment_fruits: Vec<Option<SegmentDocs>>) -> tantivy::Result<MatchingDocs> {
        let mut matching = MatchingDocs::default();
        for segment in segment_fruits.into_iter().flatten() {
            matching.push(segment);
        }
        matching.sort();
        Ok(matching)
    }
}

impl SegmentCollector for MatchingSegmentCollector {
    type Fruit = Option<SegmentDocs>;

    fn collect(&mut self, doc: DocId, _score: Score) {
        if let Some(segment) = &mut self.docs {
            segment.docs.push(doc);
        }
    }

    fn harvest(self) -> Self::Fruit {
        self.docs
    }
}
