//! Top-K hit collection with score or doc-value sorting.
//!
//! Each segment keeps a bounded buffer of its best hits. The buffer grows to twice the limit
//! before it is partitioned and truncated, so most documents cost one comparison. Segment
//! results are merged by the same comparator with ties broken by `(segment, doc)`, which makes
//! the final order independent of how segments were scheduled.

use std::{cmp::Ordering, io};

use serde::Serialize;
use sift_query::{SCORE_FIELD, SortDirection};
use tantivy::{
    DocId, Score, SegmentOrdinal, SegmentReader, TantivyError,
    collector::{Collector, SegmentCollector},
    columnar::{Column, StrColumn},
};

/// Where a sort value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortSource {
    /// Relevance score.
    Score,
    /// Index order.
    Doc,
    /// Long doc values.
    Long,
    /// Double doc values.
    Double,
    /// String doc values, compared by term.
    Str,
}

/// One resolved sort criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Field name, or `$score`/`$doc`.
    pub field: String,
    /// Direction and missing-value placement.
    pub direction: SortDirection,
    /// Value source.
    pub source: SortSource,
}

impl SortKey {
    /// Creates a sort key.
    pub fn new(field: impl Into<String>, direction: SortDirection, source: SortSource) -> Self {
        Self {
            field: field.into(),
            direction,
            source,
        }
    }

    /// Relevance, best first.
    pub fn score() -> Self {
        Self::new(SCORE_FIELD, SortDirection::Descending, SortSource::Score)
    }
}

/// The sort value of a hit for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SortValue {
    /// Relevance score.
    Score(Score),
    /// Global doc id.
    Doc(u64),
    /// Long value, if the document has one.
    Long(Option<i64>),
    /// Double value, if the document has one.
    Double(Option<f64>),
    /// Segment-local term ordinal; only valid inside one segment.
    #[serde(skip)]
    Ord(Option<u64>),
    /// String value, if the document has one.
    Str(Option<String>),
}

impl SortValue {
    /// Compares two values of the same key in natural ascending order.
    ///
    /// Returns `None` when one side is missing, leaving placement to the direction.
    fn natural_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Score(a), Self::Score(b)) => Some(a.total_cmp(b)),
            (Self::Doc(a), Self::Doc(b)) => Some(a.cmp(b)),
            (Self::Long(Some(a)), Self::Long(Some(b))) => Some(a.cmp(b)),
            (Self::Double(Some(a)), Self::Double(Some(b))) => Some(a.total_cmp(b)),
            (Self::Ord(Some(a)), Self::Ord(Some(b))) => Some(a.cmp(b)),
            (Self::Str(Some(a)), Self::Str(Some(b))) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Returns true if the document has no value for the key.
    fn is_missing(&self) -> bool {
        matches!(
            self,
            Self::Long(None) | Self::Double(None) | Self::Ord(None) | Self::Str(None)
        )
    }
}

/// A collected hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredHit {
    /// Segment holding the document.
    #[serde(skip)]
    pub segment_ord: SegmentOrdinal,
    /// Doc id inside the segment.
    #[serde(skip)]
    pub doc: DocId,
    /// Doc id across the whole searcher.
    pub global_doc: u64,
    /// Relevance score, zero when scoring is disabled.
    pub score: Score,
    /// One value per sort key.
    pub values: Vec<SortValue>,
}

/// Orders two hits: `Less` means `a` ranks before `b`.
pub fn compare_hits(keys: &[SortKey], a: &ScoredHit, b: &ScoredHit) -> Ordering {
    for (key, (left, right)) in keys.iter().zip(a.values.iter().zip(&b.values)) {
        let ordering = match left.natural_cmp(right) {
            Some(ordering) if key.direction.is_descending() => ordering.reverse(),
            Some(ordering) => ordering,
            None => match (left.is_missing(), right.is_missing()) {
                (true, true) => Ordering::Equal,
                (true, false) if key.direction.missing_first() => Ordering::Less,
                (true, false) => Ordering::Greater,
                (false, true) if key.direction.missing_first() => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => Ordering::Equal,
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    (a.segment_ord, a.doc).cmp(&(b.segment_ord, b.doc))
}

/// Collected hits and the number of matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopHits {
    /// Number of matching documents.
    pub total: u64,
    /// Best score among matches.
    pub max_score: Option<Score>,
    /// The best hits, in rank order.
    pub hits: Vec<ScoredHit>,
}

/// Collects the top `limit` hits of a search.
#[derive(Debug, Clone)]
pub struct TopHitsCollector {
    /// Sort criteria; relevance when empty.
    keys: Vec<SortKey>,
    /// Number of hits to keep.
    limit: usize,
    /// Global doc id of the first document of each segment.
    doc_bases: Vec<u64>,
    /// Whether scores must be computed.
    scoring: bool,
}

impl TopHitsCollector {
    /// Creates a collector for `limit` hits.
    ///
    /// `doc_bases` holds the global id of each segment's first document.
    pub fn new(keys: Vec<SortKey>, limit: usize, doc_bases: Vec<u64>, scoring: bool) -> Self {
        let keys = if keys.is_empty() {
            vec![SortKey::score()]
        } else {
            keys
        };
        Self {
            keys,
            limit,
            doc_bases,
            scoring,
        }
    }

    /// Sort criteria in use.
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Merges already harvested segment results.
    pub fn merge(&self, parts: Vec<TopHits>) -> TopHits {
        let mut merged = TopHits::default();
        for part in parts {
            merged.total += part.total;
            merged.max_score = match (merged.max_score, part.max_score) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            merged.hits.extend(part.hits);
        }
        merged
            .hits
            .sort_unstable_by(|a, b| compare_hits(&self.keys, a, b));
        merged.hits.truncate(self.limit);
        merged
    }
}

/// Doc-value column backing one sort key in a segment.
enum KeyColumn {
    /// Relevance score.
    Score,
    /// Index order.
    Doc,
    /// Long values.
    Long(Option<Column<i64>>),
    /// Double values.
    Double(Option<Column<f64>>),
    /// String term ordinals.
    Str(Option<StrColumn>),
}

impl KeyColumn {
    /// Opens the column for a key.
    fn open(key: &SortKey, reader: &SegmentReader) -> tantivy::Result<Self> {
        let fast_fields = reader.fast_fields();
        Ok(match key.source {
            SortSource::Score => Self::Score,
            SortSource::Doc => Self::Doc,
            SortSource::Long => Self::Long(fast_fields.column_opt::<i64>(&key.field)?),
            SortSource::Double => Self::Double(fast_fields.column_opt::<f64>(&key.field)?),
            SortSource::Str => Self::Str(fast_fields.str(&key.field)?),
        })
    }

    /// Reads the sort value of a document.
    fn value(&self, doc: DocId, global_doc: u64, score: Score) -> SortValue {
        match self {
            Self::Score => SortValue::Score(score),
            Self::Doc => SortValue::Doc(global_doc),
            Self::Long(column) => SortValue::Long(column.as_ref().and_then(|c| c.first(doc))),
            Self::Double(column) => {
                SortValue::Double(column.as_ref().and_then(|c| c.first(doc)))
            }
            Self::Str(column) => {
                SortValue::Ord(column.as_ref().and_then(|c| c.term_ords(doc).next()))
            }
        }
    }
}

/// Per-segment part of [`TopHitsCollector`].
pub struct TopHitsSegmentCollector {
    /// Sort criteria.
    keys: Vec<SortKey>,
    /// Columns parallel to `keys`.
    columns: Vec<KeyColumn>,
    /// Number of hits to keep.
    limit: usize,
    /// Segment being collected.
    segment_ord: SegmentOrdinal,
    /// Global id of the segment's first document.
    doc_base: u64,
    /// Candidate hits, at most twice the limit.
    buffer: Vec<ScoredHit>,
    /// Matches seen.
    total: u64,
    /// Best score seen.
    max_score: Option<Score>,
    /// Whether scores are meaningful.
    scoring: bool,
}

impl TopHitsSegmentCollector {
    /// Shrinks the buffer back to the limit.
    fn prune(&mut self) {
        let keys = &self.keys;
        if self.limit == 0 {
            self.buffer.clear();
            return;
        }
        if self.buffer.len() > self.limit {
            self.buffer
                .select_nth_unstable_by(self.limit - 1, |a, b| compare_hits(keys, a, b));
            self.buffer.truncate(self.limit);
        }
    }

    /// Sorts the kept hits and turns term ordinals into strings.
    fn finish(mut self) -> io::Result<TopHits> {
        self.prune();
        let keys = &self.keys;
        self.buffer.sort_unstable_by(|a, b| compare_hits(keys, a, b));
        let mut term = String::new();
        for hit in &mut self.buffer {
            for (value, column) in hit.values.iter_mut().zip(&self.columns) {
                if let SortValue::Ord(ord) = *value {
                    let resolved = match (ord, column) {
                        (Some(ord), KeyColumn::Str(Some(column))) => {
                            term.clear();
                            column.ord_to_str(ord, &mut term)?;
                            Some(term.clone())
                        }
                        _ => None,
                    };
                    *value = SortValue::Str(resolved);
                }
            }
        }
        Ok(TopHits {
            total: self.total,
            max_score: self.max_score.filter(|_| self.scoring),
            hits: self.buffer,
        })
    }
}

impl Collector for TopHitsCollector {
    type Fruit = TopHits;
    type Child = TopHitsSegmentCollector;

    fn for_segment(
        &self,
        segment_ord: SegmentOrdinal,
        reader: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        let columns = self
            .keys
            .iter()
            .map(|key| KeyColumn::open(key, reader))
            .collect::<tantivy::Result<Vec<_>>>()?;
        let doc_base = self
            .doc_bases
            .get(segment_ord as usize)
            .copied()
            .unwrap_or_default();
        Ok(TopHitsSegmentCollector {
            keys: self.keys.clone(),
            columns,
            limit: self.limit,
            segment_ord,
            doc_base,
            buffer: Vec::with_capacity(self.limit.min(1024) * 2),
            total: 0,
            max_score: None,
            scoring: self.scoring,
        })
    }

    fn requires_scoring(&self) -> bool {
        self.scoring
    }

    fn merge_fruits(
        &self,
        segment_fruits: Vec<tantivy::Result<TopHits>>,
    ) -> tantivy::Result<Self::Fruit> {
        let parts = segment_fruits
            .into_iter()
            .collect::<tantivy::Result<Vec<_>>>()?;
        Ok(self.merge(parts))
    }
}

impl SegmentCollector for TopHitsSegmentCollector {
    type Fruit = tantivy::Result<TopHits>;

    fn collect(&mut self, doc: DocId, score: Score) {
        self.total += 1;
        self.max_score = Some(self.max_score.map_or(score, |best| best.max(score)));
        if self.limit == 0 {
            return;
        }
        let global_doc = self.doc_base + u64::from(doc);
        let values = self
            .columns
            .iter()
            .map(|column| column.value(doc, global_doc, score))
            .collect();
        self.buffer.push(ScoredHit {
            segment_ord: self.segment_ord,
            doc,
            global_doc,
            score,
            values,
        });
        if self.buffer.len() >= self.limit.saturating_mul(2) {
            self.prune();
        }
    }

    fn harvest(self) -> Self::Fruit {
        self.finish().map_err(TantivyError::from)
    }
}
