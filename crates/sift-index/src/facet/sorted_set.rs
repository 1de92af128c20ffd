//! Sorted-set facet counting.
//!
//! Labels live in the `$facets` string doc values as `dim<US>label`. Each segment has its own
//! term dictionary, so a global ordinal space is built once per reader generation: the union
//! of all segment dictionaries in byte order, with a local-to-global map per segment. Since
//! labels sort by dimension first, the labels of a dimension form one contiguous range.

use std::{collections::BTreeSet, ops::Range};

use tantivy::{Searcher, SegmentOrdinal};

use super::{FacetNumber, FacetResult, top_labels};
use crate::{
    collector::MatchingDocs,
    schema::{PATH_DELIMITER, encode_path, reserved},
};

/// Global ordinal space of the sorted-set labels of one reader generation.
#[derive(Debug, Clone, Default)]
pub struct SortedSetState {
    /// Encoded labels in byte order; the index is the global ordinal.
    labels: Vec<String>,
    /// Per segment, global ordinal of each local ordinal.
    segment_maps: Vec<Vec<u32>>,
}

impl SortedSetState {
    /// Builds the global ordinals of every segment of `searcher`.
    pub fn build(searcher: &Searcher) -> tantivy::Result<Self> {
        let mut dictionaries = Vec::with_capacity(searcher.segment_readers().len());
        let mut all = BTreeSet::new();
        let mut term = String::new();
        for reader in searcher.segment_readers() {
            let mut local = Vec::new();
            if let Some(column) = reader.fast_fields().str(reserved::FACETS)? {
                for ord in 0..column.num_terms() as u64 {
                    term.clear();
                    if column.ord_to_str(ord, &mut term)? {
                        local.push(term.clone());
                    }
                }
            }
            all.extend(local.iter().cloned());
            dictionaries.push(local);
        }
        let labels: Vec<String> = all.into_iter().collect();
        let segment_maps = dictionaries
            .iter()
            .map(|local| {
                local
                    .iter()
                    .filter_map(|label| labels.binary_search(label).ok())
                    .map(|global| global as u32)
                    .collect()
            })
            .collect();
        Ok(Self {
            labels,
            segment_maps,
        })
    }

    /// Number of distinct labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns true if no document has a sorted-set label.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Global ordinals of the labels under `dimension/path`, `None` when there are none.
    pub fn ord_range<S: AsRef<str>>(&self, dimension: &str, path: &[S]) -> Option<Range<usize>> {
        let mut prefix = encode_path(dimension, path);
        prefix.push(PATH_DELIMITER);
        let start = self.labels.partition_point(|label| label.as_str() < prefix.as_str());
        let len = self.labels[start..]
            .iter()
            .take_while(|label| label.starts_with(&prefix))
            .count();
        (len > 0).then_some(start..start + len)
    }

    /// Counts the labels of the matching documents, indexed by global ordinal.
    pub fn count(&self, searcher: &Searcher, matching: &MatchingDocs) -> tantivy::Result<Vec<u64>> {
        let mut counts = vec![0u64; self.labels.len()];
        for segment in &matching.segments {
            let Some(map) = self.segment_map(segment.segment_ord) else {
                continue;
            };
            let reader = searcher.segment_reader(segment.segment_ord);
            let Some(column) = reader.fast_fields().str(reserved::FACETS)? else {
                continue;
            };
            for &doc in &segment.docs {
                for ord in column.term_ords(doc) {
                    if let Some(&global) = map.get(ord as usize) {
                        counts[global as usize] += 1;
                    }
                }
            }
        }
        Ok(counts)
    }

    /// Local-to-global map of a segment.
    fn segment_map(&self, segment_ord: SegmentOrdinal) -> Option<&Vec<u32>> {
        self.segment_maps
            .get(segment_ord as usize)
            .filter(|map| !map.is_empty())
    }

    /// The `top` direct children of `dimension/path` by count.
    ///
    /// Returns `None` when the dimension has no labels in this reader generation.
    pub fn top_children<S: AsRef<str>>(
        &self,
        counts: &[u64],
        dimension: &str,
        path: &[S],
        top: usize,
    ) -> Option<FacetResult> {
        let range = self.ord_range(dimension, path)?;
        let prefix_len = encode_path(dimension, path).len() + PATH_DELIMITER.len_utf8();
        let children = range.filter_map(|global| {
            let label = &self.labels[global][prefix_len..];
            (!label.contains(PATH_DELIMITER)).then(|| {
                let count = counts.get(global).copied().unwrap_or_default();
                (label.to_string(), FacetNumber::Count(count))
            })
        });
        Some(top_labels(children, top))
    }
}
