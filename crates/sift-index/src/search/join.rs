//! Value gathering for cross-index joins.

use std::collections::BTreeSet;

use tantivy::{
    DocId, Score, Searcher, SegmentOrdinal, SegmentReader,
    collector::{Collector, SegmentCollector},
    columnar::StrColumn,
    query::Query,
};

use crate::IndexError;

/// Collects the distinct values of a string doc-value field.
struct StringValuesCollector {
    /// Field read.
    field: String,
}

/// Per-segment part of [`StringValuesCollector`].
struct StringValuesSegment {
    /// Column of the segment, absent when no document has a value.
    column: Option<StrColumn>,
    /// Term ordinals seen.
    ords: BTreeSet<u64>,
}

impl Collector for StringValuesCollector {
    type Fruit = BTreeSet<String>;
    type Child = StringValuesSegment;

    fn for_segment(
        &self,
        _segment_ord: SegmentOrdinal,
        reader: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        Ok(StringValuesSegment {
            column: reader.fast_fields().str(&self.field)?,
            ords: BTreeSet::new(),
        })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(
        &self,
        segment_fruits: Vec<tantivy::Result<BTreeSet<String>>>,
    ) -> tantivy::Result<Self::Fruit> {
        let mut values = BTreeSet::new();
        for fruit in segment_fruits {
            values.extend(fruit?);
        }
        Ok(values)
    }
}

impl SegmentCollector for StringValuesSegment {
    type Fruit = tantivy::Result<BTreeSet<String>>;

    fn collect(&mut self, doc: DocId, _score: Score) {
        if let Some(column) = &self.column {
            self.ords.extend(column.term_ords(doc));
        }
    }

    fn harvest(self) -> Self::Fruit {
        let mut values = BTreeSet::new();
        let Some(column) = self.column else {
            return Ok(values);
        };
        let mut term = String::new();
        for ord in self.ords {
            term.clear();
            if column.ord_to_str(ord, &mut term)? {
                values.insert(term.clone());
            }
        }
        Ok(values)
    }
}

/// Distinct values of the string doc-value field `field` over the matches of `query`.
pub fn collect_string_values(
    searcher: &Searcher,
    field: &str,
    query: &dyn Query,
) -> Result<BTreeSet<String>, IndexError> {
    searcher
        .search(
            query,
            &StringValuesCollector {
                field: field.to_string(),
            },
        )
        .map_err(|e| IndexError::search(&e))
}
