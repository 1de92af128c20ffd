//! Taxonomy-backed facet counting: plain counts and summed association weights.

use std::ops::AddAssign;

use tantivy::Searcher;

use super::{FacetBackend, FacetNumber, FacetResult, top_labels};
use crate::{
    collector::MatchingDocs,
    schema::{encode_path, reserved},
    taxonomy::TaxonomyReader,
};

/// Splits an association value into its taxonomy ordinal and weight bits.
pub fn split_association(value: u64) -> (usize, u32) {
    ((value >> 32) as usize, value as u32)
}

/// Packs a taxonomy ordinal and weight bits into one association value.
pub fn pack_association(ordinal: u32, bits: u32) -> u64 {
    (u64::from(ordinal) << 32) | u64::from(bits)
}

/// Per-ordinal values of one taxonomy backend.
#[derive(Debug, Clone, PartialEq)]
enum Values {
    /// Document counts.
    Counts(Vec<u64>),
    /// Integer weight sums.
    Ints(Vec<i64>),
    /// Float weight sums.
    Floats(Vec<f64>),
}

/// Aggregated values of one taxonomy backend over a set of matching documents.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonomyCounts {
    /// Values indexed by ordinal.
    values: Values,
}

impl TaxonomyCounts {
    /// Aggregates `matching` for a taxonomy backend.
    ///
    /// Count documents carry the ordinals of every ancestor, so counts need no roll-up.
    /// Association documents carry only the leaf ordinal and weights are summed into every
    /// ancestor afterwards.
    pub fn count(
        backend: FacetBackend,
        taxonomy: &TaxonomyReader,
        searcher: &Searcher,
        matching: &MatchingDocs,
    ) -> tantivy::Result<Self> {
        let size = taxonomy.size();
        let field = match backend {
            FacetBackend::IntAssociation => reserved::INT_ASSOC,
            FacetBackend::FloatAssociation => reserved::FLOAT_ASSOC,
            FacetBackend::Taxonomy | FacetBackend::SortedSet => reserved::TAXONOMY,
        };
        let mut values = match backend {
            FacetBackend::IntAssociation => Values::Ints(vec![0; size]),
            FacetBackend::FloatAssociation => Values::Floats(vec![0.0; size]),
            FacetBackend::Taxonomy | FacetBackend::SortedSet => Values::Counts(vec![0; size]),
        };

        for segment in &matching.segments {
            let reader = searcher.segment_reader(segment.segment_ord);
            let Some(column) = reader.fast_fields().column_opt::<u64>(field)? else {
                continue;
            };
            for &doc in &segment.docs {
                for value in column.values_for_doc(doc) {
                    values.add(value);
                }
            }
        }
        values.roll_up(taxonomy);
        Ok(Self { values })
    }

    /// Value of one ordinal.
    fn value(&self, ordinal: u32) -> FacetNumber {
        let ordinal = ordinal as usize;
        match &self.values {
            Values::Counts(counts) => FacetNumber::Count(counts.get(ordinal).copied().unwrap_or(0)),
            Values::Ints(sums) => FacetNumber::Long(sums.get(ordinal).copied().unwrap_or(0)),
            Values::Floats(sums) => FacetNumber::Double(sums.get(ordinal).copied().unwrap_or(0.0)),
        }
    }

    /// The `top` children of `dimension/path`.
    ///
    /// Returns `None` when the path is not in the taxonomy.
    pub fn top_children<S: AsRef<str>>(
        &self,
        taxonomy: &TaxonomyReader,
        dimension: &str,
        path: &[S],
        top: usize,
    ) -> Option<FacetResult> {
        let parent = taxonomy.ordinal(&encode_path(dimension, path))?;
        let children = taxonomy
            .children(parent)
            .iter()
            .map(|&child| (taxonomy.label(child).to_string(), self.value(child)));
        Some(top_labels(children, top))
    }
}

impl Values {
    /// Adds one doc value.
    fn add(&mut self, value: u64) {
        match self {
            Self::Counts(counts) => {
                if let Some(count) = usize::try_from(value).ok().and_then(|o| counts.get_mut(o)) {
                    *count += 1;
                }
            }
            Self::Ints(sums) => {
                let (ordinal, bits) = split_association(value);
                if let Some(sum) = sums.get_mut(ordinal) {
                    *sum += i64::from(bits as i32);
                }
            }
            Self::Floats(sums) => {
                let (ordinal, bits) = split_association(value);
                if let Some(sum) = sums.get_mut(ordinal) {
                    *sum += f64::from(f32::from_bits(bits));
                }
            }
        }
    }

    /// Sums association weights into ancestors. Parents always precede their children.
    fn roll_up(&mut self, taxonomy: &TaxonomyReader) {
        match self {
            Self::Counts(_) => {}
            Self::Ints(sums) => roll_up(sums, taxonomy),
            Self::Floats(sums) => roll_up(sums, taxonomy),
        }
    }
}

/// Adds every ordinal's value into its parent, deepest ordinals first.
fn roll_up<T: Copy + AddAssign>(sums: &mut [T], taxonomy: &TaxonomyReader) {
    for ordinal in (1..sums.len()).rev() {
        if let Some(parent) = taxonomy.parent(ordinal as u32) {
            let value = sums[ordinal];
            if let Some(sum) = sums.get_mut(parent as usize) {
                *sum += value;
            }
        }
    }
}
