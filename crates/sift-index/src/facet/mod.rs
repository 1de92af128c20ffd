//! Facet aggregation over the documents matched by a search.
//!
//! A dimension is counted either from index structures or from sub-queries. Index-backed
//! dimensions are classified once by the [`FacetBackend`] owning their storage; only the
//! accumulators of backends with at least one requested dimension are built.

mod builder;
mod drill;
mod sorted_set;
mod taxonomy;

use std::cmp::Ordering;

use indexmap::IndexMap;
use serde::Serialize;
use sift_config::FieldKind;

pub use builder::{DimensionRequest, DimensionSource, FacetCounter, classify_dimensions};
pub use drill::{drill_down_query, drill_terms};
pub use sorted_set::SortedSetState;
pub use taxonomy::{TaxonomyCounts, pack_association};

/// Storage backend of an index-backed dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacetBackend {
    /// Labels in string doc values, counted through global ordinals.
    SortedSet,
    /// Taxonomy ordinals with document counts.
    Taxonomy,
    /// Taxonomy ordinals with summed integer weights.
    IntAssociation,
    /// Taxonomy ordinals with summed float weights.
    FloatAssociation,
}

impl FacetBackend {
    /// Backend of a field kind, `None` for non-facet kinds.
    pub fn for_kind(kind: FieldKind) -> Option<Self> {
        match kind {
            FieldKind::SortedSetFacet => Some(Self::SortedSet),
            FieldKind::TaxonomyFacet => Some(Self::Taxonomy),
            FieldKind::IntAssocFacet => Some(Self::IntAssociation),
            FieldKind::FloatAssocFacet => Some(Self::FloatAssociation),
            _ => None,
        }
    }

    /// Returns true if the backend reads the taxonomy.
    pub fn uses_taxonomy(self) -> bool {
        !matches!(self, Self::SortedSet)
    }
}

/// Value of one facet label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FacetNumber {
    /// Document count.
    Count(u64),
    /// Summed integer weight.
    Long(i64),
    /// Summed float weight.
    Double(f64),
}

impl FacetNumber {
    /// Returns true if the label should be reported.
    fn is_positive(self) -> bool {
        match self {
            Self::Count(count) => count > 0,
            Self::Long(value) => value > 0,
            Self::Double(value) => value > 0.0,
        }
    }

    /// Numeric order across variants.
    fn compare(self, other: Self) -> Ordering {
        match (self, other) {
            (Self::Count(a), Self::Count(b)) => a.cmp(&b),
            (Self::Long(a), Self::Long(b)) => a.cmp(&b),
            (a, b) => a.as_f64().total_cmp(&b.as_f64()),
        }
    }

    /// Lossy conversion for mixed comparisons.
    fn as_f64(self) -> f64 {
        match self {
            Self::Count(count) => count as f64,
            Self::Long(value) => value as f64,
            Self::Double(value) => value,
        }
    }
}

/// Labels of one dimension in rank order.
pub type FacetResult = IndexMap<String, FacetNumber>;

/// Keeps the `top` best labels: value descending, then label ascending.
///
/// Labels whose value is not positive are dropped.
pub fn top_labels(labels: impl IntoIterator<Item = (String, FacetNumber)>, top: usize) -> FacetResult {
    let mut labels: Vec<_> = labels
        .into_iter()
        .filter(|(_, value)| value.is_positive())
        .collect();
    labels.sort_by(|(a_label, a), (b_label, b)| b.compare(*a).then_with(|| a_label.cmp(b_label)));
    labels.truncate(top);
    labels.into_iter().collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ties_break_by_label() {
        let result = top_labels(
            [
                ("science".to_string(), FacetNumber::Count(1)),
                ("news".to_string(), FacetNumber::Count(2)),
                ("economy".to_string(), FacetNumber::Count(1)),
                ("empty".to_string(), FacetNumber::Count(0)),
            ],
            10,
        );
        let labels: Vec<_> = result.keys().map(String::as_str).collect();
        assert_eq!(labels, ["news", "economy", "science"]);
    }

    #[test]
    fn truncates_to_top() {
        let result = top_labels(
            [
                ("a".to_string(), FacetNumber::Double(0.5)),
                ("b".to_string(), FacetNumber::Double(2.5)),
                ("c".to_string(), FacetNumber::Double(1.5)),
            ],
            2,
        );
        assert_eq!(
            result.into_iter().collect::<Vec<_>>(),
            vec![
                ("b".to_string(), FacetNumber::Double(2.5)),
                ("c".to_string(), FacetNumber::Double(1.5)),
            ]
        );
    }

    #[test]
    fn backends_follow_kinds() {
        assert_eq!(
            FacetBackend::for_kind(FieldKind::IntAssocFacet),
            Some(FacetBackend::IntAssociation)
        );
        assert_eq!(FacetBackend::for_kind(FieldKind::Text), None);
        assert!(!FacetBackend::SortedSet.uses_taxonomy());
    }
}
