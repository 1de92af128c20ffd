//! Sort directions.

use serde::{Deserialize, Serialize};

/// Pseudo-field sorting by relevance score.
pub const SCORE_FIELD: &str = "$score";

/// Pseudo-field sorting by index order.
pub const DOC_FIELD: &str = "$doc";

/// Direction of one sort key and where documents lacking the field go.
///
/// The plain directions put missing values last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Smallest first, missing last.
    Ascending,
    /// Smallest first, missing first.
    AscendingMissingFirst,
    /// Smallest first, missing last.
    AscendingMissingLast,
    /// Largest first, missing last.
    Descending,
    /// Largest first, missing first.
    DescendingMissingFirst,
    /// Largest first, missing last.
    DescendingMissingLast,
}

impl SortDirection {
    /// Returns true for the descending variants.
    pub fn is_descending(self) -> bool {
        matches!(
            self,
            Self::Descending | Self::DescendingMissingFirst | Self::DescendingMissingLast
        )
    }

    /// Returns true when documents without a value sort before all others.
    pub fn missing_first(self) -> bool {
        matches!(
            self,
            Self::AscendingMissingFirst | Self::DescendingMissingFirst
        )
    }
}
