//! Immutable reader generations.
//!
//! A search pins one [`IndexSnapshot`] for its whole lifetime. Commits and replication build a
//! new snapshot and swap it in, so in-flight searches keep reading the generation they
//! started with.

use std::sync::{Arc, OnceLock};

use tantivy::{Searcher, SegmentReader};

use crate::{IndexError, facet::SortedSetState, taxonomy::TaxonomyReader};

/// One reader generation of an index and its taxonomy.
pub struct IndexSnapshot {
    /// Searcher over the data index.
    searcher: Searcher,
    /// Taxonomy committed together with the data index.
    taxonomy: Option<Arc<TaxonomyReader>>,
    /// Global sorted-set ordinals, built on first use.
    sorted_set: OnceLock<Arc<SortedSetState>>,
    /// Commit opstamp of the data index.
    generation: u64,
    /// Commit opstamp of the taxonomy.
    taxonomy_generation: Option<u64>,
}

impl IndexSnapshot {
    /// Wraps a searcher and the matching taxonomy generation.
    pub fn new(
        searcher: Searcher,
        generation: u64,
        taxonomy: Option<(Arc<TaxonomyReader>, u64)>,
    ) -> Self {
        let (taxonomy, taxonomy_generation) = match taxonomy {
            Some((reader, generation)) => (Some(reader), Some(generation)),
            None => (None, None),
        };
        Self {
            searcher,
            taxonomy,
            sorted_set: OnceLock::new(),
            generation,
            taxonomy_generation,
        }
    }

    /// Searcher over the data index.
    pub fn searcher(&self) -> &Searcher {
        &self.searcher
    }

    /// Taxonomy of this generation, if the index keeps one.
    pub fn taxonomy(&self) -> Option<&TaxonomyReader> {
        self.taxonomy.as_deref()
    }

    /// Commit opstamp of the data index.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Commit opstamp of the taxonomy.
    pub fn taxonomy_generation(&self) -> Option<u64> {
        self.taxonomy_generation
    }

    /// Number of live documents.
    pub fn num_docs(&self) -> u64 {
        self.searcher.num_docs()
    }

    /// Segment readers in ordinal order.
    pub fn segment_readers(&self) -> &[SegmentReader] {
        self.searcher.segment_readers()
    }

    /// Global doc id of the first document of each segment.
    pub fn doc_bases(&self) -> Vec<u64> {
        let mut base = 0u64;
        self.segment_readers()
            .iter()
            .map(|reader| {
                let current = base;
                base += u64::from(reader.max_doc());
                current
            })
            .collect()
    }

    /// Splits a global doc id into segment ordinal and local doc id.
    pub fn locate(&self, global_doc: u64) -> Option<(u32, u32)> {
        let mut base = 0u64;
        for (segment_ord, reader) in self.segment_readers().iter().enumerate() {
            let max_doc = u64::from(reader.max_doc());
            if global_doc < base + max_doc {
                return Some((segment_ord as u32, (global_doc - base) as u32));
            }
            base += max_doc;
        }
        None
    }

    /// Global sorted-set ordinals, built once per generation.
    pub fn sorted_set_state(&self) -> Result<Arc<SortedSetState>, IndexError> {
        if let Some(state) = self.sorted_set.get() {
            return Ok(Arc::clone(state));
        }
        let state = Arc::new(SortedSetState::build(&self.searcher).map_err(|e| IndexError::search(&e))?);
        Ok(Arc::clone(self.sorted_set.get_or_init(|| state)))
    }
}
