//! Ordinal assignment for new facet paths.

use std::{collections::HashMap, fs, path::Path};

use tantivy::{Index, IndexWriter, TantivyDocument, directory::MmapDirectory};
use tracing::debug;

use super::{ROOT_ORDINAL, TaxonomyFields, TaxonomyReader};
use crate::{IndexError, schema::encode_path};

/// Memory budget of the single-threaded taxonomy writer.
const TAXONOMY_HEAP_SIZE: usize = 15_000_000;

/// Assigns ordinals to facet paths and persists them.
pub struct TaxonomyWriter {
    /// The taxonomy index.
    index: Index,
    /// Writer of the taxonomy index.
    writer: IndexWriter,
    /// Field handles.
    fields: TaxonomyFields,
    /// Ordinal of every known encoded path.
    ordinals: HashMap<String, u32>,
    /// Next ordinal to assign.
    next_ordinal: u32,
    /// Entries added since the last commit.
    pending: usize,
}

impl TaxonomyWriter {
    /// Opens or creates the taxonomy index at `path`.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path).map_err(|e| {
            let err: tantivy::TantivyError = e.into();
            IndexError::open_index(path.to_path_buf(), &err)
        })?;
        let index = Index::open_or_create(dir, TaxonomyFields::schema())
            .map_err(|e| IndexError::open_index(path.to_path_buf(), &e))?;
        let fields = TaxonomyFields::from_schema(&index.schema())
            .map_err(|e| IndexError::open_index(path.to_path_buf(), &e))?;
        let writer = index
            .writer_with_num_threads(1, TAXONOMY_HEAP_SIZE)
            .map_err(|e| IndexError::open_index(path.to_path_buf(), &e))?;
        let (ordinals, size) = TaxonomyReader::open(&index)?.into_ordinals();

        Ok(Self {
            index,
            writer,
            fields,
            ordinals,
            next_ordinal: size as u32,
            pending: 0,
        })
    }

    /// Returns the ordinals of every prefix of `dimension/path`, shortest first, creating
    /// missing entries.
    pub fn add_path<S: AsRef<str>>(
        &mut self,
        dimension: &str,
        path: &[S],
    ) -> Result<Vec<u32>, IndexError> {
        let mut ordinals = Vec::with_capacity(path.len() + 1);
        let mut parent = ROOT_ORDINAL;
        for depth in 0..=path.len() {
            let encoded = encode_path(dimension, &path[..depth]);
            let ordinal = match self.ordinals.get(&encoded) {
                Some(ordinal) => *ordinal,
                None => self.create(encoded, parent)?,
            };
            ordinals.push(ordinal);
            parent = ordinal;
        }
        Ok(ordinals)
    }

    /// Adds one new entry under `parent`.
    fn create(&mut self, encoded: String, parent: u32) -> Result<u32, IndexError> {
        let ordinal = self.next_ordinal;
        let mut doc = TantivyDocument::new();
        doc.add_u64(self.fields.ordinal, u64::from(ordinal));
        doc.add_u64(self.fields.parent, u64::from(parent));
        doc.add_text(self.fields.path, &encoded);
        self.writer
            .add_document(doc)
            .map_err(|e| IndexError::write(&e))?;
        debug!(ordinal, parent, "taxonomy entry added");
        self.ordinals.insert(encoded, ordinal);
        self.next_ordinal += 1;
        self.pending += 1;
        Ok(ordinal)
    }

    /// Returns true if entries were added since the last commit.
    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    /// Commits pending entries, returning the new generation.
    pub fn commit(&mut self) -> Result<u64, IndexError> {
        let opstamp = self.writer.commit().map_err(|e| IndexError::commit(&e))?;
        self.pending = 0;
        Ok(opstamp)
    }

    /// Drops entries added since the last commit.
    pub fn rollback(&mut self) -> Result<(), IndexError> {
        if self.pending == 0 {
            return Ok(());
        }
        self.writer.rollback().map_err(|e| IndexError::write(&e))?;
        let (ordinals, size) = TaxonomyReader::open(&self.index)?.into_ordinals();
        self.ordinals = ordinals;
        self.next_ordinal = size as u32;
        self.pending = 0;
        Ok(())
    }

    /// Returns the taxonomy index.
    pub fn index(&self) -> &Index {
        &self.index
    }
}
