//! Read-only view of one committed taxonomy generation.

use std::collections::HashMap;

use tantivy::{
    DocAddress, Index, IndexReader, ReloadPolicy, TantivyDocument, schema::Value,
};

use super::{NO_PARENT, ROOT_ORDINAL, TaxonomyFields};
use crate::{IndexError, schema::PATH_DELIMITER};

/// Ordinal tree of one taxonomy generation.
#[derive(Debug, Clone)]
pub struct TaxonomyReader {
    /// Parent of each ordinal.
    parents: Vec<u32>,
    /// Encoded path of each ordinal; empty for the root.
    paths: Vec<String>,
    /// Ordinal of each encoded path.
    ordinals: HashMap<String, u32>,
    /// Children of each ordinal, in ordinal order.
    children: Vec<Vec<u32>>,
}

impl TaxonomyReader {
    /// An empty taxonomy holding only the root.
    pub fn empty() -> Self {
        Self {
            parents: vec![NO_PARENT],
            paths: vec![String::new()],
            ordinals: HashMap::new(),
            children: vec![Vec::new()],
        }
    }

    /// Loads the committed generation of a taxonomy index.
    pub fn open(index: &Index) -> Result<Self, IndexError> {
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| IndexError::refresh(&e))?;
        Self::load(index, &reader)
    }

    /// Loads the generation currently visible to `reader`.
    fn load(index: &Index, reader: &IndexReader) -> Result<Self, IndexError> {
        let fields =
            TaxonomyFields::from_schema(&index.schema()).map_err(|e| IndexError::refresh(&e))?;
        let searcher = reader.searcher();

        let mut entries = Vec::new();
        for (segment_ord, segment_reader) in searcher.segment_readers().iter().enumerate() {
            for doc_id in segment_reader.doc_ids_alive() {
                let doc: TantivyDocument = searcher
                    .doc(DocAddress::new(segment_ord as u32, doc_id))
                    .map_err(|e| IndexError::refresh(&e))?;
                let ordinal = doc.get_first(fields.ordinal).and_then(|v| v.as_u64());
                let parent = doc.get_first(fields.parent).and_then(|v| v.as_u64());
                let path = doc.get_first(fields.path).and_then(|v| v.as_str());
                match (ordinal, parent, path) {
                    (Some(ordinal), Some(parent), Some(path)) => {
                        entries.push((ordinal as u32, parent as u32, path.to_string()));
                    }
                    _ => {
                        return Err(IndexError::Refresh(format!(
                            "taxonomy entry {segment_ord}/{doc_id} is incomplete"
                        )));
                    }
                }
            }
        }

        let mut taxonomy = Self::empty();
        let size = entries.iter().map(|(ord, _, _)| *ord as usize + 1).max().unwrap_or(1);
        taxonomy.parents.resize(size, NO_PARENT);
        taxonomy.paths.resize(size, String::new());
        taxonomy.children.resize(size, Vec::new());
        entries.sort_unstable_by_key(|(ord, _, _)| *ord);
        for (ordinal, parent, path) in entries {
            let slot = ordinal as usize;
            taxonomy.parents[slot] = parent;
            if let Some(children) = taxonomy.children.get_mut(parent as usize) {
                children.push(ordinal);
            }
            taxonomy.ordinals.insert(path.clone(), ordinal);
            taxonomy.paths[slot] = path;
        }
        Ok(taxonomy)
    }

    /// Number of ordinals, root included.
    pub fn size(&self) -> usize {
        self.parents.len()
    }

    /// Looks up the ordinal of an encoded path.
    pub fn ordinal(&self, encoded_path: &str) -> Option<u32> {
        if encoded_path.is_empty() {
            return Some(ROOT_ORDINAL);
        }
        self.ordinals.get(encoded_path).copied()
    }

    /// Parent of an ordinal.
    pub fn parent(&self, ordinal: u32) -> Option<u32> {
        self.parents
            .get(ordinal as usize)
            .copied()
            .filter(|parent| *parent != NO_PARENT)
    }

    /// Children of an ordinal.
    pub fn children(&self, ordinal: u32) -> &[u32] {
        self.children
            .get(ordinal as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Last path component of an ordinal.
    pub fn label(&self, ordinal: u32) -> &str {
        self.paths
            .get(ordinal as usize)
            .and_then(|path| path.rsplit(PATH_DELIMITER).next())
            .unwrap_or("")
    }

    /// Encoded paths by ordinal, used to seed a writer.
    pub(super) fn into_ordinals(self) -> (HashMap<String, u32>, usize) {
        let size = self.size();
        (self.ordinals, size)
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::taxonomy::TaxonomyWriter;

    #[test]
    fn empty_taxonomy_has_only_root() {
        let taxonomy = TaxonomyReader::empty();
        assert_eq!(taxonomy.size(), 1);
        assert_eq!(taxonomy.ordinal(""), Some(ROOT_ORDINAL));
        assert_eq!(taxonomy.parent(ROOT_ORDINAL), None);
        assert!(taxonomy.children(ROOT_ORDINAL).is_empty());
        assert!(taxonomy.children(99).is_empty());
    }

    #[test]
    fn reads_committed_tree() {
        let temp = TempDir::new().unwrap();
        let mut writer = TaxonomyWriter::open(temp.path()).unwrap();
        let news = writer.add_path("cat", &["news"]).unwrap();
        let science = writer.add_path("cat", &["news", "science"]).unwrap();
        writer.commit().unwrap();

        let taxonomy = TaxonomyReader::open(writer.index()).unwrap();
        let cat = taxonomy.ordinal("cat").unwrap();
        assert_eq!(news, vec![cat, taxonomy.ordinal("cat\u{1f}news").unwrap()]);
        assert_eq!(science.len(), 3);
        assert_eq!(taxonomy.parent(cat), Some(ROOT_ORDINAL));
        assert_eq!(taxonomy.children(ROOT_ORDINAL), &[cat]);
        assert_eq!(taxonomy.label(science[2]), "science");
        assert_eq!(taxonomy.parent(science[2]), Some(science[1]));
    }
}
