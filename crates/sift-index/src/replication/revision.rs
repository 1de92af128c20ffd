//! Point-in-time descriptions of a committed index and its taxonomy.

use std::{
    cmp::Ordering,
    collections::BTreeSet,
    fs::{self, File},
    io::{Cursor, Read},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tantivy::{Index, IndexMeta};

use crate::IndexError;

/// Name of the file that commits an index generation.
pub const META_FILE: &str = "meta.json";

/// Which of the two indexes a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSource {
    /// The data index.
    Index,
    /// The taxonomy index.
    Taxonomy,
}

/// A file of a revision and its size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionFile {
    /// File name relative to the index directory.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// The transferable description of a revision.
///
/// File lists are sorted by name except for `meta.json`, which always comes last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionDescriptor {
    /// Revision identifier, ordered like the generations it encodes.
    pub version: String,
    /// Commit opstamp of the data index.
    pub index_generation: u64,
    /// Commit opstamp of the taxonomy, if the index keeps one.
    pub taxonomy_generation: Option<u64>,
    /// Files of the data index.
    pub index_files: Vec<RevisionFile>,
    /// Files of the taxonomy index.
    pub taxonomy_files: Vec<RevisionFile>,
}

impl RevisionDescriptor {
    /// Files of one source.
    pub fn files(&self, source: FileSource) -> &[RevisionFile] {
        match source {
            FileSource::Index => &self.index_files,
            FileSource::Taxonomy => &self.taxonomy_files,
        }
    }

    /// Compares the generations of two revisions.
    pub fn compare_generations(&self, other: &Self) -> Ordering {
        (self.index_generation, self.taxonomy_generation)
            .cmp(&(other.index_generation, other.taxonomy_generation))
    }
}

/// Builds the version string of a pair of generations.
pub fn revision_version(index_generation: u64, taxonomy_generation: Option<u64>) -> String {
    match taxonomy_generation {
        Some(taxonomy) => format!("{index_generation:016x}_{taxonomy:016x}"),
        None => format!("{index_generation:016x}"),
    }
}

/// Committed files of one index, pinned for the lifetime of the revision.
struct CommitPoint {
    /// Directory holding the files.
    dir: PathBuf,
    /// Loaded commit metadata. Holding it keeps the segment files out of garbage collection.
    meta: IndexMeta,
    /// Serialized `meta.json` of the commit.
    meta_bytes: Vec<u8>,
    /// Files with their sizes, `meta.json` last.
    files: Vec<RevisionFile>,
}

impl CommitPoint {
    /// Captures the last commit of `index`, stored in `dir`.
    fn capture(index: &Index, dir: &Path) -> Result<Self, IndexError> {
        let meta = index.load_metas().map_err(|e| IndexError::search(&e))?;
        let meta_bytes = serde_json::to_vec_pretty(&meta)?;
        let names: BTreeSet<String> = meta
            .segments
            .iter()
            .flat_map(|segment| segment.list_files())
            .filter_map(|path| path.to_str().map(str::to_string))
            .collect();

        let mut files = Vec::with_capacity(names.len() + 1);
        for name in names {
            // Components a segment never wrote are listed but absent.
            if let Ok(metadata) = fs::metadata(dir.join(&name)) {
                files.push(RevisionFile {
                    name,
                    size: metadata.len(),
                });
            }
        }
        files.push(RevisionFile {
            name: META_FILE.to_string(),
            size: meta_bytes.len() as u64,
        });

        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
            meta_bytes,
            files,
        })
    }

    /// Opens one file of the commit.
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, IndexError> {
        if name == META_FILE {
            return Ok(Box::new(Cursor::new(self.meta_bytes.clone())));
        }
        if !self.files.iter().any(|file| file.name == name) {
            return Err(IndexError::Replication(format!(
                "file '{name}' is not part of the revision"
            )));
        }
        Ok(Box::new(File::open(self.dir.join(name))?))
    }
}

/// A committed generation of an index and its taxonomy.
///
/// While a revision is alive its files are protected from the writer's garbage collection,
/// so a slave can copy them even after the master committed again.
pub struct Revision {
    /// Transferable description.
    descriptor: RevisionDescriptor,
    /// Data index commit.
    index: CommitPoint,
    /// Taxonomy commit.
    taxonomy: Option<CommitPoint>,
}

impl Revision {
    /// Captures the last commits of a data index and its optional taxonomy.
    pub fn capture(
        index: &Index,
        index_dir: &Path,
        taxonomy: Option<(&Index, &Path)>,
    ) -> Result<Self, IndexError> {
        // Taxonomy first: a data commit must never reference ordinals newer than the taxonomy
        // captured with it.
        let taxonomy = taxonomy
            .map(|(index, dir)| CommitPoint::capture(index, dir))
            .transpose()?;
        let index = CommitPoint::capture(index, index_dir)?;

        let index_generation = index.meta.opstamp;
        let taxonomy_generation = taxonomy.as_ref().map(|commit| commit.meta.opstamp);
        let descriptor = RevisionDescriptor {
            version: revision_version(index_generation, taxonomy_generation),
            index_generation,
            taxonomy_generation,
            index_files: index.files.clone(),
            taxonomy_files: taxonomy
                .as_ref()
                .map(|commit| commit.files.clone())
                .unwrap_or_default(),
        };
        Ok(Self {
            descriptor,
            index,
            taxonomy,
        })
    }

    /// Transferable description of the revision.
    pub fn descriptor(&self) -> &RevisionDescriptor {
        &self.descriptor
    }

    /// Revision identifier.
    pub fn version(&self) -> &str {
        &self.descriptor.version
    }

    /// Opens a file of the revision for reading.
    pub fn open(&self, source: FileSource, name: &str) -> Result<Box<dyn Read + Send>, IndexError> {
        match (source, &self.taxonomy) {
            (FileSource::Index, _) => self.index.open(name),
            (FileSource::Taxonomy, Some(taxonomy)) => taxonomy.open(name),
            (FileSource::Taxonomy, None) => Err(IndexError::Replication(
                "revision has no taxonomy".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use tantivy::{
        TantivyDocument,
        schema::{STORED, STRING, Schema},
    };
    use tempfile::TempDir;

    use super::*;

    /// Creates an on-disk index with one committed document.
    fn committed_index(dir: &Path) -> Index {
        let mut builder = Schema::builder();
        let id = builder.add_text_field("id", STRING | STORED);
        let index = Index::create_in_dir(dir, builder.build()).unwrap();
        let mut writer = index.writer_with_num_threads(1, 15_000_000).unwrap();
        let mut doc = TantivyDocument::new();
        doc.add_text(id, "a");
        writer.add_document(doc).unwrap();
        writer.commit().unwrap();
        index
    }

    #[test]
    fn versions_order_like_generations() {
        assert_eq!(revision_version(1, None), "0000000000000001");
        assert_eq!(revision_version(10, Some(2)), "000000000000000a_0000000000000002");
        assert!(revision_version(9, None) < revision_version(10, None));
    }

    #[test]
    fn captures_segment_files_with_meta_last() {
        let temp = TempDir::new().unwrap();
        let index = committed_index(temp.path());

        let revision = Revision::capture(&index, temp.path(), None).unwrap();
        let descriptor = revision.descriptor();
        assert_eq!(descriptor.taxonomy_generation, None);
        assert!(descriptor.taxonomy_files.is_empty());
        assert_eq!(
            descriptor.index_files.last().map(|f| f.name.as_str()),
            Some(META_FILE)
        );
        assert!(descriptor.index_files.len() > 1);
        for file in &descriptor.index_files[..descriptor.index_files.len() - 1] {
            let on_disk = fs::metadata(temp.path().join(&file.name)).unwrap();
            assert_eq!(on_disk.len(), file.size);
        }
    }

    #[test]
    fn serves_meta_from_memory_and_rejects_foreign_files() {
        let temp = TempDir::new().unwrap();
        let index = committed_index(temp.path());
        let revision = Revision::capture(&index, temp.path(), None).unwrap();

        let mut meta = String::new();
        revision
            .open(FileSource::Index, META_FILE)
            .unwrap()
            .read_to_string(&mut meta)
            .unwrap();
        assert!(meta.contains("\"opstamp\""));

        assert!(revision.open(FileSource::Index, "nope.idx").is_err());
        assert!(revision.open(FileSource::Taxonomy, META_FILE).is_err());
    }
}
