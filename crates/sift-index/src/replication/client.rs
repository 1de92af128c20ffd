//! The slave side of replication.
//!
//! An update copies the files of the master's current revision into a staging directory,
//! moves them into the live directories (the `meta.json` files last, which is what makes the
//! new generation visible), reloads readers, records the applied version and finally deletes
//! files no longer referenced. A failure at any step leaves the previous generation serving.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    revision::{FileSource, META_FILE, RevisionDescriptor, RevisionFile},
    source::{ReplicationSession, ReplicationSource},
};
use crate::IndexError;

/// Directories and files a slave replicates into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaPaths {
    /// Live data index directory.
    pub index_dir: PathBuf,
    /// Live taxonomy directory, if the slave keeps a taxonomy.
    pub taxonomy_dir: Option<PathBuf>,
    /// Scratch directory for files being transferred.
    pub staging_dir: PathBuf,
    /// Where the applied revision is recorded.
    pub state_file: PathBuf,
}

impl ReplicaPaths {
    /// Live directory of one source.
    fn live_dir(&self, source: FileSource) -> Option<&Path> {
        match source {
            FileSource::Index => Some(&self.index_dir),
            FileSource::Taxonomy => self.taxonomy_dir.as_deref(),
        }
    }

    /// Staging directory of one source.
    fn staged_dir(&self, source: FileSource) -> PathBuf {
        match source {
            FileSource::Index => self.staging_dir.join("index"),
            FileSource::Taxonomy => self.staging_dir.join("taxonomy"),
        }
    }
}

/// The last revision a slave installed, persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRevision {
    /// Master the revision came from.
    pub master_uuid: Uuid,
    /// Revision identifier.
    pub version: String,
    /// Commit opstamp of the data index.
    pub index_generation: u64,
    /// Commit opstamp of the taxonomy.
    pub taxonomy_generation: Option<u64>,
    /// When the revision was installed.
    pub applied_at: DateTime<Utc>,
}

impl AppliedRevision {
    /// Loads the record, or `None` if the slave never replicated.
    pub fn load(path: &Path) -> Result<Option<Self>, IndexError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Writes the record through a temporary file so a crash never leaves it truncated.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Lifecycle of a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationPhase {
    /// No revision installed yet; the slave cannot serve.
    Uninitialized,
    /// An update is in progress.
    Syncing,
    /// A revision is installed and searchable.
    Serving,
    /// The slave was closed.
    Closed,
}

/// What a slave reports about its replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicationStatus {
    /// Current phase.
    pub phase: ReplicationPhase,
    /// Identity of the master.
    pub master_uuid: Uuid,
    /// Installed revision.
    pub applied: Option<AppliedRevision>,
    /// Latest version seen on the master.
    pub master_version: Option<String>,
    /// Data generations the slave is behind the last master version it saw.
    pub generation_lag: u64,
    /// Time of the last update attempt that succeeded.
    pub last_success: Option<DateTime<Utc>>,
    /// Error of the last attempt, cleared by the next success.
    pub last_error: Option<String>,
}

/// Result of an update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The slave already held the master's revision.
    UpToDate,
    /// A new revision was installed.
    Applied(String),
}

/// Mutable state of an [`IndexReplicator`].
struct ClientState {
    /// Current phase.
    phase: ReplicationPhase,
    /// Installed revision.
    applied: Option<AppliedRevision>,
    /// Latest master version seen.
    master_version: Option<String>,
    /// Data generation of that version.
    master_generation: Option<u64>,
    /// Last successful attempt.
    last_success: Option<DateTime<Utc>>,
    /// Last failure.
    last_error: Option<String>,
}

impl ClientState {
    /// Phase to return to when no update is running.
    fn idle_phase(&self) -> ReplicationPhase {
        if self.applied.is_some() {
            ReplicationPhase::Serving
        } else {
            ReplicationPhase::Uninitialized
        }
    }
}

/// Pulls revisions from a master into a slave's directories.
pub struct IndexReplicator {
    /// Where revisions come from.
    source: Arc<dyn ReplicationSource>,
    /// Where they go.
    paths: ReplicaPaths,
    /// Status shared with readers.
    state: Mutex<ClientState>,
    /// Serializes update attempts.
    update_lock: Mutex<()>,
}

impl IndexReplicator {
    /// Creates a replicator, restoring the applied revision recorded by an earlier run.
    pub fn open(
        source: Arc<dyn ReplicationSource>,
        paths: ReplicaPaths,
    ) -> Result<Self, IndexError> {
        let installed = paths.index_dir.join(META_FILE).exists();
        let applied = if installed {
            AppliedRevision::load(&paths.state_file)?
        } else {
            None
        };
        let phase = if applied.is_some() {
            ReplicationPhase::Serving
        } else {
            ReplicationPhase::Uninitialized
        };
        Ok(Self {
            source,
            paths,
            state: Mutex::new(ClientState {
                phase,
                applied,
                master_version: None,
                master_generation: None,
                last_success: None,
                last_error: None,
            }),
            update_lock: Mutex::new(()),
        })
    }

    /// Installed revision.
    pub fn applied(&self) -> Option<AppliedRevision> {
        self.state.lock().applied.clone()
    }

    /// Current phase.
    pub fn phase(&self) -> ReplicationPhase {
        self.state.lock().phase
    }

    /// Snapshot of the replication status.
    pub fn status(&self) -> ReplicationStatus {
        let state = self.state.lock();
        let applied_generation = state.applied.as_ref().map_or(0, |a| a.index_generation);
        ReplicationStatus {
            phase: state.phase,
            master_uuid: self.source.master_uuid(),
            applied: state.applied.clone(),
            master_version: state.master_version.clone(),
            generation_lag: state
                .master_generation
                .map_or(0, |master| master.saturating_sub(applied_generation)),
            last_success: state.last_success,
            last_error: state.last_error.clone(),
        }
    }

    /// Stops accepting updates. An update already running completes first.
    pub fn close(&self) {
        let _update = self.update_lock.lock();
        self.state.lock().phase = ReplicationPhase::Closed;
    }

    /// Brings the slave to the master's current revision.
    ///
    /// `reload` runs once the new files are live and must switch readers to them; until it
    /// returns the new revision is not recorded as applied.
    pub fn update_now(
        &self,
        reload: impl FnOnce(&RevisionDescriptor) -> Result<(), IndexError>,
    ) -> Result<UpdateOutcome, IndexError> {
        let _update = self.update_lock.lock();
        let master_uuid = self.source.master_uuid();
        let current_version = {
            let mut state = self.state.lock();
            if state.phase == ReplicationPhase::Closed {
                return Err(IndexError::Closed(self.paths.index_dir.display().to_string()));
            }
            state.phase = ReplicationPhase::Syncing;
            state
                .applied
                .as_ref()
                .filter(|applied| applied.master_uuid == master_uuid)
                .map(|applied| applied.version.clone())
        };

        let session = match self.source.check_for_update(current_version.as_deref()) {
            Ok(Some(session)) => session,
            Ok(None) => {
                let mut state = self.state.lock();
                state.master_version = current_version;
                state.master_generation = state.applied.as_ref().map(|a| a.index_generation);
                state.last_success = Some(Utc::now());
                state.last_error = None;
                state.phase = state.idle_phase();
                return Ok(UpdateOutcome::UpToDate);
            }
            Err(e) => return Err(self.fail(e)),
        };
        {
            let mut state = self.state.lock();
            state.master_version = Some(session.descriptor.version.clone());
            state.master_generation = Some(session.descriptor.index_generation);
        }

        let downloaded = self.download(&session);
        if let Err(e) = self.source.release(&session.id) {
            warn!(session = %session.id, error = %e, "failed to release replication session");
        }
        let descriptor = session.descriptor;
        let result = downloaded
            .and_then(|()| self.install(&descriptor))
            .and_then(|()| reload(&descriptor))
            .and_then(|()| {
                let applied = AppliedRevision {
                    master_uuid,
                    version: descriptor.version.clone(),
                    index_generation: descriptor.index_generation,
                    taxonomy_generation: descriptor.taxonomy_generation,
                    applied_at: Utc::now(),
                };
                applied.save(&self.paths.state_file)?;
                Ok(applied)
            });

        match result {
            Ok(applied) => {
                self.remove_obsolete(&descriptor);
                info!(
                    version = %descriptor.version,
                    index_generation = descriptor.index_generation,
                    "replication revision applied"
                );
                let mut state = self.state.lock();
                state.applied = Some(applied);
                state.last_success = Some(Utc::now());
                state.last_error = None;
                state.phase = ReplicationPhase::Serving;
                Ok(UpdateOutcome::Applied(descriptor.version))
            }
            Err(e) => {
                if let Err(cleanup) = self.clean_staging() {
                    warn!(error = %cleanup, "failed to clean replication staging");
                }
                Err(self.fail(e))
            }
        }
    }

    /// Records a failed attempt and converts its error.
    fn fail(&self, error: IndexError) -> IndexError {
        warn!(error = %error, "replication attempt failed");
        let mut state = self.state.lock();
        state.last_error = Some(error.to_string());
        state.phase = state.idle_phase();
        match error {
            IndexError::Replication(_) | IndexError::UnknownSession(_) => error,
            other => IndexError::Replication(other.to_string()),
        }
    }

    /// Empties the staging directory.
    fn clean_staging(&self) -> Result<(), IndexError> {
        match fs::remove_dir_all(&self.paths.staging_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Sources of a revision, taxonomy first.
    fn sources(&self, descriptor: &RevisionDescriptor) -> Result<Vec<FileSource>, IndexError> {
        let mut sources = Vec::with_capacity(2);
        if descriptor.taxonomy_generation.is_some() {
            if self.paths.taxonomy_dir.is_none() {
                return Err(IndexError::Replication(
                    "master keeps a taxonomy but this index does not".to_string(),
                ));
            }
            sources.push(FileSource::Taxonomy);
        }
        sources.push(FileSource::Index);
        Ok(sources)
    }

    /// Copies the files of a session's revision that the slave lacks into staging.
    fn download(&self, session: &ReplicationSession) -> Result<(), IndexError> {
        self.clean_staging()?;
        let mut copied_files = 0usize;
        let mut copied_bytes = 0u64;
        for source in self.sources(&session.descriptor)? {
            let staged = self.paths.staged_dir(source);
            fs::create_dir_all(&staged)?;
            let live = self.paths.live_dir(source);
            for file in session.descriptor.files(source) {
                if file.name != META_FILE && live.is_some_and(|dir| has_file(dir, file)) {
                    continue;
                }
                let dest = staged.join(&file.name);
                copied_bytes += self.copy_file(&session.id, source, file, &dest)?;
                copied_files += 1;
            }
        }
        debug!(
            session = %session.id,
            files = copied_files,
            bytes = copied_bytes,
            "replication files downloaded"
        );
        Ok(())
    }

    /// Streams one file to `dest`, checking its size.
    fn copy_file(
        &self,
        session_id: &str,
        source: FileSource,
        file: &RevisionFile,
        dest: &Path,
    ) -> Result<u64, IndexError> {
        let mut reader = self.source.obtain_file(session_id, source, &file.name)?;
        let mut out = File::create(dest)?;
        let copied = io::copy(&mut reader, &mut out)?;
        out.sync_all()?;
        if copied != file.size {
            return Err(IndexError::Replication(format!(
                "transfer of '{}' ended after {copied} of {} bytes",
                file.name, file.size
            )));
        }
        Ok(copied)
    }

    /// Moves staged files into the live directories.
    ///
    /// Data files of every source move first. The `meta.json` files follow, the data index's
    /// last, and if one of them cannot be moved the ones already live are put back.
    fn install(&self, descriptor: &RevisionDescriptor) -> Result<(), IndexError> {
        let mut metas = Vec::with_capacity(2);
        for source in self.sources(descriptor)? {
            let Some(live) = self.paths.live_dir(source) else {
                continue;
            };
            fs::create_dir_all(live)?;
            let staged = self.paths.staged_dir(source);
            let mut meta = None;
            for file in descriptor.files(source) {
                let from = staged.join(&file.name);
                if file.name == META_FILE {
                    meta = Some(from);
                } else if from.exists() {
                    fs::rename(&from, live.join(&file.name))?;
                }
            }
            let meta = meta.ok_or_else(|| {
                IndexError::Replication(format!(
                    "revision {} has no {META_FILE}",
                    descriptor.version
                ))
            })?;
            metas.push(MetaSwap {
                staged: meta,
                live: live.join(META_FILE),
                backup: staged.join(PREVIOUS_META_FILE),
            });
        }
        promote_metas(&metas)?;
        self.clean_staging()
    }

    /// Deletes live files that the installed revision no longer references.
    fn remove_obsolete(&self, descriptor: &RevisionDescriptor) {
        for source in [FileSource::Taxonomy, FileSource::Index] {
            let Some(live) = self.paths.live_dir(source) else {
                continue;
            };
            let Ok(entries) = fs::read_dir(live) else {
                continue;
            };
            let keep = descriptor.files(source);
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                if name.starts_with('.')
                    || name == META_FILE
                    || keep.iter().any(|file| file.name == name)
                    || !entry.file_type().is_ok_and(|t| t.is_file())
                {
                    continue;
                }
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(file = name, error = %e, "failed to remove obsolete index file");
                }
            }
        }
    }
}

/// Where the replaced `meta.json` of a source is kept while an install is in progress.
const PREVIOUS_META_FILE: &str = "meta.json.previous";

/// A staged `meta.json` and the live one it replaces.
struct MetaSwap {
    /// Downloaded file.
    staged: PathBuf,
    /// Live file.
    live: PathBuf,
    /// Copy of the live file taken before the swap.
    backup: PathBuf,
}

/// Moves each staged `meta.json` over its live one, in order. On failure the ones already
/// moved are restored, so every source stays on the same revision.
fn promote_metas(swaps: &[MetaSwap]) -> Result<(), IndexError> {
    for swap in swaps {
        if swap.live.exists() {
            fs::copy(&swap.live, &swap.backup)?;
        }
    }
    for (moved, swap) in swaps.iter().enumerate() {
        if let Err(e) = fs::rename(&swap.staged, &swap.live) {
            for promoted in &swaps[..moved] {
                if let Err(restore) = restore_meta(promoted) {
                    warn!(
                        file = %promoted.live.display(),
                        error = %restore,
                        "failed to restore meta file"
                    );
                }
            }
            return Err(e.into());
        }
    }
    Ok(())
}

/// Puts back the live `meta.json` a swap replaced, or removes it if there was none.
fn restore_meta(swap: &MetaSwap) -> io::Result<()> {
    if swap.backup.exists() {
        fs::rename(&swap.backup, &swap.live)
    } else {
        fs::remove_file(&swap.live)
    }
}

/// True if `dir` holds a file with the name and size of `file`.
fn has_file(dir: &Path, file: &RevisionFile) -> bool {
    fs::metadata(dir.join(&file.name)).is_ok_and(|metadata| metadata.len() == file.size)
}

#[cfg(test)]
mod test {
    use std::{
        io::Read,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tantivy::{
        Index, IndexWriter, TantivyDocument,
        schema::{STORED, STRING, Schema},
    };
    use tempfile::TempDir;

    use super::*;
    use crate::{
        replication::{LocalReplicator, Revision},
        taxonomy::TaxonomyWriter,
    };

    /// A master index with its writer and replicator.
    struct Master {
        /// Directory of the index.
        dir: TempDir,
        /// The index.
        index: Index,
        /// Its writer.
        writer: IndexWriter,
        /// Its replicator.
        replicator: Arc<LocalReplicator>,
        /// Taxonomy directory and writer, when the master keeps one.
        taxonomy: Option<(TempDir, TaxonomyWriter)>,
    }

    impl Master {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut builder = Schema::builder();
            builder.add_text_field("id", STRING | STORED);
            let index = Index::create_in_dir(dir.path(), builder.build()).unwrap();
            let writer = index.writer_with_num_threads(1, 15_000_000).unwrap();
            let replicator = Arc::new(LocalReplicator::new(
                Uuid::new_v4(),
                Duration::from_secs(60),
            ));
            Self {
                dir,
                index,
                writer,
                replicator,
                taxonomy: None,
            }
        }

        fn with_taxonomy() -> Self {
            let dir = TempDir::new().unwrap();
            let writer = TaxonomyWriter::open(dir.path()).unwrap();
            Self {
                taxonomy: Some((dir, writer)),
                ..Self::new()
            }
        }

        fn commit(&mut self, ids: &[&str]) {
            let field = self.index.schema().get_field("id").unwrap();
            for id in ids {
                let mut doc = TantivyDocument::new();
                doc.add_text(field, id);
                self.writer.add_document(doc).unwrap();
            }
            self.writer.commit().unwrap();
            if let Some((_, taxonomy)) = &mut self.taxonomy {
                for id in ids {
                    taxonomy.add_path("id", &[*id]).unwrap();
                }
                taxonomy.commit().unwrap();
            }
            let taxonomy = self
                .taxonomy
                .as_ref()
                .map(|(dir, writer)| (writer.index(), dir.path()));
            let revision = Revision::capture(&self.index, self.dir.path(), taxonomy).unwrap();
            self.replicator.publish(revision).unwrap();
        }
    }

    /// Paths of a slave without taxonomy under `root`.
    fn slave_paths(root: &Path) -> ReplicaPaths {
        ReplicaPaths {
            index_dir: root.join("data"),
            taxonomy_dir: None,
            staging_dir: root.join("staging"),
            state_file: root.join("replication.json"),
        }
    }

    /// Number of documents in the slave's live directory.
    fn slave_docs(paths: &ReplicaPaths) -> u64 {
        let index = Index::open_in_dir(&paths.index_dir).unwrap();
        index.reader().unwrap().searcher().num_docs()
    }

    /// Fails every file request after the first `allowed`.
    struct FlakySource {
        /// Real source.
        inner: Arc<LocalReplicator>,
        /// Requests still allowed to succeed.
        allowed: AtomicUsize,
        /// Only requests for this source are limited, when set.
        only: Option<FileSource>,
    }

    impl ReplicationSource for FlakySource {
        fn master_uuid(&self) -> Uuid {
            self.inner.master_uuid()
        }

        fn check_for_update(
            &self,
            current_version: Option<&str>,
        ) -> Result<Option<ReplicationSession>, IndexError> {
            self.inner.check_for_update(current_version)
        }

        fn obtain_file(
            &self,
            session_id: &str,
            source: FileSource,
            name: &str,
        ) -> Result<Box<dyn Read + Send>, IndexError> {
            if self.only.is_some_and(|only| only != source) {
                return self.inner.obtain_file(session_id, source, name);
            }
            let left = self.allowed.load(Ordering::SeqCst);
            if left == 0 {
                return Err(IndexError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset",
                )));
            }
            self.allowed.store(left - 1, Ordering::SeqCst);
            self.inner.obtain_file(session_id, source, name)
        }

        fn release(&self, session_id: &str) -> Result<(), IndexError> {
            self.inner.release(session_id)
        }
    }

    #[test]
    fn applies_revision_then_reports_up_to_date() {
        let mut master = Master::new();
        master.commit(&["a", "b"]);
        let slave = TempDir::new().unwrap();
        let paths = slave_paths(slave.path());
        let replicator = IndexReplicator::open(master.replicator.clone(), paths.clone()).unwrap();
        assert_eq!(replicator.phase(), ReplicationPhase::Uninitialized);

        let mut reloads = 0;
        let outcome = replicator
            .update_now(|_| {
                reloads += 1;
                Ok(())
            })
            .unwrap();
        assert!(matches!(outcome, UpdateOutcome::Applied(_)));
        assert_eq!(reloads, 1);
        assert_eq!(replicator.phase(), ReplicationPhase::Serving);
        assert_eq!(slave_docs(&paths), 2);
        assert!(paths.state_file.exists());
        assert!(!paths.staging_dir.exists());

        let outcome = replicator.update_now(|_| panic!("no reload expected")).unwrap();
        assert_eq!(outcome, UpdateOutcome::UpToDate);
        assert_eq!(replicator.status().generation_lag, 0);
        assert_eq!(master.replicator.session_count(), 0);
    }

    #[test]
    fn later_revisions_replace_obsolete_files() {
        let mut master = Master::new();
        master.commit(&["a"]);
        let slave = TempDir::new().unwrap();
        let paths = slave_paths(slave.path());
        let replicator = IndexReplicator::open(master.replicator.clone(), paths.clone()).unwrap();
        replicator.update_now(|_| Ok(())).unwrap();

        master.writer.delete_all_documents().unwrap();
        master.commit(&["b", "c", "d"]);
        replicator.update_now(|_| Ok(())).unwrap();
        assert_eq!(slave_docs(&paths), 3);

        let expected = master.replicator.current().unwrap();
        let mut on_disk: Vec<String> = fs::read_dir(&paths.index_dir)
            .unwrap()
            .filter_map(|entry| entry.unwrap().file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect();
        on_disk.sort();
        let mut listed: Vec<String> = expected.index_files.iter().map(|f| f.name.clone()).collect();
        listed.sort();
        assert_eq!(on_disk, listed);
    }

    #[test]
    fn failed_transfer_keeps_previous_revision() {
        let mut master = Master::new();
        master.commit(&["a"]);
        let slave = TempDir::new().unwrap();
        let paths = slave_paths(slave.path());
        let flaky = Arc::new(FlakySource {
            inner: master.replicator.clone(),
            allowed: AtomicUsize::new(usize::MAX),
            only: None,
        });
        let replicator = IndexReplicator::open(flaky.clone(), paths.clone()).unwrap();
        replicator.update_now(|_| Ok(())).unwrap();
        let first = replicator.applied().unwrap();

        master.commit(&["b"]);
        flaky.allowed.store(1, Ordering::SeqCst);
        let err = replicator.update_now(|_| Ok(())).unwrap_err();
        assert!(matches!(err, IndexError::Replication(_)));
        assert_eq!(replicator.applied().unwrap(), first);
        assert_eq!(slave_docs(&paths), 1);
        assert!(!paths.staging_dir.exists());
        let status = replicator.status();
        assert!(status.last_error.is_some());
        assert_eq!(status.phase, ReplicationPhase::Serving);
        assert!(status.generation_lag > 0);

        flaky.allowed.store(usize::MAX, Ordering::SeqCst);
        replicator.update_now(|_| Ok(())).unwrap();
        assert_eq!(slave_docs(&paths), 2);
        assert!(replicator.status().last_error.is_none());
    }

    #[test]
    fn failed_index_transfer_keeps_previous_taxonomy() {
        let mut master = Master::with_taxonomy();
        master.commit(&["a"]);
        let slave = TempDir::new().unwrap();
        let paths = ReplicaPaths {
            taxonomy_dir: Some(slave.path().join("taxonomy")),
            ..slave_paths(slave.path())
        };
        let taxonomy_meta = slave.path().join("taxonomy").join(META_FILE);
        let flaky = Arc::new(FlakySource {
            inner: master.replicator.clone(),
            allowed: AtomicUsize::new(usize::MAX),
            only: Some(FileSource::Index),
        });
        let replicator = IndexReplicator::open(flaky.clone(), paths.clone()).unwrap();
        replicator.update_now(|_| Ok(())).unwrap();
        let first = replicator.applied().unwrap();
        let first_taxonomy = fs::read(&taxonomy_meta).unwrap();

        master.commit(&["b"]);
        flaky.allowed.store(0, Ordering::SeqCst);
        assert!(replicator.update_now(|_| Ok(())).is_err());
        assert_eq!(replicator.applied().unwrap(), first);
        assert_eq!(fs::read(&taxonomy_meta).unwrap(), first_taxonomy);
        assert_eq!(slave_docs(&paths), 1);

        flaky.allowed.store(usize::MAX, Ordering::SeqCst);
        replicator.update_now(|_| Ok(())).unwrap();
        assert_eq!(slave_docs(&paths), 2);
        assert_ne!(fs::read(&taxonomy_meta).unwrap(), first_taxonomy);
        assert!(replicator.applied().unwrap().taxonomy_generation.is_some());
    }

    #[test]
    fn failed_meta_swap_restores_earlier_sources() {
        let temp = TempDir::new().unwrap();
        let swap = |name: &str| {
            let live = temp.path().join(name);
            let staged = temp.path().join("staging").join(name);
            fs::create_dir_all(&live).unwrap();
            fs::create_dir_all(&staged).unwrap();
            fs::write(live.join(META_FILE), format!("old {name}")).unwrap();
            MetaSwap {
                staged: staged.join(META_FILE),
                live: live.join(META_FILE),
                backup: staged.join(PREVIOUS_META_FILE),
            }
        };
        let taxonomy = swap("taxonomy");
        let index = swap("index");
        fs::write(&taxonomy.staged, "new taxonomy").unwrap();

        assert!(promote_metas(&[taxonomy, index]).is_err());
        let read =
            |name: &str| fs::read_to_string(temp.path().join(name).join(META_FILE)).unwrap();
        assert_eq!(read("taxonomy"), "old taxonomy");
        assert_eq!(read("index"), "old index");
    }

    #[test]
    fn restores_applied_revision_after_restart() {
        let mut master = Master::new();
        master.commit(&["a"]);
        let slave = TempDir::new().unwrap();
        let paths = slave_paths(slave.path());
        IndexReplicator::open(master.replicator.clone(), paths.clone())
            .unwrap()
            .update_now(|_| Ok(()))
            .unwrap();

        let reopened = IndexReplicator::open(master.replicator.clone(), paths).unwrap();
        assert_eq!(reopened.phase(), ReplicationPhase::Serving);
        assert_eq!(
            reopened.update_now(|_| Ok(())).unwrap(),
            UpdateOutcome::UpToDate
        );
    }

    #[test]
    fn closed_replicator_refuses_updates() {
        let mut master = Master::new();
        master.commit(&["a"]);
        let slave = TempDir::new().unwrap();
        let replicator =
            IndexReplicator::open(master.replicator.clone(), slave_paths(slave.path())).unwrap();
        replicator.close();
        assert!(matches!(
            replicator.update_now(|_| Ok(())),
            Err(IndexError::Closed(_))
        ));
    }
}
