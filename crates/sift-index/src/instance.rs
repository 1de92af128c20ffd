//! One open index: data index, taxonomy, analyzers, reader generations and replication role.
//!
//! Directory layout under the index root:
//!
//! ```text
//! data/                   Tantivy data index
//! taxonomy/               taxonomy index, when a facet dimension needs one
//! instance.json           identity of the instance
//! replication.json        last applied revision (slaves)
//! replication-staging/    files in transfer (slaves)
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    slice,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sift_config::{AnalyzerDefinition, Config, FieldKind, IndexRef};
use sift_query::{QueryDef, QueryDefinition};
use tantivy::{
    Executor, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term,
    collector::TopDocs, directory::MmapDirectory, query::TermQuery, schema::IndexRecordOption,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    IndexError,
    analyzer::{UpdatableAnalyzers, build_analyzer_from_definition},
    collector::CollectorRegistry,
    document::map_document,
    replication::{
        IndexReplicator, LocalReplicator, META_FILE, PeriodicTask, ReplicaPaths,
        ReplicationSource, Revision, UpdateOutcome, revision_version,
    },
    schema::FieldMap,
    search::{
        self, JoinResolver, QueryContext, SearchDefaults, SearchResponse, collect_string_values,
        stored_document,
    },
    snapshot::IndexSnapshot,
    status::{IndexRole, IndexStatus},
    taxonomy::{TaxonomyReader, TaxonomyWriter},
};

/// Thread name prefix of the search executor.
const SEARCH_THREAD_PREFIX: &str = "sift-search-";

/// Resources shared by every index of a manager.
#[derive(Clone)]
pub struct SharedResources {
    /// Pool running segment collection.
    pub executor: Arc<Executor>,
    /// Named collector factories.
    pub registry: Arc<CollectorRegistry>,
}

impl SharedResources {
    /// Creates an executor with `search_threads` threads (inline when zero) and the built-in
    /// collectors.
    pub fn new(search_threads: usize) -> Result<Self, IndexError> {
        let executor = if search_threads == 0 {
            Executor::single_thread()
        } else {
            Executor::multi_thread(search_threads, SEARCH_THREAD_PREFIX)
                .map_err(|e| IndexError::search(&e))?
        };
        Ok(Self {
            executor: Arc::new(executor),
            registry: Arc::new(CollectorRegistry::default()),
        })
    }
}

/// Paths of an index root.
#[derive(Debug, Clone)]
struct InstancePaths {
    /// Data index.
    data: PathBuf,
    /// Taxonomy index.
    taxonomy: PathBuf,
    /// Identity file.
    instance_file: PathBuf,
    /// Replication record.
    replication_file: PathBuf,
    /// Replication scratch space.
    staging: PathBuf,
}

impl InstancePaths {
    /// Lays out `root`.
    fn new(root: &Path) -> Self {
        Self {
            data: root.join("data"),
            taxonomy: root.join("taxonomy"),
            instance_file: root.join("instance.json"),
            replication_file: root.join("replication.json"),
            staging: root.join("replication-staging"),
        }
    }

    /// Directories a slave replicates into.
    fn replica(&self) -> ReplicaPaths {
        ReplicaPaths {
            index_dir: self.data.clone(),
            taxonomy_dir: Some(self.taxonomy.clone()),
            staging_dir: self.staging.clone(),
            state_file: self.replication_file.clone(),
        }
    }
}

/// Persistent identity of an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceMeta {
    /// Unique id, regenerated only when the index root is recreated.
    uuid: Uuid,
    /// Creation time.
    created_at: DateTime<Utc>,
}

impl InstanceMeta {
    /// Reads the identity file, creating it on first open.
    fn load_or_create(path: &Path) -> Result<Self, IndexError> {
        if path.exists() {
            return Ok(serde_json::from_str(&fs::read_to_string(path)?)?);
        }
        let meta = Self {
            uuid: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        fs::write(path, serde_json::to_string_pretty(&meta)?)?;
        Ok(meta)
    }
}

/// Writer side of a master.
struct WriteState {
    /// Data index writer.
    writer: IndexWriter,
    /// Taxonomy writer, when a dimension needs one.
    taxonomy: Option<TaxonomyWriter>,
    /// Writes since the last commit.
    pending: usize,
}

/// What an instance does besides serving searches.
enum Role {
    /// Accepts writes and publishes revisions.
    Master {
        /// Writers, serialized.
        write: Mutex<WriteState>,
        /// Revision publisher.
        replicator: Arc<LocalReplicator>,
    },
    /// Mirrors a master.
    Slave {
        /// The master.
        master: IndexRef,
        /// Revision puller.
        replicator: IndexReplicator,
    },
}

/// An open index.
pub struct IndexInstance {
    /// `schema/index` name.
    name: IndexRef,
    /// Directory layout.
    paths: InstancePaths,
    /// Identity.
    uuid: Uuid,
    /// Data index.
    index: Index,
    /// Reader of the data index, reloaded explicitly.
    reader: IndexReader,
    /// Taxonomy index, once one exists.
    taxonomy_index: Mutex<Option<Index>>,
    /// Field definitions bound to the schema.
    fields: Arc<FieldMap>,
    /// Analyzers registered with the engine.
    index_analyzers: UpdatableAnalyzers,
    /// Analyzers applied to query text.
    query_analyzers: UpdatableAnalyzers,
    /// Serving reader generation.
    snapshot: RwLock<Arc<IndexSnapshot>>,
    /// Executor and collectors.
    shared: SharedResources,
    /// Request defaults.
    defaults: SearchDefaults,
    /// Master or slave.
    role: Role,
    /// Background replication, for slaves with a pull interval.
    periodic: Mutex<Option<PeriodicTask>>,
    /// Set by `close`.
    closed: AtomicBool,
}

impl IndexInstance {
    /// Opens or creates a master index under `root`.
    pub fn open_master(
        name: IndexRef,
        root: &Path,
        config: &Config,
        shared: SharedResources,
    ) -> Result<Arc<Self>, IndexError> {
        let paths = InstancePaths::new(root);
        fs::create_dir_all(&paths.data)?;
        let uuid = InstanceMeta::load_or_create(&paths.instance_file)?.uuid;

        let schema = FieldMap::new(config)?.schema().clone();
        let dir = MmapDirectory::open(&paths.data).map_err(|e| {
            let err: tantivy::TantivyError = e.into();
            IndexError::open_index(paths.data.clone(), &err)
        })?;
        let index = Index::open_or_create(dir, schema)
            .map_err(|e| IndexError::open_index(paths.data.clone(), &e))?;
        let fields = Arc::new(FieldMap::for_schema(config, index.schema())?);
        let index_analyzers =
            UpdatableAnalyzers::registered(&config.analyzers, index.tokenizers().clone())?;
        let writer = index
            .writer(config.index.writer_heap_bytes)
            .map_err(|e| IndexError::open_index(paths.data.clone(), &e))?;
        let taxonomy = if config.index.enable_taxonomy && fields.needs_taxonomy() {
            Some(TaxonomyWriter::open(&paths.taxonomy)?)
        } else {
            None
        };
        let taxonomy_index = taxonomy.as_ref().map(|writer| writer.index().clone());
        let replicator = Arc::new(LocalReplicator::new(
            uuid,
            config.replication.session_expiration,
        ));

        let reader = manual_reader(&index, &paths.data)?;
        let snapshot = load_snapshot(&index, &reader, taxonomy_index.as_ref())?;
        let instance = Self {
            name,
            uuid,
            index,
            reader,
            taxonomy_index: Mutex::new(taxonomy_index),
            fields,
            index_analyzers,
            query_analyzers: UpdatableAnalyzers::new(&config.analyzers)?,
            snapshot: RwLock::new(Arc::new(snapshot)),
            shared,
            defaults: defaults(config),
            role: Role::Master {
                write: Mutex::new(WriteState {
                    writer,
                    taxonomy,
                    pending: 0,
                }),
                replicator: Arc::clone(&replicator),
            },
            periodic: Mutex::new(None),
            closed: AtomicBool::new(false),
            paths,
        };
        replicator.publish(instance.capture_revision()?)?;
        info!(index = %instance.name, uuid = %uuid, "master index opened");
        Ok(Arc::new(instance))
    }

    /// Opens a slave index under `root`, replicating from `source`.
    ///
    /// A slave that never completed a replication syncs before it opens.
    pub fn open_slave(
        name: IndexRef,
        root: &Path,
        config: &Config,
        shared: SharedResources,
        master: IndexRef,
        source: Arc<dyn ReplicationSource>,
    ) -> Result<Arc<Self>, IndexError> {
        let paths = InstancePaths::new(root);
        fs::create_dir_all(root)?;
        let uuid = InstanceMeta::load_or_create(&paths.instance_file)?.uuid;

        let replicator = IndexReplicator::open(source, paths.replica())?;
        if replicator.applied().is_none() {
            info!(index = %name, master = %master, "initial replication");
            replicator.update_now(|_| Ok(()))?;
        }

        let index = Index::open_in_dir(&paths.data)
            .map_err(|e| IndexError::open_index(paths.data.clone(), &e))?;
        let fields = Arc::new(FieldMap::for_schema(config, index.schema())?);
        let index_analyzers =
            UpdatableAnalyzers::registered(&config.analyzers, index.tokenizers().clone())?;
        let taxonomy_index = open_taxonomy(&paths.taxonomy)?;
        let reader = manual_reader(&index, &paths.data)?;
        let snapshot = load_snapshot(&index, &reader, taxonomy_index.as_ref())?;

        let instance = Arc::new(Self {
            name,
            uuid,
            index,
            reader,
            taxonomy_index: Mutex::new(taxonomy_index),
            fields,
            index_analyzers,
            query_analyzers: UpdatableAnalyzers::new(&config.analyzers)?,
            snapshot: RwLock::new(Arc::new(snapshot)),
            shared,
            defaults: defaults(config),
            role: Role::Slave {
                master,
                replicator,
            },
            periodic: Mutex::new(None),
            closed: AtomicBool::new(false),
            paths,
        });

        if let Some(interval) = config.replication.pull_interval() {
            let weak = Arc::downgrade(&instance);
            let task = PeriodicTask::start(
                format!("sift-repl-{}", instance.name.index),
                interval,
                move || {
                    let Some(instance) = weak.upgrade() else {
                        return;
                    };
                    if let Err(e) = instance.replication_update_now() {
                        debug!(index = %instance.name, error = %e, "periodic replication failed");
                    }
                },
            )?;
            *instance.periodic.lock() = Some(task);
        }
        info!(index = %instance.name, uuid = %uuid, "slave index opened");
        Ok(instance)
    }

    /// `schema/index` name.
    pub fn name(&self) -> &IndexRef {
        &self.name
    }

    /// Identity of the instance.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// True for replication slaves.
    pub fn is_slave(&self) -> bool {
        matches!(self.role, Role::Slave { .. })
    }

    /// Field definitions bound to the schema.
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Serving reader generation.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Revision publisher of a master, handed to its slaves.
    pub fn replication_source(&self) -> Result<Arc<LocalReplicator>, IndexError> {
        match &self.role {
            Role::Master { replicator, .. } => Ok(Arc::clone(replicator)),
            Role::Slave { .. } => Err(IndexError::Replication(format!(
                "index '{}' is a slave and cannot be replicated from",
                self.name
            ))),
        }
    }

    /// Adds or replaces one document.
    pub fn post_document(&self, document: &Map<String, JsonValue>) -> Result<(), IndexError> {
        self.post_documents(slice::from_ref(document))
    }

    /// Adds or replaces documents. A document with a `$id` replaces the live document with
    /// the same id once committed.
    ///
    /// The batch is mapped before anything is queued: if one document is invalid, none of
    /// the batch reaches the writer. Taxonomy entries created while mapping are dropped too
    /// unless earlier batches are still waiting for a commit.
    pub fn post_documents(&self, documents: &[Map<String, JsonValue>]) -> Result<(), IndexError> {
        let mut state = self.write_state()?;
        let WriteState {
            writer,
            taxonomy,
            pending,
        } = &mut *state;
        let mapped = documents
            .iter()
            .map(|object| map_document(&self.fields, taxonomy.as_mut(), object))
            .collect::<Result<Vec<_>, _>>();
        let mapped = match mapped {
            Ok(mapped) => mapped,
            Err(e) => {
                if *pending == 0
                    && let Some(taxonomy) = taxonomy.as_mut()
                {
                    taxonomy.rollback()?;
                }
                debug!(index = %self.name, error = %e, "document batch rejected");
                return Err(e);
            }
        };
        for mapped in mapped {
            if let Some(id) = &mapped.id {
                writer.delete_term(Term::from_field_text(self.fields.id, id));
            }
            writer
                .add_document(mapped.doc)
                .map_err(|e| IndexError::write(&e))?;
            *pending += 1;
        }
        Ok(())
    }

    /// Deletes every document at the next commit.
    pub fn delete_all(&self) -> Result<(), IndexError> {
        let mut state = self.write_state()?;
        state
            .writer
            .delete_all_documents()
            .map_err(|e| IndexError::write(&e))?;
        state.pending += 1;
        Ok(())
    }

    /// Stored fields of the live document with this `$id`.
    pub fn get_document(&self, id: &str) -> Result<Option<Map<String, JsonValue>>, IndexError> {
        self.ensure_open()?;
        let snapshot = self.snapshot();
        let searcher = snapshot.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.fields.id, id),
            IndexRecordOption::Basic,
        );
        let top = searcher
            .search(&query, &TopDocs::with_limit(1))
            .map_err(|e| IndexError::search(&e))?;
        let Some((_, address)) = top.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(address).map_err(|e| IndexError::search(&e))?;
        Ok(Some(stored_document(self.fields.schema(), &doc)))
    }

    /// Commits pending writes, taxonomy first, then publishes the new revision.
    ///
    /// Returns `false` when there was nothing to commit.
    pub fn commit(&self) -> Result<bool, IndexError> {
        let Role::Master { replicator, .. } = &self.role else {
            return Err(IndexError::ReadOnly(self.name.to_string()));
        };
        let mut state = self.write_state()?;
        let taxonomy_pending = state
            .taxonomy
            .as_ref()
            .is_some_and(TaxonomyWriter::has_pending);
        if state.pending == 0 && !taxonomy_pending {
            return Ok(false);
        }
        if taxonomy_pending && let Some(taxonomy) = state.taxonomy.as_mut() {
            taxonomy.commit()?;
        }
        let opstamp = state
            .writer
            .commit()
            .map_err(|e| IndexError::commit(&e))?;
        let writes = state.pending;
        state.pending = 0;

        self.reload()?;
        replicator.publish(self.capture_revision()?)?;
        info!(index = %self.name, opstamp, writes, "index committed");
        Ok(true)
    }

    /// Runs a search request. `joins` resolves the other indexes a join query reads.
    pub fn search(
        &self,
        definition: &QueryDefinition,
        joins: Option<&dyn JoinResolver>,
    ) -> Result<SearchResponse, IndexError> {
        let context = self.context(joins)?;
        search::search(&context, definition)
    }

    /// Explains the score of a global doc id for a query.
    pub fn explain(
        &self,
        query: &QueryDef,
        doc: u64,
        joins: Option<&dyn JoinResolver>,
    ) -> Result<JsonValue, IndexError> {
        let context = self.context(joins)?;
        search::explain(&context, query, doc)
    }

    /// Distinct values of a sortable string field over the matches of `query`.
    pub fn string_values(
        &self,
        field: &str,
        query: &QueryDef,
        joins: Option<&dyn JoinResolver>,
    ) -> Result<BTreeSet<String>, IndexError> {
        let indexed = self.fields.indexed(field)?;
        if indexed.definition.kind != FieldKind::String || !indexed.definition.sortable {
            return Err(IndexError::FieldUsage {
                field: field.to_string(),
                message: "join sources must be sortable string fields".to_string(),
            });
        }
        query.validate()?;
        let context = self.context(joins)?;
        let compiled = context.compiler().compile(query)?;
        collect_string_values(context.snapshot.searcher(), field, &*compiled)
    }

    /// Pulls the master's current revision now.
    pub fn replication_update_now(&self) -> Result<UpdateOutcome, IndexError> {
        self.ensure_open()?;
        let Role::Slave { replicator, .. } = &self.role else {
            return Err(IndexError::Replication(format!(
                "index '{}' is a master",
                self.name
            )));
        };
        replicator.update_now(|_| self.reload())
    }

    /// Swaps in new analyzer definitions. Requests already running keep their analyzers.
    pub fn update_analyzers(
        &self,
        definitions: &BTreeMap<String, AnalyzerDefinition>,
    ) -> Result<(), IndexError> {
        for definition in definitions.values() {
            build_analyzer_from_definition(definition)?;
        }
        self.index_analyzers.update(definitions)?;
        self.query_analyzers.update(definitions)
    }

    /// Current status.
    pub fn status(&self) -> IndexStatus {
        let snapshot = self.snapshot();
        let (role, pending_writes, replication_sessions, replication) = match &self.role {
            Role::Master { write, replicator } => (
                IndexRole::Master,
                Some(write.lock().pending),
                Some(replicator.session_count()),
                None,
            ),
            Role::Slave { master, replicator } => (
                IndexRole::Slave {
                    master: master.to_string(),
                },
                None,
                None,
                Some(replicator.status()),
            ),
        };
        IndexStatus {
            name: self.name.to_string(),
            uuid: self.uuid,
            role,
            num_docs: snapshot.num_docs(),
            num_segments: snapshot.segment_readers().len(),
            version: revision_version(snapshot.generation(), snapshot.taxonomy_generation()),
            index_generation: snapshot.generation(),
            taxonomy_generation: snapshot.taxonomy_generation(),
            searcher_generation: snapshot.searcher().generation().generation_id(),
            active_index_analyzers: self.index_analyzers.active_count(),
            active_query_analyzers: self.query_analyzers.active_count(),
            pending_writes,
            replication_sessions,
            replication,
        }
    }

    /// Stops background replication and refuses further requests.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let periodic = self.periodic.lock().take();
        drop(periodic);
        if let Role::Slave { replicator, .. } = &self.role {
            replicator.close();
        }
        info!(index = %self.name, "index closed");
    }

    /// Fails once the instance is closed.
    fn ensure_open(&self) -> Result<(), IndexError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(IndexError::Closed(self.name.to_string()))
        } else {
            Ok(())
        }
    }

    /// Locks the writers of a master.
    fn write_state(&self) -> Result<MutexGuard<'_, WriteState>, IndexError> {
        self.ensure_open()?;
        match &self.role {
            Role::Master { write, .. } => Ok(write.lock()),
            Role::Slave { .. } => Err(IndexError::ReadOnly(self.name.to_string())),
        }
    }

    /// Pins everything a request reads.
    fn context<'a>(
        &self,
        joins: Option<&'a dyn JoinResolver>,
    ) -> Result<QueryContext<'a>, IndexError> {
        self.ensure_open()?;
        Ok(QueryContext {
            snapshot: self.snapshot(),
            fields: Arc::clone(&self.fields),
            index_analyzers: self.index_analyzers.acquire(),
            query_analyzers: self.query_analyzers.acquire(),
            executor: Arc::clone(&self.shared.executor),
            registry: Arc::clone(&self.shared.registry),
            joins,
            defaults: self.defaults,
        })
    }

    /// Builds a snapshot of the latest committed generation and swaps it in.
    fn reload(&self) -> Result<(), IndexError> {
        let taxonomy = {
            let mut slot = self.taxonomy_index.lock();
            if slot.is_none() && self.is_slave() {
                *slot = open_taxonomy(&self.paths.taxonomy)?;
            }
            slot.clone()
        };
        let snapshot = load_snapshot(&self.index, &self.reader, taxonomy.as_ref())?;
        debug!(
            index = %self.name,
            generation = snapshot.generation(),
            num_docs = snapshot.num_docs(),
            "reader reloaded"
        );
        *self.snapshot.write() = Arc::new(snapshot);
        Ok(())
    }

    /// Captures the last commit as a revision.
    fn capture_revision(&self) -> Result<Revision, IndexError> {
        let taxonomy = self.taxonomy_index.lock().clone();
        Revision::capture(
            &self.index,
            &self.paths.data,
            taxonomy
                .as_ref()
                .map(|index| (index, self.paths.taxonomy.as_path())),
        )
    }
}

/// Request defaults from the index settings.
fn defaults(config: &Config) -> SearchDefaults {
    SearchDefaults {
        rows: config.index.default_rows,
        facet_top: config.index.default_facet_top,
    }
}

/// A reader that only moves to a new generation on `reload`.
fn manual_reader(index: &Index, path: &Path) -> Result<IndexReader, IndexError> {
    index
        .reader_builder()
        .reload_policy(ReloadPolicy::Manual)
        .try_into()
        .map_err(|e| IndexError::open_index(path.to_path_buf(), &e))
}

/// Opens a replicated taxonomy, if one was installed.
fn open_taxonomy(path: &Path) -> Result<Option<Index>, IndexError> {
    if !path.join(META_FILE).exists() {
        return Ok(None);
    }
    Index::open_in_dir(path)
        .map(Some)
        .map_err(|e| IndexError::open_index(path.to_path_buf(), &e))
}

/// Reloads `reader` and pairs it with the taxonomy generation committed with it.
///
/// The taxonomy is read after the data index, so it is never older than the data it labels.
fn load_snapshot(
    index: &Index,
    reader: &IndexReader,
    taxonomy: Option<&Index>,
) -> Result<IndexSnapshot, IndexError> {
    reader.reload().map_err(|e| IndexError::refresh(&e))?;
    let searcher = reader.searcher();
    let generation = index
        .load_metas()
        .map_err(|e| IndexError::refresh(&e))?
        .opstamp;
    let taxonomy = match taxonomy {
        Some(taxonomy) => {
            let generation = taxonomy
                .load_metas()
                .map_err(|e| IndexError::refresh(&e))?
                .opstamp;
            Some((Arc::new(TaxonomyReader::open(taxonomy)?), generation))
        }
        None => None,
    };
    Ok(IndexSnapshot::new(searcher, generation, taxonomy))
}
