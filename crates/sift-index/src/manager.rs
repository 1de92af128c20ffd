//! Registry of open indexes.

use std::{
    collections::{BTreeMap, BTreeSet},
    mem,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use sift_config::{Config, IndexRef};
use sift_query::{QueryDef, QueryDefinition};
use tracing::info;

use crate::{
    IndexError,
    collector::CollectorRegistry,
    instance::{IndexInstance, SharedResources},
    replication::LocalReplicator,
    search::{JoinResolver, SearchResponse},
    status::IndexStatus,
};

/// Owns every open index, the search executor and the collector registry.
///
/// Indexes live under `root/<schema>/<index>`. A slave is opened after its master and
/// replicates from the master's publisher; joins resolve their source index here.
pub struct IndexManager {
    /// Directory holding every index.
    root: PathBuf,
    /// Executor and collectors handed to each index.
    shared: SharedResources,
    /// Open indexes by name.
    indexes: RwLock<BTreeMap<IndexRef, Arc<IndexInstance>>>,
    /// Serializes opening and closing.
    open_lock: Mutex<()>,
}

impl IndexManager {
    /// Creates a manager with the built-in collectors.
    pub fn new(root: impl Into<PathBuf>, search_threads: usize) -> Result<Self, IndexError> {
        Ok(Self::with_resources(
            root,
            SharedResources::new(search_threads)?,
        ))
    }

    /// Creates a manager with a caller-built collector registry.
    pub fn with_registry(
        root: impl Into<PathBuf>,
        search_threads: usize,
        registry: CollectorRegistry,
    ) -> Result<Self, IndexError> {
        let shared = SharedResources {
            registry: Arc::new(registry),
            ..SharedResources::new(search_threads)?
        };
        Ok(Self::with_resources(root, shared))
    }

    /// Creates a manager around existing shared resources.
    fn with_resources(root: impl Into<PathBuf>, shared: SharedResources) -> Self {
        Self {
            root: root.into(),
            shared,
            indexes: RwLock::new(BTreeMap::new()),
            open_lock: Mutex::new(()),
        }
    }

    /// Directory holding every index.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Collector factories available to requests.
    pub fn registry(&self) -> &CollectorRegistry {
        &self.shared.registry
    }

    /// Opens an index, or returns it if already open.
    ///
    /// A slave's master must already be open in this manager.
    pub fn open_index(
        &self,
        name: &IndexRef,
        config: &Config,
    ) -> Result<Arc<IndexInstance>, IndexError> {
        let _open = self.open_lock.lock();
        if let Some(index) = self.indexes.read().get(name) {
            return Ok(Arc::clone(index));
        }

        let root = self.root.join(&name.schema).join(&name.index);
        let instance = match config.replication.master_ref()? {
            None => IndexInstance::open_master(name.clone(), &root, config, self.shared.clone())?,
            Some(master) => {
                let source = self.master_source(name, &master)?;
                IndexInstance::open_slave(
                    name.clone(),
                    &root,
                    config,
                    self.shared.clone(),
                    master,
                    source,
                )?
            }
        };
        self.indexes
            .write()
            .insert(name.clone(), Arc::clone(&instance));
        Ok(instance)
    }

    /// Resolves the publisher a slave replicates from.
    fn master_source(
        &self,
        slave: &IndexRef,
        master: &IndexRef,
    ) -> Result<Arc<LocalReplicator>, IndexError> {
        let invalid = |message: &str| IndexError::InvalidMaster {
            index: slave.to_string(),
            master: master.to_string(),
            message: message.to_string(),
        };
        if master == slave {
            return Err(invalid("an index cannot replicate from itself"));
        }
        let instance = self
            .indexes
            .read()
            .get(master)
            .cloned()
            .ok_or_else(|| invalid("master index is not open"))?;
        if instance.is_slave() {
            return Err(invalid("master index is itself a slave"));
        }
        instance.replication_source()
    }

    /// Looks up an open index.
    pub fn index(&self, name: &IndexRef) -> Result<Arc<IndexInstance>, IndexError> {
        self.indexes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::UnknownIndex(name.to_string()))
    }

    /// Looks up an open index by its `schema/index` name.
    pub fn get(&self, name: &str) -> Result<Arc<IndexInstance>, IndexError> {
        let name: IndexRef = name
            .parse()
            .map_err(|_| IndexError::UnknownIndex(name.to_string()))?;
        self.index(&name)
    }

    /// Names of the open indexes.
    pub fn names(&self) -> Vec<IndexRef> {
        self.indexes.read().keys().cloned().collect()
    }

    /// Runs a search, resolving joins against the other indexes.
    pub fn search(
        &self,
        name: &IndexRef,
        definition: &QueryDefinition,
    ) -> Result<SearchResponse, IndexError> {
        self.index(name)?.search(definition, Some(self))
    }

    /// Explains the score of a global doc id.
    pub fn explain(
        &self,
        name: &IndexRef,
        query: &QueryDef,
        doc: u64,
    ) -> Result<JsonValue, IndexError> {
        self.index(name)?.explain(query, doc, Some(self))
    }

    /// Status of every open index.
    pub fn status(&self) -> Vec<IndexStatus> {
        let indexes: Vec<_> = self.indexes.read().values().cloned().collect();
        indexes.iter().map(|index| index.status()).collect()
    }

    /// Closes and forgets an index. Slaves of a master keep their replicated data but stop
    /// receiving updates.
    pub fn close_index(&self, name: &IndexRef) -> Result<(), IndexError> {
        let _open = self.open_lock.lock();
        let index = self
            .indexes
            .write()
            .remove(name)
            .ok_or_else(|| IndexError::UnknownIndex(name.to_string()))?;
        index.close();
        Ok(())
    }

    /// Closes every index, slaves first.
    pub fn close(&self) {
        let _open = self.open_lock.lock();
        let indexes = mem::take(&mut *self.indexes.write());
        if indexes.is_empty() {
            return;
        }
        let (slaves, masters): (Vec<_>, Vec<_>) =
            indexes.into_values().partition(|index| index.is_slave());
        for index in slaves.iter().chain(&masters) {
            index.close();
        }
        info!(indexes = slaves.len() + masters.len(), "index manager closed");
    }
}

impl JoinResolver for IndexManager {
    fn join_values(
        &self,
        from_index: &str,
        from_field: &str,
        query: &QueryDef,
    ) -> Result<BTreeSet<String>, IndexError> {
        self.get(from_index)?
            .string_values(from_field, query, Some(self))
    }
}

impl Drop for IndexManager {
    fn drop(&mut self) {
        self.close();
    }
}
