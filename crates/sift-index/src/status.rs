//! Point-in-time status of an index instance.

use serde::Serialize;
use uuid::Uuid;

use crate::replication::ReplicationStatus;

/// Whether an index accepts writes or mirrors another index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum IndexRole {
    /// Accepts writes and publishes revisions.
    Master,
    /// Read-only copy of a master.
    Slave {
        /// The master, as `schema/index`.
        master: String,
    },
}

/// What an index reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    /// Index name, as `schema/index`.
    pub name: String,
    /// Identity of this index instance.
    pub uuid: Uuid,
    /// Master or slave.
    #[serde(flatten)]
    pub role: IndexRole,
    /// Live documents in the serving generation.
    pub num_docs: u64,
    /// Segments in the serving generation.
    pub num_segments: usize,
    /// Revision identifier of the serving generation.
    pub version: String,
    /// Commit opstamp of the data index.
    pub index_generation: u64,
    /// Commit opstamp of the taxonomy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taxonomy_generation: Option<u64>,
    /// Reader generation, bumped on every reload.
    pub searcher_generation: u64,
    /// Index-time analyzer sets alive.
    pub active_index_analyzers: usize,
    /// Query-time analyzer sets alive.
    pub active_query_analyzers: usize,
    /// Writes not yet committed (masters).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_writes: Option<usize>,
    /// Replication sessions open on this master.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_sessions: Option<usize>,
    /// Replication state (slaves).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationStatus>,
}

impl IndexStatus {
    /// Generations a slave is behind its master; zero on masters.
    pub fn replication_lag(&self) -> u64 {
        self.replication
            .as_ref()
            .map_or(0, |replication| replication.generation_lag)
    }
}
