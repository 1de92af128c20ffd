//! The master side of replication.

use std::{
    cmp::Ordering,
    collections::HashMap,
    io::Read,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::revision::{FileSource, Revision, RevisionDescriptor};
use crate::IndexError;

/// A revision handed to a slave, valid until released or expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationSession {
    /// Session identifier, used for every file request.
    pub id: String,
    /// The revision the session pins.
    pub descriptor: RevisionDescriptor,
}

/// Where a slave pulls revisions from.
///
/// Implemented by [`LocalReplicator`] for masters in the same process; a remote transport
/// implements the same four operations.
pub trait ReplicationSource: Send + Sync {
    /// Identity of the master index. A slave holding a revision of another master (a master
    /// that was recreated) must start over.
    fn master_uuid(&self) -> Uuid;

    /// Opens a session on the current revision unless it is `current_version`.
    fn check_for_update(
        &self,
        current_version: Option<&str>,
    ) -> Result<Option<ReplicationSession>, IndexError>;

    /// Streams one file of a session's revision.
    fn obtain_file(
        &self,
        session_id: &str,
        source: FileSource,
        name: &str,
    ) -> Result<Box<dyn Read + Send>, IndexError>;

    /// Ends a session, unpinning its revision.
    fn release(&self, session_id: &str) -> Result<(), IndexError>;
}

/// A session and the revision it pins.
struct SessionEntry {
    /// Pinned revision.
    revision: Arc<Revision>,
    /// Last time the session was used.
    last_access: Instant,
}

/// Mutable state of a [`LocalReplicator`].
#[derive(Default)]
struct ReplicatorState {
    /// Latest published revision.
    current: Option<Arc<Revision>>,
    /// Open sessions by id.
    sessions: HashMap<String, SessionEntry>,
}

impl ReplicatorState {
    /// Drops sessions idle for longer than `expiration`.
    fn expire(&mut self, expiration: Duration) {
        let now = Instant::now();
        self.sessions.retain(|id, entry| {
            let alive = now.duration_since(entry.last_access) < expiration;
            if !alive {
                warn!(
                    session = %id,
                    version = entry.revision.version(),
                    "replication session expired"
                );
            }
            alive
        });
    }
}

/// Publishes a master's revisions and serves them to slaves.
///
/// A revision stays alive while it is current or pinned by a session; its files are kept
/// by the writer for exactly that long.
pub struct LocalReplicator {
    /// Identity of the master index.
    uuid: Uuid,
    /// Inactivity after which a session is dropped.
    expiration: Duration,
    /// Current revision and open sessions.
    state: Mutex<ReplicatorState>,
}

impl LocalReplicator {
    /// Creates a replicator for the master identified by `uuid`.
    pub fn new(uuid: Uuid, expiration: Duration) -> Self {
        Self {
            uuid,
            expiration,
            state: Mutex::new(ReplicatorState::default()),
        }
    }

    /// Makes `revision` the current one.
    ///
    /// Returns `false` when the revision is already current. Publishing a revision older
    /// than the current one is an error.
    pub fn publish(&self, revision: Revision) -> Result<bool, IndexError> {
        let mut state = self.state.lock();
        if let Some(current) = &state.current {
            match revision.descriptor().compare_generations(current.descriptor()) {
                Ordering::Less => {
                    return Err(IndexError::Replication(format!(
                        "cannot publish revision {} older than current {}",
                        revision.version(),
                        current.version()
                    )));
                }
                Ordering::Equal => return Ok(false),
                Ordering::Greater => {}
            }
        }
        info!(
            version = revision.version(),
            index_files = revision.descriptor().index_files.len(),
            taxonomy_files = revision.descriptor().taxonomy_files.len(),
            "revision published"
        );
        state.current = Some(Arc::new(revision));
        Ok(true)
    }

    /// Description of the current revision.
    pub fn current(&self) -> Option<RevisionDescriptor> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|revision| revision.descriptor().clone())
    }

    /// Number of sessions still open.
    pub fn session_count(&self) -> usize {
        let mut state = self.state.lock();
        state.expire(self.expiration);
        state.sessions.len()
    }
}

impl ReplicationSource for LocalReplicator {
    fn master_uuid(&self) -> Uuid {
        self.uuid
    }

    fn check_for_update(
        &self,
        current_version: Option<&str>,
    ) -> Result<Option<ReplicationSession>, IndexError> {
        let mut state = self.state.lock();
        state.expire(self.expiration);
        let Some(current) = state.current.clone() else {
            return Ok(None);
        };
        if current_version == Some(current.version()) {
            return Ok(None);
        }

        let id = Uuid::new_v4().to_string();
        let descriptor = current.descriptor().clone();
        debug!(session = %id, version = current.version(), "replication session opened");
        state.sessions.insert(
            id.clone(),
            SessionEntry {
                revision: current,
                last_access: Instant::now(),
            },
        );
        Ok(Some(ReplicationSession { id, descriptor }))
    }

    fn obtain_file(
        &self,
        session_id: &str,
        source: FileSource,
        name: &str,
    ) -> Result<Box<dyn Read + Send>, IndexError> {
        let revision = {
            let mut state = self.state.lock();
            state.expire(self.expiration);
            let entry = state
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| IndexError::UnknownSession(session_id.to_string()))?;
            entry.last_access = Instant::now();
            Arc::clone(&entry.revision)
        };
        revision.open(source, name)
    }

    fn release(&self, session_id: &str) -> Result<(), IndexError> {
        if self.state.lock().sessions.remove(session_id).is_some() {
            debug!(session = %session_id, "replication session released");
        }
        Ok(())
    }
}
