//! Master to slave replication of committed revisions.
//!
//! A master publishes a [`Revision`] after every commit: the files of its data index and
//! taxonomy at that commit. A slave asks its [`ReplicationSource`] whether a newer revision
//! exists, receives a session pinning it, copies the files it lacks and installs them
//! atomically. The master's files stay on disk while a session holds the revision.

mod client;
mod periodic;
mod revision;
mod source;

pub use client::{
    AppliedRevision, IndexReplicator, ReplicaPaths, ReplicationPhase, ReplicationStatus,
    UpdateOutcome,
};
pub use periodic::PeriodicTask;
pub use revision::{
    FileSource, META_FILE, Revision, RevisionDescriptor, RevisionFile, revision_version,
};
pub use source::{LocalReplicator, ReplicationSession, ReplicationSource};
