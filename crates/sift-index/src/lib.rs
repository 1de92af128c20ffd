//! Tantivy-based search index for sift.
//!
//! This crate runs searches over configured indexes and keeps slave copies in sync. It
//! handles:
//! - Query compilation and segment-parallel collection with named collectors
//! - Facet counting over sorted-set, taxonomy and association dimensions, query-backed
//!   dimensions and drill sideways
//! - Sorting, paging, highlights, returned fields, explain and per-phase timings
//! - Document ingestion with taxonomy ordinals and drill-down terms
//! - Hot-swappable analyzers
//! - Master to slave replication of committed revisions
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use sift_config::{Config, FieldDefinition, FieldKind, IndexRef};
//! use sift_index::IndexManager;
//! use sift_query::{FacetDefinition, QueryDef, QueryDefinition};
//!
//! let config = Config::default()
//!     .with_field("name", FieldDefinition::new(FieldKind::Text).stored())
//!     .with_field("category", FieldDefinition::new(FieldKind::SortedSetFacet));
//!
//! let manager = IndexManager::new("./indexes", 4).unwrap();
//! let name = IndexRef::new("shop", "catalog");
//! let index = manager.open_index(&name, &config).unwrap();
//!
//! let doc = json!({"$id": "1", "name": "Red shoes", "category": "shoes"});
//! index.post_document(doc.as_object().unwrap()).unwrap();
//! index.commit().unwrap();
//!
//! let request = QueryDefinition::of(QueryDef::matching("name", "shoes"))
//!     .facet("category", FacetDefinition::top(10));
//! let response = manager.search(&name, &request).unwrap();
//! println!("{} hits", response.total_hits);
//! ```

#![warn(missing_docs)]

mod analyzer;
mod collector;
mod document;
mod error;
mod facet;
mod instance;
mod manager;
mod replication;
mod schema;
mod search;
mod snapshot;
mod status;
mod taxonomy;
#[cfg(test)]
mod test_support;

pub use analyzer::{
    AnalyzerHandle, AnalyzerSet, RAW_ANALYZER, UpdatableAnalyzers, build_analyzer,
    build_analyzer_from_definition, parse_language, tokenize,
};
pub use collector::{
    ClassicCollector, ClassicFactory, CollectorFactory, CollectorRegistry, CollectorValue,
    ParallelCollector, ParallelFactory, PartialCollector, SortValue, field_argument,
    optional_usize_argument,
};
pub use document::{MappedDocument, map_document};
pub use error::{ErrorKind, IndexError};
pub use facet::{FacetBackend, FacetNumber, FacetResult};
pub use instance::{IndexInstance, SharedResources};
pub use manager::IndexManager;
pub use replication::{
    AppliedRevision, FileSource, IndexReplicator, LocalReplicator, META_FILE, PeriodicTask,
    ReplicaPaths, ReplicationPhase, ReplicationSession, ReplicationSource, ReplicationStatus,
    Revision, RevisionDescriptor, RevisionFile, UpdateOutcome, revision_version,
};
pub use schema::{FieldMap, PATH_DELIMITER, encode_path, reserved};
pub use search::{
    JoinResolver, QueryContext, SearchDefaults, SearchHit, SearchResponse, TimeTracker,
};
pub use snapshot::IndexSnapshot;
pub use status::{IndexRole, IndexStatus};
pub use taxonomy::{TaxonomyReader, TaxonomyWriter};
