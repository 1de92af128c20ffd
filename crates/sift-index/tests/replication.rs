//! Master to slave replication through the index manager.

// Integration tests live outside cfg(test) by design
#![allow(clippy::tests_outside_test_module)]

use std::{
    thread,
    time::{Duration, Instant},
};

use serde_json::{Map, Value, json};
use sift_config::{Config, IndexRef};
use sift_index::{IndexError, IndexManager, IndexRole, ReplicationPhase, UpdateOutcome};
use sift_query::{FacetDefinition, QueryDef, QueryDefinition};
use tempfile::TempDir;

/// Fields shared by master and slave.
const FIELDS: &str = r#"
[analyzers.english]
language = "english"

[fields.title]
kind = "text"
analyzer = "english"
stored = true

[fields.cat]
kind = "sorted_set_facet"
multi_valued = true

[fields.topic]
kind = "taxonomy_facet"
hierarchical = true
"#;

/// Master config.
fn master_config() -> Config {
    Config::from_toml_str(FIELDS).unwrap()
}

/// Slave config pulling from `news/master`, every `interval_secs` when non-zero.
fn slave_config(interval_secs: u64) -> Config {
    Config::from_toml_str(&format!(
        "[replication]\nmaster = \"news/master\"\ninterval_secs = {interval_secs}\n{FIELDS}"
    ))
    .unwrap()
}

/// An article.
fn article(id: &str, title: &str, cat: &str, topic: &[&str]) -> Map<String, Value> {
    json!({"$id": id, "title": title, "cat": cat, "topic": topic})
        .as_object()
        .unwrap()
        .clone()
}

/// Names of the two indexes.
fn names() -> (IndexRef, IndexRef) {
    (
        IndexRef::new("news", "master"),
        IndexRef::new("news", "slave"),
    )
}

#[test]
fn slave_follows_master_commits() {
    let temp = TempDir::new().unwrap();
    let manager = IndexManager::new(temp.path(), 2).unwrap();
    let (master_name, slave_name) = names();
    let master = manager.open_index(&master_name, &master_config()).unwrap();
    master
        .post_documents(&[
            article("a", "Rates rise", "economy", &["world", "europe"]),
            article("b", "Comet spotted", "science", &["space"]),
        ])
        .unwrap();
    master.commit().unwrap();

    let slave = manager.open_index(&slave_name, &slave_config(0)).unwrap();
    assert!(slave.is_slave());
    assert_eq!(slave.snapshot().num_docs(), 2);
    assert_eq!(slave.status().version, master.status().version);

    let request = QueryDefinition::of(QueryDef::matching("title", "comet"))
        .facet("topic", FacetDefinition::top(10));
    let from_master = manager.search(&master_name, &request).unwrap();
    let from_slave = manager.search(&slave_name, &request).unwrap();
    assert_eq!(from_slave.total_hits, 1);
    assert_eq!(from_slave.hits[0].id, from_master.hits[0].id);
    assert_eq!(from_slave.facets, from_master.facets);

    master
        .post_document(&article("c", "Rates fall", "economy", &["world", "asia"]))
        .unwrap();
    master.commit().unwrap();
    assert_eq!(slave.snapshot().num_docs(), 2);

    let outcome = slave.replication_update_now().unwrap();
    assert_eq!(outcome, UpdateOutcome::Applied(master.status().version));
    assert_eq!(slave.snapshot().num_docs(), 3);
    assert_eq!(
        slave.replication_update_now().unwrap(),
        UpdateOutcome::UpToDate
    );

    let status = slave.status();
    assert_eq!(
        status.role,
        IndexRole::Slave {
            master: master_name.to_string()
        }
    );
    assert_eq!(status.replication_lag(), 0);
    let replication = status.replication.unwrap();
    assert_eq!(replication.phase, ReplicationPhase::Serving);
    assert_eq!(replication.master_uuid, master.uuid());
    assert!(replication.last_error.is_none());
    assert!(slave.get_document("c").unwrap().is_some());
}

#[test]
fn slaves_are_read_only() {
    let temp = TempDir::new().unwrap();
    let manager = IndexManager::new(temp.path(), 0).unwrap();
    let (master_name, slave_name) = names();
    manager.open_index(&master_name, &master_config()).unwrap();
    let slave = manager.open_index(&slave_name, &slave_config(0)).unwrap();

    assert!(matches!(
        slave.post_document(&article("x", "Nope", "news", &["world"])),
        Err(IndexError::ReadOnly(_))
    ));
    assert!(matches!(slave.commit(), Err(IndexError::ReadOnly(_))));
    assert!(matches!(slave.delete_all(), Err(IndexError::ReadOnly(_))));
    assert!(slave.replication_source().is_err());
}

#[test]
fn invalid_masters_are_rejected() {
    let temp = TempDir::new().unwrap();
    let manager = IndexManager::new(temp.path(), 0).unwrap();
    let (master_name, slave_name) = names();

    let err = manager
        .open_index(&slave_name, &slave_config(0))
        .err()
        .unwrap();
    assert!(matches!(err, IndexError::InvalidMaster { .. }));

    let own = Config::from_toml_str(&format!(
        "[replication]\nmaster = \"news/master\"\n{FIELDS}"
    ))
    .unwrap();
    let err = manager.open_index(&master_name, &own).err().unwrap();
    assert!(matches!(err, IndexError::InvalidMaster { .. }));

    manager.open_index(&master_name, &master_config()).unwrap();
    manager.open_index(&slave_name, &slave_config(0)).unwrap();
    let chained = Config::from_toml_str(&format!(
        "[replication]\nmaster = \"news/slave\"\n{FIELDS}"
    ))
    .unwrap();
    let err = manager
        .open_index(&IndexRef::new("news", "chained"), &chained)
        .err()
        .unwrap();
    assert!(matches!(err, IndexError::InvalidMaster { .. }));
}

#[test]
fn slave_keeps_its_revision_across_restarts() {
    let temp = TempDir::new().unwrap();
    let (master_name, slave_name) = names();
    let version = {
        let manager = IndexManager::new(temp.path(), 0).unwrap();
        let master = manager.open_index(&master_name, &master_config()).unwrap();
        master
            .post_document(&article("a", "Rates rise", "economy", &["world"]))
            .unwrap();
        master.commit().unwrap();
        let slave = manager.open_index(&slave_name, &slave_config(0)).unwrap();
        slave.status().version
    };

    let manager = IndexManager::new(temp.path(), 0).unwrap();
    manager.open_index(&master_name, &master_config()).unwrap();
    let slave = manager.open_index(&slave_name, &slave_config(0)).unwrap();
    assert_eq!(slave.status().version, version);
    assert_eq!(slave.snapshot().num_docs(), 1);
    assert_eq!(
        slave.replication_update_now().unwrap(),
        UpdateOutcome::UpToDate
    );
}

#[test]
fn background_pulls_pick_up_commits() {
    let temp = TempDir::new().unwrap();
    let manager = IndexManager::new(temp.path(), 0).unwrap();
    let (master_name, slave_name) = names();
    let master = manager.open_index(&master_name, &master_config()).unwrap();
    let slave = manager.open_index(&slave_name, &slave_config(1)).unwrap();
    assert_eq!(slave.snapshot().num_docs(), 0);

    master
        .post_document(&article("a", "Rates rise", "economy", &["world"]))
        .unwrap();
    master.commit().unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    while slave.snapshot().num_docs() == 0 {
        assert!(Instant::now() < deadline, "slave never caught up");
        thread::sleep(Duration::from_millis(100));
    }
    assert_eq!(slave.status().version, master.status().version);

    manager.close();
    assert!(matches!(
        slave.replication_update_now(),
        Err(IndexError::Closed(_))
    ));
}
