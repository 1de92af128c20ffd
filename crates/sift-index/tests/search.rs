//! End-to-end searches through the index manager.
//!
//! Indexes are configured from TOML the way a deployment would, then filled and queried.

// Integration tests live outside cfg(test) by design
#![allow(clippy::tests_outside_test_module)]

use serde_json::{Map, Value, json};
use sift_config::{Config, IndexRef};
use sift_index::{FacetNumber, IndexError, IndexManager, SearchResponse};
use sift_query::{FacetDefinition, JoinQuery, QueryDef, QueryDefinition, SortDirection};
use tempfile::TempDir;

/// Articles with a multi-valued category and a price.
const ARTICLES: &str = r#"
[index]
search_threads = 2

[analyzers.english]
language = "english"

[fields.title]
kind = "text"
analyzer = "english"
stored = true

[fields.author]
kind = "string"
stored = true
sortable = true

[fields.price]
kind = "double"
stored = true
sortable = true

[fields.cat]
kind = "sorted_set_facet"
multi_valued = true

[fields.topic]
kind = "taxonomy_facet"
hierarchical = true
"#;

/// Authors and where they live.
const AUTHORS: &str = r#"
[fields.name]
kind = "string"
stored = true
sortable = true

[fields.country]
kind = "string"
"#;

/// Converts a JSON object literal into a document.
fn doc(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

/// Opens `schema/index` with a TOML config.
fn open(manager: &IndexManager, name: &str, toml: &str) -> IndexRef {
    let name: IndexRef = name.parse().unwrap();
    let config = Config::from_toml_str(toml).unwrap();
    manager.open_index(&name, &config).unwrap();
    name
}

/// Facet labels of a dimension, in response order.
fn facet(response: &SearchResponse, dimension: &str) -> Vec<(String, FacetNumber)> {
    response.facets[dimension]
        .iter()
        .map(|(label, value)| (label.clone(), *value))
        .collect()
}

#[test]
fn sorted_set_counts_over_two_documents() {
    let temp = TempDir::new().unwrap();
    let manager = IndexManager::new(temp.path(), 2).unwrap();
    let name = open(&manager, "news/articles", ARTICLES);
    let index = manager.index(&name).unwrap();
    index
        .post_documents(&[
            doc(json!({"$id": "a", "title": "Rates rise", "cat": ["news", "economy"]})),
            doc(json!({"$id": "b", "title": "Comet spotted", "cat": ["news", "science"]})),
        ])
        .unwrap();
    index.commit().unwrap();

    let request =
        QueryDefinition::of(QueryDef::MatchAll).facet("cat", FacetDefinition::default());
    let response = manager.search(&name, &request).unwrap();
    assert_eq!(
        facet(&response, "cat"),
        [
            ("news".to_string(), FacetNumber::Count(2)),
            ("economy".to_string(), FacetNumber::Count(1)),
            ("science".to_string(), FacetNumber::Count(1)),
        ]
    );
}

#[test]
fn query_backed_price_ranges() {
    let temp = TempDir::new().unwrap();
    let manager = IndexManager::new(temp.path(), 2).unwrap();
    let name = open(&manager, "news/articles", ARTICLES);
    let index = manager.index(&name).unwrap();
    for (id, price) in [("a", 5.0), ("b", 15.0), ("c", 20.0)] {
        index
            .post_document(&doc(json!({"$id": id, "price": price})))
            .unwrap();
    }
    index.commit().unwrap();

    let request = QueryDefinition::from_json(
        r#"{
            "query": {"type": "match_all"},
            "facets": {
                "price": {
                    "queries": {
                        "cheap": {"type": "double_range", "field": "price", "upper": 10, "include_upper": false},
                        "expensive": {"type": "double_range", "field": "price", "lower": 10}
                    }
                }
            }
        }"#,
    )
    .unwrap();
    let response = manager.search(&name, &request).unwrap();
    assert_eq!(
        facet(&response, "price"),
        [
            ("cheap".to_string(), FacetNumber::Count(1)),
            ("expensive".to_string(), FacetNumber::Count(2)),
        ]
    );
}

#[test]
fn paging_reports_the_returned_window() {
    let temp = TempDir::new().unwrap();
    let manager = IndexManager::new(temp.path(), 2).unwrap();
    let name = open(&manager, "news/articles", ARTICLES);
    let index = manager.index(&name).unwrap();
    let docs: Vec<_> = (0..7)
        .map(|i| doc(json!({"$id": format!("a{i}"), "price": f64::from(i)})))
        .collect();
    index.post_documents(&docs).unwrap();
    index.commit().unwrap();

    for rows in [0, 3, 7, 12] {
        let request = QueryDefinition::of(QueryDef::MatchAll)
            .sort("price", SortDirection::Descending)
            .rows(rows);
        let response = manager.search(&name, &request).unwrap();
        assert_eq!(response.start, 0);
        assert_eq!(response.end, rows.min(7));
        assert_eq!(response.hits.len(), response.end);
        assert_eq!(response.total_hits, 7);
    }
}

#[test]
fn joins_read_values_from_another_index() {
    let temp = TempDir::new().unwrap();
    let manager = IndexManager::new(temp.path(), 2).unwrap();
    let articles = open(&manager, "news/articles", ARTICLES);
    let authors = open(&manager, "news/authors", AUTHORS);

    let index = manager.index(&authors).unwrap();
    index
        .post_documents(&[
            doc(json!({"$id": "1", "name": "ada", "country": "uk"})),
            doc(json!({"$id": "2", "name": "grace", "country": "us"})),
            doc(json!({"$id": "3", "name": "alan", "country": "uk"})),
        ])
        .unwrap();
    index.commit().unwrap();
    let index = manager.index(&articles).unwrap();
    index
        .post_documents(&[
            doc(json!({"$id": "a", "title": "Engines", "author": "ada"})),
            doc(json!({"$id": "b", "title": "Compilers", "author": "grace"})),
            doc(json!({"$id": "c", "title": "Machines", "author": "alan"})),
            doc(json!({"$id": "d", "title": "Anonymous"})),
        ])
        .unwrap();
    index.commit().unwrap();

    let join = QueryDef::Join(JoinQuery {
        from_index: authors.to_string(),
        from_field: "name".to_string(),
        to_field: "author".to_string(),
        query: Box::new(QueryDef::term("country", "uk")),
    });
    let request = QueryDefinition::of(join).sort("author", SortDirection::Ascending);
    let response = manager.search(&articles, &request).unwrap();
    let ids: Vec<_> = response
        .hits
        .iter()
        .filter_map(|hit| hit.id.as_deref())
        .collect();
    assert_eq!(ids, ["a", "c"]);

    let missing = QueryDef::Join(JoinQuery {
        from_index: "news/nobody".to_string(),
        from_field: "name".to_string(),
        to_field: "author".to_string(),
        query: Box::new(QueryDef::MatchAll),
    });
    assert!(matches!(
        manager.search(&articles, &QueryDefinition::of(missing)),
        Err(IndexError::UnknownIndex(_))
    ));
}

#[test]
fn manager_reports_and_closes_indexes() {
    let temp = TempDir::new().unwrap();
    let manager = IndexManager::new(temp.path(), 0).unwrap();
    let articles = open(&manager, "news/articles", ARTICLES);
    let authors = open(&manager, "news/authors", AUTHORS);
    assert_eq!(manager.names(), [articles.clone(), authors.clone()]);
    assert!(manager.get("news/articles").is_ok());
    assert!(manager.get("articles").is_err());

    let status = manager.status();
    assert_eq!(status.len(), 2);
    assert!(status.iter().all(|status| status.num_docs == 0));
    assert!(status.iter().all(|status| status.replication_lag() == 0));

    let index = manager.index(&articles).unwrap();
    manager.close_index(&articles).unwrap();
    assert!(matches!(
        manager.index(&articles),
        Err(IndexError::UnknownIndex(_))
    ));
    assert!(matches!(
        index.search(&QueryDefinition::of(QueryDef::MatchAll), None),
        Err(IndexError::Closed(_))
    ));
    assert!(manager.close_index(&articles).is_err());
    assert_eq!(manager.names(), [authors]);
}

#[test]
fn explains_through_the_manager() {
    let temp = TempDir::new().unwrap();
    let manager = IndexManager::new(temp.path(), 2).unwrap();
    let name = open(&manager, "news/articles", ARTICLES);
    let index = manager.index(&name).unwrap();
    index
        .post_document(&doc(json!({"$id": "a", "title": "Rates rise again"})))
        .unwrap();
    index.commit().unwrap();

    let query = QueryDef::matching("title", "rates");
    let response = manager
        .search(&name, &QueryDefinition::of(query.clone()))
        .unwrap();
    let explanation = manager.explain(&name, &query, response.hits[0].doc).unwrap();
    assert!(explanation["value"].as_f64().unwrap() > 0.0);
}
