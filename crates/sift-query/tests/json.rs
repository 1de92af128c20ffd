//! Request bodies as a client would send them.

// Integration tests live outside cfg(test) by design
#![allow(clippy::tests_outside_test_module)]

use sift_query::{QueryDef, QueryDefinition, SortDirection};

#[test]
fn query_backed_facet_request() {
    let def = QueryDefinition::from_json(
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
    let facet = &def.facets["price"];
    assert!(facet.is_query_backed());
    assert_eq!(
        facet.queries["cheap"],
        QueryDef::double_range("price", None, Some(10.0), true, false)
    );
    let labels: Vec<_> = facet.queries.keys().collect();
    assert_eq!(labels, ["cheap", "expensive"]);
}

#[test]
fn drill_sideways_request() {
    let def = QueryDefinition::from_json(
        r#"{
            "query": {
                "type": "drill_down",
                "base": {"type": "match", "field": "title", "text": "rust"},
                "dimensions": {"cat": [["news"], ["science"]]},
                "use_drill_sideways": true
            },
            "sorts": {"year": "descending_missing_last"},
            "facets": {"cat": {"top": 3}, "year": {}}
        }"#,
    )
    .unwrap();
    assert!(def.uses_drill_sideways());
    assert_eq!(def.sorts["year"], SortDirection::DescendingMissingLast);
    let drill = def.query.as_drill_down().unwrap();
    assert_eq!(drill.dimensions["cat"][1], vec!["science".to_string()]);
}

#[test]
fn serializes_back_to_equal_value() {
    let def = QueryDefinition::of(QueryDef::matching("title", "hello world"))
        .rows(3)
        .returned_fields(["title", "price"])
        .query_debug();
    let json = serde_json::to_string(&def).unwrap();
    assert_eq!(QueryDefinition::from_json(&json).unwrap(), def);
}
