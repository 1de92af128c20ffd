//! Fixtures shared by the unit tests: a small product catalog using every field kind.

use std::{path::Path, sync::Arc};

use serde_json::{Map, Value, json};
use sift_config::{Config, FieldDefinition, FieldKind, IndexRef};

use crate::instance::{IndexInstance, SharedResources};

/// Converts a JSON object literal into a document.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Catalog schema: two analyzed text fields, an exact string, two numbers and one facet
/// dimension per backend.
pub fn catalog_config() -> Config {
    Config::default()
        .with_analyzer("english", "english")
        .with_field(
            "name",
            FieldDefinition::new(FieldKind::Text)
                .analyzer("english")
                .stored(),
        )
        .with_field(
            "description",
            FieldDefinition::new(FieldKind::Text)
                .analyzer("english")
                .stored(),
        )
        .with_field(
            "brand",
            FieldDefinition::new(FieldKind::String).stored().sortable(),
        )
        .with_field(
            "price",
            FieldDefinition::new(FieldKind::Double).stored().sortable(),
        )
        .with_field(
            "stock",
            FieldDefinition::new(FieldKind::Long).stored().sortable(),
        )
        .with_field(
            "category",
            FieldDefinition::new(FieldKind::SortedSetFacet).multi_valued(),
        )
        .with_field(
            "origin",
            FieldDefinition::new(FieldKind::TaxonomyFacet).hierarchical(),
        )
        .with_field(
            "tags",
            FieldDefinition::new(FieldKind::TaxonomyFacet).multi_valued(),
        )
        .with_field("rating", FieldDefinition::new(FieldKind::IntAssocFacet))
        .with_field("weight", FieldDefinition::new(FieldKind::FloatAssocFacet))
}

/// Four products.
///
/// | id | brand | price | stock | category    | origin          | tags             |
/// |----|-------|-------|-------|-------------|-----------------|------------------|
/// | p1 | acme  | 5.0   | 10    | shoes, sale | europe / italy  | sport, outdoor   |
/// | p2 | peak  | 15.0  | 3     | shoes       | europe / france | outdoor          |
/// | p3 | acme  | 20.0  | 25    | socks, sale | asia / japan    | sport            |
/// | p4 | trail | 8.0   | 0     | bags        | europe / italy  | outdoor, travel  |
pub fn catalog_documents() -> Vec<Map<String, Value>> {
    [
        json!({
            "$id": "p1",
            "name": "Red running shoes",
            "description": "Light shoes for road running",
            "brand": "acme",
            "price": 5.0,
            "stock": 10,
            "category": ["shoes", "sale"],
            "origin": ["europe", "italy"],
            "tags": ["sport", "outdoor"],
            "rating": {"label": "stars", "value": 4},
            "weight": {"label": "kg", "value": 0.5}
        }),
        json!({
            "$id": "p2",
            "name": "Blue hiking boots",
            "description": "Waterproof boots for mountain hiking",
            "brand": "peak",
            "price": 15.0,
            "stock": 3,
            "category": "shoes",
            "origin": ["europe", "france"],
            "tags": "outdoor",
            "rating": {"label": "stars", "value": 5},
            "weight": {"label": "kg", "value": 1.5}
        }),
        json!({
            "$id": "p3",
            "name": "Wool running socks",
            "description": "Warm socks for winter running",
            "brand": "acme",
            "price": 20.0,
            "stock": 25,
            "category": ["socks", "sale"],
            "origin": ["asia", "japan"],
            "tags": "sport",
            "rating": {"label": "stars", "value": 3},
            "weight": {"label": "kg", "value": 0.25}
        }),
        json!({
            "$id": "p4",
            "name": "Canvas backpack",
            "description": "Daypack for city streets and mountain trails",
            "brand": "trail",
            "price": 8.0,
            "stock": 0,
            "category": "bags",
            "origin": ["europe", "italy"],
            "tags": ["outdoor", "travel"],
            "rating": {"label": "stars", "value": 4},
            "weight": {"label": "kg", "value": 0.75}
        }),
    ]
    .into_iter()
    .map(object)
    .collect()
}

/// Opens a master in `dir` holding the committed catalog. `search_threads` of zero collects
/// inline.
pub fn catalog_index(dir: &Path, search_threads: usize) -> Arc<IndexInstance> {
    let index = IndexInstance::open_master(
        IndexRef::new("shop", "catalog"),
        dir,
        &catalog_config(),
        SharedResources::new(search_threads).unwrap(),
    )
    .unwrap();
    index.post_documents(&catalog_documents()).unwrap();
    index.commit().unwrap();
    index
}
