use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use serde_json::json;
use sift_config::IndexRef;
use sift_query::{
    DrillDownQuery, FacetDefinition, JoinQuery, QueryDef, QueryDefinition, SortDirection,
};
use tempfile::TempDir;

use super::{JoinResolver, SearchResponse};
use crate::{
    IndexError,
    collector::{CollectorValue, SortValue},
    facet::FacetNumber,
    instance::{IndexInstance, SharedResources},
    test_support::{catalog_config, catalog_documents, catalog_index},
};

fn ids(response: &SearchResponse) -> Vec<&str> {
    response
        .hits
        .iter()
        .map(|hit| hit.id.as_deref().unwrap_or_default())
        .collect()
}

fn labels(response: &SearchResponse, dimension: &str) -> Vec<(String, FacetNumber)> {
    response.facets[dimension]
        .iter()
        .map(|(label, value)| (label.clone(), *value))
        .collect()
}

fn counts(pairs: &[(&str, u64)]) -> Vec<(String, FacetNumber)> {
    pairs
        .iter()
        .map(|(label, count)| ((*label).to_string(), FacetNumber::Count(*count)))
        .collect()
}

/// The catalog committed in two batches, so collection sees two segments.
fn two_segment_catalog(temp: &TempDir, search_threads: usize) -> Arc<IndexInstance> {
    let index = IndexInstance::open_master(
        IndexRef::new("shop", "catalog"),
        temp.path(),
        &catalog_config(),
        SharedResources::new(search_threads).unwrap(),
    )
    .unwrap();
    let documents = catalog_documents();
    let (first, second) = documents.split_at(2);
    index.post_documents(first).unwrap();
    index.commit().unwrap();
    index.post_documents(second).unwrap();
    index.commit().unwrap();
    index
}

#[test]
fn match_query_finds_analyzed_terms() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);

    let response = index
        .search(&QueryDefinition::of(QueryDef::matching("name", "running")), None)
        .unwrap();
    assert_eq!(response.total_hits, 2);
    assert_eq!(response.num_docs, 4);
    let found: BTreeSet<_> = ids(&response).into_iter().collect();
    assert_eq!(found, BTreeSet::from(["p1", "p3"]));
    assert!(response.max_score.is_some_and(|score| score > 0.0));
    assert!(response.hits.iter().all(|hit| hit.sort_values.is_empty()));
}

#[test]
fn paging_window_is_clamped_to_the_matches() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let by_price = |start, rows| {
        QueryDefinition::of(QueryDef::MatchAll)
            .sort("price", SortDirection::Ascending)
            .start(start)
            .rows(rows)
    };

    let page = index.search(&by_price(1, 2), None).unwrap();
    assert_eq!((page.start, page.end), (1, 3));
    assert_eq!(ids(&page), ["p4", "p2"]);

    let all = index.search(&by_price(0, 10), None).unwrap();
    assert_eq!((all.start, all.end), (0, 4));
    assert_eq!(all.hits.len(), all.end);
    assert_eq!(ids(&all), ["p1", "p4", "p2", "p3"]);

    let past = index.search(&by_price(7, 5), None).unwrap();
    assert_eq!((past.start, past.end), (4, 4));
    assert!(past.hits.is_empty());
    assert_eq!(past.total_hits, 4);
}

#[test]
fn default_rows_apply_when_absent() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let response = index
        .search(&QueryDefinition::of(QueryDef::MatchAll), None)
        .unwrap();
    assert_eq!(response.end, 4);
    assert_eq!(response.hits.len(), 4);
}

#[test]
fn sorts_by_several_fields() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let request = QueryDefinition::of(QueryDef::MatchAll)
        .sort("brand", SortDirection::Ascending)
        .sort("price", SortDirection::Descending);

    let response = index.search(&request, None).unwrap();
    assert_eq!(ids(&response), ["p3", "p1", "p2", "p4"]);
    assert_eq!(
        response.hits[0].sort_values,
        [
            SortValue::Str(Some("acme".to_string())),
            SortValue::Double(Some(20.0))
        ]
    );
}

#[test]
fn sorting_on_an_unsortable_field_fails() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let request =
        QueryDefinition::of(QueryDef::MatchAll).sort("name", SortDirection::Ascending);
    assert!(matches!(
        index.search(&request, None),
        Err(IndexError::FieldUsage { .. })
    ));
}

#[test]
fn unknown_fields_are_rejected() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let request = QueryDefinition::of(QueryDef::term("colour", "red"));
    assert!(matches!(
        index.search(&request, None),
        Err(IndexError::UnknownField(field)) if field == "colour"
    ));
}

#[test]
fn parallel_collectors_match_inline_collection() {
    let request = QueryDefinition::of(QueryDef::MatchAll)
        .collector("max_price", "max_double", vec![json!("price")])
        .collector("min_stock", "min_long", vec![json!("stock")])
        .collector("stock", "sum_long", vec![json!("stock")])
        .collector("n", "count", vec![]);

    let inline_dir = TempDir::new().unwrap();
    let inline = two_segment_catalog(&inline_dir, 0)
        .search(&request, None)
        .unwrap();
    let parallel_dir = TempDir::new().unwrap();
    let parallel = two_segment_catalog(&parallel_dir, 4)
        .search(&request, None)
        .unwrap();

    assert_eq!(inline.collectors, parallel.collectors);
    assert_eq!(inline.collectors["max_price"], CollectorValue::Double(20.0));
    assert_eq!(inline.collectors["min_stock"], CollectorValue::Long(0));
    assert_eq!(inline.collectors["stock"], CollectorValue::Long(38));
    assert_eq!(inline.collectors["n"], CollectorValue::Count(4));
    let names: Vec<_> = inline.collectors.keys().map(String::as_str).collect();
    assert_eq!(names, ["max_price", "min_stock", "stock", "n"]);
}

#[test]
fn classic_collectors_see_one_stream() {
    let temp = TempDir::new().unwrap();
    let index = two_segment_catalog(&temp, 4);
    let request = QueryDefinition::of(QueryDef::MatchAll)
        .collector("first", "classic_first_docs", vec![json!(3)])
        .collector("max_stock", "classic_max_long", vec![json!("stock")]);

    let response = index.search(&request, None).unwrap();
    assert_eq!(response.collectors["first"], CollectorValue::DocIds(vec![0, 1, 2]));
    assert_eq!(response.collectors["max_stock"], CollectorValue::Long(25));
    assert_eq!(response.total_hits, 4);
}

#[test]
fn mixed_collector_kinds_fail_before_collection() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let request = QueryDefinition::of(QueryDef::MatchAll)
        .collector("max", "max_long", vec![json!("stock")])
        .collector("first", "classic_first_docs", vec![]);
    assert!(matches!(
        index.search(&request, None),
        Err(IndexError::MixedCollectors { .. })
    ));
}

#[test]
fn mixed_collector_kinds_fail_before_joins_run() {
    struct CountingResolver(AtomicUsize);

    impl JoinResolver for CountingResolver {
        fn join_values(
            &self,
            _from_index: &str,
            _from_field: &str,
            _query: &QueryDef,
        ) -> Result<BTreeSet<String>, IndexError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(BTreeSet::from(["acme".to_string()]))
        }
    }

    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let resolver = CountingResolver(AtomicUsize::new(0));
    let join = QueryDef::Join(JoinQuery {
        from_index: "shop/brands".to_string(),
        from_field: "name".to_string(),
        to_field: "brand".to_string(),
        query: Box::new(QueryDef::MatchAll),
    });
    let request = QueryDefinition::of(join)
        .collector("max", "max_long", vec![json!("stock")])
        .collector("first", "classic_first_docs", vec![]);
    assert!(matches!(
        index.search(&request, Some(&resolver)),
        Err(IndexError::MixedCollectors { .. })
    ));
    assert_eq!(resolver.0.load(Ordering::SeqCst), 0);
}

#[test]
fn classic_collection_skips_replaced_documents() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    index.post_document(&catalog_documents()[0]).unwrap();
    index.commit().unwrap();

    let request = QueryDefinition::of(QueryDef::MatchAll)
        .collector("first", "classic_first_docs", vec![json!(10)])
        .collector("max_stock", "classic_max_long", vec![json!("stock")])
        .facet("category", FacetDefinition::default());
    let response = index.search(&request, None).unwrap();
    assert_eq!(response.total_hits, 4);
    let CollectorValue::DocIds(docs) = &response.collectors["first"] else {
        panic!("unexpected value {:?}", response.collectors["first"]);
    };
    assert_eq!(docs.len(), 4);
    let found: BTreeSet<_> = ids(&response).into_iter().collect();
    assert_eq!(found, BTreeSet::from(["p1", "p2", "p3", "p4"]));
    assert_eq!(
        labels(&response, "category"),
        counts(&[("sale", 2), ("shoes", 2), ("bags", 1), ("socks", 1)])
    );
}

#[test]
fn counts_sorted_set_dimensions() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let request = QueryDefinition::of(QueryDef::MatchAll)
        .facet("category", FacetDefinition::top(10))
        .facet("tags", FacetDefinition::top(2));

    let response = index.search(&request, None).unwrap();
    assert_eq!(
        labels(&response, "category"),
        counts(&[("sale", 2), ("shoes", 2), ("bags", 1), ("socks", 1)])
    );
    assert_eq!(
        labels(&response, "tags"),
        counts(&[("outdoor", 3), ("sport", 2)])
    );
    assert!(response.timings.contains_key("facet_count"));
}

#[test]
fn facets_follow_the_query() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let request = QueryDefinition::of(QueryDef::term("brand", "acme"))
        .facet("category", FacetDefinition::top(10));

    let response = index.search(&request, None).unwrap();
    assert_eq!(
        labels(&response, "category"),
        counts(&[("sale", 2), ("shoes", 1), ("socks", 1)])
    );
}

#[test]
fn counts_taxonomy_paths() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let request = QueryDefinition::of(QueryDef::MatchAll)
        .facet("origin", FacetDefinition::top(10))
        .facet("europe", FacetDefinition::top(10));
    let response = index.search(&request, None).unwrap();
    assert_eq!(
        labels(&response, "origin"),
        counts(&[("europe", 3), ("asia", 1)])
    );
    assert!(!response.facets.contains_key("europe"));

    let request = QueryDefinition::of(QueryDef::MatchAll)
        .facet("origin", FacetDefinition::top(10).under(["europe"]));
    let response = index.search(&request, None).unwrap();
    assert_eq!(
        labels(&response, "origin"),
        counts(&[("italy", 2), ("france", 1)])
    );
}

#[test]
fn missing_paths_omit_the_dimension() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let request = QueryDefinition::of(QueryDef::MatchAll)
        .facet("origin", FacetDefinition::top(10).under(["africa"]))
        .facet("category", FacetDefinition::top(10).under(["hats"]))
        .facet("tags", FacetDefinition::top(10));

    let response = index.search(&request, None).unwrap();
    let dimensions: Vec<_> = response.facets.keys().map(String::as_str).collect();
    assert_eq!(dimensions, ["tags"]);
}

#[test]
fn sums_association_weights() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let request = QueryDefinition::of(QueryDef::MatchAll)
        .facet("rating", FacetDefinition::top(10))
        .facet("weight", FacetDefinition::top(10));

    let response = index.search(&request, None).unwrap();
    assert_eq!(
        labels(&response, "rating"),
        [("stars".to_string(), FacetNumber::Long(16))]
    );
    assert_eq!(
        labels(&response, "weight"),
        [("kg".to_string(), FacetNumber::Double(3.0))]
    );
}

#[test]
fn query_backed_dimensions_count_each_sub_query() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let price = FacetDefinition::default()
        .query(
            "cheap",
            QueryDef::double_range("price", None, Some(10.0), true, false),
        )
        .query(
            "expensive",
            QueryDef::double_range("price", Some(10.0), None, true, true),
        )
        .query(
            "free",
            QueryDef::double_range("price", None, Some(0.0), true, true),
        );
    let request = QueryDefinition::of(QueryDef::MatchAll).facet("price", price.clone());
    let response = index.search(&request, None).unwrap();
    assert_eq!(
        labels(&response, "price"),
        counts(&[("cheap", 2), ("expensive", 2), ("free", 0)])
    );

    let request = QueryDefinition::of(QueryDef::term("brand", "acme")).facet("price", price);
    let response = index.search(&request, None).unwrap();
    assert_eq!(
        labels(&response, "price"),
        counts(&[("cheap", 1), ("expensive", 1), ("free", 0)])
    );
}

#[test]
fn drill_down_narrows_matches() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let drill = DrillDownQuery::new(QueryDef::MatchAll)
        .add("category", ["shoes"])
        .add("category", ["bags"])
        .add("origin", ["europe", "italy"]);
    let request = QueryDefinition::of(QueryDef::DrillDown(drill))
        .sort("price", SortDirection::Ascending)
        .facet("category", FacetDefinition::top(10));

    let response = index.search(&request, None).unwrap();
    assert_eq!(ids(&response), ["p1", "p4"]);
    assert_eq!(
        labels(&response, "category"),
        counts(&[("bags", 1), ("sale", 1), ("shoes", 1)])
    );
}

#[test]
fn sideways_counts_ignore_their_own_filter() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 4);
    let drill = DrillDownQuery::new(QueryDef::MatchAll)
        .add("category", ["sale"])
        .add("origin", ["europe"])
        .sideways();
    let request = QueryDefinition::of(QueryDef::DrillDown(drill))
        .facet("category", FacetDefinition::top(10))
        .facet("origin", FacetDefinition::top(10))
        .facet("tags", FacetDefinition::top(10));
    let response = index.search(&request, None).unwrap();
    assert_eq!(ids(&response), ["p1"]);

    let without_category = DrillDownQuery::new(QueryDef::MatchAll).add("origin", ["europe"]);
    let rerun = index
        .search(
            &QueryDefinition::of(QueryDef::DrillDown(without_category))
                .facet("category", FacetDefinition::top(10)),
            None,
        )
        .unwrap();
    assert_eq!(response.facets["category"], rerun.facets["category"]);
    assert_eq!(
        labels(&response, "category"),
        counts(&[("shoes", 2), ("bags", 1), ("sale", 1)])
    );

    assert_eq!(
        labels(&response, "origin"),
        counts(&[("asia", 1), ("europe", 1)])
    );
    assert_eq!(
        labels(&response, "tags"),
        counts(&[("outdoor", 1), ("sport", 1)])
    );
    let dimensions: Vec<_> = response.facets.keys().map(String::as_str).collect();
    assert_eq!(dimensions, ["category", "origin", "tags"]);
}

#[test]
fn returns_requested_fields_and_highlights() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let request = QueryDefinition::of(QueryDef::matching("description", "boots"))
        .returned_fields(["name", "price"])
        .highlighter("snippet", "description", 100);

    let response = index.search(&request, None).unwrap();
    let hit = &response.hits[0];
    assert_eq!(hit.id.as_deref(), Some("p2"));
    assert_eq!(hit.fields["name"], json!("Blue hiking boots"));
    assert_eq!(hit.fields["price"], json!(15.0));
    assert_eq!(hit.fields.len(), 2);
    assert!(hit.highlights["snippet"].contains("<b>boots</b>"));

    let request = QueryDefinition::of(QueryDef::term("brand", "trail")).returned_fields(["*"]);
    let response = index.search(&request, None).unwrap();
    let fields = &response.hits[0].fields;
    assert_eq!(fields["brand"], json!("trail"));
    assert_eq!(fields["stock"], json!(0));
    assert!(!fields.contains_key("$id"));
}

#[test]
fn reports_timings_and_debug_query() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let response = index
        .search(
            &QueryDefinition::of(QueryDef::term("brand", "peak")).query_debug(),
            None,
        )
        .unwrap();
    let phases: Vec<_> = response.timings.keys().map(String::as_str).collect();
    assert_eq!(phases, ["query_plan", "search_query", "documents", "total"]);
    assert!(response.query.is_some());

    let response = index
        .search(&QueryDefinition::of(QueryDef::term("brand", "peak")), None)
        .unwrap();
    assert!(response.query.is_none());
}

#[test]
fn explains_a_returned_hit() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let query = QueryDef::matching("name", "boots");
    let response = index
        .search(&QueryDefinition::of(query.clone()), None)
        .unwrap();
    let hit = &response.hits[0];

    let explanation = index.explain(&query, hit.doc, None).unwrap();
    let value = explanation["value"].as_f64().unwrap();
    assert!((value - f64::from(hit.score)).abs() < 1e-4);

    assert!(matches!(
        index.explain(&query, 99, None),
        Err(IndexError::InvalidQuery(_))
    ));
}

#[test]
fn joins_need_a_resolver() {
    let temp = TempDir::new().unwrap();
    let index = catalog_index(temp.path(), 0);
    let join = QueryDef::Join(JoinQuery {
        from_index: "shop/brands".to_string(),
        from_field: "name".to_string(),
        to_field: "brand".to_string(),
        query: Box::new(QueryDef::MatchAll),
    });
    assert!(matches!(
        index.search(&QueryDefinition::of(join), None),
        Err(IndexError::UnknownIndex(name)) if name == "shop/brands"
    ));
}
