//! Drill-down filtering by facet paths.
//!
//! Every facet value is indexed in `$drilldown` once per path prefix, so narrowing to a path
//! is a single term lookup. Paths of one dimension are OR'ed and dimensions are AND'ed; the
//! filters add no score, leaving the ranking of the base query untouched.

use indexmap::IndexMap;
use tantivy::{
    Term,
    query::{BooleanQuery, ConstScoreQuery, Occur, Query, TermSetQuery},
    schema::Field,
};

use crate::schema::encode_path;

/// Drill-down terms of a facet value: the dimension and every prefix of the path.
pub fn drill_terms<S: AsRef<str>>(dimension: &str, path: &[S]) -> Vec<String> {
    (0..=path.len())
        .map(|depth| encode_path(dimension, &path[..depth]))
        .collect()
}

/// Narrows `base` by the drilled paths of every dimension except `excluded`.
///
/// With `excluded` set this is the query of one sideways pass: the other dimensions still
/// filter while the excluded one shows its full distribution.
pub fn drill_down_query(
    drilldown: Field,
    base: Box<dyn Query>,
    dimensions: &IndexMap<String, Vec<Vec<String>>>,
    excluded: Option<&str>,
) -> Box<dyn Query> {
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, base)];
    for (dimension, paths) in dimensions {
        if excluded == Some(dimension.as_str()) || paths.is_empty() {
            continue;
        }
        let terms = paths
            .iter()
            .map(|path| Term::from_field_text(drilldown, &encode_path(dimension, path)));
        let filter = ConstScoreQuery::new(Box::new(TermSetQuery::new(terms)), 0.0);
        clauses.push((Occur::Must, Box::new(filter)));
    }
    if clauses.len() == 1 {
        return clauses.remove(0).1;
    }
    Box::new(BooleanQuery::new(clauses))
}
