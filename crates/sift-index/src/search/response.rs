//! Response assembly: stored fields and highlights for the page of hits.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sift_query::SCORE_FIELD;
use tantivy::{
    DocAddress, Score, TantivyDocument,
    schema::{Field, Schema, Value},
    snippet::SnippetGenerator,
};

use super::{QueryContext, plan::QueryExecutionPlan};
use crate::{
    IndexError,
    collector::{CollectorValue, ScoredHit, SortValue},
    facet::FacetResult,
};

/// Wildcard selecting every stored field.
const ALL_FIELDS: &str = "*";

/// One returned hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Global doc id, usable with `explain`.
    pub doc: u64,
    /// Relevance score, zero when the sort does not use scores.
    pub score: Score,
    /// Document identifier, when the document has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Sort values when the request sorts by fields.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort_values: Vec<SortValue>,
    /// Requested stored fields.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, JsonValue>,
    /// Snippet per highlighter name.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub highlights: IndexMap<String, String>,
}

/// Result of a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    /// Number of matching documents.
    pub total_hits: u64,
    /// Live documents in the searched generation.
    pub num_docs: u64,
    /// First returned hit.
    pub start: usize,
    /// End of the returned window.
    pub end: usize,
    /// Best score, when scores were computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_score: Option<Score>,
    /// Hits in `[start, end)`.
    pub hits: Vec<SearchHit>,
    /// Facet labels per dimension, in request order.
    pub facets: IndexMap<String, FacetResult>,
    /// Named collector results, in request order.
    pub collectors: IndexMap<String, CollectorValue>,
    /// Milliseconds per phase.
    pub timings: IndexMap<String, u64>,
    /// Debug form of the compiled query, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Builds the returned hits for a page of collected hits.
pub(super) fn assemble_hits(
    context: &QueryContext<'_>,
    plan: &QueryExecutionPlan,
    hits: Vec<ScoredHit>,
) -> Result<Vec<SearchHit>, IndexError> {
    let searcher = context.snapshot.searcher();
    let schema = context.fields.schema();
    let returned = returned_fields(context, &plan.returned_fields)?;

    let mut generators = Vec::with_capacity(plan.highlighters.len());
    for highlighter in &plan.highlighters {
        let mut generator = SnippetGenerator::create(searcher, &*plan.query, highlighter.field)
            .map_err(|e| IndexError::search(&e))?;
        generator.set_max_num_chars(highlighter.max_num_chars);
        generators.push((highlighter.name.as_str(), generator));
    }

    let sorted_by_fields = plan
        .sort_keys
        .iter()
        .any(|key| key.field != SCORE_FIELD);
    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let doc: TantivyDocument = searcher
            .doc(DocAddress::new(hit.segment_ord, hit.doc))
            .map_err(|e| IndexError::search(&e))?;
        let id = doc
            .get_first(context.fields.id)
            .and_then(|value| value.as_str())
            .map(str::to_string);
        let mut fields = Map::new();
        for (name, field) in &returned {
            if let Some(value) = stored_value(&doc, *field) {
                fields.insert(name.clone(), value);
            }
        }
        let highlights = generators
            .iter()
            .map(|(name, generator)| {
                ((*name).to_string(), generator.snippet_from_doc(&doc).to_html())
            })
            .collect();
        results.push(SearchHit {
            doc: hit.global_doc,
            score: hit.score,
            id,
            sort_values: if sorted_by_fields {
                hit.values
            } else {
                Vec::new()
            },
            fields,
            highlights,
        });
    }
    Ok(results)
}

/// Resolves the stored fields to return, expanding `*`.
fn returned_fields(
    context: &QueryContext<'_>,
    names: &[String],
) -> Result<Vec<(String, Field)>, IndexError> {
    if names.iter().any(|name| name == ALL_FIELDS) {
        return Ok(stored_fields(context.fields.schema()));
    }
    names
        .iter()
        .map(|name| Ok((name.clone(), context.fields.indexed(name)?.field)))
        .collect()
}

/// Every stored field of the schema except the reserved ones.
fn stored_fields(schema: &Schema) -> Vec<(String, Field)> {
    schema
        .fields()
        .filter(|(_, entry)| entry.is_stored() && !entry.name().starts_with('$'))
        .map(|(field, entry)| (entry.name().to_string(), field))
        .collect()
}

/// Every stored field of a document as JSON, `$id` included.
pub(crate) fn stored_document(schema: &Schema, doc: &TantivyDocument) -> Map<String, JsonValue> {
    schema
        .fields()
        .filter(|(_, entry)| entry.is_stored())
        .filter_map(|(field, entry)| {
            stored_value(doc, field).map(|value| (entry.name().to_string(), value))
        })
        .collect()
}

/// Stored values of a field as JSON: a scalar for one value, an array for several.
fn stored_value(doc: &TantivyDocument, field: Field) -> Option<JsonValue> {
    let mut values: Vec<JsonValue> = doc.get_all(field).filter_map(json_value).collect();
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(JsonValue::Array(values)),
    }
}

/// Converts a stored value to JSON.
fn json_value<'a>(value: impl Value<'a>) -> Option<JsonValue> {
    if let Some(text) = value.as_str() {
        return Some(JsonValue::String(text.to_string()));
    }
    if let Some(number) = value.as_i64() {
        return Some(JsonValue::from(number));
    }
    if let Some(number) = value.as_u64() {
        return Some(JsonValue::from(number));
    }
    value.as_f64().map(JsonValue::from)
}
