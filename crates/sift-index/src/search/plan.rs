//! Request planning: everything decided before the collection pass.

use indexmap::IndexMap;
use sift_config::FieldKind;
use sift_query::{DOC_FIELD, QueryDefinition, SCORE_FIELD};
use tantivy::{
    query::{AllQuery, Query},
    schema::Field,
};
use tracing::debug;

use super::QueryContext;
use crate::{
    IndexError,
    collector::{ResolvedCollectors, SortKey, SortSource},
    facet::{DimensionRequest, classify_dimensions},
};

/// A highlighter bound to its field.
pub struct HighlighterPlan {
    /// Highlighter name in the request.
    pub name: String,
    /// Stored text field.
    pub field: Field,
    /// Snippet length limit.
    pub max_num_chars: usize,
}

/// The parts of a drill-down needed to count sideways.
pub struct SidewaysPlan {
    /// Compiled base query, without any drill filter.
    pub base: Box<dyn Query>,
    /// Drilled paths per dimension.
    pub dimensions: IndexMap<String, Vec<Vec<String>>>,
}

/// A request resolved against one context, ready to execute.
pub struct QueryExecutionPlan {
    /// Compiled query.
    pub query: Box<dyn Query>,
    /// Debug form of the compiled query, when requested.
    pub query_debug: Option<String>,
    /// Sort criteria; relevance when the request has none.
    pub sort_keys: Vec<SortKey>,
    /// First hit returned.
    pub start: usize,
    /// End of the paging window, clamped to the live document count.
    pub end: usize,
    /// Whether relevance scores are computed.
    pub need_score: bool,
    /// Named collectors.
    pub collectors: ResolvedCollectors,
    /// Facet dimensions in request order.
    pub facets: Vec<DimensionRequest>,
    /// Set when facets are counted sideways.
    pub sideways: Option<SidewaysPlan>,
    /// Highlighters in request order.
    pub highlighters: Vec<HighlighterPlan>,
    /// Stored fields returned with each hit.
    pub returned_fields: Vec<String>,
}

impl QueryExecutionPlan {
    /// Resolves a request. Fails on any configuration error, before touching documents.
    pub fn build(
        context: &QueryContext<'_>,
        definition: &QueryDefinition,
    ) -> Result<Self, IndexError> {
        definition.validate()?;
        let collectors = context.registry.resolve(&definition.collectors)?;
        debug!(
            collectors = collectors.len(),
            classic = collectors.is_classic(),
            "collectors resolved"
        );

        let compiler = context.compiler();
        let query = compiler.compile(&definition.query)?;

        let sort_keys = definition
            .sorts
            .iter()
            .map(|(field, direction)| {
                Ok(SortKey::new(
                    field.clone(),
                    *direction,
                    sort_source(context, field)?,
                ))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;
        let need_score = sort_keys.is_empty()
            || sort_keys
                .iter()
                .any(|key| key.source == SortSource::Score);

        let facets = classify_dimensions(
            &context.fields,
            &definition.facets,
            context.defaults.facet_top,
            |query| compiler.compile(query),
        )?;

        let sideways = match definition.query.as_drill_down() {
            Some(drill) if definition.uses_drill_sideways() => Some(SidewaysPlan {
                base: match &drill.base {
                    Some(base) => compiler.compile(base)?,
                    None => Box::new(AllQuery),
                },
                dimensions: drill.dimensions.clone(),
            }),
            _ => None,
        };

        let highlighters = definition
            .highlighters
            .iter()
            .map(|(name, highlighter)| {
                let field = context.fields.indexed(&highlighter.field)?;
                if field.definition.kind != FieldKind::Text || !field.definition.stored {
                    return Err(IndexError::FieldUsage {
                        field: highlighter.field.clone(),
                        message: "highlighting needs a stored text field".to_string(),
                    });
                }
                Ok(HighlighterPlan {
                    name: name.clone(),
                    field: field.field,
                    max_num_chars: highlighter.max_num_chars,
                })
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        let rows = definition.rows.unwrap_or(context.defaults.rows);
        let num_docs = usize::try_from(context.snapshot.num_docs()).unwrap_or(usize::MAX);
        let end = definition.start.saturating_add(rows).min(num_docs);

        Ok(Self {
            query_debug: definition.query_debug.then(|| format!("{query:?}")),
            query,
            sort_keys,
            start: definition.start,
            end,
            need_score,
            collectors,
            facets,
            sideways,
            highlighters,
            returned_fields: definition.returned_fields.clone(),
        })
    }

    /// Number of top hits the collection pass must keep.
    pub fn top_limit(&self) -> usize {
        self.end
    }

    /// Returns true if the pass must record matching documents for facets.
    pub fn needs_matching_docs(&self) -> bool {
        !self.facets.is_empty()
    }
}

/// Resolves where a sort field's values come from.
fn sort_source(context: &QueryContext<'_>, field: &str) -> Result<SortSource, IndexError> {
    match field {
        SCORE_FIELD => return Ok(SortSource::Score),
        DOC_FIELD => return Ok(SortSource::Doc),
        _ => {}
    }
    let indexed = context.fields.indexed(field)?;
    match indexed.definition.kind {
        FieldKind::Long => Ok(SortSource::Long),
        FieldKind::Double => Ok(SortSource::Double),
        FieldKind::String if indexed.definition.sortable => Ok(SortSource::Str),
        _ => Err(IndexError::FieldUsage {
            field: field.to_string(),
            message: "only long, double and sortable string fields can be sorted on".to_string(),
        }),
    }
}
