//! Mapping of JSON documents to index documents.
//!
//! Plain fields take a value or an array of values. Facet fields take:
//! - a label (`"news"`) or an array of labels, one path each;
//! - for hierarchical dimensions, an array of components (`["fr", "paris"]`) as one path,
//!   or an array of such arrays;
//! - for association dimensions, `{"path": [...], "value": 3}` or `{"label": "x", "value": 3}`,
//!   or an array of those.

use std::{collections::BTreeSet, slice};

use serde_json::{Map, Value};
use sift_config::{FieldDefinition, FieldKind};
use tantivy::TantivyDocument;

use crate::{
    IndexError,
    facet::{FacetBackend, drill_terms, pack_association},
    schema::{FieldMap, PATH_DELIMITER, encode_path, reserved},
    taxonomy::TaxonomyWriter,
};

/// An index document and its identifier.
#[derive(Debug)]
pub struct MappedDocument {
    /// Value of `$id`, used to replace earlier versions.
    pub id: Option<String>,
    /// Document to add.
    pub doc: TantivyDocument,
}

/// One facet path with its association weight bits.
struct FacetValue {
    /// Path components below the dimension.
    path: Vec<String>,
    /// Weight bits for association dimensions.
    weight: Option<u32>,
}

/// Facet values of one document, deduplicated across dimensions.
#[derive(Default)]
struct FacetAccumulator {
    /// Encoded sorted-set labels.
    sorted_set: BTreeSet<String>,
    /// Taxonomy ordinals of every path and ancestor.
    taxonomy: BTreeSet<u32>,
    /// Packed integer associations.
    int_assoc: Vec<u64>,
    /// Packed float associations.
    float_assoc: Vec<u64>,
    /// Drill-down terms.
    drilldown: BTreeSet<String>,
}

/// Maps a JSON object to an index document.
///
/// Taxonomy dimensions register their paths with `taxonomy`; a missing writer makes them an
/// error.
pub fn map_document(
    fields: &FieldMap,
    mut taxonomy: Option<&mut TaxonomyWriter>,
    object: &Map<String, Value>,
) -> Result<MappedDocument, IndexError> {
    let mut doc = TantivyDocument::new();
    let mut id = None;
    let mut facets = FacetAccumulator::default();

    for (name, value) in object {
        if name == reserved::ID {
            let text = value
                .as_str()
                .ok_or_else(|| IndexError::InvalidDocument(format!("{name} must be a string")))?;
            doc.add_text(fields.id, text);
            id = Some(text.to_string());
            continue;
        }
        let definition = fields
            .definition(name)
            .ok_or_else(|| IndexError::UnknownField(name.clone()))?;
        match FacetBackend::for_kind(definition.kind) {
            Some(backend) => {
                for facet in facet_values(name, definition, backend, value)? {
                    facets.add(name, backend, facet, taxonomy.as_deref_mut())?;
                }
            }
            None => add_field(fields, &mut doc, name, value)?,
        }
    }

    for label in facets.sorted_set {
        doc.add_text(fields.facets, &label);
    }
    for ordinal in facets.taxonomy {
        doc.add_u64(fields.taxonomy, u64::from(ordinal));
    }
    for value in facets.int_assoc {
        doc.add_u64(fields.int_assoc, value);
    }
    for value in facets.float_assoc {
        doc.add_u64(fields.float_assoc, value);
    }
    for term in facets.drilldown {
        doc.add_text(fields.drilldown, &term);
    }
    Ok(MappedDocument { id, doc })
}

/// Adds the values of a plain field.
fn add_field(
    fields: &FieldMap,
    doc: &mut TantivyDocument,
    name: &str,
    value: &Value,
) -> Result<(), IndexError> {
    let indexed = fields.indexed(name)?;
    let values = match value {
        Value::Array(values) => values.as_slice(),
        Value::Null => return Ok(()),
        value => slice::from_ref(value),
    };
    let invalid = |expected: &str, value: &Value| {
        IndexError::InvalidDocument(format!("field '{name}' expects {expected}, got {value}"))
    };
    for value in values {
        match indexed.definition.kind {
            FieldKind::Text | FieldKind::String | FieldKind::Stored => {
                let text = value.as_str().ok_or_else(|| invalid("a string", value))?;
                doc.add_text(indexed.field, text);
            }
            FieldKind::Long => {
                let number = value.as_i64().ok_or_else(|| invalid("a long", value))?;
                doc.add_i64(indexed.field, number);
            }
            FieldKind::Double => {
                let number = value.as_f64().ok_or_else(|| invalid("a number", value))?;
                doc.add_f64(indexed.field, number);
            }
            FieldKind::SortedSetFacet
            | FieldKind::TaxonomyFacet
            | FieldKind::IntAssocFacet
            | FieldKind::FloatAssocFacet => return Err(invalid("facet values", value)),
        }
    }
    Ok(())
}

/// Parses the facet values of one dimension.
fn facet_values(
    dimension: &str,
    definition: &FieldDefinition,
    backend: FacetBackend,
    value: &Value,
) -> Result<Vec<FacetValue>, IndexError> {
    let invalid = |message: String| {
        IndexError::InvalidDocument(format!("facet '{dimension}': {message}"))
    };
    let association = matches!(
        backend,
        FacetBackend::IntAssociation | FacetBackend::FloatAssociation
    );
    let items: Vec<&Value> = match value {
        Value::Array(items)
            if definition.hierarchical && items.iter().all(Value::is_string) && !association =>
        {
            vec![value]
        }
        Value::Array(items) => items.iter().collect(),
        value => vec![value],
    };

    let mut values = Vec::with_capacity(items.len());
    for item in items {
        let (path, weight) = if association {
            let object = item
                .as_object()
                .ok_or_else(|| invalid(format!("expected {{path, value}}, got {item}")))?;
            let path = match (object.get("path"), object.get("label")) {
                (Some(path), _) => path_components(path)
                    .ok_or_else(|| invalid(format!("bad path {path}")))?,
                (None, Some(Value::String(label))) => vec![label.clone()],
                _ => return Err(invalid("association needs a path or label".to_string())),
            };
            let weight = object
                .get("value")
                .and_then(|weight| association_bits(backend, weight))
                .ok_or_else(|| {
                    invalid("association value is missing or out of range".to_string())
                })?;
            (path, Some(weight))
        } else {
            let path =
                path_components(item).ok_or_else(|| invalid(format!("bad value {item}")))?;
            (path, None)
        };
        if path.is_empty() || path.iter().any(|c| c.is_empty() || c.contains(PATH_DELIMITER)) {
            return Err(invalid(format!("invalid path {path:?}")));
        }
        if path.len() > 1 && !definition.hierarchical {
            return Err(invalid("dimension is not hierarchical".to_string()));
        }
        values.push(FacetValue { path, weight });
    }
    if values.len() > 1 && !definition.multi_valued {
        return Err(invalid("dimension is not multi-valued".to_string()));
    }
    Ok(values)
}

/// Reads a label or an array of components.
fn path_components(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(label) => Some(vec![label.clone()]),
        Value::Array(components) => components
            .iter()
            .map(|component| component.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

/// Encodes an association weight: `i32` bits or `f32` bits.
fn association_bits(backend: FacetBackend, value: &Value) -> Option<u32> {
    match backend {
        FacetBackend::IntAssociation => value
            .as_i64()
            .and_then(|weight| i32::try_from(weight).ok())
            .map(|weight| weight as u32),
        FacetBackend::FloatAssociation => value.as_f64().map(|weight| (weight as f32).to_bits()),
        FacetBackend::SortedSet | FacetBackend::Taxonomy => None,
    }
}

impl FacetAccumulator {
    /// Records one facet value.
    fn add(
        &mut self,
        dimension: &str,
        backend: FacetBackend,
        value: FacetValue,
        taxonomy: Option<&mut TaxonomyWriter>,
    ) -> Result<(), IndexError> {
        self.drilldown.extend(drill_terms(dimension, &value.path));
        if backend == FacetBackend::SortedSet {
            for depth in 1..=value.path.len() {
                self.sorted_set
                    .insert(encode_path(dimension, &value.path[..depth]));
            }
            return Ok(());
        }

        let taxonomy = taxonomy.ok_or_else(|| {
            IndexError::InvalidDocument(format!(
                "facet '{dimension}' needs a taxonomy, which this index does not keep"
            ))
        })?;
        let ordinals = taxonomy.add_path(dimension, &value.path)?;
        let leaf = ordinals.last().copied().unwrap_or_default();
        match (backend, value.weight) {
            (FacetBackend::IntAssociation, Some(bits)) => {
                self.int_assoc.push(pack_association(leaf, bits));
            }
            (FacetBackend::FloatAssociation, Some(bits)) => {
                self.float_assoc.push(pack_association(leaf, bits));
            }
            _ => self.taxonomy.extend(ordinals),
        }
        Ok(())
    }
}
