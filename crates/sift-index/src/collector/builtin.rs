//! Collectors registered under stable identifiers at startup.

use std::mem;

use serde_json::Value;
use tantivy::{DocId, Score, SegmentOrdinal, SegmentReader, columnar::Column};

use super::{
    ClassicCollector, CollectorRegistry, CollectorValue, ParallelCollector, PartialCollector,
    field_argument, optional_usize_argument,
};
use crate::IndexError;

/// How values are folded together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateOp {
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Sum, saturating for longs.
    Sum,
}

impl AggregateOp {
    /// Folds two values of the same kind. `Null` is the identity.
    fn combine(self, acc: CollectorValue, value: CollectorValue) -> CollectorValue {
        match (acc, value) {
            (CollectorValue::Null, value) => value,
            (acc, CollectorValue::Null) => acc,
            (CollectorValue::Long(a), CollectorValue::Long(b)) => CollectorValue::Long(match self {
                Self::Min => a.min(b),
                Self::Max => a.max(b),
                Self::Sum => a.saturating_add(b),
            }),
            (CollectorValue::Double(a), CollectorValue::Double(b)) => {
                CollectorValue::Double(match self {
                    Self::Min => a.min(b),
                    Self::Max => a.max(b),
                    Self::Sum => a + b,
                })
            }
            (acc, _) => acc,
        }
    }
}

/// Value type of an aggregated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumericKind {
    /// `i64` doc values.
    Long,
    /// `f64` doc values.
    Double,
}

/// An opened numeric doc-value column.
enum NumericColumn {
    /// Long column.
    Long(Column<i64>),
    /// Double column.
    Double(Column<f64>),
}

impl NumericColumn {
    /// Opens the column of `field`, `None` if the segment has no values for it.
    fn open(
        reader: &SegmentReader,
        field: &str,
        kind: NumericKind,
    ) -> tantivy::Result<Option<Self>> {
        let fast_fields = reader.fast_fields();
        Ok(match kind {
            NumericKind::Long => fast_fields.column_opt::<i64>(field)?.map(Self::Long),
            NumericKind::Double => fast_fields.column_opt::<f64>(field)?.map(Self::Double),
        })
    }

    /// Folds every value of `doc` into `acc`.
    fn fold(&self, doc: DocId, op: AggregateOp, acc: CollectorValue) -> CollectorValue {
        match self {
            Self::Long(column) => column
                .values_for_doc(doc)
                .fold(acc, |acc, value| op.combine(acc, CollectorValue::Long(value))),
            Self::Double(column) => column
                .values_for_doc(doc)
                .fold(acc, |acc, value| op.combine(acc, CollectorValue::Double(value))),
        }
    }
}

/// Min, max or sum over a numeric field.
#[derive(Debug, Clone)]
struct FieldAggregate {
    /// Aggregated field.
    field: String,
    /// Field value type.
    kind: NumericKind,
    /// Fold operation.
    op: AggregateOp,
}

/// Per-segment part of [`FieldAggregate`].
struct FieldAggregatePartial {
    /// Column, absent when the segment has no values.
    column: Option<NumericColumn>,
    /// Fold operation.
    op: AggregateOp,
    /// Value so far.
    acc: CollectorValue,
}

impl ParallelCollector for FieldAggregate {
    fn for_segment(
        &self,
        _segment_ord: SegmentOrdinal,
        reader: &SegmentReader,
    ) -> tantivy::Result<Box<dyn PartialCollector>> {
        Ok(Box::new(FieldAggregatePartial {
            column: NumericColumn::open(reader, &self.field, self.kind)?,
            op: self.op,
            acc: CollectorValue::Null,
        }))
    }

    fn merge(&self, partials: Vec<CollectorValue>) -> CollectorValue {
        partials
            .into_iter()
            .fold(CollectorValue::Null, |acc, value| self.op.combine(acc, value))
    }
}

impl PartialCollector for FieldAggregatePartial {
    fn collect(&mut self, doc: DocId, _score: Score) {
        if let Some(column) = &self.column {
            let acc = mem::replace(&mut self.acc, CollectorValue::Null);
            self.acc = column.fold(doc, self.op, acc);
        }
    }

    fn harvest(self: Box<Self>) -> CollectorValue {
        self.acc
    }
}

/// Counts matching documents.
#[derive(Debug, Clone, Copy)]
struct CountCollector;

/// Per-segment part of [`CountCollector`].
struct CountPartial(u64);

impl ParallelCollector for CountCollector {
    fn for_segment(
        &self,
        _segment_ord: SegmentOrdinal,
        _reader: &SegmentReader,
    ) -> tantivy::Result<Box<dyn PartialCollector>> {
        Ok(Box::new(CountPartial(0)))
    }

    fn merge(&self, partials: Vec<CollectorValue>) -> CollectorValue {
        CollectorValue::Count(
            partials
                .into_iter()
                .map(|value| match value {
                    CollectorValue::Count(count) => count,
                    _ => 0,
                })
                .sum(),
        )
    }
}

impl PartialCollector for CountPartial {
    fn collect(&mut self, _doc: DocId, _score: Score) {
        self.0 += 1;
    }

    fn harvest(self: Box<Self>) -> CollectorValue {
        CollectorValue::Count(self.0)
    }
}

/// Min or max over a long field, computed over the whole stream.
struct ClassicAggregate {
    /// Aggregated field.
    field: String,
    /// Fold operation.
    op: AggregateOp,
    /// Column of the current segment.
    column: Option<NumericColumn>,
    /// Value so far.
    acc: CollectorValue,
}

impl ClassicCollector for ClassicAggregate {
    fn set_segment(
        &mut self,
        _segment_ord: SegmentOrdinal,
        _doc_base: u64,
        reader: &SegmentReader,
    ) -> tantivy::Result<()> {
        self.column = NumericColumn::open(reader, &self.field, NumericKind::Long)?;
        Ok(())
    }

    fn collect(&mut self, doc: DocId, _score: Score) {
        if let Some(column) = &self.column {
            let acc = mem::replace(&mut self.acc, CollectorValue::Null);
            self.acc = column.fold(doc, self.op, acc);
        }
    }

    fn finish(self: Box<Self>) -> CollectorValue {
        self.acc
    }
}

/// Global ids of the first matching documents in stream order.
struct FirstDocs {
    /// Maximum number of ids kept, unbounded when `None`.
    limit: Option<usize>,
    /// Global id of the current segment's first document.
    doc_base: u64,
    /// Ids kept so far.
    docs: Vec<u64>,
}

impl ClassicCollector for FirstDocs {
    fn set_segment(
        &mut self,
        _segment_ord: SegmentOrdinal,
        doc_base: u64,
        _reader: &SegmentReader,
    ) -> tantivy::Result<()> {
        self.doc_base = doc_base;
        Ok(())
    }

    fn collect(&mut self, doc: DocId, _score: Score) {
        if self.limit.is_none_or(|limit| self.docs.len() < limit) {
            self.docs.push(self.doc_base + u64::from(doc));
        }
    }

    fn finish(self: Box<Self>) -> CollectorValue {
        CollectorValue::DocIds(self.docs)
    }
}

/// Registers a parallel field aggregate under `id`.
fn register_aggregate(
    registry: &mut CollectorRegistry,
    id: &str,
    kind: NumericKind,
    op: AggregateOp,
) {
    registry.register_parallel(id, move |name: &str, args: &[Value]| {
        Ok(Box::new(FieldAggregate {
            field: field_argument(name, args)?,
            kind,
            op,
        }) as Box<dyn ParallelCollector>)
    });
}

/// Registers a classic long aggregate under `id`.
fn register_classic_aggregate(registry: &mut CollectorRegistry, id: &str, op: AggregateOp) {
    registry.register_classic(id, move |name: &str, args: &[Value]| {
        Ok(Box::new(ClassicAggregate {
            field: field_argument(name, args)?,
            op,
            column: None,
            acc: CollectorValue::Null,
        }) as Box<dyn ClassicCollector>)
    });
}

/// Adds the built-in collectors to a registry.
pub(super) fn register_builtins(registry: &mut CollectorRegistry) {
    register_aggregate(registry, "min_long", NumericKind::Long, AggregateOp::Min);
    register_aggregate(registry, "max_long", NumericKind::Long, AggregateOp::Max);
    register_aggregate(registry, "sum_long", NumericKind::Long, AggregateOp::Sum);
    register_aggregate(registry, "min_double", NumericKind::Double, AggregateOp::Min);
    register_aggregate(registry, "max_double", NumericKind::Double, AggregateOp::Max);
    register_aggregate(registry, "sum_double", NumericKind::Double, AggregateOp::Sum);
    registry.register_parallel("count", |name: &str, args: &[Value]| {
        if !args.is_empty() {
            return Err(IndexError::CollectorArguments {
                name: name.to_string(),
                message: "count takes no arguments".to_string(),
            });
        }
        Ok(Box::new(CountCollector) as Box<dyn ParallelCollector>)
    });
    register_classic_aggregate(registry, "classic_max_long", AggregateOp::Max);
    register_classic_aggregate(registry, "classic_min_long", AggregateOp::Min);
    registry.register_classic("classic_first_docs", |name: &str, args: &[Value]| {
        Ok(Box::new(FirstDocs {
            limit: optional_usize_argument(name, args)?,
            doc_base: 0,
            docs: Vec::new(),
        }) as Box<dyn ClassicCollector>)
    });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn null_is_identity() {
        let op = AggregateOp::Max;
        assert_eq!(
            op.combine(CollectorValue::Null, CollectorValue::Long(3)),
            CollectorValue::Long(3)
        );
        assert_eq!(
            op.combine(CollectorValue::Long(3), CollectorValue::Null),
            CollectorValue::Long(3)
        );
    }

    #[test]
    fn long_sums_saturate() {
        assert_eq!(
            AggregateOp::Sum.combine(CollectorValue::Long(i64::MAX), CollectorValue::Long(1)),
            CollectorValue::Long(i64::MAX)
        );
    }

    #[test]
    fn merge_matches_a_single_fold() {
        let collector = FieldAggregate {
            field: "price".into(),
            kind: NumericKind::Double,
            op: AggregateOp::Min,
        };
        let merged = collector.merge(vec![
            CollectorValue::Double(4.0),
            CollectorValue::Null,
            CollectorValue::Double(2.5),
        ]);
        assert_eq!(merged, CollectorValue::Double(2.5));
        assert_eq!(
            CountCollector.merge(vec![CollectorValue::Count(2), CollectorValue::Count(3)]),
            CollectorValue::Count(5)
        );
    }
}
