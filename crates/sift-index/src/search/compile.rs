//! Compilation of query trees into Tantivy queries.

use std::ops::Bound;

use sift_config::FieldKind;
use sift_query::{BoolQuery, JoinQuery, MatchOperator, QueryDef};
use tantivy::{
    Term,
    query::{
        AllQuery, BooleanQuery, BoostQuery, ConstScoreQuery, EmptyQuery, FuzzyTermQuery, Occur,
        PhraseQuery, Query, QueryParser, RangeQuery, RegexQuery, TermQuery, TermSetQuery,
    },
    schema::{Field, IndexRecordOption},
};

use super::QueryContext;
use crate::{IndexError, facet::drill_down_query, schema::IndexedField};

/// Largest number of clause combinations a `minimum_should_match` may expand to.
const MAX_SHOULD_COMBINATIONS: usize = 256;

/// Compiles query trees against one request context.
pub struct QueryCompiler<'a> {
    /// Request context.
    context: &'a QueryContext<'a>,
}

impl<'a> QueryCompiler<'a> {
    /// Creates a compiler for a context.
    pub fn new(context: &'a QueryContext<'a>) -> Self {
        Self { context }
    }

    /// Compiles a query tree.
    pub fn compile(&self, query: &QueryDef) -> Result<Box<dyn Query>, IndexError> {
        Ok(match query {
            QueryDef::MatchAll => Box::new(AllQuery),
            QueryDef::Term { field, value } => {
                let field = self.field(field)?;
                Box::new(TermQuery::new(
                    self.term(&field, value)?,
                    record_option(&field),
                ))
            }
            QueryDef::Terms { field, values } => {
                let field = self.field(field)?;
                let terms = values
                    .iter()
                    .map(|value| self.term(&field, value))
                    .collect::<Result<Vec<_>, _>>()?;
                Box::new(TermSetQuery::new(terms))
            }
            QueryDef::Match {
                field,
                text,
                operator,
            } => self.match_query(field, text, *operator)?,
            QueryDef::QueryString {
                query,
                default_fields,
            } => self.query_string(query, default_fields)?,
            QueryDef::Bool(bool_query) => self.bool_query(bool_query)?,
            QueryDef::Wildcard { field, pattern } => {
                self.regex(field, &wildcard_to_regex(pattern))?
            }
            QueryDef::Prefix { field, prefix } => {
                self.regex(field, &format!("{}.*", escape_regex(prefix)))?
            }
            QueryDef::Fuzzy {
                field,
                value,
                max_edits,
                transpositions,
            } => {
                let field = self.field(field)?;
                Box::new(FuzzyTermQuery::new(
                    self.term(&field, value)?,
                    *max_edits,
                    *transpositions,
                ))
            }
            QueryDef::Phrase { field, text, slop } => self.phrase(field, text, *slop)?,
            QueryDef::LongRange {
                field,
                lower,
                upper,
                include_lower,
                include_upper,
            } => {
                self.numeric(field, FieldKind::Long)?;
                Box::new(RangeQuery::new_i64_bounds(
                    field.clone(),
                    bound(*lower, *include_lower),
                    bound(*upper, *include_upper),
                ))
            }
            QueryDef::DoubleRange {
                field,
                lower,
                upper,
                include_lower,
                include_upper,
            } => {
                self.numeric(field, FieldKind::Double)?;
                Box::new(RangeQuery::new_f64_bounds(
                    field.clone(),
                    bound(*lower, *include_lower),
                    bound(*upper, *include_upper),
                ))
            }
            QueryDef::LongExact { field, value } => {
                let indexed = self.numeric(field, FieldKind::Long)?;
                Box::new(TermQuery::new(
                    Term::from_field_i64(indexed, *value),
                    IndexRecordOption::Basic,
                ))
            }
            QueryDef::LongSet { field, values } => {
                let indexed = self.numeric(field, FieldKind::Long)?;
                Box::new(TermSetQuery::new(
                    values
                        .iter()
                        .map(|value| Term::from_field_i64(indexed, *value)),
                ))
            }
            QueryDef::IntMultiRange {
                field,
                lower,
                upper,
            } => {
                self.numeric(field, FieldKind::Long)?;
                union(lower.iter().zip(upper).map(|(lower, upper)| {
                    Box::new(RangeQuery::new_i64_bounds(
                        field.clone(),
                        Bound::Included(i64::from(*lower)),
                        Bound::Included(i64::from(*upper)),
                    )) as Box<dyn Query>
                }))
            }
            QueryDef::LongMultiRange {
                field,
                lower,
                upper,
            } => {
                self.numeric(field, FieldKind::Long)?;
                union(lower.iter().zip(upper).map(|(lower, upper)| {
                    Box::new(RangeQuery::new_i64_bounds(
                        field.clone(),
                        Bound::Included(*lower),
                        Bound::Included(*upper),
                    )) as Box<dyn Query>
                }))
            }
            QueryDef::DoubleMultiRange {
                field,
                lower,
                upper,
            } => {
                self.numeric(field, FieldKind::Double)?;
                union(lower.iter().zip(upper).map(|(lower, upper)| {
                    Box::new(RangeQuery::new_f64_bounds(
                        field.clone(),
                        Bound::Included(*lower),
                        Bound::Included(*upper),
                    )) as Box<dyn Query>
                }))
            }
            QueryDef::Join(join) => self.join(join)?,
            QueryDef::DrillDown(drill) => {
                let base = match &drill.base {
                    Some(base) => self.compile(base)?,
                    None => Box::new(AllQuery),
                };
                drill_down_query(
                    self.context.fields.drilldown,
                    base,
                    &drill.dimensions,
                    None,
                )
            }
            QueryDef::Boost { query, boost } => {
                Box::new(BoostQuery::new(self.compile(query)?, *boost))
            }
            QueryDef::ConstantScore { query, score } => {
                Box::new(ConstScoreQuery::new(self.compile(query)?, *score))
            }
        })
    }

    /// Resolves a searchable field.
    fn field(&self, name: &str) -> Result<IndexedField<'a>, IndexError> {
        self.context.fields.indexed(name)
    }

    /// Resolves a numeric field of the expected kind.
    fn numeric(&self, name: &str, kind: FieldKind) -> Result<Field, IndexError> {
        let field = self.field(name)?;
        if field.definition.kind == kind {
            Ok(field.field)
        } else {
            Err(IndexError::FieldUsage {
                field: name.to_string(),
                message: format!("expected a {kind:?} field, found {:?}", field.definition.kind),
            })
        }
    }

    /// Builds the exact term of a value for a field.
    fn term(&self, field: &IndexedField<'_>, value: &str) -> Result<Term, IndexError> {
        let invalid = |expected: &str| {
            IndexError::InvalidQuery(format!("'{value}' is not a valid {expected}"))
        };
        match field.definition.kind {
            FieldKind::Text | FieldKind::String => Ok(Term::from_field_text(field.field, value)),
            FieldKind::Long => value
                .parse::<i64>()
                .map(|value| Term::from_field_i64(field.field, value))
                .map_err(|_| invalid("long")),
            FieldKind::Double => value
                .parse::<f64>()
                .map(|value| Term::from_field_f64(field.field, value))
                .map_err(|_| invalid("double")),
            kind => Err(IndexError::InvalidQuery(format!(
                "{kind:?} fields are not indexed"
            ))),
        }
    }

    /// Analyzes text with the query analyzer of the field and combines the tokens.
    fn match_query(
        &self,
        name: &str,
        text: &str,
        operator: MatchOperator,
    ) -> Result<Box<dyn Query>, IndexError> {
        let field = self.field(name)?;
        let analyzer = self.context.fields.analyzer_name(field.definition);
        let tokens = self.context.query_analyzers.tokenize(analyzer, text);
        let occur = match operator {
            MatchOperator::Or => Occur::Should,
            MatchOperator::And => Occur::Must,
        };
        let mut clauses = tokens
            .iter()
            .map(|token| {
                Ok((
                    occur,
                    Box::new(TermQuery::new(self.term(&field, token)?, record_option(&field)))
                        as Box<dyn Query>,
                ))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;
        Ok(match clauses.len() {
            0 => Box::new(EmptyQuery),
            1 => clauses.remove(0).1,
            _ => Box::new(BooleanQuery::new(clauses)),
        })
    }

    /// Parses a query string with the engine parser.
    fn query_string(
        &self,
        query: &str,
        default_fields: &[String],
    ) -> Result<Box<dyn Query>, IndexError> {
        let fields = if default_fields.is_empty() {
            self.context.fields.text_fields()
        } else {
            default_fields
                .iter()
                .map(|name| self.field(name).map(|field| field.field))
                .collect::<Result<Vec<_>, _>>()?
        };
        let parser = QueryParser::for_index(self.context.snapshot.searcher().index(), fields);
        parser
            .parse_query(query)
            .map_err(|e| IndexError::InvalidQuery(e.to_string()))
    }

    /// Compiles a boolean query.
    ///
    /// Filters must match without scoring. A `minimum_should_match` above one is expanded into
    /// the disjunction of every conjunction of that many should clauses.
    fn bool_query(&self, query: &BoolQuery) -> Result<Box<dyn Query>, IndexError> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for must in &query.must {
            clauses.push((Occur::Must, self.compile(must)?));
        }
        for filter in &query.filter {
            clauses.push((
                Occur::Must,
                Box::new(ConstScoreQuery::new(self.compile(filter)?, 0.0)),
            ));
        }
        for must_not in &query.must_not {
            clauses.push((Occur::MustNot, self.compile(must_not)?));
        }
        let should = query
            .should
            .iter()
            .map(|should| self.compile(should))
            .collect::<Result<Vec<_>, _>>()?;

        let positive = query.must.len() + query.filter.len();
        match query.minimum_should_match {
            0 if positive == 0 => clauses.push((Occur::Must, union(should))),
            0 => clauses.extend(should.into_iter().map(|should| (Occur::Should, should))),
            1 => clauses.push((Occur::Must, union(should))),
            minimum => clauses.push((Occur::Must, at_least(should, minimum)?)),
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    /// Matches terms of a field against a regular expression.
    fn regex(&self, name: &str, pattern: &str) -> Result<Box<dyn Query>, IndexError> {
        let field = self.field(name)?;
        if !matches!(field.definition.kind, FieldKind::Text | FieldKind::String) {
            return Err(IndexError::FieldUsage {
                field: name.to_string(),
                message: "pattern queries need a text or string field".to_string(),
            });
        }
        let query = RegexQuery::from_pattern(pattern, field.field)
            .map_err(|e| IndexError::InvalidQuery(e.to_string()))?;
        Ok(Box::new(query))
    }

    /// Analyzes a phrase with the index analyzer of the field, so positions line up.
    fn phrase(&self, name: &str, text: &str, slop: u32) -> Result<Box<dyn Query>, IndexError> {
        let field = self.field(name)?;
        if field.definition.kind != FieldKind::Text {
            return Err(IndexError::FieldUsage {
                field: name.to_string(),
                message: "phrase queries need a text field".to_string(),
            });
        }
        let analyzer = self.context.fields.analyzer_name(field.definition);
        let terms: Vec<Term> = self
            .context
            .index_analyzers
            .tokenize(analyzer, text)
            .iter()
            .map(|token| Term::from_field_text(field.field, token))
            .collect();
        Ok(match terms.len() {
            0 => Box::new(EmptyQuery),
            1 => Box::new(TermQuery::new(
                terms[0].clone(),
                IndexRecordOption::WithFreqs,
            )),
            _ => {
                let mut phrase = PhraseQuery::new(terms);
                phrase.set_slop(slop);
                Box::new(phrase)
            }
        })
    }

    /// Resolves a join through the other index.
    fn join(&self, join: &JoinQuery) -> Result<Box<dyn Query>, IndexError> {
        let to_field = self.field(&join.to_field)?;
        if to_field.definition.kind != FieldKind::String {
            return Err(IndexError::FieldUsage {
                field: join.to_field.clone(),
                message: "join targets must be string fields".to_string(),
            });
        }
        let resolver = self
            .context
            .joins
            .ok_or_else(|| IndexError::UnknownIndex(join.from_index.clone()))?;
        let values = resolver.join_values(&join.from_index, &join.from_field, &join.query)?;
        let terms = values
            .iter()
            .map(|value| Term::from_field_text(to_field.field, value));
        Ok(Box::new(ConstScoreQuery::new(
            Box::new(TermSetQuery::new(terms)),
            1.0,
        )))
    }
}

/// Postings detail needed to score a field.
fn record_option(field: &IndexedField<'_>) -> IndexRecordOption {
    if field.definition.kind == FieldKind::Text {
        IndexRecordOption::WithFreqs
    } else {
        IndexRecordOption::Basic
    }
}

/// Converts an optional bound.
fn bound<T>(value: Option<T>, inclusive: bool) -> Bound<T> {
    match value {
        None => Bound::Unbounded,
        Some(value) if inclusive => Bound::Included(value),
        Some(value) => Bound::Excluded(value),
    }
}

/// Matches any of the queries; nothing when there are none.
fn union(queries: impl IntoIterator<Item = Box<dyn Query>>) -> Box<dyn Query> {
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = queries
        .into_iter()
        .map(|query| (Occur::Should, query))
        .collect();
    match clauses.len() {
        0 => Box::new(EmptyQuery),
        1 => clauses.remove(0).1,
        _ => Box::new(BooleanQuery::new(clauses)),
    }
}

/// Matches documents satisfying at least `minimum` of the queries.
fn at_least(queries: Vec<Box<dyn Query>>, minimum: usize) -> Result<Box<dyn Query>, IndexError> {
    let subsets = combinations(queries.len(), minimum)?;
    Ok(union(subsets.into_iter().map(|subset| {
        Box::new(BooleanQuery::intersection(
            subset.into_iter().map(|i| queries[i].box_clone()).collect(),
        )) as Box<dyn Query>
    })))
}

/// Every `k`-element subset of `0..n`, in lexicographic order.
fn combinations(n: usize, k: usize) -> Result<Vec<Vec<usize>>, IndexError> {
    if k > n {
        return Ok(Vec::new());
    }
    let mut count: usize = 1;
    for i in 0..k.min(n - k) {
        count = count * (n - i) / (i + 1);
        if count > MAX_SHOULD_COMBINATIONS {
            return Err(IndexError::InvalidQuery(format!(
                "minimum_should_match {k} over {n} clauses is too expensive"
            )));
        }
    }
    let mut subsets = Vec::with_capacity(count);
    let mut current: Vec<usize> = (0..k).collect();
    loop {
        subsets.push(current.clone());
        let Some(i) = (0..k).rev().find(|&i| current[i] < n - k + i) else {
            return Ok(subsets);
        };
        current[i] += 1;
        for j in i + 1..k {
            current[j] = current[j - 1] + 1;
        }
    }
}

/// Escapes regular expression metacharacters.
fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.+*?()|[]{}^$#&-~".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Converts a `*`/`?` wildcard pattern to a regular expression.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 8);
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c => regex.push_str(&escape_regex(c.encode_utf8(&mut [0; 4]))),
        }
    }
    regex
}
