use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use percolate_core::query::{BoolQuery, Operator, Query, RangeBounds, ScoreMode};

use crate::context::{EvaluationContext, FieldData};
use crate::datemath::{self, DateMathError};
use crate::tantivy_utils::Analyzer;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error(transparent)]
    DateMath(#[from] DateMathError),

    #[error("cannot compare [{field}] with bound {bound}")]
    IncomparableBound { field: String, bound: String },
}

/// Tests compiled queries against one evaluation context.
///
/// `Ok(Some(score))` means the query is satisfied, `Ok(None)` that it is not.
pub struct Evaluator<'a> {
    analyzer: &'a mut Analyzer,
    now: DateTime<Utc>,
}

impl<'a> Evaluator<'a> {
    pub fn new(analyzer: &'a mut Analyzer, now: DateTime<Utc>) -> Self { Self { analyzer, now } }

    pub fn eval(&mut self, query: &Query, ctx: &EvaluationContext) -> Result<Option<f32>, EvalError> {
        match query {
            Query::MatchAll => Ok(Some(1.0)),
            Query::MatchNone => Ok(None),
            Query::Match { field, text, operator } => Ok(self.eval_match(ctx.field(field), text, *operator)),
            Query::MatchPhrase { field, text } => Ok(self.eval_phrase(ctx.field(field), text)),
            Query::Term { field, value } => Ok(ctx.field(field).filter(|f| term_matches(f, value)).map(|_| 1.0)),
            Query::Terms { field, values } => {
                Ok(ctx.field(field).filter(|f| values.iter().any(|v| term_matches(f, v))).map(|_| 1.0))
            }
            Query::Range { field, bounds } => {
                let Some(data) = ctx.field(field) else { return Ok(None) };
                for value in &data.values {
                    if self.in_range(field, &value.raw, bounds)? { return Ok(Some(1.0)); }
                }
                Ok(None)
            }
            Query::Exists { field } => Ok(ctx.exists(field).then_some(1.0)),
            Query::Bool(b) => self.eval_bool(b, ctx),
            Query::Nested { path, query, score_mode } => {
                let mut scores = Vec::new();
                for sub in ctx.nested(path) {
                    if let Some(score) = self.eval(query, sub)? { scores.push(score); }
                }
                Ok(aggregate(&scores, *score_mode))
            }
        }
    }

    fn eval_match(&mut self, field: Option<&FieldData>, text: &str, operator: Operator) -> Option<f32> {
        let field = field?;
        let mut terms: Vec<String> = self.analyzer.analyze(text).into_iter().map(|t| t.text).collect();
        terms.sort();
        terms.dedup();
        if terms.is_empty() { return None; }
        let hits = terms.iter().filter(|t| field.contains_term(t)).count();
        let satisfied = match operator { Operator::Or => hits > 0, Operator::And => hits == terms.len() };
        satisfied.then(|| hits as f32 / terms.len() as f32)
    }

    fn eval_phrase(&mut self, field: Option<&FieldData>, text: &str) -> Option<f32> {
        let field = field?;
        let phrase = self.analyzer.analyze(text);
        let first = phrase.first()?;
        for value in &field.values {
            let by_position: HashMap<usize, &str> = value.tokens.iter().map(|t| (t.position, t.text.as_str())).collect();
            let found = value.tokens.iter().filter(|t| t.text == first.text).any(|start| {
                phrase.iter().all(|p| {
                    let at = start.position + (p.position - first.position);
                    by_position.get(&at) == Some(&p.text.as_str())
                })
            });
            if found { return Some(1.0); }
        }
        None
    }

    fn eval_bool(&mut self, b: &BoolQuery, ctx: &EvaluationContext) -> Result<Option<f32>, EvalError> {
        let mut score = 0.0;
        for q in &b.must {
            match self.eval(q, ctx)? { Some(s) => score += s, None => return Ok(None) }
        }
        for q in &b.filter {
            if self.eval(q, ctx)?.is_none() { return Ok(None); }
        }
        for q in &b.must_not {
            if self.eval(q, ctx)?.is_some() { return Ok(None); }
        }
        let mut should_hits = 0;
        for q in &b.should {
            if let Some(s) = self.eval(q, ctx)? { should_hits += 1; score += s; }
        }
        let required = b.minimum_should_match.unwrap_or(usize::from(b.must.is_empty() && b.filter.is_empty() && !b.should.is_empty()));
        Ok((should_hits >= required).then_some(score))
    }

    fn in_range(&self, field: &str, raw: &Value, bounds: &RangeBounds) -> Result<bool, EvalError> {
        let checks: [(&Option<Value>, bool, fn(Ordering) -> bool); 4] = [
            (&bounds.gt, true, |o| o == Ordering::Greater),
            (&bounds.gte, false, |o| o != Ordering::Less),
            (&bounds.lt, false, |o| o == Ordering::Less),
            (&bounds.lte, true, |o| o != Ordering::Greater),
        ];
        for (bound, round_up, accept) in checks {
            let Some(bound) = bound else { continue };
            match self.compare(field, raw, bound, round_up)? {
                Some(ordering) if accept(ordering) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Orders a document value against a bound; `None` when they cannot be compared.
    fn compare(&self, field: &str, raw: &Value, bound: &Value, round_up: bool) -> Result<Option<Ordering>, EvalError> {
        match (raw, bound) {
            (Value::Number(v), Value::Number(b)) => Ok(cmp_f64(v.as_f64(), b.as_f64())),
            (Value::String(v), Value::Number(b)) => Ok(cmp_f64(v.trim().parse().ok(), b.as_f64())),
            (_, Value::String(b)) if datemath::is_date_math(b) => {
                let bound_ms = datemath::resolve(b, self.now, round_up)?;
                Ok(datemath::value_millis(raw).map(|v| v.cmp(&bound_ms)))
            }
            (_, Value::String(b)) => {
                if let (Some(v), Some(bd)) = (date_of(raw), datemath::parse_date(b)) {
                    return Ok(Some(v.cmp(&bd.timestamp_millis())));
                }
                match raw {
                    Value::Number(v) => Ok(cmp_f64(v.as_f64(), b.trim().parse().ok())),
                    Value::String(v) => Ok(Some(v.as_str().cmp(b.as_str()))),
                    _ => Ok(None),
                }
            }
            (_, other) => Err(EvalError::IncomparableBound { field: field.to_string(), bound: other.to_string() }),
        }
    }
}

fn date_of(raw: &Value) -> Option<i64> {
    match raw {
        Value::String(s) => datemath::parse_date(s).map(|d| d.timestamp_millis()),
        _ => None,
    }
}

fn cmp_f64(a: Option<f64>, b: Option<f64>) -> Option<Ordering> { a?.partial_cmp(&b?) }

fn term_matches(field: &FieldData, wanted: &Value) -> bool {
    field.values.iter().any(|v| match (&v.raw, wanted) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (raw, w) => raw == w,
    }) || wanted.as_str().is_some_and(|s| field.contains_term(s))
}

fn aggregate(scores: &[f32], mode: ScoreMode) -> Option<f32> {
    if scores.is_empty() { return None; }
    Some(match mode {
        ScoreMode::Avg => scores.iter().sum::<f32>() / scores.len() as f32,
        ScoreMode::Max => scores.iter().copied().fold(f32::MIN, f32::max),
        ScoreMode::Min => scores.iter().copied().fold(f32::MAX, f32::min),
        ScoreMode::Sum => scores.iter().sum(),
        ScoreMode::None => 0.0,
    })
}
