//! Compiled query representation for registered queries.
//!
//! Registration sources are JSON objects shaped like
//! `{"query": {"match": {"field1": "b"}}, "owner": "alice"}`: the `query`
//! entry is compiled into a [`Query`] and every other top-level entry is kept
//! as stored metadata.
use std::collections::BTreeMap;
use std::fmt;

use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to parse query: {0}")]
pub struct QueryError(pub String);

fn err<T>(msg: impl Into<String>) -> Result<T, QueryError> { Err(QueryError(msg.into())) }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operator {
    #[default]
    Or,
    And,
}

/// How scores of matching nested sub-documents combine into the parent score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreMode {
    #[default]
    Avg,
    Max,
    Min,
    Sum,
    None,
}

impl ScoreMode {
    fn parse(s: &str) -> Result<Self, QueryError> {
        match s.to_ascii_lowercase().as_str() {
            "avg" => Ok(ScoreMode::Avg),
            "max" => Ok(ScoreMode::Max),
            "min" => Ok(ScoreMode::Min),
            "sum" | "total" => Ok(ScoreMode::Sum),
            "none" => Ok(ScoreMode::None),
            other => err(format!("unknown score_mode [{other}]")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self { ScoreMode::Avg => "avg", ScoreMode::Max => "max", ScoreMode::Min => "min", ScoreMode::Sum => "sum", ScoreMode::None => "none" }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeBounds {
    pub gt: Option<Value>,
    pub gte: Option<Value>,
    pub lt: Option<Value>,
    pub lte: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub should: Vec<Query>,
    pub must_not: Vec<Query>,
    pub filter: Vec<Query>,
    pub minimum_should_match: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    MatchNone,
    Match { field: String, text: String, operator: Operator },
    MatchPhrase { field: String, text: String },
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Range { field: String, bounds: RangeBounds },
    Exists { field: String },
    Bool(BoolQuery),
    Nested { path: String, query: Box<Query>, score_mode: ScoreMode },
}

impl Query {
    pub fn match_text(field: impl Into<String>, text: impl Into<String>) -> Self {
        Query::Match { field: field.into(), text: text.into(), operator: Operator::Or }
    }

    pub fn all_of(queries: Vec<Query>) -> Self { Query::Bool(BoolQuery { must: queries, ..BoolQuery::default() }) }

    /// Parse the query DSL.
    pub fn parse(value: &Value) -> Result<Self, QueryError> {
        let obj = value.as_object().ok_or_else(|| QueryError("query must be an object".into()))?;
        if obj.len() != 1 { return err(format!("query must have exactly one clause, found {}", obj.len())); }
        let (kind, body) = obj.iter().next().ok_or_else(|| QueryError("empty query".into()))?;
        match kind.as_str() {
            "match_all" => Ok(Query::MatchAll),
            "match_none" => Ok(Query::MatchNone),
            "match" => {
                let (field, spec) = single_field(kind, body)?;
                match spec {
                    Value::Object(opts) => {
                        let text = scalar_text(opts.get("query").ok_or_else(|| QueryError("[match] requires 'query'".into()))?)?;
                        let operator = match opts.get("operator").and_then(Value::as_str).map(str::to_ascii_lowercase).as_deref() {
                            None | Some("or") => Operator::Or,
                            Some("and") => Operator::And,
                            Some(other) => return err(format!("unknown operator [{other}]")),
                        };
                        Ok(Query::Match { field, text, operator })
                    }
                    other => Ok(Query::Match { field, text: scalar_text(other)?, operator: Operator::Or }),
                }
            }
            "match_phrase" => {
                let (field, spec) = single_field(kind, body)?;
                let text = match spec {
                    Value::Object(opts) => scalar_text(opts.get("query").ok_or_else(|| QueryError("[match_phrase] requires 'query'".into()))?)?,
                    other => scalar_text(other)?,
                };
                Ok(Query::MatchPhrase { field, text })
            }
            "term" => {
                let (field, spec) = single_field(kind, body)?;
                let value = match spec {
                    Value::Object(opts) => opts.get("value").cloned().ok_or_else(|| QueryError("[term] requires 'value'".into()))?,
                    other => other.clone(),
                };
                if value.is_object() || value.is_array() { return err("[term] value must be a scalar"); }
                Ok(Query::Term { field, value })
            }
            "terms" => {
                let (field, spec) = single_field(kind, body)?;
                let values = spec.as_array().ok_or_else(|| QueryError("[terms] requires an array".into()))?.clone();
                Ok(Query::Terms { field, values })
            }
            "range" => {
                let (field, spec) = single_field(kind, body)?;
                let opts = spec.as_object().ok_or_else(|| QueryError("[range] requires an object".into()))?;
                let mut bounds = RangeBounds::default();
                for (op, bound) in opts {
                    match op.as_str() {
                        "gt" => bounds.gt = Some(bound.clone()),
                        "gte" | "from" => bounds.gte = Some(bound.clone()),
                        "lt" => bounds.lt = Some(bound.clone()),
                        "lte" | "to" => bounds.lte = Some(bound.clone()),
                        "format" | "time_zone" | "boost" => {}
                        other => return err(format!("unknown range parameter [{other}]")),
                    }
                }
                if bounds == RangeBounds::default() { return err(format!("[range] on [{field}] has no bounds")); }
                Ok(Query::Range { field, bounds })
            }
            "exists" => {
                let field = body.get("field").and_then(Value::as_str).ok_or_else(|| QueryError("[exists] requires 'field'".into()))?;
                Ok(Query::Exists { field: field.to_string() })
            }
            "bool" => {
                let opts = body.as_object().ok_or_else(|| QueryError("[bool] requires an object".into()))?;
                let mut b = BoolQuery::default();
                for (clause, queries) in opts {
                    let target = match clause.as_str() {
                        "must" => &mut b.must,
                        "should" => &mut b.should,
                        "must_not" => &mut b.must_not,
                        "filter" => &mut b.filter,
                        "minimum_should_match" => {
                            let n = queries.as_u64().ok_or_else(|| QueryError("minimum_should_match must be a number".into()))?;
                            b.minimum_should_match = Some(usize::try_from(n).map_err(|_| QueryError(format!("minimum_should_match [{n}] is out of range")))?);
                            continue;
                        }
                        "boost" => continue,
                        other => return err(format!("unknown bool clause [{other}]")),
                    };
                    match queries {
                        Value::Array(items) => for item in items { target.push(Query::parse(item)?); },
                        single => target.push(Query::parse(single)?),
                    }
                }
                Ok(Query::Bool(b))
            }
            "nested" => {
                let path = body.get("path").and_then(Value::as_str).filter(|p| !p.is_empty())
                    .ok_or_else(|| QueryError("[nested] requires 'path'".into()))?;
                let inner = body.get("query").ok_or_else(|| QueryError("[nested] requires 'query'".into()))?;
                let score_mode = match body.get("score_mode").and_then(Value::as_str) { Some(s) => ScoreMode::parse(s)?, None => ScoreMode::default() };
                Ok(Query::Nested { path: path.to_string(), query: Box::new(Query::parse(inner)?), score_mode })
            }
            other => err(format!("unknown query type [{other}]")),
        }
    }

    /// Render back to the DSL accepted by [`Query::parse`].
    pub fn to_json(&self) -> Value {
        match self {
            Query::MatchAll => json!({"match_all": {}}),
            Query::MatchNone => json!({"match_none": {}}),
            Query::Match { field, text, operator } => {
                let op = match operator { Operator::Or => "or", Operator::And => "and" };
                json!({"match": {field.as_str(): {"query": text, "operator": op}}})
            }
            Query::MatchPhrase { field, text } => json!({"match_phrase": {field.as_str(): text}}),
            Query::Term { field, value } => json!({"term": {field.as_str(): value}}),
            Query::Terms { field, values } => json!({"terms": {field.as_str(): values}}),
            Query::Range { field, bounds } => {
                let mut spec = Map::new();
                for (name, bound) in [("gt", &bounds.gt), ("gte", &bounds.gte), ("lt", &bounds.lt), ("lte", &bounds.lte)] {
                    if let Some(b) = bound { spec.insert(name.to_string(), b.clone()); }
                }
                json!({"range": {field.as_str(): spec}})
            }
            Query::Exists { field } => json!({"exists": {"field": field}}),
            Query::Bool(b) => {
                let list = |qs: &[Query]| Value::Array(qs.iter().map(Query::to_json).collect());
                let mut spec = Map::new();
                for (name, qs) in [("must", &b.must), ("should", &b.should), ("must_not", &b.must_not), ("filter", &b.filter)] {
                    if !qs.is_empty() { spec.insert(name.to_string(), list(qs)); }
                }
                if let Some(m) = b.minimum_should_match { spec.insert("minimum_should_match".into(), json!(m)); }
                json!({"bool": spec})
            }
            Query::Nested { path, query, score_mode } => json!({"nested": {"path": path, "query": query.to_json(), "score_mode": score_mode.as_str()}}),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.to_json()) }
}

fn single_field<'a>(kind: &str, body: &'a Value) -> Result<(String, &'a Value), QueryError> {
    let obj = body.as_object().ok_or_else(|| QueryError(format!("[{kind}] requires an object")))?;
    let mut fields = obj.iter().filter(|(k, _)| k.as_str() != "boost");
    match (fields.next(), fields.next()) {
        (Some((field, spec)), None) => Ok((field.clone(), spec)),
        _ => err(format!("[{kind}] requires exactly one field")),
    }
}

fn scalar_text(v: &Value) -> Result<String, QueryError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => err("query text must be a scalar"),
    }
}

/// A registration source split into its compiled query and stored fields.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySource {
    pub query: Query,
    pub stored_fields: BTreeMap<String, Value>,
}

impl QuerySource {
    pub fn parse(source: &Value) -> Result<Self, QueryError> {
        let obj = source.as_object().ok_or_else(|| QueryError("registration source must be an object".into()))?;
        let query = Query::parse(obj.get("query").ok_or_else(|| QueryError("registration source requires 'query'".into()))?)?;
        let stored_fields = obj.iter().filter(|(k, _)| k.as_str() != "query").map(|(k, v)| (k.clone(), v.clone())).collect();
        Ok(Self { query, stored_fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_clauses() {
        let q = Query::parse(&json!({"bool": {"must": [{"match": {"field1": "b"}}, {"match": {"field1": "c"}}]}})).expect("bool");
        assert_eq!(q, Query::all_of(vec![Query::match_text("field1", "b"), Query::match_text("field1", "c")]));

        let q = Query::parse(&json!({"nested": {"path": "employee", "score_mode": "avg",
            "query": {"match": {"employee.name": {"query": "virginia potts", "operator": "and"}}}}})).expect("nested");
        match q {
            Query::Nested { path, query, score_mode } => {
                assert_eq!(path, "employee");
                assert_eq!(score_mode, ScoreMode::Avg);
                assert!(matches!(*query, Query::Match { operator: Operator::And, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_or_empty_clauses() {
        assert!(Query::parse(&json!({"fuzzy_magic": {}})).is_err());
        assert!(Query::parse(&json!({"range": {"age": {}}})).is_err());
        assert!(Query::parse(&json!({"match": {"a": "x", "b": "y"}})).is_err());
        assert!(Query::parse(&json!("match_all")).is_err());
    }

    #[test]
    fn minimum_should_match_must_be_a_non_negative_count() {
        let should = json!([{"term": {"tag": "x"}}, {"term": {"tag": "y"}}]);
        match Query::parse(&json!({"bool": {"should": should, "minimum_should_match": 2}})).expect("bool") {
            Query::Bool(b) => assert_eq!(b.minimum_should_match, Some(2)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(Query::parse(&json!({"bool": {"should": should, "minimum_should_match": -1}})).is_err());
        assert!(Query::parse(&json!({"bool": {"should": should, "minimum_should_match": "50%"}})).is_err());
    }

    #[test]
    fn to_json_round_trips_through_parse() {
        let src = json!({"bool": {"should": [{"term": {"tag": "x"}}, {"range": {"n": {"gte": 1, "lt": 5}}}],
            "must_not": [{"exists": {"field": "gone"}}], "minimum_should_match": 1}});
        let q = Query::parse(&src).expect("parse");
        assert_eq!(Query::parse(&q.to_json()).expect("reparse"), q);
    }

    #[test]
    fn registration_source_keeps_metadata() {
        let src = QuerySource::parse(&json!({"query": {"match_all": {}}, "a": "b", "priority": 3})).expect("source");
        assert_eq!(src.query, Query::MatchAll);
        assert_eq!(src.stored_fields.get("a"), Some(&json!("b")));
        assert_eq!(src.stored_fields.len(), 2);
    }
}
