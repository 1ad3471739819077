use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use percolate_core::types::{Match, QuerySkip, RegisteredQuery, ShardRequest, ShardResult};
use percolate_core::CanonicalDoc;

use crate::context::EvaluationContext;
use crate::eval::Evaluator;
use crate::tantivy_utils::{Analyzer, AnalyzerKind};

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOptions {
    pub size: Option<usize>,
    pub only_count: bool,
    pub score: bool,
    pub sort: bool,
    pub include_fields: bool,
    pub start_time: DateTime<Utc>,
}

impl MatchOptions {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self { size: None, only_count: false, score: false, sort: false, include_fields: false, start_time }
    }
}

impl From<&ShardRequest> for MatchOptions {
    fn from(r: &ShardRequest) -> Self {
        Self { size: r.size, only_count: r.only_count, score: r.score, sort: r.sort, include_fields: r.include_fields, start_time: r.start_time }
    }
}

/// Evaluates one document against a shard's registered queries.
#[derive(Clone, Default)]
pub struct PercolateMatcher {
    analyzer: Analyzer,
}

impl PercolateMatcher {
    pub fn new(kind: AnalyzerKind) -> Self { Self { analyzer: Analyzer::new(kind) } }

    pub fn percolate<'q, I>(&self, doc: &CanonicalDoc, queries: I, opts: &MatchOptions) -> ShardResult
    where
        I: IntoIterator<Item = &'q RegisteredQuery>,
    {
        let mut analyzer = self.analyzer.clone();
        let ctx = EvaluationContext::build(doc, &mut analyzer);
        let mut evaluator = Evaluator::new(&mut analyzer, opts.start_time);
        let keep_scores = opts.score || opts.sort;
        let mut result = ShardResult::default();

        for query in queries {
            match evaluator.eval(&query.query, &ctx) {
                Ok(Some(score)) => {
                    result.count += 1;
                    if opts.only_count { continue; }
                    // Sorted output needs every candidate; otherwise stop collecting at the limit.
                    if !opts.sort && opts.size.is_some_and(|limit| result.matches.len() >= limit) { continue; }
                    result.matches.push(Match {
                        index: query.owner_index.clone(),
                        id: query.id.clone(),
                        score: keep_scores.then_some(score),
                        fields: opts.include_fields.then(|| query.stored_fields.clone()),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(query_id = %query.id, error = %e, "skipping query that failed to evaluate");
                    result.skipped.push(QuerySkip { id: query.id.clone(), reason: e.to_string() });
                }
            }
        }

        if opts.sort {
            result.matches.sort_by(by_score_desc);
            if let Some(limit) = opts.size { result.matches.truncate(limit); }
        }
        debug!(count = result.count, returned = result.matches.len(), skipped = result.skipped.len(), "percolated document");
        result
    }
}

/// Descending score, ties broken by index then query id.
pub fn by_score_desc(a: &Match, b: &Match) -> Ordering {
    let (sa, sb) = (a.score.unwrap_or(0.0), b.score.unwrap_or(0.0));
    sb.partial_cmp(&sa).unwrap_or(Ordering::Equal).then_with(|| a.index.cmp(&b.index)).then_with(|| a.id.cmp(&b.id))
}
