//! Single-request fan-out: pick shards, resolve the document once, run every
//! shard and merge the tagged outcomes.
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, warn};

use percolate_core::error::{Error, Result};
use percolate_core::traits::{ClusterHealth, ClusterRouting, DocumentStore, ShardPercolator};
use percolate_core::types::{
    DocSource, PercolateRequest, PercolateResponse, ResolvedDoc, ShardFailure, ShardKey, ShardOutcome, ShardRequest,
};
use percolate_core::Status;
use percolate_text::matcher::by_score_desc;

pub struct ShardCoordinator {
    routing: Arc<dyn ClusterRouting>,
    shards: Arc<dyn ShardPercolator>,
    store: Arc<dyn DocumentStore>,
}

impl ShardCoordinator {
    pub fn new(routing: Arc<dyn ClusterRouting>, shards: Arc<dyn ShardPercolator>, store: Arc<dyn DocumentStore>) -> Self {
        Self { routing, shards, store }
    }

    pub fn ensure_available(&self) -> Result<()> {
        match self.routing.health() {
            ClusterHealth::Red => Err(Error::ClusterUnavailable("cluster health is red".into())),
            ClusterHealth::Green | ClusterHealth::Yellow => Ok(()),
        }
    }

    /// Target shards across all requested indices, sorted and deduplicated.
    pub fn select_shards(&self, request: &PercolateRequest) -> Result<Vec<ShardKey>> {
        if request.indices.is_empty() {
            return Err(Error::InvalidRequest("percolate request names no index".into()));
        }
        let mut shards = Vec::new();
        for index in &request.indices {
            shards.extend(self.routing.resolve_shards(index, request.routing.as_deref())?);
        }
        shards.sort();
        shards.dedup();
        Ok(shards)
    }

    /// Fix the start time and fetch a referenced document. Inline bytes are
    /// passed through undecoded; each shard decodes them.
    pub async fn resolve(&self, request: &PercolateRequest) -> Result<ShardRequest> {
        let doc = match &request.source {
            DocSource::Inline(bytes) => ResolvedDoc::Encoded(Arc::clone(bytes)),
            DocSource::Ref(doc_ref) => {
                let store = Arc::clone(&self.store);
                let lookup = doc_ref.clone();
                let found = tokio::task::spawn_blocking(move || store.get(&lookup))
                    .await
                    .map_err(|e| Error::Operation(format!("document fetch task failed: {e}")))??;
                match found {
                    Some(doc) => ResolvedDoc::Decoded(Arc::new(doc)),
                    None => {
                        return Err(Error::DocumentMissing {
                            index: doc_ref.index.clone(),
                            doc_type: doc_ref.doc_type.clone(),
                            id: doc_ref.id.clone(),
                        })
                    }
                }
            }
        };
        Ok(ShardRequest {
            routing: request.routing.clone(),
            size: request.size,
            only_count: request.only_count,
            score: request.score,
            sort: request.sort,
            include_fields: request.include_fields,
            start_time: request.start_time.unwrap_or_else(Utc::now),
            doc,
        })
    }

    /// Percolate one request across its shards. Every shard is read through
    /// one pinned view, so a concurrent refresh is seen by all or none of them.
    ///
    /// Shard failures are reported inside the response; `Err` is returned only
    /// when no shard could be attempted.
    pub async fn execute(&self, request: PercolateRequest) -> Result<PercolateResponse> {
        let started = Instant::now();
        self.ensure_available()?;
        let targets = self.select_shards(&request)?;
        let shard_request = Arc::new(self.resolve(&request).await?);
        let view = self.shards.pin(&targets);

        let tasks = targets.into_iter().map(|key| {
            let view = Arc::clone(&view);
            let shard_request = Arc::clone(&shard_request);
            async move {
                let attempted = key.clone();
                match tokio::task::spawn_blocking(move || view.percolate(&key, &shard_request).map(|r| (key, r))).await {
                    Ok(Ok((shard, result))) => ShardOutcome::Success { shard, result },
                    Ok(Err(failure)) => ShardOutcome::Failure(failure),
                    Err(e) => ShardOutcome::Failure(ShardFailure::new(
                        &attempted,
                        format!("shard task failed: {e}"),
                        Status::InternalServerError,
                    )),
                }
            }
        });
        let outcomes = join_all(tasks).await;

        let mut response = merge(outcomes, request.size, request.sort);
        response.took = started.elapsed().as_millis() as u64;
        debug!(
            indices = ?request.indices,
            total = response.total,
            successful = response.shards.successful,
            failed = response.shards.failed,
            took_ms = response.took,
            "percolate request finished"
        );
        Ok(response)
    }
}

fn outcome_shard(outcome: &ShardOutcome) -> (&str, u32) {
    match outcome {
        ShardOutcome::Success { shard, .. } => (&shard.index, shard.shard),
        ShardOutcome::Failure(f) => (&f.index, f.shard),
    }
}

/// Combine shard outcomes in shard order. Counts are summed; the size limit is
/// applied after the merge, and after sorting when `sort` is set.
pub fn merge(mut outcomes: Vec<ShardOutcome>, size: Option<usize>, sort: bool) -> PercolateResponse {
    outcomes.sort_by(|a, b| outcome_shard(a).cmp(&outcome_shard(b)));
    let mut response = PercolateResponse::default();
    response.shards.total = outcomes.len();

    for outcome in outcomes {
        match outcome {
            ShardOutcome::Success { result, .. } => {
                response.shards.successful += 1;
                response.total += result.count;
                response.matches.extend(result.matches);
                response.skipped.extend(result.skipped);
            }
            ShardOutcome::Failure(failure) => {
                warn!(index = %failure.index, shard = failure.shard, status = failure.status.code(), reason = %failure.reason, "shard failed");
                response.shards.failed += 1;
                response.shards.failures.push(failure);
            }
        }
    }

    if sort { response.matches.sort_by(by_score_desc); }
    if let Some(limit) = size { response.matches.truncate(limit); }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use percolate_core::types::{Match, ShardResult};

    fn hit(index: &str, id: &str, score: Option<f32>) -> Match {
        Match { index: index.into(), id: id.into(), score, fields: None }
    }

    fn success(shard: u32, count: u64, matches: Vec<Match>) -> ShardOutcome {
        ShardOutcome::Success { shard: ShardKey::new("idx", shard), result: ShardResult { matches, count, skipped: vec![] } }
    }

    #[test]
    fn merge_is_deterministic_and_truncates_after_combining() {
        let outcomes = vec![
            success(1, 2, vec![hit("idx", "c", None), hit("idx", "d", None)]),
            ShardOutcome::Failure(ShardFailure::new(&ShardKey::new("idx", 2), "boom", Status::InternalServerError)),
            success(0, 2, vec![hit("idx", "a", None), hit("idx", "b", None)]),
        ];
        let response = merge(outcomes, Some(3), false);
        assert_eq!(response.total, 4);
        assert_eq!(response.match_ids(), vec!["a", "b", "c"]);
        assert_eq!(response.shards.total, 3);
        assert_eq!(response.shards.successful, 2);
        assert_eq!(response.shards.failed, 1);
        assert_eq!(response.shard_failures()[0].shard, 2);
    }

    #[test]
    fn merge_sorts_by_score_across_shards() {
        let outcomes = vec![
            success(0, 2, vec![hit("idx", "a", Some(0.2)), hit("idx", "b", Some(0.9))]),
            success(1, 1, vec![hit("idx", "c", Some(0.5))]),
        ];
        let response = merge(outcomes, Some(2), true);
        assert_eq!(response.match_ids(), vec!["b", "c"]);
        assert_eq!(response.total, 3);
    }
}
