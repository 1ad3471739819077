use std::sync::Arc;

use crate::content::CanonicalDoc;
use crate::error::Result;
use crate::types::{DocRef, ShardKey, ShardRequest, ShardResult, ShardFailure};

/// Fetch-by-id collaborator used to resolve [`DocRef`] sub-requests.
pub trait DocumentStore: Send + Sync {
    fn get(&self, doc_ref: &DocRef) -> Result<Option<CanonicalDoc>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterHealth {
    Green,
    Yellow,
    Red,
}

/// Shard topology and availability.
pub trait ClusterRouting: Send + Sync {
    fn health(&self) -> ClusterHealth;
    /// Shards of `index`, narrowed to the routing-addressed one when `routing` is set.
    fn resolve_shards(&self, index: &str, routing: Option<&str>) -> Result<Vec<ShardKey>>;
}

/// Shards fixed at one refresh point. All shards of one request are read
/// through the same view.
pub trait ShardView: Send + Sync {
    fn percolate(&self, shard: &ShardKey, request: &ShardRequest) -> std::result::Result<ShardResult, ShardFailure>;
}

/// Runs the matcher on shards. Implementations may be local or remote.
pub trait ShardPercolator: Send + Sync {
    /// Pin the registries of `shards`. A refresh is visible on all of them or on none.
    fn pin(&self, shards: &[ShardKey]) -> Arc<dyn ShardView>;
}
