use std::borrow::Cow;
use std::hash::Hasher;

use tracing::debug;
use twox_hash::XxHash64;

use percolate_core::content;
use percolate_core::types::{RegisteredQuery, ResolvedDoc, RoutingKey, ShardFailure, ShardKey, ShardRequest, ShardResult};
use percolate_core::Status;
use percolate_text::{MatchOptions, PercolateMatcher};

use crate::registry::{QueryRegistry, RegistrySnapshot};

/// Shard ordinal for a routing value (or the document id when unrouted).
pub fn shard_for(routing_or_id: &str, num_shards: u32) -> u32 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(routing_or_id.as_bytes());
    (hasher.finish() % u64::from(num_shards.max(1))) as u32
}

/// One partition of an index: its query registry plus a matcher.
pub struct LocalShard {
    key: ShardKey,
    registry: QueryRegistry,
    matcher: PercolateMatcher,
}

impl LocalShard {
    pub fn new(key: ShardKey, matcher: PercolateMatcher) -> Self { Self { key, registry: QueryRegistry::new(), matcher } }

    pub fn key(&self) -> &ShardKey { &self.key }

    pub fn registry(&self) -> &QueryRegistry { &self.registry }

    pub fn register(&self, query: RegisteredQuery) { self.registry.register(query); }

    /// Percolate against `snapshot`, a pinned view of this shard's registry.
    /// Only the partition matching the request's routing is visited, so an
    /// unrouted request never sees routed queries.
    pub fn percolate(&self, snapshot: &RegistrySnapshot, request: &ShardRequest) -> Result<ShardResult, ShardFailure> {
        let doc = match &request.doc {
            ResolvedDoc::Encoded(bytes) => Cow::Owned(
                content::decode(bytes, None).map_err(|e| ShardFailure::new(&self.key, e.to_string(), Status::BadRequest))?,
            ),
            ResolvedDoc::Decoded(doc) => Cow::Borrowed(doc.as_ref()),
        };
        let routing = RoutingKey::from_option(request.routing.as_deref());
        let result = self.matcher.percolate(&doc, snapshot.queries(Some(&routing)), &MatchOptions::from(request));
        debug!(shard = %self.key, generation = snapshot.generation(), count = result.count, "shard percolated");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_stable_and_in_range() {
        for n in 1..8 {
            let s = shard_for("a", n);
            assert!(s < n);
            assert_eq!(s, shard_for("a", n));
        }
        assert_eq!(shard_for("anything", 0), 0);
    }
}
