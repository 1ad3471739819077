//! In-process cluster: index metadata, shard routing, health and the
//! registration write path.
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use percolate_core::error::{Error, Result};
use percolate_core::traits::{ClusterHealth, ClusterRouting, ShardPercolator, ShardView};
use percolate_core::types::{RegisteredQuery, RoutingKey, ShardFailure, ShardKey, ShardRequest, ShardResult};
use percolate_core::{QuerySource, Status};
use percolate_text::{AnalyzerKind, PercolateMatcher};

use crate::registry::RegistrySnapshot;
use crate::shard::{shard_for, LocalShard};

/// Visible registry state of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub shard: ShardKey,
    pub queries: usize,
    pub pending: usize,
    pub generation: u64,
}

pub struct IndexShards {
    name: String,
    shards: Vec<Arc<LocalShard>>,
    // Held for writing while a refresh publishes every shard, and for reading
    // while a request pins its shards.
    publish: RwLock<()>,
}

impl IndexShards {
    pub fn name(&self) -> &str { &self.name }
    pub fn num_shards(&self) -> u32 { self.shards.len() as u32 }
    pub fn shards(&self) -> &[Arc<LocalShard>] { &self.shards }

    fn shard_of(&self, routing_or_id: &str) -> &Arc<LocalShard> {
        &self.shards[shard_for(routing_or_id, self.num_shards()) as usize]
    }

    fn refresh(&self) -> usize {
        let _publishing = self.publish.write();
        self.shards.iter().map(|s| { s.registry().refresh(); s.registry().snapshot().len() }).sum()
    }
}

pub struct LocalCluster {
    indices: RwLock<BTreeMap<String, Arc<IndexShards>>>,
    health: RwLock<ClusterHealth>,
    analyzer: AnalyzerKind,
}

impl LocalCluster {
    pub fn new(analyzer: AnalyzerKind) -> Self {
        Self { indices: RwLock::new(BTreeMap::new()), health: RwLock::new(ClusterHealth::Green), analyzer }
    }

    pub fn create_index(&self, name: &str, num_shards: u32) -> Result<()> {
        if num_shards == 0 { return Err(Error::InvalidRequest(format!("index [{name}] needs at least one shard"))); }
        let mut indices = self.indices.write();
        if indices.contains_key(name) { return Err(Error::InvalidRequest(format!("index [{name}] already exists"))); }
        let matcher = PercolateMatcher::new(self.analyzer);
        let shards = (0..num_shards).map(|n| Arc::new(LocalShard::new(ShardKey::new(name, n), matcher.clone()))).collect();
        indices.insert(name.to_string(), Arc::new(IndexShards { name: name.to_string(), shards, publish: RwLock::new(()) }));
        info!(index = name, num_shards, "created index");
        Ok(())
    }

    pub fn index(&self, name: &str) -> Result<Arc<IndexShards>> {
        self.indices.read().get(name).cloned().ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    pub fn has_index(&self, name: &str) -> bool { self.indices.read().contains_key(name) }

    pub fn set_health(&self, health: ClusterHealth) { *self.health.write() = health; }

    /// Stage a query registration from a source like `{"query": {...}, "meta": ..}`.
    ///
    /// Any previous registration of `id` on another shard of the index is
    /// removed at the same refresh.
    pub fn register_query(&self, index: &str, id: &str, source: &Value, routing: Option<&str>) -> Result<ShardKey> {
        if routing == Some("") { return Err(Error::InvalidRequest(format!("query [{id}] has an empty routing value"))); }
        let parsed = QuerySource::parse(source)?;
        let idx = self.index(index)?;
        let target = idx.shard_of(routing.unwrap_or(id));
        for shard in idx.shards().iter().filter(|s| s.key() != target.key()) {
            shard.registry().unregister(id);
        }
        target.register(RegisteredQuery {
            id: id.to_string(),
            owner_index: index.to_string(),
            routing: RoutingKey::from_option(routing),
            query: parsed.query,
            stored_fields: parsed.stored_fields,
        });
        debug!(index, id, shard = %target.key(), "staged query registration");
        Ok(target.key().clone())
    }

    pub fn unregister_query(&self, index: &str, id: &str) -> Result<()> {
        for shard in self.index(index)?.shards() { shard.registry().unregister(id); }
        Ok(())
    }

    /// Make staged registrations of `index` visible on all its shards at once.
    /// Returns the number of visible queries.
    pub fn refresh(&self, index: &str) -> Result<usize> {
        let visible = self.index(index)?.refresh();
        info!(index, visible, "refreshed percolator queries");
        Ok(visible)
    }

    pub fn refresh_all(&self) {
        let indices: Vec<Arc<IndexShards>> = self.indices.read().values().cloned().collect();
        for idx in indices { idx.refresh(); }
    }

    pub fn stats(&self, index: &str) -> Result<Vec<ShardStats>> {
        Ok(self
            .index(index)?
            .shards()
            .iter()
            .map(|s| {
                let snapshot = s.registry().snapshot();
                ShardStats { shard: s.key().clone(), queries: snapshot.len(), pending: s.registry().pending_len(), generation: snapshot.generation() }
            })
            .collect())
    }
}

impl ClusterRouting for LocalCluster {
    fn health(&self) -> ClusterHealth { *self.health.read() }

    fn resolve_shards(&self, index: &str, routing: Option<&str>) -> Result<Vec<ShardKey>> {
        let idx = self.index(index)?;
        Ok(match routing {
            Some("") => return Err(Error::Routing(format!("empty routing value for index [{index}]"))),
            Some(r) => vec![idx.shard_of(r).key().clone()],
            None => idx.shards().iter().map(|s| s.key().clone()).collect(),
        })
    }
}

impl ShardPercolator for LocalCluster {
    fn pin(&self, shards: &[ShardKey]) -> Arc<dyn ShardView> {
        let mut by_index: BTreeMap<&str, Vec<&ShardKey>> = BTreeMap::new();
        for key in shards { by_index.entry(key.index.as_str()).or_default().push(key); }

        let mut pinned = BTreeMap::new();
        for (index, keys) in by_index {
            let Some(idx) = self.indices.read().get(index).cloned() else { continue };
            let _published = idx.publish.read();
            for key in keys {
                if let Some(shard) = idx.shards().get(key.shard as usize) {
                    pinned.insert(key.clone(), (Arc::clone(shard), shard.registry().snapshot()));
                }
            }
        }
        Arc::new(PinnedShards(pinned))
    }
}

/// Shards of one request with the registry snapshots they had when pinned.
struct PinnedShards(BTreeMap<ShardKey, (Arc<LocalShard>, Arc<RegistrySnapshot>)>);

impl ShardView for PinnedShards {
    fn percolate(&self, shard: &ShardKey, request: &ShardRequest) -> std::result::Result<ShardResult, ShardFailure> {
        let (local, snapshot) = self
            .0
            .get(shard)
            .ok_or_else(|| ShardFailure::new(shard, format!("shard {shard} is not allocated"), Status::ServiceUnavailable))?;
        local.percolate(snapshot, request)
    }
}
