use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use percolate_core::config::PercolateSettings;
use percolate_core::error::{Error, Result};
use percolate_core::traits::ClusterHealth;
use percolate_core::types::{
    DocRef, MultiPercolateRequest, MultiPercolateResponse, PercolateRequest, PercolateResponse, ShardKey, QUERY_TYPE_NAME,
};
use percolate_core::{CanonicalDoc, ContentFormat};
use percolate_text::AnalyzerKind;

use crate::batch_format::parse_ndjson;
use crate::cluster::{LocalCluster, ShardStats};
use crate::coordinator::ShardCoordinator;
use crate::multi::MultiPercolateCoordinator;
use crate::store::InMemoryDocumentStore;

/// A single-process node: indices, queries, documents and both coordinators.
pub struct Node {
    settings: PercolateSettings,
    cluster: Arc<LocalCluster>,
    store: Arc<InMemoryDocumentStore>,
    coordinator: Arc<ShardCoordinator>,
    multi: MultiPercolateCoordinator,
}

impl Node {
    pub fn new(settings: PercolateSettings) -> Result<Self> {
        settings.validate()?;
        let analyzer: AnalyzerKind = settings.analyzer.parse().map_err(Error::InvalidConfig)?;
        let cluster = Arc::new(LocalCluster::new(analyzer));
        let store = Arc::new(InMemoryDocumentStore::new());
        let coordinator = Arc::new(ShardCoordinator::new(cluster.clone(), cluster.clone(), store.clone()));
        let multi = MultiPercolateCoordinator::new(coordinator.clone(), settings.batch_timeout(), settings.max_concurrent_items);
        info!(analyzer = %settings.analyzer, default_shards = settings.default_shards, "node started");
        Ok(Self { settings, cluster, store, coordinator, multi })
    }

    pub fn settings(&self) -> &PercolateSettings { &self.settings }

    pub fn cluster(&self) -> &Arc<LocalCluster> { &self.cluster }

    pub fn coordinator(&self) -> &Arc<ShardCoordinator> { &self.coordinator }

    /// Create an index; `shards` defaults to the configured shard count.
    pub fn create_index(&self, name: &str, shards: Option<u32>) -> Result<()> {
        self.cluster.create_index(name, shards.unwrap_or(self.settings.default_shards))
    }

    pub fn register_query(&self, index: &str, id: &str, source: &Value, routing: Option<&str>) -> Result<ShardKey> {
        self.cluster.register_query(index, id, source, routing)
    }

    pub fn unregister_query(&self, index: &str, id: &str) -> Result<()> { self.cluster.unregister_query(index, id) }

    /// Index a document. Documents of the reserved query type register a query instead.
    pub fn index_document(&self, doc_ref: &DocRef, source: Value) -> Result<()> {
        if doc_ref.doc_type == QUERY_TYPE_NAME {
            self.register_query(&doc_ref.index, &doc_ref.id, &source, doc_ref.routing.as_deref())?;
            return Ok(());
        }
        if !self.cluster.has_index(&doc_ref.index) {
            return Err(Error::IndexNotFound(doc_ref.index.clone()));
        }
        self.store.put(doc_ref, CanonicalDoc::from_value(source, ContentFormat::Json)?);
        Ok(())
    }

    pub fn delete_document(&self, doc_ref: &DocRef) -> Result<bool> {
        if doc_ref.doc_type == QUERY_TYPE_NAME {
            self.unregister_query(&doc_ref.index, &doc_ref.id)?;
            return Ok(true);
        }
        Ok(self.store.delete(doc_ref))
    }

    pub fn refresh(&self, index: &str) -> Result<usize> { self.cluster.refresh(index) }

    pub fn refresh_all(&self) { self.cluster.refresh_all(); }

    pub fn set_health(&self, health: ClusterHealth) { self.cluster.set_health(health); }

    pub fn stats(&self, index: &str) -> Result<Vec<ShardStats>> { self.cluster.stats(index) }

    pub async fn percolate(&self, request: PercolateRequest) -> Result<PercolateResponse> {
        self.coordinator.execute(request).await
    }

    pub async fn multi_percolate(&self, batch: MultiPercolateRequest) -> Result<MultiPercolateResponse> {
        self.multi.execute(batch).await
    }

    /// Parse a newline-delimited batch and execute it.
    pub async fn multi_percolate_ndjson(&self, input: &[u8]) -> Result<MultiPercolateResponse> {
        let batch = parse_ndjson(input, self.settings.default_size)?;
        self.multi.execute(batch).await
    }
}
