//! Domain types shared by the matcher, the shard coordinator and the batch
//! coordinator.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::CanonicalDoc;
use crate::error::Status;
use crate::query::Query;

pub type QueryId = String;
pub type StoredFields = BTreeMap<String, Value>;

/// Reserved document type under which queries are registered.
pub const QUERY_TYPE_NAME: &str = ".percolator";

/// Routing partition of a registered query. "No routing" is its own key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoutingKey {
    Unrouted,
    Key(String),
}

impl RoutingKey {
    pub fn from_option(routing: Option<&str>) -> Self {
        match routing { Some(r) => RoutingKey::Key(r.to_string()), None => RoutingKey::Unrouted }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { RoutingKey::Key(r) => Some(r), RoutingKey::Unrouted => None }
    }
}

/// Identity of a single shard: the owning index plus the shard ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardKey {
    pub index: String,
    pub shard: u32,
}

impl ShardKey {
    pub fn new(index: impl Into<String>, shard: u32) -> Self { Self { index: index.into(), shard } }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "[{}][{}]", self.index, self.shard) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredQuery {
    pub id: QueryId,
    pub owner_index: String,
    pub routing: RoutingKey,
    pub query: Query,
    pub stored_fields: StoredFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocRef {
    pub index: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
}

impl DocRef {
    pub fn new(index: impl Into<String>, doc_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self { index: index.into(), doc_type: doc_type.into(), id: id.into(), routing: None }
    }
}

/// Where the document to percolate comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum DocSource {
    /// Encoded bytes in any supported content format; decoded on each shard.
    Inline(Arc<[u8]>),
    /// Fetched from the document store before any shard is contacted.
    Ref(DocRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PercolateRequest {
    pub indices: Vec<String>,
    pub document_type: String,
    pub routing: Option<String>,
    pub size: Option<usize>,
    pub only_count: bool,
    pub score: bool,
    pub sort: bool,
    pub include_fields: bool,
    /// Captured once; every shard evaluates relative dates against it.
    pub start_time: Option<DateTime<Utc>>,
    pub source: DocSource,
}

impl PercolateRequest {
    pub fn new(indices: &[&str], document_type: impl Into<String>, source: DocSource) -> Self {
        Self {
            indices: indices.iter().map(|s| s.to_string()).collect(),
            document_type: document_type.into(),
            routing: None,
            size: None,
            only_count: false,
            score: false,
            sort: false,
            include_fields: false,
            start_time: None,
            source,
        }
    }

    pub fn with_doc(indices: &[&str], document_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self::new(indices, document_type, DocSource::Inline(Arc::from(bytes)))
    }

    pub fn with_get(indices: &[&str], document_type: impl Into<String>, doc_ref: DocRef) -> Self {
        Self::new(indices, document_type, DocSource::Ref(doc_ref))
    }

    pub fn routing(mut self, routing: impl Into<String>) -> Self { self.routing = Some(routing.into()); self }
    pub fn size(mut self, size: usize) -> Self { self.size = Some(size); self }
    pub fn only_count(mut self) -> Self { self.only_count = true; self }
    pub fn score(mut self, sort: bool) -> Self { self.score = true; self.sort = sort; self }
    pub fn include_fields(mut self) -> Self { self.include_fields = true; self }
    pub fn start_time(mut self, at: DateTime<Utc>) -> Self { self.start_time = Some(at); self }
}

/// A request whose document source has been resolved and whose start time is fixed.
#[derive(Debug, Clone)]
pub struct ShardRequest {
    pub routing: Option<String>,
    pub size: Option<usize>,
    pub only_count: bool,
    pub score: bool,
    pub sort: bool,
    pub include_fields: bool,
    pub start_time: DateTime<Utc>,
    pub doc: ResolvedDoc,
}

#[derive(Debug, Clone)]
pub enum ResolvedDoc {
    Encoded(Arc<[u8]>),
    Decoded(Arc<CanonicalDoc>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: QueryId,
    #[serde(rename = "_score", default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<StoredFields>,
}

/// A query that could not be evaluated; it does not fail the shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySkip {
    pub id: QueryId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShardResult {
    pub matches: Vec<Match>,
    pub count: u64,
    pub skipped: Vec<QuerySkip>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardFailure {
    pub index: String,
    pub shard: u32,
    pub reason: String,
    pub status: Status,
}

impl ShardFailure {
    pub fn new(shard: &ShardKey, reason: impl Into<String>, status: Status) -> Self {
        Self { index: shard.index.clone(), shard: shard.shard, reason: reason.into(), status }
    }
}

/// Tagged outcome of one shard attempt, collected before the merge.
#[derive(Debug, Clone)]
pub enum ShardOutcome {
    Success { shard: ShardKey, result: ShardResult },
    Failure(ShardFailure),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShardsInfo {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ShardFailure>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PercolateResponse {
    pub took: u64,
    #[serde(rename = "_shards")]
    pub shards: ShardsInfo,
    pub total: u64,
    pub matches: Vec<Match>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<QuerySkip>,
}

impl PercolateResponse {
    pub fn total_shards(&self) -> usize { self.shards.total }
    pub fn successful_shards(&self) -> usize { self.shards.successful }
    pub fn failed_shards(&self) -> usize { self.shards.failed }
    pub fn shard_failures(&self) -> &[ShardFailure] { &self.shards.failures }
    pub fn count(&self) -> u64 { self.total }

    pub fn match_ids(&self) -> Vec<&str> { self.matches.iter().map(|m| m.id.as_str()).collect() }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiPercolateRequest {
    pub requests: Vec<PercolateRequest>,
}

impl MultiPercolateRequest {
    pub fn new() -> Self { Self::default() }

    pub fn add(mut self, request: PercolateRequest) -> Self { self.requests.push(request); self }

    pub fn len(&self) -> usize { self.requests.len() }
    pub fn is_empty(&self) -> bool { self.requests.is_empty() }
}

/// Exactly one of a response or an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultiPercolateItem {
    Response(PercolateResponse),
    Failure { error: String },
}

impl MultiPercolateItem {
    pub fn failure(error: impl Into<String>) -> Self { MultiPercolateItem::Failure { error: error.into() } }

    pub fn is_failure(&self) -> bool { matches!(self, MultiPercolateItem::Failure { .. }) }

    pub fn response(&self) -> Option<&PercolateResponse> {
        match self { MultiPercolateItem::Response(r) => Some(r), MultiPercolateItem::Failure { .. } => None }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self { MultiPercolateItem::Failure { error } => Some(error), MultiPercolateItem::Response(_) => None }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiPercolateResponse {
    pub took: u64,
    pub responses: Vec<MultiPercolateItem>,
}

impl MultiPercolateResponse {
    pub fn items(&self) -> &[MultiPercolateItem] { &self.responses }
    pub fn len(&self) -> usize { self.responses.len() }
    pub fn is_empty(&self) -> bool { self.responses.is_empty() }
}
