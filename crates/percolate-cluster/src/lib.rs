//! Query registry, shards, routing and the single/batch percolate coordinators.

pub mod batch_format;
pub mod cluster;
pub mod coordinator;
pub mod multi;
pub mod node;
pub mod registry;
pub mod shard;
pub mod store;

pub use cluster::{LocalCluster, ShardStats};
pub use coordinator::ShardCoordinator;
pub use multi::MultiPercolateCoordinator;
pub use node::Node;
pub use store::InMemoryDocumentStore;
