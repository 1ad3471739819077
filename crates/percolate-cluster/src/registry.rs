//! Per-shard query registry with refresh-based visibility.
//!
//! Writes land in a pending log and only become visible when [`QueryRegistry::refresh`]
//! publishes a new immutable snapshot. Readers hold an `Arc` to a snapshot, so
//! they never observe a partially applied refresh.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use percolate_core::types::{QueryId, RegisteredQuery, RoutingKey};

#[derive(Debug)]
enum PendingOp {
    Put(Arc<RegisteredQuery>),
    Delete(QueryId),
}

/// Queries visible at one refresh generation, partitioned by routing key.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    routing_of: HashMap<QueryId, RoutingKey>,
    partitions: BTreeMap<RoutingKey, BTreeMap<QueryId, Arc<RegisteredQuery>>>,
}

impl RegistrySnapshot {
    pub fn generation(&self) -> u64 { self.generation }

    pub fn len(&self) -> usize { self.routing_of.len() }

    pub fn is_empty(&self) -> bool { self.routing_of.is_empty() }

    pub fn get(&self, id: &str) -> Option<&RegisteredQuery> {
        let routing = self.routing_of.get(id)?;
        self.partitions.get(routing)?.get(id).map(Arc::as_ref)
    }

    /// Lazy iteration in (routing key, id) order. Restart by calling again.
    ///
    /// With a filter only the matching partition is visited.
    pub fn queries<'a>(&'a self, routing: Option<&RoutingKey>) -> Box<dyn Iterator<Item = &'a RegisteredQuery> + 'a> {
        match routing {
            Some(key) => match self.partitions.get(key) {
                Some(partition) => Box::new(partition.values().map(Arc::as_ref)),
                None => Box::new(std::iter::empty()),
            },
            None => Box::new(self.partitions.values().flat_map(|p| p.values().map(Arc::as_ref))),
        }
    }

    fn apply(&mut self, op: PendingOp) {
        let id = match &op { PendingOp::Put(q) => q.id.clone(), PendingOp::Delete(id) => id.clone() };
        if let Some(previous) = self.routing_of.remove(&id) {
            if let Some(partition) = self.partitions.get_mut(&previous) {
                partition.remove(&id);
                if partition.is_empty() { self.partitions.remove(&previous); }
            }
        }
        if let PendingOp::Put(query) = op {
            self.routing_of.insert(id.clone(), query.routing.clone());
            self.partitions.entry(query.routing.clone()).or_default().insert(id, query);
        }
    }
}

#[derive(Debug, Default)]
pub struct QueryRegistry {
    pending: Mutex<Vec<PendingOp>>,
    visible: RwLock<Arc<RegistrySnapshot>>,
}

impl QueryRegistry {
    pub fn new() -> Self { Self::default() }

    /// Stage a query; it replaces any entry with the same id at the next refresh.
    pub fn register(&self, query: RegisteredQuery) { self.pending.lock().push(PendingOp::Put(Arc::new(query))); }

    pub fn unregister(&self, id: &str) { self.pending.lock().push(PendingOp::Delete(id.to_string())); }

    pub fn pending_len(&self) -> usize { self.pending.lock().len() }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> { self.visible.read().clone() }

    /// Publish staged writes. Returns the visible generation.
    pub fn refresh(&self) -> u64 {
        // Held for the whole refresh so concurrent refreshes cannot drop each other's writes.
        let mut pending = self.pending.lock();
        let current = self.snapshot();
        if pending.is_empty() { return current.generation; }
        let mut next = RegistrySnapshot::clone(&current);
        let applied = pending.len();
        for op in pending.drain(..) { next.apply(op); }
        next.generation += 1;
        let generation = next.generation;
        *self.visible.write() = Arc::new(next);
        debug!(generation, applied, "registry refreshed");
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use percolate_core::Query;

    fn query(id: &str, routing: RoutingKey) -> RegisteredQuery {
        RegisteredQuery { id: id.into(), owner_index: "test".into(), routing, query: Query::MatchAll, stored_fields: Default::default() }
    }

    #[test]
    fn writes_are_invisible_until_refresh() {
        let registry = QueryRegistry::new();
        registry.register(query("1", RoutingKey::Unrouted));
        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.pending_len(), 1);
        assert_eq!(registry.refresh(), 1);
        assert_eq!(registry.snapshot().len(), 1);
        assert_eq!(registry.refresh(), 1, "empty refresh keeps the generation");
    }

    #[test]
    fn old_snapshots_are_unaffected_by_later_refreshes() {
        let registry = QueryRegistry::new();
        registry.register(query("1", RoutingKey::Unrouted));
        registry.refresh();
        let before = registry.snapshot();
        registry.unregister("1");
        registry.refresh();
        assert_eq!(before.len(), 1);
        assert!(registry.snapshot().get("1").is_none());
    }

    #[test]
    fn routing_filter_selects_one_partition_and_reregistration_moves_entries() {
        let registry = QueryRegistry::new();
        registry.register(query("1", RoutingKey::Key("a".into())));
        registry.register(query("2", RoutingKey::Unrouted));
        registry.refresh();
        let snap = registry.snapshot();
        let routed: Vec<&str> = snap.queries(Some(&RoutingKey::Key("a".into()))).map(|q| q.id.as_str()).collect();
        assert_eq!(routed, vec!["1"]);
        assert_eq!(snap.queries(None).count(), 2);
        assert_eq!(snap.queries(Some(&RoutingKey::Key("b".into()))).count(), 0);

        registry.register(query("1", RoutingKey::Unrouted));
        registry.refresh();
        let snap = registry.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.queries(Some(&RoutingKey::Key("a".into()))).count(), 0);
        assert_eq!(snap.queries(Some(&RoutingKey::Unrouted)).count(), 2);
    }
}
