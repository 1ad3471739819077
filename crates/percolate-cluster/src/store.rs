use std::collections::HashMap;

use parking_lot::RwLock;

use percolate_core::error::Result;
use percolate_core::traits::DocumentStore;
use percolate_core::types::DocRef;
use percolate_core::CanonicalDoc;

type DocKey = (String, String, String);

/// Document store keyed by `(index, type, id)`. Writes are visible immediately,
/// like a realtime get.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<DocKey, CanonicalDoc>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self { Self::default() }

    pub fn put(&self, doc_ref: &DocRef, doc: CanonicalDoc) { self.docs.write().insert(key(doc_ref), doc); }

    pub fn delete(&self, doc_ref: &DocRef) -> bool { self.docs.write().remove(&key(doc_ref)).is_some() }

    pub fn len(&self) -> usize { self.docs.read().len() }

    pub fn is_empty(&self) -> bool { self.docs.read().is_empty() }
}

fn key(doc_ref: &DocRef) -> DocKey { (doc_ref.index.clone(), doc_ref.doc_type.clone(), doc_ref.id.clone()) }

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, doc_ref: &DocRef) -> Result<Option<CanonicalDoc>> { Ok(self.docs.read().get(&key(doc_ref)).cloned()) }
}
