//! Signaling store boundary.
//!
//! The store is a document database with collections, documents and
//! per-document sub-collections. Every subscription delivers the current
//! snapshot first and then one message per change until it is cancelled.

pub mod memory;

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::mpsc;

pub use memory::MemoryStore;

/// Field map of a single document.
pub type Document = Map<String, Value>;

/// Slash-separated path of a collection, e.g. `calls` or `calls/abc/offerCandidates`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn root(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn doc(&self, id: impl Into<String>) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

impl DocumentPath {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> &CollectionPath {
        &self.collection
    }

    /// Sub-collection nested under this document.
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}/{}", self.collection, self.id, name))
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// State of one document; `data` is `None` when the document does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub data: Option<Document>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub id: String,
    pub data: Document,
}

/// Changes to a collection since the previous snapshot. The first snapshot
/// reports every existing document as `Added`, in store order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionSnapshot {
    pub changes: Vec<DocumentChange>,
}

impl CollectionSnapshot {
    pub fn added(&self) -> impl Iterator<Item = &DocumentChange> {
        self.changes.iter().filter(|c| c.kind == ChangeKind::Added)
    }
}

type CancelFn = Box<dyn FnOnce() + Send + Sync>;

/// Live subscription handle. Dropping it unsubscribes.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    cancel: Option<CancelFn>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Next snapshot, or `None` once unsubscribed or the store went away.
    pub async fn next(&mut self) -> Option<T> {
        if self.cancel.is_none() {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop receiving. Calling it again does nothing.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.rx.close();
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Create a document with a store-generated id.
    async fn create_document(
        &self,
        collection: &CollectionPath,
        fields: Document,
    ) -> Result<DocumentPath, StoreError>;

    async fn get_document(&self, doc: &DocumentPath) -> Result<Option<Document>, StoreError>;

    /// Merge `fields` into the document, creating it when missing.
    async fn set_fields(&self, doc: &DocumentPath, fields: Document) -> Result<(), StoreError>;

    /// Append a document to a collection.
    async fn add_document(
        &self,
        collection: &CollectionPath,
        fields: Document,
    ) -> Result<DocumentPath, StoreError>;

    async fn subscribe_document(
        &self,
        doc: &DocumentPath,
    ) -> Result<Subscription<DocumentSnapshot>, StoreError>;

    async fn subscribe_collection(
        &self,
        collection: &CollectionPath,
    ) -> Result<Subscription<CollectionSnapshot>, StoreError>;
}
