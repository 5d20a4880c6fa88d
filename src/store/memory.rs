//! In-process signaling store.

use super::{
    ChangeKind, CollectionPath, CollectionSnapshot, Document, DocumentChange, DocumentPath,
    DocumentSnapshot, SignalingStore, Subscription,
};
use crate::error::StoreError;
use crate::utils::random_id;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Shared in-memory document store with live subscriptions.
///
/// Cloning yields another handle onto the same data, so a caller and a
/// callee can share one store in a single process.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Ordered document ids per collection path.
    collections: HashMap<String, Vec<String>>,
    /// Documents keyed by full path.
    documents: HashMap<String, Document>,
    doc_listeners: HashMap<String, Vec<Listener<DocumentSnapshot>>>,
    collection_listeners: HashMap<String, Vec<Listener<CollectionSnapshot>>>,
    next_listener: u64,
    id_sequence: VecDeque<String>,
    writes: usize,
    offline: bool,
    fail_appends: bool,
    closed: bool,
}

struct Listener<T> {
    id: u64,
    tx: mpsc::UnboundedSender<T>,
}

impl Inner {
    fn next_id(&mut self) -> String {
        self.id_sequence.pop_front().unwrap_or_else(random_id)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Unavailable("store has been shut down".into()));
        }
        if self.offline {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        Ok(())
    }

    fn insert(&mut self, path: &DocumentPath, fields: Document) {
        let key = path.to_string();
        let existed = self.documents.contains_key(&key);
        if !existed {
            self.collections
                .entry(path.parent().to_string())
                .or_default()
                .push(path.id().to_string());
        }
        let doc = self.documents.entry(key).or_default();
        for (field, value) in fields {
            doc.insert(field, value);
        }
        self.writes += 1;

        let kind = if existed {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        self.notify(path, kind);
    }

    fn notify(&mut self, path: &DocumentPath, kind: ChangeKind) {
        let key = path.to_string();
        let data = self.documents.get(&key).cloned();

        if let Some(listeners) = self.doc_listeners.get_mut(&key) {
            let snapshot = DocumentSnapshot {
                id: path.id().to_string(),
                data: data.clone(),
            };
            listeners.retain(|l| l.tx.send(snapshot.clone()).is_ok());
        }

        if let (Some(listeners), Some(data)) = (
            self.collection_listeners.get_mut(&path.parent().to_string()),
            data,
        ) {
            let snapshot = CollectionSnapshot {
                changes: vec![DocumentChange {
                    kind,
                    id: path.id().to_string(),
                    data,
                }],
            };
            listeners.retain(|l| l.tx.send(snapshot.clone()).is_ok());
        }
    }

    fn remove_listener(&mut self, key: &str, id: u64) {
        if let Some(listeners) = self.doc_listeners.get_mut(key) {
            listeners.retain(|l| l.id != id);
        }
        if let Some(listeners) = self.collection_listeners.get_mut(key) {
            listeners.retain(|l| l.id != id);
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out these ids, in order, before falling back to random ones.
    pub fn with_id_sequence<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        store.lock().id_sequence = ids.into_iter().map(Into::into).collect();
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every operation fail with `Unavailable` while set.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make `add_document` fail with `Unavailable` while set.
    pub fn set_fail_appends(&self, fail: bool) {
        self.lock().fail_appends = fail;
    }

    /// Number of successful writes since creation.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn active_subscriptions(&self) -> usize {
        let inner = self.lock();
        inner.doc_listeners.values().map(Vec::len).sum::<usize>()
            + inner.collection_listeners.values().map(Vec::len).sum::<usize>()
    }

    pub fn document(&self, doc: &DocumentPath) -> Option<Document> {
        self.lock().documents.get(&doc.to_string()).cloned()
    }

    /// Documents of a collection in insertion order.
    pub fn documents(&self, collection: &CollectionPath) -> Vec<Document> {
        let inner = self.lock();
        inner
            .collections
            .get(collection.as_str())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| {
                        inner
                            .documents
                            .get(&format!("{}/{}", collection, id))
                            .cloned()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// End every live subscription and refuse further operations.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.doc_listeners.clear();
        inner.collection_listeners.clear();
        debug!("memory store shut down");
    }

    fn register<T: Send + 'static>(
        &self,
        key: String,
        select: fn(&mut Inner) -> &mut HashMap<String, Vec<Listener<T>>>,
        initial: T,
        inner: &mut Inner,
    ) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = inner.next_listener;
        inner.next_listener += 1;
        // Receiver is alive, so the initial snapshot cannot fail to send.
        let _ = tx.send(initial);
        select(inner)
            .entry(key.clone())
            .or_default()
            .push(Listener { id, tx });
        trace!(path = %key, listener = id, "subscribed");

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(rx, move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(|p| p.into_inner());
                inner.remove_listener(&key, id);
                trace!(path = %key, listener = id, "unsubscribed");
            }
        })
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_document(
        &self,
        collection: &CollectionPath,
        fields: Document,
    ) -> Result<DocumentPath, StoreError> {
        let mut inner = self.lock();
        inner.check_online()?;
        let path = collection.doc(inner.next_id());
        inner.insert(&path, fields);
        debug!(path = %path, "document created");
        Ok(path)
    }

    async fn get_document(&self, doc: &DocumentPath) -> Result<Option<Document>, StoreError> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.documents.get(&doc.to_string()).cloned())
    }

    async fn set_fields(&self, doc: &DocumentPath, fields: Document) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_online()?;
        inner.insert(doc, fields);
        Ok(())
    }

    async fn add_document(
        &self,
        collection: &CollectionPath,
        fields: Document,
    ) -> Result<DocumentPath, StoreError> {
        let mut inner = self.lock();
        inner.check_online()?;
        if inner.fail_appends {
            return Err(StoreError::Unavailable(format!(
                "append to {} rejected",
                collection
            )));
        }
        let path = collection.doc(inner.next_id());
        inner.insert(&path, fields);
        Ok(path)
    }

    async fn subscribe_document(
        &self,
        doc: &DocumentPath,
    ) -> Result<Subscription<DocumentSnapshot>, StoreError> {
        let mut guard = self.lock();
        guard.check_online()?;
        let initial = DocumentSnapshot {
            id: doc.id().to_string(),
            data: guard.documents.get(&doc.to_string()).cloned(),
        };
        Ok(self.register(doc.to_string(), |i| &mut i.doc_listeners, initial, &mut guard))
    }

    async fn subscribe_collection(
        &self,
        collection: &CollectionPath,
    ) -> Result<Subscription<CollectionSnapshot>, StoreError> {
        let mut guard = self.lock();
        guard.check_online()?;
        let changes = guard
            .collections
            .get(collection.as_str())
            .into_iter()
            .flatten()
            .filter_map(|id| {
                guard
                    .documents
                    .get(&format!("{}/{}", collection, id))
                    .map(|data| DocumentChange {
                        kind: ChangeKind::Added,
                        id: id.clone(),
                        data: data.clone(),
                    })
            })
            .collect();
        let initial = CollectionSnapshot { changes };
        Ok(self.register(
            collection.to_string(),
            |i| &mut i.collection_listeners,
            initial,
            &mut guard,
        ))
    }
}
