//! In-process document store with optimistic transactions.
//!
//! Every committed write bumps a global version counter. A transaction records
//! the version of every document it reads (or its absence) and buffers its
//! writes; commit re-validates the read-set under the store lock and applies
//! the buffered writes atomically, so the first committer wins.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::{
    CollectionPath, Direction, DocPath, DocumentStore, Query, StoreError, StoredDoc, Transaction,
    TransactionOps,
};

#[derive(Debug, Clone)]
struct Entry {
    parent: String,
    id: String,
    version: u64,
    data: Value,
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<String, Entry>,
    next_version: u64,
}

impl Inner {
    fn apply(&mut self, path: &DocPath, write: &PendingWrite) -> Result<(), StoreError> {
        let key = path.key();
        match write {
            PendingWrite::Create(value) => {
                if self.docs.contains_key(&key) {
                    return Err(StoreError::AlreadyExists(key));
                }
                self.put(path, key, value.clone());
            }
            PendingWrite::Set(value) => self.put(path, key, value.clone()),
            PendingWrite::Update(fields) => {
                let mut data = self
                    .docs
                    .get(&key)
                    .map(|entry| entry.data.clone())
                    .ok_or_else(|| StoreError::NotFound(key.clone()))?;
                merge_fields(&mut data, fields);
                self.put(path, key, data);
            }
            PendingWrite::Delete => {
                self.docs.remove(&key);
            }
        }
        Ok(())
    }

    fn put(&mut self, path: &DocPath, key: String, data: Value) {
        self.next_version += 1;
        self.docs.insert(
            key,
            Entry {
                parent: path.parent().key(),
                id: path.id().to_string(),
                version: self.next_version,
                data,
            },
        );
    }

    fn version_of(&self, key: &str) -> Option<u64> {
        self.docs.get(key).map(|entry| entry.version)
    }
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Create(Value),
    Set(Value),
    Update(Map<String, Value>),
    Delete,
}

fn merge_fields(target: &mut Value, fields: &Map<String, Value>) {
    if let Some(object) = target.as_object_mut() {
        for (field, value) in fields {
            object.insert(field.clone(), value.clone());
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None, Some(_)) | (Some(Value::Null), Some(_)) => Ordering::Less,
        (Some(_), None) | (Some(_), Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents, across all collections.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn begin(&self) -> Result<Transaction, StoreError> {
        Ok(Transaction::new(Arc::new(MemoryTransaction {
            inner: self.inner.clone(),
            state: Mutex::new(TxState::default()),
        })))
    }

    async fn get(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.docs.get(&path.key()).map(|entry| entry.data.clone()))
    }

    async fn create(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .apply(path, &PendingWrite::Create(value))
    }

    async fn set(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        self.inner.lock().await.apply(path, &PendingWrite::Set(value))
    }

    async fn update(&self, path: &DocPath, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .apply(path, &PendingWrite::Update(fields))
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        self.inner.lock().await.apply(path, &PendingWrite::Delete)
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        query: &Query,
    ) -> Result<Vec<StoredDoc>, StoreError> {
        let parent = collection.key();
        let inner = self.inner.lock().await;

        let mut matches: Vec<&Entry> = inner
            .docs
            .values()
            .filter(|entry| {
                entry.parent == parent
                    && query
                        .filters
                        .iter()
                        .all(|(field, expected)| entry.data.get(field) == Some(expected))
            })
            .collect();

        if let Some(order) = &query.order_by {
            matches.sort_by(|a, b| {
                let ordering = compare_values(a.data.get(&order.field), b.data.get(&order.field));
                match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matches
            .into_iter()
            .take(limit)
            .map(|entry| StoredDoc {
                id: entry.id.clone(),
                data: entry.data.clone(),
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
struct TxState {
    read_set: HashMap<String, Option<u64>>,
    writes: Vec<(DocPath, PendingWrite)>,
    finished: bool,
}

struct MemoryTransaction {
    inner: Arc<Mutex<Inner>>,
    state: Mutex<TxState>,
}

impl MemoryTransaction {
    async fn buffer(&self, path: &DocPath, write: PendingWrite) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.finished {
            return Err(StoreError::TransactionClosed);
        }
        state.writes.push((path.clone(), write));
        Ok(())
    }
}

#[async_trait]
impl TransactionOps for MemoryTransaction {
    async fn get(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        let mut state = self.state.lock().await;
        if state.finished {
            return Err(StoreError::TransactionClosed);
        }

        let key = path.key();
        let (version, mut data) = {
            let inner = self.inner.lock().await;
            match inner.docs.get(&key) {
                Some(entry) => (Some(entry.version), Some(entry.data.clone())),
                None => (None, None),
            }
        };
        state.read_set.entry(key.clone()).or_insert(version);

        // Own buffered writes are visible to later reads.
        for (_, write) in state.writes.iter().filter(|(p, _)| p.key() == key) {
            data = match write {
                PendingWrite::Create(value) | PendingWrite::Set(value) => Some(value.clone()),
                PendingWrite::Update(fields) => data.map(|mut current| {
                    merge_fields(&mut current, fields);
                    current
                }),
                PendingWrite::Delete => None,
            };
        }

        Ok(data)
    }

    async fn create(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        self.buffer(path, PendingWrite::Create(value)).await
    }

    async fn set(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        self.buffer(path, PendingWrite::Set(value)).await
    }

    async fn update(&self, path: &DocPath, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.buffer(path, PendingWrite::Update(fields)).await
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        self.buffer(path, PendingWrite::Delete).await
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.finished {
            return Err(StoreError::TransactionClosed);
        }
        state.finished = true;

        let mut inner = self.inner.lock().await;

        for (key, seen_version) in &state.read_set {
            if inner.version_of(key) != *seen_version {
                return Err(StoreError::Conflict(format!(
                    "{} changed since it was read",
                    key
                )));
            }
        }

        // Validate write preconditions on a scratch copy so a failing write
        // leaves the store untouched.
        let mut scratch = Inner {
            docs: BTreeMap::new(),
            next_version: inner.next_version,
        };
        for (path, _) in &state.writes {
            let key = path.key();
            if let Some(entry) = inner.docs.get(&key) {
                scratch.docs.insert(key, entry.clone());
            }
        }
        for (path, write) in &state.writes {
            scratch.apply(path, write)?;
        }

        for (path, write) in &state.writes {
            inner.apply(path, write)?;
        }

        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.finished = true;
        state.writes.clear();
        Ok(())
    }
}
