//! Hierarchical document store used by every service.
//!
//! Documents are JSON objects addressed by alternating collection/document
//! segments (`users/{uid}/completed_quizzes/{quiz_id}`). Entities are encoded
//! as typed [`Record`]s carrying a `schema_version`, and all cross-document
//! writes go through a [`Transaction`] obtained from [`DocumentStore::begin`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

pub mod memory;
pub mod mongo;
pub mod paths;
pub mod transaction;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use transaction::{run_in_transaction, ConflictAware};

pub const SCHEMA_VERSION_FIELD: &str = "schema_version";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("document already exists: {0}")]
    AlreadyExists(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("schema mismatch for {kind}: {message}")]
    Schema { kind: &'static str, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transaction already finished")]
    TransactionClosed,

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Path of a collection: an odd number of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    parent: Option<Box<DocPath>>,
    name: String,
}

/// Path of a single document: a collection plus a document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
    collection: CollectionPath,
    id: String,
}

impl CollectionPath {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            parent: None,
            name: name.into(),
        }
    }

    pub fn doc(&self, id: impl Into<String>) -> DocPath {
        DocPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the owning document, empty for top-level collections.
    pub fn parent_key(&self) -> String {
        self.parent
            .as_ref()
            .map(|parent| parent.key())
            .unwrap_or_default()
    }

    pub fn key(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}/{}", parent.key(), self.name),
            None => self.name.clone(),
        }
    }
}

impl DocPath {
    pub fn collection(&self, name: impl Into<String>) -> CollectionPath {
        CollectionPath {
            parent: Some(Box::new(self.clone())),
            name: name.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.collection.key(), self.id)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Equality filters, optional ordering and limit over one collection.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone)]
pub struct StoredDoc {
    pub id: String,
    pub data: Value,
}

impl StoredDoc {
    pub fn decode<R: Record>(self) -> Result<R, StoreError> {
        decode_record(self.data)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Opens a transaction. Reads inside it form the read-set validated at commit.
    async fn begin(&self) -> Result<Transaction, StoreError>;

    async fn get(&self, path: &DocPath) -> Result<Option<Value>, StoreError>;

    /// Fails with `AlreadyExists` when the document is present.
    async fn create(&self, path: &DocPath, value: Value) -> Result<(), StoreError>;

    async fn set(&self, path: &DocPath, value: Value) -> Result<(), StoreError>;

    /// Shallow merge of top-level fields. Fails with `NotFound` when absent.
    async fn update(&self, path: &DocPath, fields: Map<String, Value>) -> Result<(), StoreError>;

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError>;

    async fn query(
        &self,
        collection: &CollectionPath,
        query: &Query,
    ) -> Result<Vec<StoredDoc>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Operations available on an open transaction. Writes become visible only on commit.
#[async_trait]
pub trait TransactionOps: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Value>, StoreError>;
    async fn create(&self, path: &DocPath, value: Value) -> Result<(), StoreError>;
    async fn set(&self, path: &DocPath, value: Value) -> Result<(), StoreError>;
    async fn update(&self, path: &DocPath, fields: Map<String, Value>) -> Result<(), StoreError>;
    async fn delete(&self, path: &DocPath) -> Result<(), StoreError>;
    async fn commit(&self) -> Result<(), StoreError>;
    async fn rollback(&self) -> Result<(), StoreError>;
}

/// Cloneable handle to an open transaction with typed record helpers.
#[derive(Clone)]
pub struct Transaction {
    ops: Arc<dyn TransactionOps>,
}

impl Transaction {
    pub fn new(ops: Arc<dyn TransactionOps>) -> Self {
        Self { ops }
    }

    pub async fn exists(&self, path: &DocPath) -> Result<bool, StoreError> {
        Ok(self.ops.get(path).await?.is_some())
    }

    pub async fn get_record<R: Record>(&self, path: &DocPath) -> Result<Option<R>, StoreError> {
        self.ops.get(path).await?.map(decode_record).transpose()
    }

    pub async fn create_record<R: Record>(&self, path: &DocPath, record: &R) -> Result<(), StoreError> {
        self.ops.create(path, encode_record(record)?).await
    }

    pub async fn set_record<R: Record>(&self, path: &DocPath, record: &R) -> Result<(), StoreError> {
        self.ops.set(path, encode_record(record)?).await
    }

    pub async fn update_fields(
        &self,
        path: &DocPath,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.ops.update(path, fields).await
    }

    pub async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        self.ops.delete(path).await
    }

    pub(crate) async fn commit(&self) -> Result<(), StoreError> {
        self.ops.commit().await
    }

    pub(crate) async fn rollback(&self) -> Result<(), StoreError> {
        self.ops.rollback().await
    }
}

/// A typed, versioned document.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;
    const SCHEMA_VERSION: u32;

    /// Upgrades a document written with an older schema. Version 0 denotes
    /// legacy documents without a version stamp, decoded as-is.
    fn migrate(value: Value, from_version: u32) -> Result<Value, StoreError> {
        if from_version == 0 {
            return Ok(value);
        }
        Err(StoreError::Schema {
            kind: Self::KIND,
            message: format!(
                "no migration from version {} to {}",
                from_version,
                Self::SCHEMA_VERSION
            ),
        })
    }
}

pub fn encode_record<R: Record>(record: &R) -> Result<Value, StoreError> {
    let mut value = serde_json::to_value(record)?;
    match value.as_object_mut() {
        Some(object) => {
            object.insert(SCHEMA_VERSION_FIELD.to_string(), Value::from(R::SCHEMA_VERSION));
            Ok(value)
        }
        None => Err(StoreError::Schema {
            kind: R::KIND,
            message: "record must serialize to an object".to_string(),
        }),
    }
}

pub fn decode_record<R: Record>(value: Value) -> Result<R, StoreError> {
    if !value.is_object() {
        return Err(StoreError::Schema {
            kind: R::KIND,
            message: "document is not an object".to_string(),
        });
    }

    let version = match value.get(SCHEMA_VERSION_FIELD) {
        None => 0,
        Some(raw) => raw
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| StoreError::Schema {
                kind: R::KIND,
                message: format!("invalid schema_version {}", raw),
            })?,
    };

    let value = if version == R::SCHEMA_VERSION {
        value
    } else if version < R::SCHEMA_VERSION {
        R::migrate(value, version)?
    } else {
        return Err(StoreError::Schema {
            kind: R::KIND,
            message: format!(
                "document version {} is newer than supported version {}",
                version,
                R::SCHEMA_VERSION
            ),
        });
    };

    serde_json::from_value(value).map_err(|e| StoreError::Schema {
        kind: R::KIND,
        message: e.to_string(),
    })
}

/// Decodes listed documents, skipping (and logging) any that no longer fit the schema.
pub fn decode_all<R: Record>(docs: Vec<StoredDoc>) -> Vec<R> {
    docs.into_iter()
        .filter_map(|doc| {
            let id = doc.id.clone();
            match doc.decode::<R>() {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Skipping undecodable {} {}: {}", R::KIND, id, e);
                    None
                }
            }
        })
        .collect()
}
