//! MongoDB-backed document store.
//!
//! Each logical collection name maps to one Mongo collection. A document is
//! stored with `_id` = full path key and `_parent` = key of its collection, so
//! `users/u1/completed_quizzes/q1` lives in `completed_quizzes` with
//! `_parent = "users/u1/completed_quizzes"`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Bson, Document},
    error::{
        Error as MongoError, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR,
        UNKNOWN_TRANSACTION_COMMIT_RESULT,
    },
    options::{ReadConcern, TransactionOptions, WriteConcern},
    Client, ClientSession, Collection, Database,
};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::{
    CollectionPath, Direction, DocPath, DocumentStore, Query, StoreError, StoredDoc, Transaction,
    TransactionOps,
};
use crate::metrics::track_store_operation;

const ID_FIELD: &str = "_id";
const PARENT_FIELD: &str = "_parent";
const DUPLICATE_KEY_CODE: i32 = 11000;
const MAX_COMMIT_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub fn new(client: Client, database: &str) -> Self {
        let db = client.database(database);
        Self { client, db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates the `_parent` indexes used by collection listings.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        use mongodb::IndexModel;

        for name in [
            super::paths::ACTIVE_QUIZZES,
            super::paths::COMPLETED_QUIZZES,
            super::paths::ACHIEVEMENTS,
        ] {
            self.db
                .collection::<Document>(name)
                .create_index(IndexModel::builder().keys(doc! { PARENT_FIELD: 1 }).build())
                .await
                .map_err(map_mongo_error)?;
        }

        self.db
            .collection::<Document>(super::paths::INCIDENTS)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "created_at": -1 })
                    .build(),
            )
            .await
            .map_err(map_mongo_error)?;

        Ok(())
    }
}

fn collection(db: &Database, path: &CollectionPath) -> Collection<Document> {
    db.collection::<Document>(path.name())
}

fn id_filter(path: &DocPath) -> Document {
    doc! { ID_FIELD: path.key() }
}

fn to_document(path: &DocPath, value: Value) -> Result<Document, StoreError> {
    let mut document = bson::to_document(&value).map_err(|e| StoreError::Schema {
        kind: "document",
        message: e.to_string(),
    })?;
    document.insert(ID_FIELD, path.key());
    document.insert(PARENT_FIELD, path.parent().key());
    Ok(document)
}

fn from_document(mut document: Document) -> (String, Value) {
    let key = document.get_str(ID_FIELD).unwrap_or_default().to_string();
    document.remove(ID_FIELD);
    document.remove(PARENT_FIELD);
    let id = key.rsplit('/').next().unwrap_or_default().to_string();
    (id, Bson::Document(document).into_relaxed_extjson())
}

fn fields_to_document(fields: Map<String, Value>) -> Result<Document, StoreError> {
    bson::to_document(&Value::Object(fields)).map_err(|e| StoreError::Schema {
        kind: "document",
        message: e.to_string(),
    })
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == DUPLICATE_KEY_CODE
    )
}

fn map_mongo_error(err: MongoError) -> StoreError {
    let duplicate_key = is_duplicate_key(&err);
    classify_error(|label| err.contains_label(label), duplicate_key, err.to_string())
}

/// Only transient transaction errors restart the transaction. An unknown
/// commit result may already be applied, so it surfaces as a backend error.
fn classify_error(
    has_label: impl Fn(&str) -> bool,
    duplicate_key: bool,
    message: String,
) -> StoreError {
    if has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) {
        StoreError::Backend(message)
    } else if has_label(TRANSIENT_TRANSACTION_ERROR) {
        StoreError::Conflict(message)
    } else if duplicate_key {
        StoreError::AlreadyExists(message)
    } else {
        StoreError::Backend(message)
    }
}

fn query_filter(collection_path: &CollectionPath, query: &Query) -> Result<Document, StoreError> {
    let mut filter = doc! { PARENT_FIELD: collection_path.key() };
    for (field, value) in &query.filters {
        let bson_value = bson::to_bson(value).map_err(|e| StoreError::Schema {
            kind: "query",
            message: e.to_string(),
        })?;
        filter.insert(field.clone(), bson_value);
    }
    Ok(filter)
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn begin(&self) -> Result<Transaction, StoreError> {
        let mut session = self.client.start_session().await.map_err(map_mongo_error)?;
        session
            .start_transaction()
            .with_options(
                TransactionOptions::builder()
                    .read_concern(ReadConcern::snapshot())
                    .write_concern(WriteConcern::majority())
                    .build(),
            )
            .await
            .map_err(map_mongo_error)?;

        Ok(Transaction::new(Arc::new(MongoTransaction {
            db: self.db.clone(),
            session: Mutex::new(Some(session)),
        })))
    }

    async fn get(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        let coll = collection(&self.db, path.parent());
        let found = track_store_operation("get", path.parent().name(), async {
            coll.find_one(id_filter(path)).await.map_err(map_mongo_error)
        })
        .await?;
        Ok(found.map(|document| from_document(document).1))
    }

    async fn create(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        let coll = collection(&self.db, path.parent());
        let document = to_document(path, value)?;
        track_store_operation("create", path.parent().name(), async {
            coll.insert_one(document)
                .await
                .map(|_| ())
                .map_err(|e| match map_mongo_error(e) {
                    StoreError::AlreadyExists(_) => StoreError::AlreadyExists(path.key()),
                    other => other,
                })
        })
        .await
    }

    async fn set(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        let coll = collection(&self.db, path.parent());
        let document = to_document(path, value)?;
        track_store_operation("set", path.parent().name(), async {
            coll.replace_one(id_filter(path), document)
                .upsert(true)
                .await
                .map(|_| ())
                .map_err(map_mongo_error)
        })
        .await
    }

    async fn update(&self, path: &DocPath, fields: Map<String, Value>) -> Result<(), StoreError> {
        let coll = collection(&self.db, path.parent());
        let update = doc! { "$set": fields_to_document(fields)? };
        let result = track_store_operation("update", path.parent().name(), async {
            coll.update_one(id_filter(path), update)
                .await
                .map_err(map_mongo_error)
        })
        .await?;

        if result.matched_count == 0 {
            return Err(StoreError::NotFound(path.key()));
        }
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        let coll = collection(&self.db, path.parent());
        track_store_operation("delete", path.parent().name(), async {
            coll.delete_one(id_filter(path))
                .await
                .map(|_| ())
                .map_err(map_mongo_error)
        })
        .await
    }

    async fn query(
        &self,
        collection_path: &CollectionPath,
        query: &Query,
    ) -> Result<Vec<StoredDoc>, StoreError> {
        let coll = collection(&self.db, collection_path);
        let filter = query_filter(collection_path, query)?;

        track_store_operation("query", collection_path.name(), async {
            let mut find = coll.find(filter);
            if let Some(order) = &query.order_by {
                let direction = match order.direction {
                    Direction::Ascending => 1,
                    Direction::Descending => -1,
                };
                find = find.sort(doc! { order.field.clone(): direction });
            }
            if let Some(limit) = query.limit {
                find = find.limit(limit as i64);
            }

            let mut cursor = find.await.map_err(map_mongo_error)?;
            let mut docs = Vec::new();
            while let Some(document) = cursor.try_next().await.map_err(map_mongo_error)? {
                let (id, data) = from_document(document);
                docs.push(StoredDoc { id, data });
            }
            Ok(docs)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(map_mongo_error)
    }
}

struct MongoTransaction {
    db: Database,
    session: Mutex<Option<ClientSession>>,
}

#[async_trait]
impl TransactionOps for MongoTransaction {
    async fn get(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        let found = collection(&self.db, path.parent())
            .find_one(id_filter(path))
            .session(&mut *session)
            .await
            .map_err(map_mongo_error)?;
        Ok(found.map(|document| from_document(document).1))
    }

    async fn create(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        let document = to_document(path, value)?;
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        collection(&self.db, path.parent())
            .insert_one(document)
            .session(&mut *session)
            .await
            .map(|_| ())
            .map_err(|e| match map_mongo_error(e) {
                StoreError::AlreadyExists(_) => StoreError::AlreadyExists(path.key()),
                other => other,
            })
    }

    async fn set(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        let document = to_document(path, value)?;
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        collection(&self.db, path.parent())
            .replace_one(id_filter(path), document)
            .upsert(true)
            .session(&mut *session)
            .await
            .map(|_| ())
            .map_err(map_mongo_error)
    }

    async fn update(&self, path: &DocPath, fields: Map<String, Value>) -> Result<(), StoreError> {
        let update = doc! { "$set": fields_to_document(fields)? };
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        let result = collection(&self.db, path.parent())
            .update_one(id_filter(path), update)
            .session(&mut *session)
            .await
            .map_err(map_mongo_error)?;

        if result.matched_count == 0 {
            return Err(StoreError::NotFound(path.key()));
        }
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        collection(&self.db, path.parent())
            .delete_one(id_filter(path))
            .session(&mut *session)
            .await
            .map(|_| ())
            .map_err(map_mongo_error)
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut session = self
            .session
            .lock()
            .await
            .take()
            .ok_or(StoreError::TransactionClosed)?;

        // Commit is retried on the same session; restarting the transaction
        // could re-run work that was already committed.
        track_store_operation("commit", "transaction", async {
            let mut attempt = 1;
            loop {
                match session.commit_transaction().await {
                    Ok(()) => return Ok(()),
                    Err(e)
                        if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                            && attempt < MAX_COMMIT_ATTEMPTS =>
                    {
                        tracing::warn!(attempt, "Commit result unknown, retrying commit: {}", e);
                        attempt += 1;
                    }
                    Err(e) => return Err(map_mongo_error(e)),
                }
            }
        })
        .await
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        let session = self.session.lock().await.take();
        if let Some(mut session) = session {
            session
                .abort_transaction()
                .await
                .map_err(map_mongo_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::paths;
    use serde_json::json;

    #[test]
    fn test_document_round_trip_strips_internal_fields() {
        let path = paths::completed_quiz("u1", "daily_2024-05-01");
        let document = to_document(&path, json!({ "final_score": 80.0, "topic": "Merging" })).unwrap();

        assert_eq!(
            document.get_str("_id").unwrap(),
            "users/u1/completed_quizzes/daily_2024-05-01"
        );
        assert_eq!(document.get_str("_parent").unwrap(), "users/u1/completed_quizzes");

        let (id, value) = from_document(document);
        assert_eq!(id, "daily_2024-05-01");
        assert_eq!(value, json!({ "final_score": 80.0, "topic": "Merging" }));
    }

    fn labels(present: &'static [&'static str]) -> impl Fn(&str) -> bool {
        move |label| present.iter().any(|p| *p == label)
    }

    #[test]
    fn test_transient_error_is_a_conflict() {
        let err = classify_error(
            labels(&[TRANSIENT_TRANSACTION_ERROR]),
            false,
            "write conflict".into(),
        );
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_unknown_commit_result_is_not_retried_as_conflict() {
        let err = classify_error(
            labels(&[UNKNOWN_TRANSACTION_COMMIT_RESULT]),
            false,
            "commit result unknown".into(),
        );
        assert!(matches!(err, StoreError::Backend(_)));

        let both = classify_error(
            labels(&[UNKNOWN_TRANSACTION_COMMIT_RESULT, TRANSIENT_TRANSACTION_ERROR]),
            false,
            "commit result unknown".into(),
        );
        assert!(matches!(both, StoreError::Backend(_)));
    }

    #[test]
    fn test_unlabeled_errors() {
        assert!(matches!(
            classify_error(labels(&[]), true, "E11000".into()),
            StoreError::AlreadyExists(_)
        ));
        assert!(matches!(
            classify_error(labels(&[]), false, "network".into()),
            StoreError::Backend(_)
        ));
    }

    #[test]
    fn test_query_filter_scopes_by_parent() {
        let filter = query_filter(
            &paths::incidents(),
            &Query::all().where_eq("user_id", "u1"),
        )
        .unwrap();

        assert_eq!(filter.get_str("_parent").unwrap(), "incidents");
        assert_eq!(filter.get_str("user_id").unwrap(), "u1");
    }
}
