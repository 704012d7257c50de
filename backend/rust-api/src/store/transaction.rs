use std::future::Future;

use super::{DocumentStore, StoreError, Transaction};
use crate::metrics::TRANSACTION_ATTEMPTS_TOTAL;
use crate::utils::retry::RetryConfig;

/// Errors that can tell whether they stem from a lost commit race.
pub trait ConflictAware {
    fn is_conflict(&self) -> bool;
}

impl ConflictAware for StoreError {
    fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Runs `body` inside a fresh transaction and commits it.
///
/// A body error rolls the transaction back and is returned as-is. Conflicts,
/// whether raised by the body or at commit, restart the whole attempt with a
/// new transaction until `retry.max_attempts` is exhausted.
pub async fn run_in_transaction<T, E, F, Fut>(
    store: &dyn DocumentStore,
    retry: &RetryConfig,
    mut body: F,
) -> Result<T, E>
where
    F: FnMut(Transaction) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<StoreError> + ConflictAware + std::fmt::Display,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut backoff = retry.base_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let tx = store.begin().await?;

        let outcome = match body(tx.clone()).await {
            Ok(value) => tx.commit().await.map(|_| value).map_err(E::from),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!("Transaction rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        };

        match outcome {
            Ok(value) => {
                TRANSACTION_ATTEMPTS_TOTAL
                    .with_label_values(&["committed"])
                    .inc();
                return Ok(value);
            }
            Err(err) if err.is_conflict() && attempt < max_attempts => {
                TRANSACTION_ATTEMPTS_TOTAL
                    .with_label_values(&["conflict"])
                    .inc();
                tracing::debug!(
                    "Transaction conflict on attempt {}/{}: {}",
                    attempt,
                    max_attempts,
                    err
                );
                tokio::time::sleep(retry.delay_for(backoff)).await;
                backoff = retry.next_backoff(backoff);
            }
            Err(err) => {
                let label = if err.is_conflict() { "exhausted" } else { "aborted" };
                TRANSACTION_ATTEMPTS_TOTAL.with_label_values(&[label]).inc();
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{paths, MemoryStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn quick_retry(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            jitter_max: None,
        }
    }

    #[tokio::test]
    async fn commits_body_writes() {
        let store = MemoryStore::new();
        let path = paths::user("u1");

        let result: Result<(), StoreError> =
            run_in_transaction(&store, &quick_retry(3), |tx| {
                let path = path.clone();
                async move { write_marker(&tx, &path).await }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(store.get(&path).await.unwrap(), Some(json!({ "n": 1 })));
    }

    #[tokio::test]
    async fn body_error_discards_writes() {
        let store = MemoryStore::new();
        let path = paths::user("u1");

        let result: Result<(), StoreError> =
            run_in_transaction(&store, &quick_retry(3), |tx| {
                let path = path.clone();
                async move {
                    write_marker(&tx, &path).await?;
                    Err(StoreError::NotFound("boom".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(store.get(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn conflicts_are_retried_until_exhausted() {
        let store = MemoryStore::new();
        let calls = AtomicUsize::new(0);

        let result: Result<(), StoreError> =
            run_in_transaction(&store, &quick_retry(3), |_tx| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Conflict("simulated".into())) }
            })
            .await;

        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    async fn write_marker(tx: &Transaction, path: &crate::store::DocPath) -> Result<(), StoreError> {
        tx.ops.set(path, json!({ "n": 1 })).await
    }
}
