//! Bounded-retry decorator for key/value stores
//!
//! Connection errors against an external store are usually transient
//! (leader election, brief network partition). This wrapper retries
//! connection-class errors with a fixed attempt count and a fixed backoff;
//! every other error class is returned immediately.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::backend::KeyValueStore;
use super::error::StoreResult;

pub struct RetryingStore<S> {
    inner: S,
    attempts: u32,
    backoff: Duration,
}

impl<S: KeyValueStore> RetryingStore<S> {
    pub fn new(inner: S, attempts: u32, backoff: Duration) -> Self {
        debug_assert!(attempts > 0);
        Self {
            inner,
            attempts,
            backoff,
        }
    }

    async fn with_retries<T, F, Fut>(&self, what: &str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = StoreResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    warn!(
                        "store {what} attempt {attempt}/{} failed, retrying in {:?}: {e}",
                        self.attempts, self.backoff
                    );
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for RetryingStore<S> {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_retries("get", || self.inner.get(key)).await
    }

    async fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_retries("put", || self.inner.put(key, value)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.with_retries("delete", || self.inner.delete(key)).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.with_retries("keys_with_prefix", || self.inner.keys_with_prefix(prefix))
            .await
    }
}
