//! Key/value store trait definition

use async_trait::async_trait;

use super::error::StoreResult;

/// Trait for durable key/value stores
///
/// The daemon's shared state (dedup ledger, egress backlog) is addressed
/// by key, so implementations only need per-key atomicity; there is no
/// process-wide lock and no multi-key transaction in this surface.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across async
/// tasks behind an `Arc`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` under `key`, replacing any existing value.
    async fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// All keys starting with `prefix`, in lexicographic order.
    ///
    /// The egress backlog relies on the ordering: its keys embed a
    /// zero-padded enqueue timestamp so lexicographic order is FIFO order.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
