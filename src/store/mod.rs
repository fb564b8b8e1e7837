//! Durable key/value capability
//!
//! The dedup ledger and the egress backlog both live in a small durable
//! key/value store (a Consul-like store in production). This module keeps
//! that capability behind a trait so the transport can be swapped.
//!
//! ## Design
//!
//! - **Trait-based**: `KeyValueStore` allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio tasks
//! - **Key-scoped**: Callers only need per-key atomicity; there is no
//!   cross-key transaction surface
//!
//! ## Backends
//!
//! - **In-Memory** (default): Sorted map behind an async lock; used for
//!   tests and single-process deployments
//! - **Consul/etcd** (production): External store reached over its own
//!   transport, wrapped in [`RetryingStore`] for connection hiccups

pub mod backend;
pub mod error;
pub mod memory;
pub mod retry;

pub use backend::KeyValueStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use retry::RetryingStore;
