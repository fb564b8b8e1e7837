//! Long-lived service actors
//!
//! The delivery pipeline and the recovery supervisor run as independent
//! async tasks communicating over Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!   monitoring modules ──AlertRecord──▶ EgressActor ──▶ message bus
//!        │                                  │
//!        │ failure/success reports          └─▶ KV backlog (bus down)
//!        ▼
//!   RecoveryActor ──Halted alert──▶ EgressActor
//!        ▲
//!        └── thread_controller envelopes (via IngressRouter)
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control
//! 2. **Request/Response**: oneshot channels for synchronous queries
//! 3. **Handles**: cloneable typed wrappers around the command sender

pub mod egress;
pub mod messages;
pub mod recovery;
