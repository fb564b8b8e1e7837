//! Message types for actor communication
//!
//! Commands are request/response messages sent to a specific actor via its
//! mpsc channel; oneshot channels carry the responses. Everything an actor
//! needs to answer is carried in the command itself.

use tokio::sync::oneshot;

use crate::AlertRecord;
use crate::envelope::{Envelope, ThreadControllerRequest, ThreadControllerResponse};

/// Outcome of a publish attempt against the message bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The bus confirmed the envelope within the publish timeout.
    Delivered,

    /// The bus was unreachable; the alert is persisted in the backlog and
    /// will be retried on the next flush cycle.
    AcceptedForRetry,
}

/// What one backlog flush cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries delivered and removed from the backlog.
    pub delivered: usize,

    /// Entries dropped for staleness without a delivery attempt.
    pub dropped_stale: usize,

    /// Entries still backlogged after this cycle.
    pub remaining: usize,
}

/// Running totals for the egress pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct EgressStats {
    pub published: u64,
    pub delivered_immediate: u64,
    pub backlogged: u64,
    pub flushed: u64,
    pub dropped_stale: u64,
}

/// Commands that can be sent to the EgressActor
#[derive(Debug)]
pub enum EgressCommand {
    /// Deliver an alert: immediate bus send, backlog on failure.
    Publish {
        alert: AlertRecord,
        respond_to: oneshot::Sender<anyhow::Result<PublishOutcome>>,
    },

    /// Send a correlated reply envelope back to the requester. Replies are
    /// best-effort: a reply that cannot be delivered is logged and dropped
    /// rather than backlogged, since a stale reply is not actionable.
    SendReply { envelope: Envelope },

    /// Run a backlog flush cycle immediately (bypassing the timer).
    FlushNow {
        respond_to: oneshot::Sender<FlushReport>,
    },

    /// Get pipeline statistics.
    GetStats {
        respond_to: oneshot::Sender<EgressStats>,
    },

    /// Gracefully shut down; a final flush cycle runs first. The ack fires
    /// after that flush, so callers can wait for the pipeline to drain.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Supervisor's decision after a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Back off for the module's recovery interval, then run again.
    RetryAfter(std::time::Duration),

    /// Too many consecutive failures: the module is halted until an
    /// explicit restart command arrives.
    Halt,
}

/// Commands that can be sent to the RecoveryActor
#[derive(Debug)]
pub enum RecoveryCommand {
    /// Create the recovery record for a module. Called once per module
    /// before its run loop starts.
    RegisterModule {
        module: String,
        recovery_count: u32,
        recovery_interval: std::time::Duration,
    },

    /// A module's unit of work failed. Only structured reports cross the
    /// module boundary, never panics. The verdict tells the run loop how
    /// to proceed.
    ReportFailure {
        module: String,
        error: String,
        respond_to: oneshot::Sender<FailureVerdict>,
    },

    /// A module completed a unit of work.
    ReportSuccess { module: String },

    /// Thread-controller protocol: status / restart / stop.
    ThreadController {
        request: ThreadControllerRequest,
        respond_to: oneshot::Sender<ThreadControllerResponse>,
    },

    /// Snapshot of a module's recovery record (for tests and diagnostics).
    GetRecord {
        module: String,
        respond_to: oneshot::Sender<Option<RecoverySnapshot>>,
    },

    /// Gracefully shut down the supervisor.
    Shutdown,
}

/// Supervisor-side health of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Healthy,
    Degraded,
    Halted,
}

/// Cloneable snapshot of a module's recovery record.
#[derive(Debug, Clone)]
pub struct RecoverySnapshot {
    pub module: String,
    pub consecutive_failures: u32,
    pub state: RecoveryState,
}
