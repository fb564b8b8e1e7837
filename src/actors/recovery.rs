//! RecoveryActor - per-module failure tracking and bounded auto-restart
//!
//! ## State machine
//!
//! ```text
//! Healthy ──failure──▶ Degraded(n) ──n ≥ recovery_count within window──▶ Halted
//!    ▲                     │                                               │
//!    └─────success─────────┘                      operator restart ────────┘
//! ```
//!
//! Failures inside one module never propagate to other modules: the run
//! loop reports a structured failure and receives a verdict: back off and
//! retry, or halt. A halted module emits exactly one fault alert (deduped
//! on the module name) recommending a service restart, and stays parked
//! until an operator sends a `thread_controller` restart.
//!
//! The actor also owns the `thread_controller` protocol: status / restart /
//! stop requests arrive through its mailbox via the ingress router, and
//! correlated replies flow back through the egress pipeline.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use crate::dedup::AlertGate;
use crate::envelope::{
    Envelope, EnvelopeBody, THREAD_CONTROLLER_TAG, ThreadAction, ThreadControllerRequest,
    ThreadControllerResponse,
};
use crate::mailbox::MailboxReceiver;
use crate::runtime::{ModuleState, RuntimeController};
use crate::{AlertRecord, AlertType, Severity};

use super::egress::EgressHandle;
use super::messages::{FailureVerdict, RecoveryCommand, RecoverySnapshot, RecoveryState};

/// Module name the thread-controller tag routes to.
pub const RECOVERY_MODULE: &str = "recovery_supervisor";

/// Dedup code for the halted-module fault.
const MODULE_HALTED_CODE: &str = "module_halted";

/// Fallback backoff for failure reports from modules that were never
/// registered with the supervisor.
const UNREGISTERED_BACKOFF: Duration = Duration::from_secs(30);

/// Per-module failure bookkeeping. Created at registration, never removed
/// while the module exists.
#[derive(Debug, Clone)]
struct RecoveryRecord {
    consecutive_failures: u32,
    last_failure_time: Option<DateTime<Utc>>,
    state: RecoveryState,
    recovery_count: u32,
    recovery_interval: Duration,
}

impl RecoveryRecord {
    fn new(recovery_count: u32, recovery_interval: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            last_failure_time: None,
            state: RecoveryState::Healthy,
            recovery_count,
            recovery_interval,
        }
    }
}

pub struct RecoveryActor {
    records: HashMap<String, RecoveryRecord>,
    controller: RuntimeController,
    gate: AlertGate,
    egress: EgressHandle,
    command_rx: mpsc::Receiver<RecoveryCommand>,
    mailbox: MailboxReceiver,
}

impl RecoveryActor {
    pub fn new(
        controller: RuntimeController,
        gate: AlertGate,
        egress: EgressHandle,
        command_rx: mpsc::Receiver<RecoveryCommand>,
        mailbox: MailboxReceiver,
    ) -> Self {
        Self {
            records: HashMap::new(),
            controller,
            gate,
            egress,
            command_rx,
            mailbox,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting recovery supervisor");

        loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        RecoveryCommand::RegisterModule { module, recovery_count, recovery_interval } => {
                            debug!("registered recovery record for {module} (count {recovery_count}, interval {recovery_interval:?})");
                            self.records.insert(
                                module,
                                RecoveryRecord::new(recovery_count, recovery_interval),
                            );
                        }

                        RecoveryCommand::ReportFailure { module, error, respond_to } => {
                            let verdict = self.on_module_failure(&module, &error).await;
                            let _ = respond_to.send(verdict);
                        }

                        RecoveryCommand::ReportSuccess { module } => {
                            self.on_module_success(&module);
                        }

                        RecoveryCommand::ThreadController { request, respond_to } => {
                            let response = self.handle_thread_controller(request).await;
                            let _ = respond_to.send(response);
                        }

                        RecoveryCommand::GetRecord { module, respond_to } => {
                            let snapshot = self.records.get(&module).map(|r| RecoverySnapshot {
                                module: module.clone(),
                                consecutive_failures: r.consecutive_failures,
                                state: r.state,
                            });
                            let _ = respond_to.send(snapshot);
                        }

                        RecoveryCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                // Thread-controller envelopes routed through the mailbox.
                Some(envelope) = self.mailbox.recv() => {
                    if envelope.is_shutdown() {
                        debug!("observed shutdown envelope");
                        break;
                    }
                    self.handle_envelope(envelope).await;
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("recovery supervisor stopped");
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        match &envelope.body {
            EnvelopeBody::ThreadControllerRequest(request) => {
                let response = self.handle_thread_controller(request.clone()).await;
                let reply = Envelope::reply_to(
                    &envelope,
                    THREAD_CONTROLLER_TAG,
                    EnvelopeBody::ThreadControllerResponse(response),
                );
                if let Err(e) = self.egress.send_reply(reply).await {
                    warn!("failed to queue thread-controller reply: {e}");
                }
            }
            other => {
                warn!("unexpected envelope body for recovery supervisor: {other:?}");
            }
        }
    }

    /// Increment the failure counter and decide what the module does next.
    #[instrument(skip(self, error), fields(module = %module))]
    async fn on_module_failure(&mut self, module: &str, error: &str) -> FailureVerdict {
        let Some(record) = self.records.get_mut(module) else {
            warn!("failure report for unregistered module {module}: {error}");
            return FailureVerdict::RetryAfter(UNREGISTERED_BACKOFF);
        };

        let now = Utc::now();

        // A long quiet period breaks the streak. The threshold is two
        // recovery intervals: a module that failed, backed off for one
        // interval and failed again lands just past one interval, which
        // must still count toward the streak.
        if let Some(last) = record.last_failure_time {
            let gap = (now - last).to_std().unwrap_or(Duration::ZERO);
            if gap > record.recovery_interval * 2 {
                record.consecutive_failures = 0;
            }
        }

        record.consecutive_failures += 1;
        record.last_failure_time = Some(now);

        debug!(
            "failure {}/{} for {module}: {error}",
            record.consecutive_failures, record.recovery_count
        );

        if record.consecutive_failures >= record.recovery_count {
            record.state = RecoveryState::Halted;
            let failures = record.consecutive_failures;
            self.controller.set_state(module, ModuleState::Halted);
            self.emit_halted_alert(module, error, failures).await;
            FailureVerdict::Halt
        } else {
            record.state = RecoveryState::Degraded;
            FailureVerdict::RetryAfter(record.recovery_interval)
        }
    }

    fn on_module_success(&mut self, module: &str) {
        let Some(record) = self.records.get_mut(module) else {
            return;
        };

        record.consecutive_failures = 0;
        if record.state == RecoveryState::Degraded {
            debug!("{module} recovered");
            record.state = RecoveryState::Healthy;
        }
    }

    /// Permanent, non-retried fault; deduped so a module that halts again
    /// before an operator restart does not re-alert.
    async fn emit_halted_alert(&self, module: &str, error: &str, failures: u32) {
        let alert = AlertRecord::new(
            "monitoring_module",
            module,
            AlertType::Fault,
            Severity::Critical,
            format!("module {module} halted after {failures} consecutive failures"),
        )
        .with_specific_info(serde_json::json!({
            "error": error,
            "consecutive_failures": failures,
            "recommendation": "restart service",
            "retryable": false,
        }));

        match self.gate.emit(alert, MODULE_HALTED_CODE).await {
            Ok(Some(_)) => debug!("halted alert emitted for {module}"),
            Ok(None) => debug!("halted alert for {module} suppressed (already open)"),
            Err(e) => warn!("failed to emit halted alert for {module}: {e}"),
        }
    }

    #[instrument(skip(self, request), fields(module = %request.module_name, action = ?request.thread_request))]
    async fn handle_thread_controller(
        &mut self,
        request: ThreadControllerRequest,
    ) -> ThreadControllerResponse {
        let module = request.module_name.clone();

        let thread_response = match request.thread_request {
            ThreadAction::Status => match self.controller.state(&module) {
                Some(state) => format!("Status: {state}"),
                None => "Status: Unknown Module".to_string(),
            },

            ThreadAction::Restart => self.restart_module(&module).await,

            ThreadAction::Stop => {
                if self.controller.set_state(&module, ModuleState::Suspended) {
                    debug!("{module} suspended by thread controller");
                    "Stop Successful".to_string()
                } else {
                    "Stop Failed".to_string()
                }
            }
        };

        ThreadControllerResponse {
            module_name: module,
            thread_response,
        }
    }

    async fn restart_module(&mut self, module: &str) -> String {
        let Some(record) = self.records.get_mut(module) else {
            return "Restart Failed".to_string();
        };

        // Once the flag is flipped the run loop wakes from its parked state
        // and resumes at its next scheduling point.
        if !self.controller.set_state(module, ModuleState::Running) {
            return "Restart Failed".to_string();
        }

        record.consecutive_failures = 0;
        record.last_failure_time = None;
        record.state = RecoveryState::Healthy;

        // Allow a future halt of this module to alert again.
        if let Err(e) = self
            .gate
            .dedup()
            .clear(module, MODULE_HALTED_CODE)
            .await
        {
            warn!("failed to clear halted marker for {module}: {e}");
        }

        debug!("{module} restarted by thread controller");
        "Restart Successful".to_string()
    }
}

/// Handle for the recovery supervisor.
#[derive(Clone)]
pub struct RecoveryHandle {
    sender: mpsc::Sender<RecoveryCommand>,
}

impl RecoveryHandle {
    /// Spawn the supervisor. `mailbox` is the receiver registered under
    /// [`RECOVERY_MODULE`]; the ingress router delivers thread-controller
    /// envelopes there.
    pub fn spawn(
        controller: RuntimeController,
        gate: AlertGate,
        egress: EgressHandle,
        mailbox: MailboxReceiver,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let actor = RecoveryActor::new(controller, gate, egress, cmd_rx, mailbox);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    pub async fn register_module(
        &self,
        module: impl Into<String>,
        recovery_count: u32,
        recovery_interval: Duration,
    ) {
        let _ = self
            .sender
            .send(RecoveryCommand::RegisterModule {
                module: module.into(),
                recovery_count,
                recovery_interval,
            })
            .await;
    }

    /// Report a failed unit of work and wait for the verdict.
    pub async fn report_failure(
        &self,
        module: impl Into<String>,
        error: impl Into<String>,
    ) -> anyhow::Result<FailureVerdict> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RecoveryCommand::ReportFailure {
                module: module.into(),
                error: error.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("recovery supervisor is gone"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("recovery supervisor dropped the report"))
    }

    pub async fn report_success(&self, module: impl Into<String>) {
        let _ = self
            .sender
            .send(RecoveryCommand::ReportSuccess {
                module: module.into(),
            })
            .await;
    }

    /// Drive the thread-controller protocol directly (the router path goes
    /// through the supervisor mailbox instead).
    pub async fn thread_controller(
        &self,
        request: ThreadControllerRequest,
    ) -> anyhow::Result<ThreadControllerResponse> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RecoveryCommand::ThreadController {
                request,
                respond_to: tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("recovery supervisor is gone"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("recovery supervisor dropped the request"))
    }

    pub async fn record(&self, module: impl Into<String>) -> Option<RecoverySnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RecoveryCommand::GetRecord {
                module: module.into(),
                respond_to: tx,
            })
            .await
            .ok()?;
        rx.await.ok()?
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(RecoveryCommand::Shutdown).await;
    }
}
