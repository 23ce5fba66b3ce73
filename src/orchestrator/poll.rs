//! The event-polling loop: cursor bookkeeping, transport-failure retries,
//! silence awareness, and per-kind dispatch.

use super::Orchestrator;
use crate::backend::Backend;
use crate::model::{
    Event, HeartbeatPayload, InstructionResult, PhaseStartedPayload, RunFailurePayload,
    RunOutcome, TerminatePayload,
};
use crate::server::{classify_transport_error, RunApi, TransportClass};
use crate::session;
use anyhow::Result;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const POLL_BACKOFF: Duration = Duration::from_secs(2);
const EMPTY_BATCH_SLEEP: Duration = Duration::from_millis(500);
/// Silence before the status endpoint gets consulted for a missed
/// terminal event.
const STATUS_CHECK_AFTER: Duration = Duration::from_secs(180);
/// Minimum spacing between those status checks.
const STATUS_CHECK_EVERY: Duration = Duration::from_secs(30);

impl<A: RunApi, B: Backend> Orchestrator<A, B> {
    /// Drive the session to a terminal state. Transport failures never
    /// terminate the loop; every exit path clears the current-session slot.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        session::set_current_session(Some(self.session_id.clone()));

        let mut last_event_at = Instant::now();
        let mut last_status_check: Option<Instant> = None;

        loop {
            let events = match self.api.fetch_events(&self.session_id, self.last_seq).await {
                Ok(events) => events,
                Err(e) => {
                    println!("Poll error: {e:#}");
                    match classify_transport_error(&e) {
                        TransportClass::BadGateway => println!(
                            "Note: this is a temporary network issue and won't affect your run. Retrying..."
                        ),
                        TransportClass::Overloaded => println!(
                            "Server appears overloaded or unavailable. The client will retry automatically..."
                        ),
                        TransportClass::Unknown => {}
                    }
                    tokio::time::sleep(POLL_BACKOFF).await;
                    continue;
                }
            };

            if events.is_empty() {
                if last_event_at.elapsed() > STATUS_CHECK_AFTER
                    && last_status_check.map_or(true, |t| t.elapsed() > STATUS_CHECK_EVERY)
                {
                    last_status_check = Some(Instant::now());
                    if let Some(outcome) = self.check_status_during_silence().await {
                        session::set_current_session(None);
                        return Ok(outcome);
                    }
                }
                tokio::time::sleep(EMPTY_BATCH_SLEEP).await;
                continue;
            }

            for event in &events {
                // Never regress the cursor, even on out-of-order ids within
                // a batch.
                self.last_seq = self.last_seq.max(event.sequence_id);
                last_event_at = Instant::now();
                if let Some(outcome) = self.handle_event(event).await {
                    session::set_current_session(None);
                    return Ok(outcome);
                }
            }
        }
    }

    /// Defends against a terminal event the stream never delivered: a FAILED
    /// run status during prolonged silence terminates the session locally.
    async fn check_status_during_silence(&self) -> Option<RunOutcome> {
        let status = match self.api.fetch_status(&self.session_id).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %format!("{e:#}"), "status check failed during silence");
                return None;
            }
        };
        if status.state != "FAILED" {
            return None;
        }
        println!("[Client] [ERROR] Server reported failure during silence.");
        print_structured_failure(&status.last_error.unwrap_or_default());
        self.timer.summarize_and_stop().await;
        Some(RunOutcome::Failed)
    }

    /// Dispatch one event. `Some(outcome)` means the session is over.
    async fn handle_event(&mut self, event: &Event) -> Option<RunOutcome> {
        match event.kind.as_str() {
            "PHASE_STARTED" => {
                let phase = event
                    .decode::<PhaseStartedPayload>()
                    .ok()
                    .and_then(|p| p.phase)
                    .unwrap_or_else(|| "unknown".into());
                println!("[Phase] {phase}");
                self.timer.start(&phase).await;
                None
            }
            "INSTRUCTION_EXECUTE_BLENDER" => self.handle_execute(event).await,
            "INSTRUCTION_PREPARE_SCENE" => {
                self.handle_prepare_scene(event).await;
                None
            }
            "INSTRUCTION_REQUEST_USER_INPUT" => {
                self.handle_user_input(event).await;
                None
            }
            "INSTRUCTION_TERMINATE_CLIENT" => Some(self.handle_terminate(event).await),
            "RUN_COMPLETED" => {
                self.timer.summarize_and_stop().await;
                println!("Run completed.");
                Some(RunOutcome::Completed)
            }
            "RUN_FAILED" => {
                self.timer.summarize_and_stop().await;
                print_structured_failure(&event.decode().unwrap_or_default());
                Some(RunOutcome::Failed)
            }
            "S3_LOGS_READY" => {
                println!("[Client] Server reports logs have been archived.");
                None
            }
            "PHASE_HEARTBEAT" => {
                if let Ok(hb) = event.decode::<HeartbeatPayload>() {
                    print_heartbeat(&hb);
                }
                None
            }
            other => {
                debug!(kind = other, seq = event.sequence_id, "ignoring unknown event kind");
                None
            }
        }
    }

    async fn handle_terminate(&mut self, event: &Event) -> RunOutcome {
        let (instruction_id, reason) = match event.decode::<TerminatePayload>() {
            Ok(p) => (
                p.instruction_id,
                p.reason
                    .unwrap_or_else(|| "Server requested termination.".into()),
            ),
            Err(e) => {
                debug!(error = %e, "malformed terminate payload");
                self.timer.summarize_and_stop().await;
                return RunOutcome::Terminated;
            }
        };
        println!("[Client] Termination requested by server: {reason}");
        let mut ack = InstructionResult::ok(&instruction_id, json!({ "terminated": true }));
        ack.message = Some(reason);
        self.post_result_logged(ack).await;
        self.timer.summarize_and_stop().await;
        RunOutcome::Terminated
    }

    /// Post a result, logging failure instead of propagating it. The server's
    /// own timeout is the backstop for a result that never arrives.
    pub(super) async fn post_result_logged(&self, result: InstructionResult) {
        if let Err(e) = self.api.post_result(&self.session_id, &result).await {
            println!("[Client] [ERROR] Failed to send response to server: {e:#}");
        }
    }
}

pub(super) fn print_structured_failure(failure: &RunFailurePayload) {
    if let Some(phase) = &failure.phase {
        println!("Run failed during phase: {phase}");
    }
    println!(
        "Run failed: {}",
        failure.message.as_deref().unwrap_or("Run failed")
    );
    let mut details = Vec::new();
    if let Some(t) = &failure.error_type {
        details.push(format!("type={t}"));
    }
    if let Some(c) = failure.error_code {
        details.push(format!("code={c}"));
    }
    if !details.is_empty() {
        println!("Details: {}", details.join(", "));
    }
    if let Some(after) = failure.retry_after_seconds {
        println!("Suggestion: retry after ~{after}s");
    }
}

fn print_heartbeat(hb: &HeartbeatPayload) {
    let mut msg = format!("[Heartbeat] phase={}", hb.phase.as_deref().unwrap_or("unknown"));
    if let Some(ms) = hb.elapsed_ms {
        msg.push_str(&format!(", t={}s", ms / 1000));
    }
    if let Some(step) = &hb.step {
        msg.push_str(&format!(", step={step}"));
    }
    if let Some(note) = &hb.note {
        msg.push_str(&format!(" ({note})"));
    }
    println!("{msg}");
}
