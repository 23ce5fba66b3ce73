//! Interrupt handling: abort the active session server-side exactly once.

use crate::server::{RunApi, ServerClient};
use crate::session;
use std::time::Duration;
use tracing::warn;

const ABORT_WAIT: Duration = Duration::from_secs(3);

/// Spawn the Ctrl+C watcher. On interrupt: best-effort abort of the active
/// session (bounded wait), then process exit. Taking the session out of the
/// slot first keeps the abort exactly-once across this task and
/// `abort_active_session` on the normal exit path.
pub fn spawn_interrupt_handler(api: ServerClient) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("failed to install Ctrl+C handler");
            return;
        }
        match session::take_current_session() {
            Some(sid) => {
                println!("\n[Client] Received interrupt signal. Aborting session {sid}...");
                match tokio::time::timeout(ABORT_WAIT, api.abort(&sid)).await {
                    Ok(Ok(())) => println!("[Client] Session aborted successfully."),
                    Ok(Err(e)) => println!("[Client] Failed to abort session: {e:#}"),
                    Err(_) => println!(
                        "[Client] Abort request timed out; the server timeout will clean up."
                    ),
                }
            }
            None => println!("\n[Client] Received interrupt signal. No active session to abort."),
        }
        std::process::exit(130);
    });
}

/// Exit-path cleanup: abort whatever session is still marked active. No-op
/// when the orchestrator already reached a terminal state and cleared the
/// slot, or when the interrupt handler got there first.
pub async fn abort_active_session(api: &ServerClient) {
    if let Some(sid) = session::take_current_session() {
        match tokio::time::timeout(ABORT_WAIT, api.abort(&sid)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session = %sid, error = %format!("{e:#}"), "cleanup abort failed"),
            Err(_) => warn!(session = %sid, "cleanup abort timed out"),
        }
    }
}
