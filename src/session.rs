//! Process-wide current-session slot.
//!
//! Written by the orchestrator (set on run start, cleared at terminal
//! transitions) and read by the signal task, so it lives behind a lock
//! rather than a plain static.

use std::sync::Mutex;

static CURRENT_SESSION: Mutex<Option<String>> = Mutex::new(None);

pub fn set_current_session(session_id: Option<String>) {
    *CURRENT_SESSION.lock().expect("session lock poisoned") = session_id;
}

pub fn current_session() -> Option<String> {
    CURRENT_SESSION.lock().expect("session lock poisoned").clone()
}

/// Take the slot, leaving it empty. Makes abort-on-shutdown idempotent:
/// whichever path runs first (signal task or exit cleanup) gets the id,
/// the other sees nothing to do.
pub fn take_current_session() -> Option<String> {
    CURRENT_SESSION.lock().expect("session lock poisoned").take()
}
