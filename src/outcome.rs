//! Success inference over backend results.
//!
//! Two-stage validator: a declared error status always fails; otherwise a
//! text-pattern scan can override a declared success. Blender frequently
//! exits zero while printing an operator traceback, so the declared status
//! alone is not trustworthy.

use crate::model::ExecutionResult;

/// Failure signatures scanned for in result/message text (lowercase).
const ERROR_TOKENS: &[&str] = &[
    "error:",
    " error ",
    "failed",
    "traceback",
    "exception",
    "context is incorrect",
    "bpy.ops",
    "unrecognized",
];

/// Connection-refusal signatures. These are fatal to the whole session,
/// not just the instruction: a refused connection means the Blender addon
/// is gone for the remainder of the run.
const REFUSED_TOKENS: &[&str] = &["actively refused", "connection refused", "10061"];

/// Classify a backend result. Returns `(success, inferred_message)`; the
/// message is populated when a textual error cue forced a failure.
pub fn infer_success(res: &ExecutionResult) -> (bool, Option<String>) {
    if res.is_declared_error() {
        return (false, res.message.clone());
    }

    let blobs = text_blobs(res);
    let joined = blobs.join("\n").to_lowercase();
    if ERROR_TOKENS.iter().any(|tok| joined.contains(tok)) {
        let detail = blobs.first().cloned().unwrap_or_default();
        return (false, Some(format!("Execution error detected: {detail}")));
    }

    (true, None)
}

/// Whether the result text carries a connection-refusal signature.
pub fn is_connection_refused(res: &ExecutionResult) -> bool {
    let mut joined = text_blobs(res).join("\n").to_lowercase();
    joined.push('\n');
    joined.push_str(&res.result.to_string().to_lowercase());
    REFUSED_TOKENS.iter().any(|tok| joined.contains(tok))
}

fn text_blobs(res: &ExecutionResult) -> Vec<String> {
    let mut blobs = Vec::new();
    if let Some(msg) = &res.message {
        blobs.push(msg.clone());
    }
    if let Some(s) = res.result.as_str() {
        blobs.push(s.to_string());
    }
    blobs
}
