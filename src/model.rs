use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry from the server's ordered event stream.
///
/// The payload stays opaque at the envelope level and is decoded per kind,
/// so an unknown event kind is skipped instead of failing the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence_id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Decode the payload into a typed structure for a specific event kind.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhaseStartedPayload {
    #[serde(default)]
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCodePayload {
    pub instruction_id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub expects_render: bool,
    #[serde(default)]
    pub image_prefix: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    /// Applied when the client config leaves the scale at its default.
    #[serde(default)]
    pub resolution_scale: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrepareScenePayload {
    pub instruction_id: String,
    #[serde(default = "default_render_filename")]
    pub filename: String,
    #[serde(default = "default_num_angles")]
    pub num_angles: u32,
}

fn default_render_filename() -> String {
    "render".into()
}

fn default_num_angles() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInputPayload {
    pub instruction_id: String,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminatePayload {
    pub instruction_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Structured failure details attached to RUN_FAILED events and the
/// status endpoint's `last_error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunFailurePayload {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub retry_after_seconds: Option<u64>,
    #[serde(default)]
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub last_error: Option<RunFailurePayload>,
}

/// Result of one backend invocation, before success inference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub message: Option<String>,
}

impl ExecutionResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            result: Value::Null,
            message: Some(message.into()),
        }
    }

    pub fn is_declared_error(&self) -> bool {
        self.status.eq_ignore_ascii_case("error")
    }
}

/// The single result post the server expects per instruction.
#[derive(Debug, Clone, Serialize)]
pub struct InstructionResult {
    pub instruction_id: String,
    pub status: ResultStatus,
    pub result: Value,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Error,
}

impl InstructionResult {
    pub fn ok(instruction_id: impl Into<String>, result: Value) -> Self {
        Self {
            instruction_id: instruction_id.into(),
            status: ResultStatus::Ok,
            result,
            message: None,
        }
    }

    pub fn error(instruction_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            instruction_id: instruction_id.into(),
            status: ResultStatus::Error,
            result: Value::Null,
            message: Some(message.into()),
        }
    }
}

/// Terminal states of the orchestrator loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    /// Server asked the client to shut down via INSTRUCTION_TERMINATE_CLIENT.
    Terminated,
    /// Client aborted the session (Blender unreachable).
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_envelope_tolerates_unknown_kind_and_missing_payload() {
        let ev: Event =
            serde_json::from_str(r#"{"sequence_id": 7, "type": "SOMETHING_NEW"}"#).unwrap();
        assert_eq!(ev.sequence_id, 7);
        assert_eq!(ev.kind, "SOMETHING_NEW");
        assert!(ev.payload.is_null());
    }

    #[test]
    fn execute_payload_defaults() {
        let ev: Event = serde_json::from_str(
            r#"{"sequence_id": 1, "type": "INSTRUCTION_EXECUTE_BLENDER",
                "payload": {"instruction_id": "i1", "code": "print(1)"}}"#,
        )
        .unwrap();
        let p: ExecuteCodePayload = ev.decode().unwrap();
        assert_eq!(p.instruction_id, "i1");
        assert!(!p.expects_render);
        assert!(p.count.is_none());
    }

    #[test]
    fn instruction_result_serializes_lowercase_status() {
        let r = InstructionResult::error("i2", "boom");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["instruction_id"], "i2");
    }
}
