//! HTTP client for the run/event/instruction API.
//!
//! Every call carries a bounded timeout. Result posting and uploads are
//! fire-and-forget from the orchestrator's point of view: failures are
//! logged, never retried here (the server's own timeout/heartbeat
//! machinery is the backstop for missing results).

use crate::config::ClientConfig;
use crate::model::{Event, InstructionResult, RunStatus};
use anyhow::{Context, Result};
use reqwest::multipart;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const EVENTS_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const RESULT_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const ABORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Async seam between the orchestrator and the server, so the event loop is
/// testable against an in-memory fake.
pub trait RunApi {
    async fn fetch_events(&self, session: &str, after: u64) -> Result<Vec<Event>>;
    async fn fetch_status(&self, session: &str) -> Result<RunStatus>;
    async fn post_result(&self, session: &str, result: &InstructionResult) -> Result<()>;
    async fn upload_images(
        &self,
        session: &str,
        instruction_id: &str,
        prefix: &str,
        files: &[PathBuf],
    ) -> Result<()>;
    async fn upload_blend(&self, session: &str, instruction_id: &str, path: &Path) -> Result<()>;
    async fn abort(&self, session: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ServerClient {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl ServerClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("blendrelay/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base_url: cfg.server.url.trim_end_matches('/').to_string(),
            api_token: cfg.server.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.http.get(self.url(path)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.http.post(self.url(path)))
    }

    fn authed(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    /// Start a run. Exactly one input mode: a text prompt, an image upload,
    /// or a refinement of an existing session. Returns the new session id.
    pub async fn start_run(&self, cfg: &ClientConfig, input: RunInput<'_>) -> Result<String> {
        let render = cfg.render_json();
        let resp = match input {
            RunInput::Text(text) => {
                let payload = json!({
                    "text": text,
                    "image_path": null,
                    "render": render,
                });
                self.post("runs")
                    .timeout(Duration::from_secs(10))
                    .json(&payload)
                    .send()
                    .await
                    .context("starting run")?
            }
            RunInput::Image { path, text } => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading image file {}", path.display()))?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image".into());
                let mut form = multipart::Form::new()
                    .part(
                        "image",
                        multipart::Part::bytes(bytes).file_name(filename),
                    )
                    .text("render", render.to_string());
                if let Some(text) = text {
                    form = form.text("text", text.to_string());
                }
                self.post("runs")
                    .timeout(Duration::from_secs(30))
                    .multipart(form)
                    .send()
                    .await
                    .context("starting run with image input")?
            }
            RunInput::Refinement { session_id, prompt } => {
                let form = [
                    ("session_id", session_id.to_string()),
                    ("refinement_prompt", prompt.to_string()),
                    ("render", render.to_string()),
                ];
                self.post("runs")
                    .timeout(Duration::from_secs(30))
                    .form(&form)
                    .send()
                    .await
                    .context("starting session refinement")?
            }
        };

        let resp = surface_http_failure(resp).await?;
        let body: serde_json::Value = resp.json().await.context("decoding run-start response")?;
        body.get("session_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .context("run-start response carried no session_id")
    }

    /// List session ids owned by the current user.
    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        let resp = self
            .get("sessions")
            .timeout(EVENTS_TIMEOUT)
            .send()
            .await
            .context("listing sessions")?;
        let resp = surface_http_failure(resp).await?;
        Ok(resp.json().await.context("decoding session list")?)
    }
}

impl RunApi for ServerClient {
    async fn fetch_events(&self, session: &str, after: u64) -> Result<Vec<Event>> {
        let resp = self
            .get(&format!("runs/{session}/events"))
            .query(&[("after", after)])
            .timeout(EVENTS_TIMEOUT)
            .send()
            .await
            .context("polling events")?
            .error_for_status()
            .context("polling events")?;
        Ok(resp.json().await.context("decoding event batch")?)
    }

    async fn fetch_status(&self, session: &str) -> Result<RunStatus> {
        let resp = self
            .get(&format!("runs/{session}/status"))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await
            .context("querying run status")?
            .error_for_status()
            .context("querying run status")?;
        Ok(resp.json().await.context("decoding run status")?)
    }

    async fn post_result(&self, session: &str, result: &InstructionResult) -> Result<()> {
        self.post(&format!("runs/{session}/results"))
            .timeout(RESULT_TIMEOUT)
            .json(result)
            .send()
            .await
            .context("posting instruction result")?
            .error_for_status()
            .context("posting instruction result")?;
        Ok(())
    }

    async fn upload_images(
        &self,
        session: &str,
        instruction_id: &str,
        prefix: &str,
        files: &[PathBuf],
    ) -> Result<()> {
        let mut form = multipart::Form::new()
            .text("instruction_id", instruction_id.to_string())
            .text("image_prefix", prefix.to_string());
        for path in files {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading render image {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "render.png".into());
            let part = multipart::Part::bytes(bytes)
                .file_name(filename)
                .mime_str("image/png")
                .context("building image part")?;
            form = form.part("files", part);
        }
        self.post(&format!("runs/{session}/images"))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .context("uploading render images")?
            .error_for_status()
            .context("uploading render images")?;
        Ok(())
    }

    async fn upload_blend(&self, session: &str, instruction_id: &str, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading blend file {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scene.blend".into());
        let form = multipart::Form::new()
            .text("instruction_id", instruction_id.to_string())
            .part(
                "file",
                multipart::Part::bytes(bytes)
                    .file_name(filename)
                    .mime_str("application/octet-stream")
                    .context("building blend part")?,
            );
        self.post(&format!("runs/{session}/blend_file"))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .context("uploading blend file")?
            .error_for_status()
            .context("uploading blend file")?;
        Ok(())
    }

    async fn abort(&self, session: &str) -> Result<()> {
        self.post(&format!("runs/{session}/abort"))
            .timeout(ABORT_TIMEOUT)
            .json(&json!({}))
            .send()
            .await
            .context("notifying abort")?
            .error_for_status()
            .context("notifying abort")?;
        debug!(session, "abort notified");
        Ok(())
    }
}

/// How to seed a new run.
pub enum RunInput<'a> {
    Text(&'a str),
    Image {
        path: &'a Path,
        text: Option<&'a str>,
    },
    Refinement {
        session_id: &'a str,
        prompt: &'a str,
    },
}

/// Turn HTTP failure statuses into actionable errors: 401/403 get a login
/// hint, 429 gets the structured rate-limit summary. Both are fatal to the
/// current command, unlike poll-loop transport errors.
async fn surface_http_failure(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
    match status.as_u16() {
        401 | 403 => {
            println!("[Client] Authentication required. Please configure an API token first.");
            anyhow::bail!("server rejected the request with {status}")
        }
        429 => {
            let detail = body.get("detail").unwrap_or(&body);
            let info = detail.get("rate_limit").unwrap_or(detail);
            let limit = info.get("limit").and_then(|v| v.as_i64()).unwrap_or(0);
            let remaining = info.get("remaining").and_then(|v| v.as_i64()).unwrap_or(0);
            let reset = info
                .get("reset_time")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown");
            println!("[Client] ----------------------------------------------");
            println!("[Client] [WARN] Daily rate limit reached");
            if limit > 0 {
                println!("[Client] Usage today: {}/{}", limit - remaining, limit);
            }
            println!("[Client] Resets at: {reset}");
            println!("[Client] Please try again tomorrow or contact an admin.");
            println!("[Client] ----------------------------------------------");
            anyhow::bail!("daily rate limit reached")
        }
        _ => {
            let detail = body
                .get("detail")
                .map(|d| d.to_string())
                .unwrap_or_else(|| body.to_string());
            anyhow::bail!("server returned {status}: {detail}")
        }
    }
}

/// Coarse classification of poll-loop transport failures, used only to pick
/// a guidance message. Polling retries regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportClass {
    BadGateway,
    Overloaded,
    Unknown,
}

pub fn classify_transport_error(err: &anyhow::Error) -> TransportClass {
    let text = format!("{err:#}");
    if text.contains("502") || text.contains("Bad Gateway") {
        TransportClass::BadGateway
    } else if ["503", "529", "Service Unavailable", "overload", "Overloaded"]
        .iter()
        .any(|tok| text.contains(tok))
    {
        TransportClass::Overloaded
    } else {
        TransportClass::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification_matches_known_signatures() {
        let e = anyhow::anyhow!("HTTP status server error (502 Bad Gateway) for url");
        assert_eq!(classify_transport_error(&e), TransportClass::BadGateway);
        let e = anyhow::anyhow!("HTTP status server error (503 Service Unavailable)");
        assert_eq!(classify_transport_error(&e), TransportClass::Overloaded);
        let e = anyhow::anyhow!("server Overloaded, slow down");
        assert_eq!(classify_transport_error(&e), TransportClass::Overloaded);
        let e = anyhow::anyhow!("connection reset by peer");
        assert_eq!(classify_transport_error(&e), TransportClass::Unknown);
    }

    #[test]
    fn url_join_never_doubles_slashes() {
        let cfg = ClientConfig::default();
        let client = ServerClient::new(&cfg).unwrap();
        assert!(!client.url("/runs").contains("//runs"));
        assert!(client.url("runs").ends_with("/runs"));
    }
}
