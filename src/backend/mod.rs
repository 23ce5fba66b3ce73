//! Execution backends for server-issued Blender scripts.
//!
//! Two ways to run a script: the live addon over a local socket, or an
//! isolated headless subprocess. `BlenderBackend` wires them together with
//! the selection heuristic and the single-edge fallback.

pub mod headless;
pub mod select;
pub mod socket;

use crate::config::BlenderConfig;
use crate::model::ExecutionResult;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Seam between the orchestrator and the execution machinery. All methods
/// return an `ExecutionResult` rather than an error: backend failures are
/// data the orchestrator classifies, not faults that unwind it.
pub trait Backend {
    /// Run a script, routing through headless or socket execution per the
    /// selection heuristic and falling back at most once.
    async fn execute_code(&self, code: &str, expects_render: bool) -> ExecutionResult;

    /// Snapshot the live scene to a portable .blend through the addon.
    async fn save_scene_copy(&self, filepath: &str, pack: bool) -> ExecutionResult;

    /// Run a script headlessly against a scene snapshot.
    async fn execute_headless(&self, code: &str, blend_path: &Path) -> ExecutionResult;

    /// Cheap connectivity probe against the live addon.
    async fn probe(&self) -> ExecutionResult;

    fn headless_enabled(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct BlenderBackend {
    socket: socket::SocketBackend,
    cfg: BlenderConfig,
}

impl BlenderBackend {
    pub fn new(cfg: BlenderConfig) -> Self {
        let socket = socket::SocketBackend::new(cfg.host.clone(), cfg.port);
        Self { socket, cfg }
    }

    fn timeout(&self) -> Duration {
        self.cfg.headless_timeout
    }

    fn exe_override(&self) -> Option<&Path> {
        self.cfg.executable.as_deref()
    }
}

impl Backend for BlenderBackend {
    async fn execute_code(&self, code: &str, expects_render: bool) -> ExecutionResult {
        if !select::should_use_headless(code, expects_render, self.cfg.headless_rendering) {
            return self.socket.execute_code(code).await;
        }

        info!("using headless execution for rendering code");
        let result =
            headless::execute_headless(code, self.timeout(), None, self.exe_override()).await;

        // Single fallback edge: headless failed once, retry over the socket.
        if result.is_declared_error() && self.cfg.fallback_to_socket {
            info!("headless execution failed, falling back to socket execution");
            return self.socket.execute_code(code).await;
        }
        result
    }

    async fn save_scene_copy(&self, filepath: &str, pack: bool) -> ExecutionResult {
        self.socket.save_scene_copy(filepath, pack).await
    }

    async fn execute_headless(&self, code: &str, blend_path: &Path) -> ExecutionResult {
        headless::execute_headless(code, self.timeout(), Some(blend_path), self.exe_override())
            .await
    }

    async fn probe(&self) -> ExecutionResult {
        self.socket.get_scene_info().await
    }

    fn headless_enabled(&self) -> bool {
        self.cfg.headless_rendering
    }
}
