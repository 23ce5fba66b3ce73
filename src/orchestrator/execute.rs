//! Instruction handlers: code execution, scene preparation, user input.

use super::Orchestrator;
use crate::backend::Backend;
use crate::model::{
    Event, ExecuteCodePayload, InstructionResult, PrepareScenePayload, ResultStatus, RunOutcome,
    UserInputPayload,
};
use crate::outcome::{infer_success, is_connection_refused};
use crate::rewrite::{resolution_preamble, rewrite_output_path};
use crate::server::RunApi;
use anyhow::Context;
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Image prefixes the server is allowed to request; anything else falls
/// back to the plain render prefix.
const RENDER_PREFIXES: &[&str] = &["render", "render_verify"];

impl<A: RunApi, B: Backend> Orchestrator<A, B> {
    /// Execute a server-issued script and post exactly one result.
    ///
    /// `Some(Aborted)` only when the result text shows the live Blender is
    /// unreachable: that is fatal to the session, not just the instruction.
    pub(super) async fn handle_execute(&mut self, event: &Event) -> Option<RunOutcome> {
        let payload = match event.decode::<ExecuteCodePayload>() {
            Ok(p) => p,
            Err(e) => {
                warn!(seq = event.sequence_id, error = %e, "malformed execute payload");
                return None;
            }
        };
        let instruction_id = payload.instruction_id.clone();
        let expects_render = payload.expects_render;
        let image_prefix = payload
            .image_prefix
            .as_deref()
            .filter(|p| RENDER_PREFIXES.contains(p))
            .unwrap_or("render")
            .to_string();
        // Same 1..=10 bound the config applies to num_images; a bogus count
        // must not turn the upload scan into a multi-billion-path walk.
        let count = payload.count.unwrap_or(5).clamp(1, 10);

        print_code_snippet(&payload.code);

        let images_dir = self.images_dir();
        if let Err(e) = tokio::fs::create_dir_all(&images_dir).await {
            debug!(error = %e, "could not create images directory");
        }

        // A non-default configured scale wins; at the 1.0 default the value
        // the server attached to the instruction applies. Invalid values
        // clamp to full scale inside the preamble.
        let cfg_scale = self.cfg.render.resolution_scale;
        let scale = if cfg_scale != 1.0 {
            cfg_scale
        } else {
            payload.resolution_scale.unwrap_or(cfg_scale)
        };
        let mut code = payload.code.clone();
        if let Some(preamble) = resolution_preamble(Some(scale)) {
            code = format!("{preamble}{code}");
        }
        let code_to_run = rewrite_output_path(&code, &images_dir.to_string_lossy());

        // For render instructions the live instance first snapshots its
        // scene, so heavy rendering happens against a copy instead of
        // blocking or mutating the interactive session.
        let mut snapshot: Option<PathBuf> = None;
        if expects_render && self.backend.headless_enabled() {
            snapshot = self.create_scene_snapshot("scene_snapshot.blend").await;
        }

        let mut result = self.backend.execute_code(&code_to_run, expects_render).await;

        if expects_render && self.backend.headless_enabled() {
            if let Some(blend) = &snapshot {
                println!(
                    "[Client] Running headless renders sequentially for {count} angles against scene snapshot..."
                );
                result = self.backend.execute_headless(&code_to_run, blend).await;
            }
        }

        let (status_ok, inferred_msg) = infer_success(&result);

        if is_connection_refused(&result) {
            println!("[Client] Blender connection refused. Aborting the session...");
            println!("[Client] Please ensure the Blender addon is open");
            if let Err(e) = self.api.abort(&self.session_id).await {
                println!("[Client] Abort notify failed: {e:#}");
            }
            return Some(RunOutcome::Aborted);
        }

        if expects_render && status_ok {
            self.print_render_settings();
            self.upload_render_images(&image_prefix, count, &instruction_id)
                .await;
        }

        let message = inferred_msg.clone().or_else(|| result.message.clone());
        let response = InstructionResult {
            instruction_id,
            status: if status_ok {
                ResultStatus::Ok
            } else {
                ResultStatus::Error
            },
            result: result.result,
            message: message.clone(),
        };
        self.post_result_logged(response).await;

        if status_ok {
            println!(
                "[Client] [OK] Blender code executed successfully! Waiting for next action from server..."
            );
        } else {
            println!(
                "[Client] [RETRY] Blender code execution failed. Waiting for server to provide corrected version..."
            );
            if let Some(msg) = message {
                println!("   Error details: {msg}");
            }
        }
        None
    }

    /// Snapshot the live scene into the session temp directory. Failures
    /// downgrade the render path instead of aborting anything.
    async fn create_scene_snapshot(&self, filename: &str) -> Option<PathBuf> {
        let dir = self.snapshot_dir();
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            debug!(error = %e, "could not create snapshot directory");
            return None;
        }
        let path = dir.join(filename);
        println!("[Client] Creating scene snapshot for headless rendering...");
        let res = self
            .backend
            .save_scene_copy(&path.to_string_lossy(), true)
            .await;
        let saved = !res.is_declared_error() && res.result.get("saved") != Some(&json!(false));
        if saved {
            Some(path)
        } else {
            let msg = res.message.unwrap_or_else(|| "Unknown save error".into());
            println!("[Client] Scene snapshot failed: {msg}. Proceeding without snapshot.");
            None
        }
    }

    /// Collect `{prefix}_{1..=count}.png` from the session images directory
    /// and upload whichever exist. Missing files are skipped; the server
    /// tracks expected-versus-received counts itself.
    async fn upload_render_images(&self, prefix: &str, count: u32, instruction_id: &str) {
        let images_dir = self.images_dir();
        let mut files = Vec::new();
        for i in 1..=count {
            let path = images_dir.join(format!("{prefix}_{i}.png"));
            if path.exists() {
                files.push(path);
            }
        }

        if files.is_empty() {
            println!(
                "[Client] No render images found to upload in {} (prefix={prefix}).",
                images_dir.display()
            );
            return;
        }

        println!(
            "[Client] Uploading {} rendered images (prefix={prefix}) to server...",
            files.len()
        );
        match self
            .api
            .upload_images(&self.session_id, instruction_id, prefix, &files)
            .await
        {
            Ok(()) => println!("[Client] Upload complete: {} images uploaded.", files.len()),
            Err(e) => println!("[Client] Upload error: {e:#}"),
        }
    }

    fn print_render_settings(&self) {
        let scale = self.cfg.render.resolution_scale;
        let (base_w, base_h) = (1920u32, 1080u32);
        println!(
            "[Client] Render resolution: {} x {} (base {base_w}x{base_h} @ {}%)",
            (base_w as f64 * scale) as u32,
            (base_h as f64 * scale) as u32,
            (scale * 100.0).round() as u32
        );
        if self.cfg.render.gpu_rendering {
            println!("[Client] Rendering method: GPU acceleration enabled (config setting)");
        } else {
            println!("[Client] Rendering method: CPU rendering (config setting)");
        }
    }

    /// Snapshot the scene and ship the .blend to the server for server-side
    /// rendering. Any failing step posts an error result and stops; on a
    /// successful upload the server's upload endpoint submits the result.
    pub(super) async fn handle_prepare_scene(&mut self, event: &Event) {
        let payload = match event.decode::<PrepareScenePayload>() {
            Ok(p) => p,
            Err(e) => {
                warn!(seq = event.sequence_id, error = %e, "malformed prepare-scene payload");
                return;
            }
        };
        let instruction_id = payload.instruction_id.clone();
        println!(
            "[Client] Preparing scene for server-side rendering: {} ({} angles)",
            payload.filename, payload.num_angles
        );

        if !self.backend.headless_enabled() {
            println!("[Client] Headless rendering disabled, cannot create scene snapshot");
            self.post_result_logged(InstructionResult::error(
                &instruction_id,
                "Headless rendering disabled, cannot create scene snapshot",
            ))
            .await;
            return;
        }

        let Some(snapshot) = self
            .create_scene_snapshot(&format!("scene_{instruction_id}.blend"))
            .await
        else {
            self.post_result_logged(InstructionResult::error(
                &instruction_id,
                "Failed to create scene snapshot",
            ))
            .await;
            return;
        };

        println!(
            "[Client] Uploading .blend file to server: {}",
            snapshot.display()
        );
        match self
            .api
            .upload_blend(&self.session_id, &instruction_id, &snapshot)
            .await
            .context("uploading scene snapshot")
        {
            Ok(()) => println!("[Client] .blend file uploaded successfully"),
            Err(e) => {
                println!("[Client] Failed to upload .blend file: {e:#}");
                self.post_result_logged(InstructionResult::error(
                    &instruction_id,
                    format!("Failed to upload .blend file: {e:#}"),
                ))
                .await;
            }
        }
    }

    /// Block for one line of interactive input with the phase timer paused,
    /// then post the captured text. Stream end or a read error posts an
    /// empty string.
    pub(super) async fn handle_user_input(&mut self, event: &Event) {
        let payload = match event.decode::<UserInputPayload>() {
            Ok(p) => p,
            Err(e) => {
                warn!(seq = event.sequence_id, error = %e, "malformed user-input payload");
                return;
            }
        };
        self.timer.pause();

        let prompt = payload.prompt.unwrap_or_else(|| "Enter input: ".into());
        let user_text = read_user_line(&prompt).await;

        let result = InstructionResult::ok(
            &payload.instruction_id,
            json!({ "user_input": user_text }),
        );
        self.post_result_logged(result).await;
        self.timer.resume();
    }
}

/// Read one line from stdin without blocking the async runtime.
async fn read_user_line(prompt: &str) -> String {
    println!("{prompt}");
    println!("(Type TERMINATE to exit)");
    println!("[WARNING: Session will timeout after 3 minutes of inactivity]");
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(_) => line.trim_end_matches(['\r', '\n']).to_string(),
            Err(_) => String::new(),
        }
    })
    .await
    .unwrap_or_default()
}

/// User-facing notice with the first few lines of the incoming script.
fn print_code_snippet(code: &str) {
    let lines: Vec<&str> = code.trim().lines().collect();
    let shown = lines.iter().take(5).copied().collect::<Vec<_>>().join("\n");
    println!("\n===== Executing Blender code from server =====");
    if lines.len() > 10 {
        println!("{shown}\n...");
    } else {
        println!("{shown}");
    }
    println!("===== End snippet =====\n");
}
