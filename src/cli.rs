use crate::backend::{Backend, BlenderBackend};
use crate::config::ClientConfig;
use crate::model::RunOutcome;
use crate::orchestrator::Orchestrator;
use crate::server::{RunInput, ServerClient};
use crate::signals;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "blendrelay",
    version,
    about = "Client that relays generative-design instructions from the cloud service to a local Blender"
)]
pub struct Cli {
    /// Text prompt for the session
    #[arg(long, conflicts_with = "image", default_value = "Generate a chair")]
    pub text: String,

    /// Path to an input image file for the session
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Previous session ID to refine (requires --prompt)
    #[arg(long, requires = "prompt")]
    pub session_id: Option<String>,

    /// Refinement prompt for the session (requires --session-id)
    #[arg(long, requires = "session_id")]
    pub prompt: Option<String>,

    /// List all sessions owned by the current user and exit
    #[arg(long)]
    pub list_sessions: bool,

    /// Diagnostic log level (overrides BLENDRELAY_LOG)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = ClientConfig::load()?;
    let server = ServerClient::new(&cfg)?;

    println!("[Client] Connecting to server: {}", cfg.server.url);

    if args.list_sessions {
        let sessions = server.list_sessions().await?;
        println!("[Client] Found {} sessions:", sessions.len());
        for sid in sessions {
            println!("  {sid}");
        }
        return Ok(());
    }

    let backend = BlenderBackend::new(cfg.blender.clone());
    check_addon_connection(&backend).await?;

    let input = match (&args.session_id, &args.prompt, &args.image) {
        (Some(session_id), Some(prompt), _) => {
            println!("[Client] Using session refinement: {session_id}");
            println!("[Client] Refinement prompt: {prompt}");
            RunInput::Refinement {
                session_id: session_id.as_str(),
                prompt: prompt.as_str(),
            }
        }
        (_, _, Some(image)) => {
            println!("[Client] Using image input: '{}'", image.display());
            anyhow::ensure!(image.exists(), "image file not found: {}", image.display());
            RunInput::Image {
                path: image.as_path(),
                text: None,
            }
        }
        _ => {
            println!("[Client] Using text prompt: '{}'", args.text);
            RunInput::Text(args.text.as_str())
        }
    };

    let session_id = server
        .start_run(&cfg, input)
        .await
        .context("failed to start session")?;
    println!("[Client] Session started: {session_id}");

    signals::spawn_interrupt_handler(server.clone());

    let root = std::env::current_dir().context("resolving working directory")?;
    let mut orchestrator =
        Orchestrator::new(server.clone(), backend, cfg, session_id, &root)?;
    let outcome = orchestrator.run().await;

    // The slot is already empty after a clean terminal transition; this
    // only fires when the loop errored out mid-run.
    signals::abort_active_session(&server).await;

    match outcome? {
        RunOutcome::Completed | RunOutcome::Terminated => Ok(()),
        RunOutcome::Failed => anyhow::bail!("run failed"),
        RunOutcome::Aborted => anyhow::bail!("session aborted: Blender became unreachable"),
    }
}

/// Startup probe against the live addon, with actionable guidance when the
/// connection is down.
async fn check_addon_connection<B: Backend>(backend: &B) -> Result<()> {
    println!("[Client] Checking Blender addon connection...");
    let res = backend.probe().await;
    if res.is_declared_error() {
        println!("[Client] [ERROR] Blender addon is not running or not accessible.");
        println!("[Client] Please:");
        println!("   1. Open Blender");
        println!("   2. Install and enable the companion addon");
        println!("   3. Make sure the addon is running");
        println!("   4. Try again");
        anyhow::bail!(
            "Blender addon unreachable: {}",
            res.message.unwrap_or_else(|| "unknown error".into())
        );
    }
    println!("[Client] [OK] Blender addon is running");
    Ok(())
}
