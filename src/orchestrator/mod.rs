//! Run orchestration: the event-polling loop and per-instruction handlers.
//!
//! One orchestrator instance drives one session. Instructions are strictly
//! serialized; both backends mutate shared state (the live scene, the
//! session output directory) that cannot take two callers at once.

mod execute;
mod poll;

use crate::backend::Backend;
use crate::config::ClientConfig;
use crate::server::RunApi;
use crate::timer::PhaseTimer;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub struct Orchestrator<A: RunApi, B: Backend> {
    api: A,
    backend: B,
    cfg: ClientConfig,
    session_id: String,
    /// Per-session scratch root: `<root>/log/run_<session_id>`.
    session_dir: PathBuf,
    timer: PhaseTimer,
    last_seq: u64,
}

impl<A: RunApi, B: Backend> Orchestrator<A, B> {
    pub fn new(
        api: A,
        backend: B,
        cfg: ClientConfig,
        session_id: impl Into<String>,
        root_dir: &Path,
    ) -> Result<Self> {
        let session_id = session_id.into();
        let session_dir = root_dir.join("log").join(format!("run_{session_id}"));
        std::fs::create_dir_all(&session_dir)
            .with_context(|| format!("creating session directory {}", session_dir.display()))?;
        Ok(Self {
            api,
            backend,
            cfg,
            session_id,
            session_dir,
            timer: PhaseTimer::new(),
            last_seq: 0,
        })
    }

    /// Directory where rewritten scripts drop their rendered images.
    fn images_dir(&self) -> PathBuf {
        self.session_dir.join("result").join("images")
    }

    /// Directory for scene snapshots.
    fn snapshot_dir(&self) -> PathBuf {
        self.session_dir.join("temp")
    }

    /// Highest sequence id observed so far.
    pub fn cursor(&self) -> u64 {
        self.last_seq
    }
}
