//! Phase timing with a background progress ticker.
//!
//! State machine: Idle -> Running(phase) -> [Paused <-> Running] -> Stopped.
//! Pause intervals are excised from the displayed elapsed time by shifting
//! the recorded start instant forward on resume. One mutex guards the state;
//! the ticker task only reads it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

const TICK_POLL: Duration = Duration::from_millis(200);
const PRINT_EVERY: Duration = Duration::from_secs(5);
const JOIN_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct TimerState {
    phase: Option<String>,
    started_at: Option<Instant>,
    paused: bool,
    paused_at: Option<Instant>,
}

impl TimerState {
    /// Active (non-paused) duration since the phase started.
    fn elapsed(&self) -> Duration {
        match (self.started_at, self.paused, self.paused_at) {
            (Some(start), true, Some(pause)) => pause.saturating_duration_since(start),
            (Some(start), _, _) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }
}

struct Ticker {
    handle: tokio::task::JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

pub struct PhaseTimer {
    state: Arc<Mutex<TimerState>>,
    ticker: tokio::sync::Mutex<Option<Ticker>>,
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState::default())),
            ticker: tokio::sync::Mutex::new(None),
        }
    }

    /// Begin timing `phase`. Idempotent when the same phase is already
    /// running; otherwise any running timer is stopped first and timing
    /// restarts from now.
    pub async fn start(&self, phase: &str) {
        {
            let state = self.state.lock().expect("timer lock poisoned");
            if state.phase.as_deref() == Some(phase) && state.started_at.is_some() {
                return;
            }
        }
        self.stop_ticker().await;

        {
            let mut state = self.state.lock().expect("timer lock poisoned");
            state.phase = Some(phase.to_string());
            state.started_at = Some(Instant::now());
            state.paused = false;
            state.paused_at = None;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(tick_loop(self.state.clone(), stop.clone()));
        *self.ticker.lock().await = Some(Ticker { handle, stop });
    }

    /// Suspend progress display and elapsed accumulation (user-input waits).
    pub fn pause(&self) {
        let mut state = self.state.lock().expect("timer lock poisoned");
        if !state.paused {
            state.paused = true;
            state.paused_at = Some(Instant::now());
        }
    }

    /// Resume after `pause()`; the paused interval is excised by moving the
    /// start instant forward.
    pub fn resume(&self) {
        let mut state = self.state.lock().expect("timer lock poisoned");
        if state.paused {
            if let (Some(start), Some(paused_at)) = (state.started_at, state.paused_at) {
                state.started_at = Some(start + paused_at.elapsed());
            }
            state.paused = false;
            state.paused_at = None;
        }
    }

    /// Active elapsed time of the current phase.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().expect("timer lock poisoned").elapsed()
    }

    /// Print the final mm:ss total and stop. Safe to call when no phase was
    /// ever started.
    pub async fn summarize_and_stop(&self) {
        let (phase, elapsed) = {
            let mut state = self.state.lock().expect("timer lock poisoned");
            let summary = (state.phase.take(), state.elapsed());
            state.started_at = None;
            state.paused = false;
            state.paused_at = None;
            summary
        };
        if let Some(phase) = phase {
            let secs = elapsed.as_secs();
            println!("[Phase {phase}] finished in {:02}:{:02}", secs / 60, secs % 60);
        }
        self.stop_ticker().await;
    }

    /// Stop the ticker task with a bounded join so shutdown cannot hang.
    async fn stop_ticker(&self) {
        let ticker = self.ticker.lock().await.take();
        if let Some(Ticker { handle, stop }) = ticker {
            stop.store(true, Ordering::Relaxed);
            if tokio::time::timeout(JOIN_WAIT, handle).await.is_err() {
                debug!("timer ticker did not stop within the join window");
            }
        }
    }
}

async fn tick_loop(state: Arc<Mutex<TimerState>>, stop: Arc<AtomicBool>) {
    let mut last_print = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        tokio::time::sleep(TICK_POLL).await;
        if last_print.elapsed() < PRINT_EVERY {
            continue;
        }
        let line = {
            let state = state.lock().expect("timer lock poisoned");
            if state.paused || state.started_at.is_none() {
                None
            } else {
                let phase = state.phase.as_deref().unwrap_or("unknown");
                let secs = state.elapsed().as_secs();
                Some(format!(
                    "[{}: {}:{:02}:{:02}]",
                    phase_label(phase),
                    secs / 3600,
                    (secs % 3600) / 60,
                    secs % 60
                ))
            }
        };
        if let Some(line) = line {
            last_print = Instant::now();
            println!("{line}");
        }
    }
}

/// Human-readable label for a phase key, e.g. `initial_creation` ->
/// `Initial Creation Phase`.
fn phase_label(phase: &str) -> String {
    let words: Vec<String> = phase
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        "Unknown Phase".to_string()
    } else {
        format!("{} Phase", words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_interval_is_excised_from_elapsed() {
        let timer = PhaseTimer::new();
        timer.start("a").await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        timer.pause();
        tokio::time::sleep(Duration::from_millis(300)).await;
        timer.resume();
        let elapsed = timer.elapsed();
        assert!(
            elapsed >= Duration::from_millis(120) && elapsed < Duration::from_millis(300),
            "elapsed {elapsed:?} should exclude the 300ms pause"
        );
        timer.summarize_and_stop().await;
    }

    #[tokio::test]
    async fn start_is_idempotent_for_same_phase() {
        let timer = PhaseTimer::new();
        timer.start("a").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        timer.start("a").await;
        assert!(timer.elapsed() >= Duration::from_millis(80));
        timer.summarize_and_stop().await;
    }

    #[tokio::test]
    async fn starting_a_new_phase_resets_the_clock() {
        let timer = PhaseTimer::new();
        timer.start("a").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        timer.start("b").await;
        assert!(timer.elapsed() < Duration::from_millis(80));
        timer.summarize_and_stop().await;
    }

    #[tokio::test]
    async fn summarize_without_start_is_a_noop() {
        let timer = PhaseTimer::new();
        timer.summarize_and_stop().await;
    }

    #[tokio::test]
    async fn pause_while_paused_and_resume_while_running_are_noops() {
        let timer = PhaseTimer::new();
        timer.start("a").await;
        timer.resume();
        timer.pause();
        timer.pause();
        timer.resume();
        timer.summarize_and_stop().await;
    }

    #[test]
    fn phase_labels_are_title_cased() {
        assert_eq!(phase_label("initial_creation"), "Initial Creation Phase");
        assert_eq!(phase_label("auto_refinement"), "Auto Refinement Phase");
        assert_eq!(phase_label("unknown"), "Unknown Phase");
    }
}
