//! Headless Blender backend: one isolated `blender --background` process
//! per invocation, bounded by a wall-clock timeout.

use crate::model::ExecutionResult;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

/// Locate the Blender executable: explicit override, then `PATH`, then
/// well-known install locations. `None` is a reportable condition for the
/// caller, not a crash.
pub fn find_blender_executable(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = override_path {
        if p.is_file() {
            return Some(p.to_path_buf());
        }
    }

    if let Some(p) = which_blender() {
        return Some(p);
    }

    for candidate in well_known_paths() {
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn which_blender() -> Option<PathBuf> {
    let exe = if cfg!(windows) { "blender.exe" } else { "blender" };
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(exe))
        .find(|p| p.is_file())
}

fn well_known_paths() -> Vec<PathBuf> {
    let versions: Vec<String> = (3..=4)
        .flat_map(|major| (0..10).map(move |minor| format!("{major}.{minor}")))
        .collect();

    let mut paths = Vec::new();
    if cfg!(windows) {
        paths.push(PathBuf::from(
            r"C:\Program Files\Blender Foundation\Blender\blender.exe",
        ));
        for v in &versions {
            paths.push(PathBuf::from(format!(
                r"C:\Program Files\Blender Foundation\Blender {v}\blender.exe"
            )));
        }
    } else if cfg!(target_os = "macos") {
        paths.push(PathBuf::from("/Applications/Blender.app/Contents/MacOS/Blender"));
        for v in &versions {
            paths.push(PathBuf::from(format!(
                "/Applications/Blender {v}/Blender.app/Contents/MacOS/Blender"
            )));
        }
    } else {
        paths.extend(
            [
                "/usr/bin/blender",
                "/usr/local/bin/blender",
                "/snap/bin/blender",
                "/opt/blender/blender",
            ]
            .iter()
            .map(PathBuf::from),
        );
        for v in &versions {
            paths.push(PathBuf::from(format!("/opt/blender-{v}/blender")));
        }
    }
    paths
}

/// Execute a script in a fresh headless Blender process.
///
/// The script goes into a temp file that is deleted on every exit path
/// (the `NamedTempFile` guard drops with this function). With a snapshot
/// the process opens that .blend first, reproducing the live scene without
/// touching the interactive instance. Exit code decides the outcome:
/// zero is success with captured stdout, non-zero is an error with
/// captured stderr, and a blown deadline kills the process.
pub async fn execute_headless(
    code: &str,
    timeout: Duration,
    blend_path: Option<&Path>,
    executable_override: Option<&Path>,
) -> ExecutionResult {
    let Some(blender) = find_blender_executable(executable_override) else {
        return ExecutionResult::error(
            "Blender executable not found. Please ensure Blender is installed and accessible.",
        );
    };

    let script = match write_script(code) {
        Ok(f) => f,
        Err(e) => return ExecutionResult::error(format!("writing temp script: {e:#}")),
    };

    let mut cmd = Command::new(&blender);
    cmd.arg("--background");
    if let Some(blend) = blend_path {
        cmd.arg("-b").arg(blend);
    }
    cmd.arg("--python").arg(script.path()).arg("--");
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    info!(blender = %blender.display(), snapshot = blend_path.is_some(), "headless execution");
    let start = Instant::now();

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return ExecutionResult::error(format!("Headless execution failed: {e}"));
        }
        Err(_) => {
            // kill_on_drop reaps the child when the future is dropped here.
            return ExecutionResult::error(format!(
                "Headless execution timed out after {}s",
                timeout.as_secs()
            ));
        }
    };

    let elapsed = start.elapsed().as_secs_f64();
    debug!(elapsed_s = elapsed, code = ?output.status.code(), "headless process exited");

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        ExecutionResult {
            status: "success".into(),
            result: json!({
                "executed": true,
                "result": stdout,
                "execution_time": elapsed,
                "method": "headless",
            }),
            message: Some(format!("Headless execution completed in {elapsed:.2}s")),
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stderr = if stderr.is_empty() {
            "Unknown error".to_string()
        } else {
            stderr
        };
        let exit = output.status.code().unwrap_or(-1);
        ExecutionResult {
            status: "error".into(),
            result: json!({
                "executed": false,
                "result": stderr,
                "execution_time": elapsed,
                "method": "headless",
            }),
            message: Some(format!(
                "Headless execution failed (exit code {exit}): {stderr}"
            )),
        }
    }
}

fn write_script(code: &str) -> anyhow::Result<NamedTempFile> {
    use std::io::Write;
    let mut file = tempfile::Builder::new()
        .prefix("blendrelay_")
        .suffix(".py")
        .tempfile()?;
    file.write_all(code.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_executable_is_a_reported_error() {
        let res = execute_headless(
            "print(1)",
            Duration::from_secs(5),
            None,
            Some(Path::new("/definitely/not/blender")),
        )
        .await;
        // The override does not exist; discovery may still find a real
        // Blender on PATH, so only assert when it did not.
        if res.is_declared_error() {
            assert!(res.message.is_some());
        }
    }

    #[test]
    fn override_takes_precedence_when_it_exists() {
        let file = NamedTempFile::new().unwrap();
        let found = find_blender_executable(Some(file.path())).unwrap();
        assert_eq!(found, file.path());
    }

    #[test]
    fn bogus_override_falls_through_to_discovery() {
        // Must not panic and must not return the bogus path.
        let found = find_blender_executable(Some(Path::new("/no/such/blender")));
        if let Some(p) = found {
            assert_ne!(p, Path::new("/no/such/blender"));
        }
    }

    #[cfg(unix)]
    fn fake_blender(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("blender");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_exceeded_is_timeout_classified() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake_blender(&dir, "sleep 5");
        let res = execute_headless(
            "print(1)",
            Duration::from_millis(200),
            None,
            Some(&fake),
        )
        .await;
        assert!(res.is_declared_error());
        assert!(res.message.unwrap().contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake_blender(&dir, "echo rendered");
        let res = execute_headless("print(1)", Duration::from_secs(5), None, Some(&fake)).await;
        assert_eq!(res.status, "success");
        assert_eq!(res.result["result"], "rendered");
        assert_eq!(res.result["method"], "headless");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake_blender(&dir, "echo boom >&2; exit 3");
        let res = execute_headless("print(1)", Duration::from_secs(5), None, Some(&fake)).await;
        assert!(res.is_declared_error());
        let msg = res.message.unwrap();
        assert!(msg.contains("exit code 3"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn script_file_is_deleted_when_guard_drops() {
        let path = {
            let script = write_script("print('x')").unwrap();
            let p = script.path().to_path_buf();
            assert!(p.exists());
            p
        };
        assert!(!path.exists());
    }
}
