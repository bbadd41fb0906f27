//! Child-process execution for the external proving toolchain

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use super::{LedgerError, Result};

/// Captured output of a finished child
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Locate an executable.
///
/// Order: an explicit path, then every `PATH` entry, then `node_modules/.bin`
/// under `project_root`.
pub fn resolve_binary(name: &str, explicit: Option<&Path>, project_root: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(LedgerError::MissingBinary(format!(
            "{} not found at {}",
            name,
            path.display()
        )));
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    let local = project_root.join("node_modules").join(".bin").join(name);
    if local.is_file() {
        return Ok(local);
    }

    Err(LedgerError::MissingBinary(format!(
        "{} not found on PATH or in node_modules/.bin",
        name
    )))
}

/// Run `program` to completion under a wall-clock limit.
///
/// The child is killed if the limit elapses (or the future is dropped).
/// A non-zero exit becomes `StageFailed` carrying the tail of stderr.
pub async fn run_stage<I, S>(
    stage: &str,
    program: &Path,
    args: I,
    timeout: Duration,
) -> Result<ProcessOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(stage, program = %program.display(), "spawning");
    let started = Instant::now();
    let child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            LedgerError::MissingBinary(program.display().to_string())
        }
        _ => LedgerError::StageFailed {
            stage: stage.to_string(),
            message: format!("spawn failed: {}", e),
        },
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(stage, seconds = timeout.as_secs(), "stage timed out");
            return Err(LedgerError::StageTimeout {
                stage: stage.to_string(),
                seconds: timeout.as_secs(),
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let elapsed = started.elapsed();

    if !output.status.success() {
        let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
        return Err(LedgerError::StageFailed {
            stage: stage.to_string(),
            message: format!("{} ({})", tail(detail, 800), output.status),
        });
    }

    debug!(stage, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
    Ok(ProcessOutput {
        stdout,
        stderr,
        elapsed,
    })
}

/// Last `max` bytes of `text`, on a char boundary
fn tail(text: &str, max: usize) -> &str {
    let text = text.trim();
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_missing_binary_is_configuration_error() {
        let err = resolve_binary("circom", Some(Path::new("/nonexistent/circom")), Path::new("."))
            .unwrap_err();
        assert!(matches!(err, LedgerError::MissingBinary(_)));
        assert_eq!(err.category(), crate::infra::ErrorCategory::Configuration);
    }

    #[test]
    fn test_resolves_node_modules_bin() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("node_modules").join(".bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("pdm-test-snarkjs"), "#!/bin/sh\n").unwrap();

        let found = resolve_binary("pdm-test-snarkjs", None, dir.path()).unwrap();
        assert_eq!(found, bin.join("pdm-test-snarkjs"));
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("  ab  ", 10), "ab");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_stage_failure() {
        let err = run_stage("witness", Path::new("/bin/sh"), ["-c", "echo boom >&2; exit 3"], Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            LedgerError::StageFailed { stage, message } => {
                assert_eq!(stage, "witness");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_reported() {
        let err = run_stage("setup", Path::new("/bin/sh"), ["-c", "sleep 5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StageTimeout { ref stage, .. } if stage == "setup"));
    }
}
