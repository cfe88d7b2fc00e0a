use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use crate::config::FileWait;
use crate::errors::{PipelineError, Result};

/// Reads a text file, dropping blank lines and `#` comments.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).map_err(|e| PipelineError::file(path, e))?;
    Ok(contents
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Runs a command to completion. When `check_stderr` is set, anything the
/// command writes to stderr counts as failure.
pub fn run_subprocess(cmd: &mut Command, check_stderr: bool) -> Result<Output> {
    let description = format!("{:?}", cmd);
    debug!("About to spawn: {}", description);
    let output = cmd.output().map_err(|e| PipelineError::Subprocess {
        command: description.clone(),
        stderr: e.to_string(),
    })?;

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() || (check_stderr && !stderr.is_empty()) {
        error!("Command failed ({}). Stderr:\n{}", output.status, stderr);
        return Err(PipelineError::Subprocess {
            command: description,
            stderr: if stderr.is_empty() { format!("exit status {}", output.status) } else { stderr },
        });
    }
    Ok(output)
}

/// Polls for `path` until it exists or the retry budget is spent.
pub fn wait_for_file(path: &Path, wait: &FileWait) -> Result<()> {
    for attempt in 0..=wait.retries {
        if path.exists() {
            return Ok(());
        }
        if attempt < wait.retries {
            debug!("Waiting for {} (attempt {})", path.display(), attempt + 1);
            thread::sleep(Duration::from_millis(wait.interval_ms));
        }
    }
    Err(PipelineError::FileTimeout { path: path.to_path_buf(), attempts: wait.retries + 1 })
}

/// `root/<first two characters of id>`
pub fn two_letter_dir(root: &Path, id: &str) -> PathBuf {
    root.join(id.chars().take(2).collect::<String>())
}

/// `root/<first three characters of id>`
pub fn three_letter_dir(root: &Path, id: &str) -> PathBuf {
    root.join(id.chars().take(3).collect::<String>())
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Comma-separated rendering used for per-residue numeric features.
pub fn format_float_list(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| round_to(*v, 3).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn write_single_fasta(path: &Path, id: &str, sequence: &str) -> Result<()> {
    fs::write(path, format!(">{id}\n{sequence}\n")).map_err(|e| PipelineError::file(path, e))
}
