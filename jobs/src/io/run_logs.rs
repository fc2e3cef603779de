//! Read-only access to past run logs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

/// Sorted `*.log` file names in `dir`. Missing directory → empty.
pub fn list_run_logs(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && name.ends_with(".log")
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Path of the log called `name`, rejecting anything that could escape `dir`.
pub fn run_log_path(dir: &Path, name: &str) -> Result<PathBuf> {
    if !is_safe_name(name) {
        return Err(anyhow!("invalid log name '{name}'"));
    }
    Ok(dir.join(name))
}

/// Contents of one run log, decoded lossily.
pub fn read_run_log(dir: &Path, name: &str) -> Result<String> {
    let path = run_log_path(dir, name)?;
    let raw = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && !name.chars().any(char::is_control)
}
