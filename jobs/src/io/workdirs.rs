//! Working directories the publish job may target.
//!
//! The list file holds one path per line; blank lines and `#` comments are
//! skipped, relative paths resolve against the project directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

pub fn read_workdirs(list_file: &Path, project_dir: &Path) -> Result<Vec<PathBuf>> {
    let raw = match fs::read(list_file) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("read {}", list_file.display()));
        }
    };
    let text = String::from_utf8_lossy(&raw);
    let mut out: Vec<PathBuf> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let path = Path::new(line);
        let path = if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&project_dir.join(path))
        };
        if !out.contains(&path) {
            out.push(path);
        }
    }
    Ok(out)
}

/// True when `candidate` (resolved like a list entry) is in `listed`.
pub fn is_listed(listed: &[PathBuf], candidate: &Path, project_dir: &Path) -> bool {
    let candidate = if candidate.is_absolute() {
        normalize(candidate)
    } else {
        normalize(&project_dir.join(candidate))
    };
    listed.contains(&candidate)
}

/// Lexical normalization: drops `.` and folds `..` without touching the disk.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
