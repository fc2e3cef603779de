//! Strategy scripts and parameter files in the strategies directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Name prefix reserved for parameter-file backups.
pub const BACKUP_PREFIX: &str = "BAK_";

const TRANSIENT_SUFFIXES: [&str; 3] = [".json.bak", ".json.tmp", ".json.tmpbak"];

/// Strategy identifiers (`*.py` stems), sorted. Missing directory → empty.
pub fn list_strategies(dir: &Path) -> Result<Vec<String>> {
    let mut out: Vec<String> = file_names(dir)?
        .into_iter()
        .filter_map(|name| name.strip_suffix(".py").map(str::to_string))
        .filter(|stem| !stem.is_empty())
        .collect();
    out.sort();
    Ok(out)
}

/// Parameter files eligible for selection, sorted.
pub fn list_parameter_files(dir: &Path) -> Result<Vec<String>> {
    let mut out: Vec<String> = file_names(dir)?
        .into_iter()
        .filter(|name| is_parameter_file(name))
        .collect();
    out.sort();
    Ok(out)
}

/// Parameter files that may be promoted to a strategy default: eligible
/// files minus backups.
pub fn list_apply_candidates(dir: &Path) -> Result<Vec<String>> {
    Ok(list_parameter_files(dir)?
        .into_iter()
        .filter(|name| !name.starts_with(BACKUP_PREFIX))
        .collect())
}

pub fn is_parameter_file(name: &str) -> bool {
    name.ends_with(".json") && !TRANSIENT_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn file_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), "{}").expect("write");
        }
    }

    #[test]
    fn lists_strategy_stems() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), &["b.py", "a.py", "a.json", "notes.txt"]);
        assert_eq!(list_strategies(temp.path()).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn parameter_files_skip_transient_suffixes() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(
            temp.path(),
            &[
                "S.json",
                "B.json",
                "BAK_S_202401011200.json",
                "S.json.bak",
                "S.json.tmp",
                "S.json.tmpbak",
            ],
        );
        assert_eq!(
            list_parameter_files(temp.path()).unwrap(),
            vec!["B.json", "BAK_S_202401011200.json", "S.json"]
        );
        assert_eq!(
            list_apply_candidates(temp.path()).unwrap(),
            vec!["B.json", "S.json"]
        );
    }

    #[test]
    fn missing_dir_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("nope");
        assert!(list_strategies(&missing).unwrap().is_empty());
        assert!(list_parameter_files(&missing).unwrap().is_empty());
    }
}
