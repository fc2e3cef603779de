//! Apply-parameters job: promote a parameter file to a strategy's default.
//!
//! No external process is involved. The existing default (if any) is moved
//! aside to a timestamped backup first; a failure after the backup leaves
//! it in place as the recovery artifact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::errors::FilesystemError;
use crate::io::strategy_files::{BACKUP_PREFIX, list_apply_candidates};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The selection already is the strategy's default file.
    Unchanged { target: PathBuf },
    Applied {
        source: PathBuf,
        target: PathBuf,
        backup: Option<PathBuf>,
    },
}

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("no parameter file selected")]
    NothingSelected,

    #[error("parameter file '{name}' not found among the files in {}", dir.display())]
    SourceMissing { name: String, dir: PathBuf },

    /// A filesystem step failed; `backup` is set when the old default was
    /// already moved aside.
    #[error("{source}")]
    Filesystem {
        #[source]
        source: FilesystemError,
        backup: Option<PathBuf>,
    },
}

/// Move `source` (a file name inside `dir`) onto `<strategy>.json`.
#[instrument(skip_all, fields(strategy = %strategy, source = ?source))]
pub fn apply_parameters(
    dir: &Path,
    strategy: &str,
    source: Option<&str>,
    now: NaiveDateTime,
) -> Result<ApplyOutcome, ApplyError> {
    let Some(source) = source.map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(ApplyError::NothingSelected);
    };
    let target_name = format!("{strategy}.json");
    let target = dir.join(&target_name);
    if source == target_name {
        debug!("selection is already the default file");
        return Ok(ApplyOutcome::Unchanged { target });
    }

    let candidates = list_apply_candidates(dir).map_err(|e| ApplyError::Filesystem {
        source: FilesystemError {
            step: "list parameter files",
            path: dir.to_path_buf(),
            source: std::io::Error::other(format!("{e:#}")),
        },
        backup: None,
    })?;
    if !candidates.iter().any(|name| name == source) {
        return Err(ApplyError::SourceMissing {
            name: source.to_string(),
            dir: dir.to_path_buf(),
        });
    }
    let source_path = dir.join(source);

    let backup = if target.is_file() {
        let backup = free_backup_path(dir, strategy, now).map_err(|source| {
            ApplyError::Filesystem {
                source,
                backup: None,
            }
        })?;
        fs::rename(&target, &backup).map_err(|e| ApplyError::Filesystem {
            source: FilesystemError {
                step: "backup",
                path: target.clone(),
                source: e,
            },
            backup: None,
        })?;
        info!(backup = %backup.display(), "previous default moved aside");
        Some(backup)
    } else {
        None
    };

    fs::rename(&source_path, &target).map_err(|e| ApplyError::Filesystem {
        source: FilesystemError {
            step: "move",
            path: source_path.clone(),
            source: e,
        },
        backup: backup.clone(),
    })?;
    info!(target = %target.display(), "parameter file applied");

    Ok(ApplyOutcome::Applied {
        source: source_path,
        target,
        backup,
    })
}

/// `BAK_<strategy>_<YYYYmmddHHMM>.json`, suffixed `_2`, `_3`... if taken.
pub fn backup_name(strategy: &str, now: NaiveDateTime, attempt: u32) -> String {
    let stamp = now.format("%Y%m%d%H%M");
    if attempt <= 1 {
        format!("{BACKUP_PREFIX}{strategy}_{stamp}.json")
    } else {
        format!("{BACKUP_PREFIX}{strategy}_{stamp}_{attempt}.json")
    }
}

/// First backup name not taken in `dir`. Only an existing entry moves on to
/// the next suffix; any other lookup failure is reported.
fn free_backup_path(
    dir: &Path,
    strategy: &str,
    now: NaiveDateTime,
) -> Result<PathBuf, FilesystemError> {
    let mut attempt = 1;
    loop {
        let path = dir.join(backup_name(strategy, now, attempt));
        match fs::symlink_metadata(&path) {
            Ok(_) => attempt += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(path),
            Err(e) => {
                return Err(FilesystemError {
                    step: "backup",
                    path,
                    source: e,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap()
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut out: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn backs_up_default_then_moves_selection() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("S.json"), "old").unwrap();
        fs::write(temp.path().join("B.json"), "new").unwrap();

        let outcome = apply_parameters(temp.path(), "S", Some("B.json"), now()).expect("apply");
        let ApplyOutcome::Applied { backup, .. } = outcome else {
            panic!("expected applied");
        };
        assert_eq!(
            backup.as_deref(),
            Some(temp.path().join("BAK_S_202403010905.json").as_path())
        );
        assert_eq!(names(temp.path()), vec!["BAK_S_202403010905.json", "S.json"]);
        assert_eq!(fs::read_to_string(temp.path().join("S.json")).unwrap(), "new");
        assert_eq!(
            fs::read_to_string(temp.path().join("BAK_S_202403010905.json")).unwrap(),
            "old"
        );
    }

    #[test]
    fn selecting_the_default_touches_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("S.json"), "old").unwrap();
        let outcome = apply_parameters(temp.path(), "S", Some("S.json"), now()).expect("apply");
        assert!(matches!(outcome, ApplyOutcome::Unchanged { .. }));
        assert_eq!(names(temp.path()), vec!["S.json"]);
    }

    #[test]
    fn missing_selection_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            apply_parameters(temp.path(), "S", None, now()),
            Err(ApplyError::NothingSelected)
        ));
        assert!(matches!(
            apply_parameters(temp.path(), "S", Some("  "), now()),
            Err(ApplyError::NothingSelected)
        ));
    }

    #[test]
    fn unknown_source_leaves_default_in_place() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("S.json"), "old").unwrap();
        fs::write(temp.path().join("BAK_S_202401010000.json"), "bak").unwrap();
        for source in ["ghost.json", "BAK_S_202401010000.json", "../S.json"] {
            let err = apply_parameters(temp.path(), "S", Some(source), now()).unwrap_err();
            assert!(matches!(err, ApplyError::SourceMissing { .. }), "{source}");
        }
        assert_eq!(
            names(temp.path()),
            vec!["BAK_S_202401010000.json", "S.json"]
        );
    }

    #[test]
    fn no_existing_default_means_no_backup() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("B.json"), "new").unwrap();
        let outcome = apply_parameters(temp.path(), "S", Some("B.json"), now()).expect("apply");
        assert!(matches!(outcome, ApplyOutcome::Applied { backup: None, .. }));
        assert_eq!(names(temp.path()), vec!["S.json"]);
    }

    #[test]
    fn backup_name_collision_gets_suffix() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("BAK_S_202403010905.json"), "earlier").unwrap();
        fs::write(temp.path().join("S.json"), "old").unwrap();
        fs::write(temp.path().join("B.json"), "new").unwrap();
        apply_parameters(temp.path(), "S", Some("B.json"), now()).expect("apply");
        assert_eq!(
            fs::read_to_string(temp.path().join("BAK_S_202403010905_2.json")).unwrap(),
            "old"
        );
    }

    #[cfg(unix)]
    #[test]
    fn backup_lookup_failure_is_reported_not_retried() {
        let temp = tempfile::tempdir().expect("tempdir");
        let not_a_dir = temp.path().join("plain-file");
        fs::write(&not_a_dir, "x").unwrap();

        let err = free_backup_path(&not_a_dir, "S", now()).unwrap_err();
        assert_eq!(err.step, "backup");
        assert_eq!(err.path, not_a_dir.join("BAK_S_202403010905.json"));
        assert_ne!(err.source.kind(), ErrorKind::NotFound);
    }
}
