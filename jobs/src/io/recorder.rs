//! Per-run log file under the log directory.
//!
//! One file per run, created at run start with a header line, then
//! appended line by line. The core never reads it back.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::core::classifier::LineTag;
use crate::core::types::JobClass;

/// Which process lines a job class persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPolicy {
    /// Every line, verbatim.
    Verbatim,
    /// Only warning/error lines, prefixed with their tag.
    Classified,
    /// No process lines; only the job's own narrative notes.
    Narrative,
}

impl LogPolicy {
    pub fn for_class(class: JobClass) -> Self {
        match class {
            JobClass::DataFetch => LogPolicy::Classified,
            JobClass::ApplyParameters => LogPolicy::Narrative,
            JobClass::Backtest
            | JobClass::BacktestFixedWindow
            | JobClass::ParameterSearch
            | JobClass::Publish => LogPolicy::Verbatim,
        }
    }
}

#[derive(Debug)]
pub struct RunRecorder {
    path: PathBuf,
    file: File,
    policy: LogPolicy,
}

impl RunRecorder {
    /// Create `<dir>/<stem>.log` (or `<stem>-N.log` if taken) and write the header.
    pub fn create(dir: &Path, stem: &str, header: &str, policy: LogPolicy) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
        let (path, mut file) = create_unique(dir, stem)?;
        writeln!(file, "{header}").with_context(|| format!("write {}", path.display()))?;
        Ok(Self { path, file, policy })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the log, as exposed by the log browser.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Persist one process line according to the policy.
    pub fn record_line(&mut self, line: &str, tag: LineTag) {
        match (self.policy, tag) {
            (LogPolicy::Verbatim, _) => self.write(line),
            (LogPolicy::Classified, LineTag::Warning) => self.write(&format!("WARN: {line}")),
            (LogPolicy::Classified, LineTag::Error) => self.write(&format!("ERR: {line}")),
            (LogPolicy::Classified, LineTag::Normal) | (LogPolicy::Narrative, _) => {}
        }
    }

    /// Persist a message produced by the job itself, regardless of policy.
    pub fn note(&mut self, tag: LineTag, message: &str) {
        let prefix = match tag {
            LineTag::Normal => "INFO",
            LineTag::Warning => "WARN",
            LineTag::Error => "ERR",
        };
        self.write(&format!("{prefix}: {message}"));
    }

    fn write(&mut self, line: &str) {
        if let Err(e) = writeln!(self.file, "{line}") {
            warn!(path = %self.path.display(), err = %e, "failed to append run log");
        }
    }
}

fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, File)> {
    let mut attempt = 1u32;
    loop {
        let name = if attempt == 1 {
            format!("{stem}.log")
        } else {
            format!("{stem}-{attempt}.log")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => {
                return Err(e).with_context(|| format!("create run log {}", path.display()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).expect("read log")
    }

    #[test]
    fn header_is_written_on_create() {
        let temp = tempfile::tempdir().expect("tempdir");
        let rec = RunRecorder::create(
            &temp.path().join("logs"),
            "backtest_x",
            "CMD> run it",
            LogPolicy::Verbatim,
        )
        .expect("create");
        assert_eq!(rec.name(), "backtest_x.log");
        assert_eq!(read(rec.path()), "CMD> run it\n");
    }

    #[test]
    fn colliding_stems_get_distinct_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = RunRecorder::create(temp.path(), "run", "A", LogPolicy::Verbatim).expect("a");
        let b = RunRecorder::create(temp.path(), "run", "B", LogPolicy::Verbatim).expect("b");
        assert_ne!(a.path(), b.path());
        assert_eq!(b.name(), "run-2.log");
        assert_eq!(read(a.path()), "A\n");
    }

    #[test]
    fn classified_policy_keeps_only_tagged_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut rec =
            RunRecorder::create(temp.path(), "fetch", "CMD> x", LogPolicy::Classified).unwrap();
        rec.record_line("downloaded data for A", LineTag::Normal);
        rec.record_line("WARNING low volume", LineTag::Warning);
        rec.record_line("error: timeout", LineTag::Error);
        rec.note(LineTag::Warning, "exited with code 2");
        assert_eq!(
            read(rec.path()),
            "CMD> x\nWARN: WARNING low volume\nERR: error: timeout\nWARN: exited with code 2\n"
        );
    }

    #[test]
    fn narrative_policy_ignores_process_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut rec =
            RunRecorder::create(temp.path(), "apply", "CMD> x", LogPolicy::Narrative).unwrap();
        rec.record_line("error: nope", LineTag::Error);
        rec.note(LineTag::Normal, "moved");
        assert_eq!(read(rec.path()), "CMD> x\nINFO: moved\n");
    }

    #[test]
    fn policies_per_class() {
        assert_eq!(LogPolicy::for_class(JobClass::DataFetch), LogPolicy::Classified);
        assert_eq!(LogPolicy::for_class(JobClass::Publish), LogPolicy::Verbatim);
        assert_eq!(
            LogPolicy::for_class(JobClass::ApplyParameters),
            LogPolicy::Narrative
        );
    }
}
