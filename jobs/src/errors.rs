//! Typed failures surfaced by the job core.
//!
//! None of these escape a run: the orchestrator turns each one into an
//! `error` event followed by the terminal `end` event.

use std::io;
use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::core::types::{ExclusionGroup, JobClass};

/// Bad or inconsistent request, rejected before anything is spawned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown job class '{0}'")]
    UnknownJobClass(String),

    #[error("invalid {field} date '{value}' (expected YYYY-MM-DD or YYYYMMDD)")]
    InvalidDate { field: &'static str, value: String },

    #[error("invalid date range: start ({start}) is after end ({end})")]
    DateRange { start: NaiveDate, end: NaiveDate },

    #[error("invalid strategy identifier '{0}'")]
    InvalidStrategy(String),

    #[error("unknown parameter file '{0}'")]
    UnknownParameterFile(String),

    #[error("working directory '{0}' is not in the configured list")]
    UnlistedWorkdir(String),
}

/// The mutual-exclusion group of a request is held by another run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot start {requested}: {group} is busy with {holder_class} run {holder_run_id}")]
pub struct RunConflict {
    pub requested: JobClass,
    pub group: ExclusionGroup,
    pub holder_class: JobClass,
    pub holder_run_id: String,
}

/// An external program could not be started.
#[derive(Error, Debug)]
#[error("could not start `{command}`: {source}")]
pub struct SpawnError {
    pub command: String,
    #[source]
    pub source: io::Error,
}

/// A file-system step of the apply-parameters job failed.
#[derive(Error, Debug)]
#[error("{step} failed for {}: {source}", path.display())]
pub struct FilesystemError {
    pub step: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}
