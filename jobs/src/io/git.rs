//! Git adapter for the publish job.
//!
//! Publishing is a fixed stage/commit/push sequence. Each step is run
//! through the process launcher like any other external program, so this
//! module only decides the exact invocations.

use std::path::PathBuf;

use chrono::NaiveDateTime;

use crate::core::command::Argv;

/// One step of the publish sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishStep {
    /// Short name used in warnings and the run log.
    pub name: &'static str,
    pub argv: Argv,
}

/// Builds `git -C <workdir> ...` invocations.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Argv {
        self.argv(&["add", "-A"])
    }

    pub fn commit(&self, message: &str) -> Argv {
        self.argv(&["commit", "-m", message])
    }

    pub fn push(&self) -> Argv {
        self.argv(&["push"])
    }

    /// Stage, commit with a timestamped message, push.
    pub fn publish_steps(&self, commit_prefix: &str, now: NaiveDateTime) -> Vec<PublishStep> {
        vec![
            PublishStep {
                name: "stage",
                argv: self.add_all(),
            },
            PublishStep {
                name: "commit",
                argv: self.commit(&commit_message(commit_prefix, now)),
            },
            PublishStep {
                name: "push",
                argv: self.push(),
            },
        ]
    }

    fn argv(&self, args: &[&str]) -> Argv {
        let mut argv = vec![
            "git".to_string(),
            "-C".to_string(),
            self.workdir.display().to_string(),
        ];
        argv.extend(args.iter().map(|a| (*a).to_string()));
        argv
    }
}

pub fn commit_message(prefix: &str, now: NaiveDateTime) -> String {
    format!("{} {}", prefix.trim(), now.format("%Y-%m-%d %H:%M:%S"))
}
