//! Test-only helpers: a scripted process launcher and a throwaway project tree.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::event::Event;
use crate::errors::SpawnError;
use crate::io::config::JobsConfig;
use crate::io::process::{CommandSpec, ProcessHandle, ProcessLauncher};

/// Exit code reported by a scripted process that was killed.
pub const KILLED_EXIT: i32 = 137;

/// Behaviour of one scripted launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Print `lines`, then exit with `code`.
    Exit { lines: Vec<String>, code: i32 },
    /// Print `lines`, then stay alive until killed.
    Hang { lines: Vec<String> },
    /// The program cannot be started.
    SpawnFailure,
}

impl Script {
    pub fn exit(lines: &[&str], code: i32) -> Self {
        Script::Exit {
            lines: owned(lines),
            code,
        }
    }

    pub fn hang(lines: &[&str]) -> Self {
        Script::Hang {
            lines: owned(lines),
        }
    }
}

/// Launcher that replays queued [`Script`]s and records every command.
///
/// An empty queue behaves like a silent process exiting 0.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<Script>>,
    launched: Mutex<Vec<CommandSpec>>,
}

impl ScriptedLauncher {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            launched: Mutex::new(Vec::new()),
        }
    }

    /// Every command launched so far, spawn failures included.
    pub fn launched(&self) -> Vec<CommandSpec> {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn launch(&self, spec: &CommandSpec) -> Result<ProcessHandle, SpawnError> {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(spec.clone());
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Script::Exit {
                lines: Vec::new(),
                code: 0,
            });

        let (lines, hang, code) = match script {
            Script::Exit { lines, code } => (lines, false, code),
            Script::Hang { lines } => (lines, true, KILLED_EXIT),
            Script::SpawnFailure => {
                return Err(SpawnError {
                    command: spec.display(),
                    source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
                });
            }
        };

        let (line_tx, line_rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            let _ = line_tx.try_send(line);
        }
        let (exit_tx, exit_rx) = oneshot::channel();
        let kill = CancellationToken::new();
        if hang {
            let killed = kill.clone();
            tokio::spawn(async move {
                killed.cancelled().await;
                drop(line_tx);
                let _ = exit_tx.send(code);
            });
        } else {
            drop(line_tx);
            let _ = exit_tx.send(code);
        }
        Ok(ProcessHandle::new(line_rx, exit_rx, kill))
    }
}

/// Temporary project tree laid out like a trading bot checkout.
///
/// Contains strategy `S` (`S.py`, `S.json`), an extra parameter file
/// `B.json`, an exchange config whitelisting three pairs, and a
/// working-directory list naming `repos/site`.
#[derive(Debug)]
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp project")?;
        let project = Self { dir };
        project.write("user_data/strategies/S.py", "class S: pass\n")?;
        project.write("user_data/strategies/S.json", "{\"params\": \"default\"}\n")?;
        project.write("user_data/strategies/B.json", "{\"params\": \"b\"}\n")?;
        project.write_pairs(&["BTC/USDT", "ETH/USDT", "SOL/USDT"])?;
        project.write("git_path.txt", "# publishable\nrepos/site\n")?;
        fs::create_dir_all(project.root().join("repos/site")).context("create repos/site")?;
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Config rooted at this project with a fixed interpreter name.
    pub fn config(&self) -> JobsConfig {
        let mut cfg = JobsConfig::for_project(self.root());
        cfg.python = Some("python".to_string());
        cfg
    }

    pub fn strategies_dir(&self) -> PathBuf {
        self.config().strategies_dir()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config().log_dir()
    }

    /// Write a file relative to the project root, creating parents.
    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    /// Replace the exchange config with a static whitelist.
    pub fn write_pairs(&self, pairs: &[&str]) -> Result<()> {
        let doc = serde_json::json!({
            "pairlists": [{"method": "StaticPairList", "pair_whitelist": pairs}]
        });
        self.write("user_data/configs/config_exchange.json", &doc.to_string())
    }

    /// Sorted file names in the strategies directory.
    pub fn strategy_files(&self) -> Result<Vec<String>> {
        sorted_names(&self.strategies_dir())
    }

    /// Sorted file names in the run log directory (empty if absent).
    pub fn log_files(&self) -> Result<Vec<String>> {
        let dir = self.log_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        sorted_names(&dir)
    }
}

/// Drain a run's receiver until the sender side is gone.
pub async fn collect_events(mut rx: mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn event_names(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::name).collect()
}

fn sorted_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

fn owned(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|s| (*s).to_string()).collect()
}
