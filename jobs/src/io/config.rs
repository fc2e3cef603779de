//! Panel configuration stored in `jobs.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::command::CommandBuilder;
use crate::core::types::RequestDefaults;

pub const DEFAULT_CONFIG_FILE: &str = "jobs.toml";

/// Job core configuration (TOML).
///
/// Edited by humans; missing fields fall back to the defaults the panel
/// has always used. Relative paths resolve against `project_dir`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobsConfig {
    /// Working directory of every external program.
    pub project_dir: PathBuf,

    /// Directory holding one log file per run.
    pub log_dir: PathBuf,

    /// Interpreter used to launch the trading tool. Discovered when unset.
    pub python: Option<String>,

    /// Tool configuration passed as `--config` (relative to `project_dir`).
    pub base_config: String,

    /// Exchange configuration holding the pair whitelist.
    pub exchange_config: PathBuf,

    /// Strategy scripts and their parameter files.
    pub strategies_dir: PathBuf,

    /// Text file listing publishable working directories, one per line.
    pub workdirs_file: PathBuf,

    pub default_strategy: String,

    /// Default start date is today minus this many days.
    pub lookback_days: u32,

    pub fetch: FetchConfig,
    pub backtest: BacktestConfig,
    pub search: SearchConfig,
    pub publish: PublishConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FetchConfig {
    /// Resolutions fetched when a request names none.
    pub default_resolutions: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            default_resolutions: vec!["1h".to_string(), "1d".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BacktestConfig {
    /// `YYYYMMDD-YYYYMMDD` window of the fixed-window backtest.
    pub fixed_window: String,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            fixed_window: "20220110-20220618".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub default_budget: u32,
    pub loss: String,
    pub timeframe: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_budget: 100,
            loss: "OnlyProfitHyperOptLoss".to_string(),
            timeframe: "3m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    /// Commit message prefix; a `%Y-%m-%d %H:%M:%S` timestamp follows.
    pub commit_prefix: String,
    /// Skip the remaining steps once one exits non-zero.
    pub abort_on_step_failure: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            commit_prefix: "auto push".to_string(),
            abort_on_step_failure: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Also emit `line` events for unclassified process output.
    pub forward_lines: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            log_dir: PathBuf::from("log_app"),
            python: None,
            base_config: "user_data/config_base.json".to_string(),
            exchange_config: PathBuf::from("user_data/configs/config_exchange.json"),
            strategies_dir: PathBuf::from("user_data/strategies"),
            workdirs_file: PathBuf::from("git_path.txt"),
            default_strategy: "eZ3_scalp3m".to_string(),
            lookback_days: 60,
            fetch: FetchConfig::default(),
            backtest: BacktestConfig::default(),
            search: SearchConfig::default(),
            publish: PublishConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl JobsConfig {
    /// Config rooted at `project_dir` with every other field defaulted.
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.default_resolutions.is_empty()
            || self
                .fetch
                .default_resolutions
                .iter()
                .any(|r| r.trim().is_empty())
        {
            return Err(anyhow!(
                "fetch.default_resolutions must be a non-empty array of names"
            ));
        }
        if self.search.default_budget == 0 {
            return Err(anyhow!("search.default_budget must be > 0"));
        }
        if self.search.loss.trim().is_empty() {
            return Err(anyhow!("search.loss must not be empty"));
        }
        if self.search.timeframe.trim().is_empty() {
            return Err(anyhow!("search.timeframe must not be empty"));
        }
        if !is_time_window(&self.backtest.fixed_window) {
            return Err(anyhow!(
                "backtest.fixed_window must look like YYYYMMDD-YYYYMMDD, got '{}'",
                self.backtest.fixed_window
            ));
        }
        if self.publish.commit_prefix.trim().is_empty() {
            return Err(anyhow!("publish.commit_prefix must not be empty"));
        }
        if self.default_strategy.trim().is_empty() {
            return Err(anyhow!("default_strategy must not be empty"));
        }
        Ok(())
    }

    /// Resolve a configured path against `project_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.log_dir)
    }

    pub fn strategies_dir(&self) -> PathBuf {
        self.resolve(&self.strategies_dir)
    }

    pub fn exchange_config(&self) -> PathBuf {
        self.resolve(&self.exchange_config)
    }

    pub fn workdirs_file(&self) -> PathBuf {
        self.resolve(&self.workdirs_file)
    }

    /// Configured interpreter, else a project virtualenv, else `python`.
    pub fn python(&self) -> String {
        if let Some(python) = self.python.as_deref().filter(|p| !p.trim().is_empty()) {
            return python.to_string();
        }
        for venv in [".venv", "venv"] {
            for rel in ["Scripts/python.exe", "bin/python"] {
                let candidate = self.project_dir.join(venv).join(rel);
                if candidate.is_file() {
                    return candidate.display().to_string();
                }
            }
        }
        "python".to_string()
    }

    pub fn command_builder(&self) -> CommandBuilder {
        CommandBuilder {
            python: self.python(),
            base_config: self.base_config.clone(),
            default_resolutions: self.fetch.default_resolutions.clone(),
            fixed_window: self.backtest.fixed_window.clone(),
            search_loss: self.search.loss.clone(),
            search_timeframe: self.search.timeframe.clone(),
        }
    }

    pub fn request_defaults(&self, today: chrono::NaiveDate) -> RequestDefaults {
        RequestDefaults {
            today,
            strategy: self.default_strategy.clone(),
            lookback_days: self.lookback_days,
            budget: self.search.default_budget,
        }
    }
}

fn is_time_window(raw: &str) -> bool {
    let Some((start, end)) = raw.split_once('-') else {
        return false;
    };
    [start, end]
        .iter()
        .all(|part| part.len() == 8 && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `JobsConfig::default()` rooted at the
/// file's directory. A relative `project_dir` is taken relative to the file.
pub fn load_config(path: &Path) -> Result<JobsConfig> {
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str::<JobsConfig>(&contents)
            .with_context(|| format!("parse {}", path.display()))?
    } else {
        JobsConfig::default()
    };
    if cfg.project_dir.is_relative() {
        cfg.project_dir = base.join(&cfg.project_dir);
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &JobsConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default_rooted_at_parent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg.project_dir, temp.path().join("."));
        assert_eq!(cfg.fetch, FetchConfig::default());
        assert_eq!(cfg.search.default_budget, 100);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("jobs.toml");
        let cfg = JobsConfig::for_project(temp.path());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("jobs.toml");
        fs::write(
            &path,
            "default_strategy = \"Mine\"\n[publish]\nabort_on_step_failure = true\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.default_strategy, "Mine");
        assert!(cfg.publish.abort_on_step_failure);
        assert_eq!(cfg.publish.commit_prefix, "auto push");
        assert_eq!(cfg.backtest.fixed_window, "20220110-20220618");
    }

    #[test]
    fn malformed_window_is_rejected() {
        let mut cfg = JobsConfig::default();
        cfg.backtest.fixed_window = "2022-01-10".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_resolutions_are_rejected() {
        let mut cfg = JobsConfig::default();
        cfg.fetch.default_resolutions.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn python_prefers_project_virtualenv() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = JobsConfig::for_project(temp.path());
        assert_eq!(cfg.python(), "python");

        let venv_python = temp.path().join(".venv").join("bin").join("python");
        fs::create_dir_all(venv_python.parent().unwrap()).expect("mkdir");
        fs::write(&venv_python, "").expect("touch");
        assert_eq!(cfg.python(), venv_python.display().to_string());
    }
}
