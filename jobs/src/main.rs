//! Command-line front end for the job core.
//!
//! `jobs run <class>` streams a run's events to stdout as JSON lines and
//! exits with the run's exit code. `jobs logs` and `jobs pairs` expose the
//! read-only listings; `jobs init` writes a default config file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use jobs::core::event::Event;
use jobs::core::types::RunParams;
use jobs::exit_codes;
use jobs::io::config::{DEFAULT_CONFIG_FILE, JobsConfig, load_config, write_config};
use jobs::io::pairs::read_pair_whitelist;
use jobs::io::process::TokioLauncher;
use jobs::io::run_logs::{list_run_logs, read_run_log};
use jobs::logging;
use jobs::orchestrator::Orchestrator;
use jobs::registry::RunRegistry;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "jobs", version, about = "Run and observe trading-bot jobs")]
struct Cli {
    /// Path to the config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one job and print its events as JSON lines.
    Run(RunArgs),
    /// List run logs, or print one by name.
    Logs {
        /// Log file name (as listed).
        name: Option<String>,
    },
    /// Print the pair whitelist, one per line.
    Pairs,
    /// Write a config file holding every default.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Job class (`data-fetch`, `backtest`, `backtest-fixed-window`,
    /// `parameter-search`, `apply-parameters`, `publish`).
    class: String,
    #[arg(long)]
    strategy: Option<String>,
    /// Start date, `YYYY-MM-DD` or `YYYYMMDD`.
    #[arg(long)]
    start: Option<String>,
    /// End date (backtest only).
    #[arg(long)]
    end: Option<String>,
    /// Parameter-search budget.
    #[arg(long)]
    budget: Option<String>,
    /// Comma-separated search dimensions.
    #[arg(long)]
    dimensions: Option<String>,
    /// Comma-separated resolutions for data-fetch.
    #[arg(long)]
    resolutions: Option<String>,
    /// Re-download existing data.
    #[arg(long)]
    erase: bool,
    /// Parameter file to backtest with.
    #[arg(long)]
    backtest_params: Option<String>,
    /// Parameter file to promote to the strategy default.
    #[arg(long)]
    apply_params: Option<String>,
    /// Working directory to publish.
    #[arg(long)]
    workdir: Option<String>,
}

impl From<RunArgs> for RunParams {
    fn from(args: RunArgs) -> Self {
        RunParams {
            class: args.class,
            strategy: args.strategy,
            start: args.start,
            end: args.end,
            budget: args.budget,
            dimensions: args.dimensions,
            resolutions: args.resolutions,
            erase: args.erase.then(|| "1".to_string()),
            backtest_params: args.backtest_params,
            apply_params: args.apply_params,
            workdir: args.workdir,
        }
    }
}

#[tokio::main]
async fn main() {
    logging::init(logging::CLI_DEFAULT_FILTER);
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run(args) => cmd_run(load_config(&cli.config)?, args.into()).await,
        Command::Logs { name } => cmd_logs(&load_config(&cli.config)?, name.as_deref()),
        Command::Pairs => cmd_pairs(&load_config(&cli.config)?),
    }
}

async fn cmd_run(config: JobsConfig, params: RunParams) -> Result<i32> {
    let registry = RunRegistry::new();
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(config),
        TokioLauncher,
        registry.clone(),
    ));
    let mut rx = orchestrator.start(params);

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let cancelled = registry.cancel_all();
            info!(cancelled, "interrupt received");
        }
    });

    let mut exit_code = exit_codes::FAILURE;
    while let Some(event) = rx.recv().await {
        if let Event::End { exit_code: code, .. } = &event {
            exit_code = *code;
        }
        match event.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => warn!(err = %e, event = event.name(), "failed to encode event"),
        }
    }
    interrupt.abort();
    Ok(exit_code)
}

fn cmd_logs(config: &JobsConfig, name: Option<&str>) -> Result<i32> {
    let dir = config.log_dir();
    match name {
        Some(name) => {
            let contents = read_run_log(&dir, name)?;
            print!("{contents}");
        }
        None => {
            for name in list_run_logs(&dir).context("list run logs")? {
                println!("{name}");
            }
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_pairs(config: &JobsConfig) -> Result<i32> {
    for pair in read_pair_whitelist(&config.exchange_config()) {
        println!("{pair}");
    }
    Ok(exit_codes::OK)
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &JobsConfig::for_project("."))?;
    info!(path = %path.display(), "config written");
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_flags() {
        let cli = Cli::parse_from([
            "jobs",
            "run",
            "hyperopt",
            "--strategy",
            "S",
            "--budget",
            "50",
            "--dimensions",
            "buy,sell",
            "--erase",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let params: RunParams = args.into();
        assert_eq!(params.class, "hyperopt");
        assert_eq!(params.strategy.as_deref(), Some("S"));
        assert_eq!(params.budget.as_deref(), Some("50"));
        assert_eq!(params.dimensions.as_deref(), Some("buy,sell"));
        assert_eq!(params.erase.as_deref(), Some("1"));
    }

    #[test]
    fn config_flag_defaults_and_is_global() {
        let cli = Cli::parse_from(["jobs", "pairs"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        let cli = Cli::parse_from(["jobs", "logs", "--config", "other.toml"]);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(matches!(cli.command, Command::Logs { name: None }));
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("jobs.toml");
        assert_eq!(cmd_init(&path, false).expect("init"), exit_codes::OK);
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.project_dir, temp.path().join("."));

        assert!(cmd_init(&path, false).is_err());
        assert_eq!(cmd_init(&path, true).expect("force"), exit_codes::OK);
    }
}
