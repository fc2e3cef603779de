//! Command Builder: job request → argument vectors for the external tool.
//!
//! Pure and deterministic. Apply-parameters and publish are not external
//! tool invocations and build no argv here.

use crate::core::types::{JobClass, JobRequest, ymd};

/// Program followed by its arguments.
pub type Argv = Vec<String>;

const ALL_DIMENSIONS: &str = "all";
const DEFAULT_DIMENSIONS: &str = "default";

/// Toolchain settings that do not vary per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    pub python: String,
    pub base_config: String,
    pub default_resolutions: Vec<String>,
    pub fixed_window: String,
    pub search_loss: String,
    pub search_timeframe: String,
}

impl CommandBuilder {
    /// Build every argv the request needs, in execution order.
    ///
    /// Data-fetch yields one argv per resolution; backtest variants and
    /// parameter-search yield exactly one.
    pub fn build(&self, request: &JobRequest) -> Vec<Argv> {
        match request.class {
            JobClass::DataFetch => self
                .resolutions(request)
                .iter()
                .map(|resolution| self.fetch(request, resolution))
                .collect(),
            JobClass::Backtest => {
                let end = request.end.map(ymd).unwrap_or_default();
                vec![self.backtest(request, &format!("{}-{end}", ymd(request.start)))]
            }
            JobClass::BacktestFixedWindow => vec![self.backtest(request, &self.fixed_window)],
            JobClass::ParameterSearch => vec![self.search(request)],
            JobClass::ApplyParameters | JobClass::Publish => Vec::new(),
        }
    }

    /// Resolutions a data-fetch request covers (requested, else defaults).
    pub fn resolutions(&self, request: &JobRequest) -> Vec<String> {
        if request.resolutions.is_empty() {
            self.default_resolutions.clone()
        } else {
            request.resolutions.clone()
        }
    }

    fn base(&self, subcommand: &str) -> Argv {
        vec![
            self.python.clone(),
            "-m".to_string(),
            "freqtrade".to_string(),
            subcommand.to_string(),
            "--config".to_string(),
            self.base_config.clone(),
        ]
    }

    fn fetch(&self, request: &JobRequest, resolution: &str) -> Argv {
        let mut argv = self.base("download-data");
        argv.push("--timerange".to_string());
        argv.push(format!("{}-", ymd(request.start)));
        argv.push("--timeframes".to_string());
        argv.push(resolution.to_string());
        if request.erase {
            argv.push("--erase".to_string());
        }
        argv
    }

    fn backtest(&self, request: &JobRequest, timerange: &str) -> Argv {
        let mut argv = self.base("backtesting");
        argv.extend([
            "--strategy".to_string(),
            request.strategy.clone(),
            "--timerange".to_string(),
            timerange.to_string(),
        ]);
        argv
    }

    fn search(&self, request: &JobRequest) -> Argv {
        let mut argv = self.base("hyperopt");
        argv.extend([
            "--strategy".to_string(),
            request.strategy.clone(),
            "--timeframe".to_string(),
            self.search_timeframe.clone(),
            "--epochs".to_string(),
            request.budget.max(1).to_string(),
            "--hyperopt-loss".to_string(),
            self.search_loss.clone(),
            "--timerange".to_string(),
            format!("{}-", ymd(request.start)),
        ]);
        if let Some(dimensions) = resolve_dimensions(&request.dimensions) {
            argv.push("--spaces".to_string());
            argv.extend(dimensions);
        }
        argv
    }
}

/// Decide which search dimensions to pass.
///
/// - any `all` selection → exactly `["all"]`
/// - nothing, or only `default` → `None` (the tool picks its own default)
/// - otherwise the selection with `default` removed
pub fn resolve_dimensions(selected: &[String]) -> Option<Vec<String>> {
    if selected
        .iter()
        .any(|d| d.eq_ignore_ascii_case(ALL_DIMENSIONS))
    {
        return Some(vec![ALL_DIMENSIONS.to_string()]);
    }
    let filtered: Vec<String> = selected
        .iter()
        .filter(|d| !d.eq_ignore_ascii_case(DEFAULT_DIMENSIONS))
        .cloned()
        .collect();
    if filtered.is_empty() {
        None
    } else {
        Some(filtered)
    }
}

/// Render an argv as a single human-readable command line.
pub fn display_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| quote_arg(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }
    if arg.contains([' ', '\t', '"']) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}
