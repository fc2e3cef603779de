//! Job classes, raw run parameters and the validated job request.
//!
//! Everything here is pure: the caller supplies "today" so request
//! defaults stay deterministic under test.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Fixed set of operations the core can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobClass {
    DataFetch,
    Backtest,
    BacktestFixedWindow,
    ParameterSearch,
    ApplyParameters,
    Publish,
}

impl JobClass {
    /// Canonical kebab-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            JobClass::DataFetch => "data-fetch",
            JobClass::Backtest => "backtest",
            JobClass::BacktestFixedWindow => "backtest-fixed-window",
            JobClass::ParameterSearch => "parameter-search",
            JobClass::ApplyParameters => "apply-parameters",
            JobClass::Publish => "publish",
        }
    }

    /// Prefix used for run ids and log file names.
    pub fn slug(self) -> &'static str {
        match self {
            JobClass::DataFetch => "data_fetch",
            JobClass::Backtest => "backtest",
            JobClass::BacktestFixedWindow => "backtest_fixed",
            JobClass::ParameterSearch => "parameter_search",
            JobClass::ApplyParameters => "apply_parameters",
            JobClass::Publish => "publish",
        }
    }

    pub fn exclusion_group(self) -> ExclusionGroup {
        match self {
            JobClass::DataFetch => ExclusionGroup::MarketData,
            JobClass::Backtest
            | JobClass::BacktestFixedWindow
            | JobClass::ParameterSearch
            | JobClass::ApplyParameters => ExclusionGroup::StrategyWorkspace,
            JobClass::Publish => ExclusionGroup::Publish,
        }
    }
}

impl fmt::Display for JobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobClass {
    type Err = ValidationError;

    /// Accepts canonical names and the legacy panel action names.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let class = match raw.trim().to_ascii_lowercase().as_str() {
            "data-fetch" | "download" => JobClass::DataFetch,
            "backtest" => JobClass::Backtest,
            "backtest-fixed-window" | "backtest_bear" => JobClass::BacktestFixedWindow,
            "parameter-search" | "hyperopt" => JobClass::ParameterSearch,
            "apply-parameters" | "apply_strategy" => JobClass::ApplyParameters,
            "publish" | "git_push" => JobClass::Publish,
            _ => return Err(ValidationError::UnknownJobClass(raw.trim().to_string())),
        };
        Ok(class)
    }
}

/// Set of job classes that must not execute concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionGroup {
    MarketData,
    StrategyWorkspace,
    Publish,
}

impl fmt::Display for ExclusionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExclusionGroup::MarketData => "market-data",
            ExclusionGroup::StrategyWorkspace => "strategy-workspace",
            ExclusionGroup::Publish => "publish",
        };
        f.write_str(name)
    }
}

/// Untyped run parameters as they arrive from a query string or CLI flags.
///
/// Set-valued fields are comma-separated lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    /// Job class name; `action` is the legacy panel's name for it.
    #[serde(alias = "action")]
    pub class: String,
    pub strategy: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub budget: Option<String>,
    pub dimensions: Option<String>,
    pub resolutions: Option<String>,
    pub erase: Option<String>,
    pub backtest_params: Option<String>,
    pub apply_params: Option<String>,
    pub workdir: Option<String>,
}

/// Request-independent defaults applied while validating [`RunParams`].
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub today: NaiveDate,
    pub strategy: String,
    pub lookback_days: u32,
    pub budget: u32,
}

/// Validated, immutable job request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub class: JobClass,
    pub strategy: String,
    pub start: NaiveDate,
    /// Explicit end, or today for the backtest class.
    pub end: Option<NaiveDate>,
    pub budget: u32,
    pub dimensions: Vec<String>,
    pub resolutions: Vec<String>,
    pub erase: bool,
    pub backtest_params: Option<String>,
    pub apply_params: Option<String>,
    pub workdir: Option<PathBuf>,
}

impl JobRequest {
    /// Parse and validate raw parameters. No side effects.
    pub fn from_params(
        params: &RunParams,
        defaults: &RequestDefaults,
    ) -> Result<Self, ValidationError> {
        let class: JobClass = params.class.parse()?;

        let strategy = match non_empty(params.strategy.as_deref()) {
            Some(s) => s.to_string(),
            None => defaults.strategy.clone(),
        };
        validate_strategy_id(&strategy)?;

        let start = match non_empty(params.start.as_deref()) {
            Some(raw) => parse_date("start", raw)?,
            None => defaults.today - Duration::days(i64::from(defaults.lookback_days)),
        };
        let mut end = match non_empty(params.end.as_deref()) {
            Some(raw) => Some(parse_date("end", raw)?),
            None => None,
        };
        if class == JobClass::Backtest && end.is_none() {
            end = Some(defaults.today);
        }
        if let Some(end) = end
            && start > end
        {
            return Err(ValidationError::DateRange { start, end });
        }

        let budget = non_empty(params.budget.as_deref())
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|n| *n >= 1)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(defaults.budget);

        Ok(Self {
            class,
            strategy,
            start,
            end,
            budget,
            dimensions: split_set(params.dimensions.as_deref()),
            resolutions: split_set(params.resolutions.as_deref()),
            erase: parse_flag(params.erase.as_deref()),
            backtest_params: non_empty(params.backtest_params.as_deref()).map(str::to_string),
            apply_params: non_empty(params.apply_params.as_deref()).map(str::to_string),
            workdir: non_empty(params.workdir.as_deref()).map(PathBuf::from),
        })
    }

    /// File name of the strategy's default parameter file.
    pub fn default_params_file(&self) -> String {
        format!("{}.json", self.strategy)
    }
}

/// Format a date the way the external tool expects in time ranges.
pub fn ymd(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

fn parse_date(field: &'static str, raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .map_err(|_| ValidationError::InvalidDate {
            field,
            value: raw.to_string(),
        })
}

fn validate_strategy_id(strategy: &str) -> Result<(), ValidationError> {
    let unsafe_id = strategy.is_empty()
        || strategy.contains(['/', '\\'])
        || strategy.contains("..")
        || strategy.chars().any(char::is_control);
    if unsafe_id {
        return Err(ValidationError::InvalidStrategy(strategy.to_string()));
    }
    Ok(())
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Split a comma-separated list, trimming and de-duplicating in order.
fn split_set(raw: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in raw.unwrap_or_default().split(',') {
        let item = item.trim();
        if item.is_empty() || out.iter().any(|seen| seen == item) {
            continue;
        }
        out.push(item.to_string());
    }
    out
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> RequestDefaults {
        RequestDefaults {
            today: NaiveDate::from_ymd_opt(2024, 3, 1).expect("date"),
            strategy: "Default".to_string(),
            lookback_days: 60,
            budget: 100,
        }
    }

    fn params(class: &str) -> RunParams {
        RunParams {
            class: class.to_string(),
            ..RunParams::default()
        }
    }

    #[test]
    fn legacy_action_names_parse() {
        assert_eq!("download".parse::<JobClass>().unwrap(), JobClass::DataFetch);
        assert_eq!(
            "backtest_bear".parse::<JobClass>().unwrap(),
            JobClass::BacktestFixedWindow
        );
        assert_eq!(
            "hyperopt".parse::<JobClass>().unwrap(),
            JobClass::ParameterSearch
        );
        assert_eq!("git_push".parse::<JobClass>().unwrap(), JobClass::Publish);
    }

    #[test]
    fn unknown_class_is_rejected() {
        let err = JobRequest::from_params(&params("deploy"), &defaults()).unwrap_err();
        assert_eq!(err, ValidationError::UnknownJobClass("deploy".to_string()));
    }

    #[test]
    fn defaults_fill_strategy_start_and_backtest_end() {
        let req = JobRequest::from_params(&params("backtest"), &defaults()).expect("request");
        assert_eq!(req.strategy, "Default");
        assert_eq!(req.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(req.end, Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));
        assert_eq!(req.budget, 100);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut p = params("backtest");
        p.start = Some("2024-02-10".to_string());
        p.end = Some("20240201".to_string());
        let err = JobRequest::from_params(&p, &defaults()).unwrap_err();
        assert!(matches!(err, ValidationError::DateRange { .. }));
    }

    #[test]
    fn start_after_today_rejects_backtest_with_default_end() {
        let mut p = params("backtest");
        p.start = Some("2024-05-01".to_string());
        assert!(JobRequest::from_params(&p, &defaults()).is_err());
    }

    #[test]
    fn bad_budget_falls_back_to_default() {
        for raw in ["0", "-3", "lots", ""] {
            let mut p = params("hyperopt");
            p.budget = Some(raw.to_string());
            let req = JobRequest::from_params(&p, &defaults()).expect("request");
            assert_eq!(req.budget, 100, "budget {raw:?}");
        }
        let mut p = params("hyperopt");
        p.budget = Some("250".to_string());
        assert_eq!(JobRequest::from_params(&p, &defaults()).unwrap().budget, 250);
    }

    #[test]
    fn sets_are_trimmed_and_deduplicated() {
        let mut p = params("download");
        p.resolutions = Some(" 1h,5m,,1h ".to_string());
        p.erase = Some("1".to_string());
        let req = JobRequest::from_params(&p, &defaults()).expect("request");
        assert_eq!(req.resolutions, vec!["1h", "5m"]);
        assert!(req.erase);
    }

    #[test]
    fn path_like_strategy_is_rejected() {
        let mut p = params("backtest");
        p.strategy = Some("../evil".to_string());
        assert!(matches!(
            JobRequest::from_params(&p, &defaults()),
            Err(ValidationError::InvalidStrategy(_))
        ));
    }

    #[test]
    fn malformed_date_names_the_field() {
        let mut p = params("download");
        p.start = Some("yesterday".to_string());
        let err = JobRequest::from_params(&p, &defaults()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidDate {
                field: "start",
                value: "yesterday".to_string()
            }
        );
    }
}
