//! Deterministic classification of process output lines.
//!
//! Token matching is case-insensitive substring search. Error tokens win
//! over `warning` when both appear.

use serde::Serialize;

use crate::core::types::JobClass;

const ERROR_TOKENS: [&str; 4] = ["error", "critical", "traceback", "exception"];
const WARNING_TOKEN: &str = "warning";

/// Severity tag of one output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineTag {
    Normal,
    Warning,
    Error,
}

/// Classify a single line of output.
pub fn classify(line: &str) -> LineTag {
    let lower = line.to_lowercase();
    if ERROR_TOKENS.iter().any(|token| lower.contains(token)) {
        LineTag::Error
    } else if lower.contains(WARNING_TOKEN) {
        LineTag::Warning
    } else {
        LineTag::Normal
    }
}

/// Token marking the start of the trailing result block, if the class has one.
pub fn result_start_token(class: JobClass) -> Option<&'static str> {
    match class {
        JobClass::ParameterSearch => Some("hyperopt results"),
        JobClass::Backtest | JobClass::BacktestFixedWindow => Some("result for strategy"),
        JobClass::DataFetch | JobClass::ApplyParameters | JobClass::Publish => None,
    }
}

pub fn is_result_start(class: JobClass, line: &str) -> bool {
    result_start_token(class).is_some_and(|token| line.to_lowercase().contains(token))
}

/// Accumulates the result block of one process instance.
///
/// Once the start token is seen every later line is kept verbatim,
/// independent of how it classifies.
#[derive(Debug, Clone)]
pub struct ResultCapture {
    class: JobClass,
    started: bool,
    lines: Vec<String>,
}

impl ResultCapture {
    pub fn new(class: JobClass) -> Self {
        Self {
            class,
            started: false,
            lines: Vec::new(),
        }
    }

    /// Feed one line; returns true if the line became part of the block.
    pub fn observe(&mut self, line: &str) -> bool {
        if !self.started && is_result_start(self.class, line) {
            self.started = true;
        }
        if self.started {
            self.lines.push(line.to_string());
        }
        self.started
    }

    /// The joined block, or `None` if the start token never appeared.
    pub fn finish(self) -> Option<String> {
        if self.lines.is_empty() {
            None
        } else {
            Some(self.lines.join("\n"))
        }
    }
}
