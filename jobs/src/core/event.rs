//! Typed lifecycle events pushed to the observer of one run.
//!
//! Per-run order: at most one `meta` (first), then `progress` / `line` /
//! `warning` / `error` in process order, at most one `result`, and exactly
//! one `end` (last).

use serde::Serialize;

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    Meta {
        run_id: String,
        log_name: String,
        log_path: String,
        command: String,
        cwd: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_steps: Option<u64>,
    },
    Progress {
        current: u64,
        total: u64,
    },
    Line {
        text: String,
    },
    Warning {
        text: String,
    },
    Error {
        text: String,
    },
    Result {
        text: String,
    },
    End {
        status: RunStatus,
        exit_code: i32,
        log_name: Option<String>,
        log_path: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_steps: Option<u64>,
    },
}

impl Event {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Meta { .. } => "meta",
            Event::Progress { .. } => "progress",
            Event::Line { .. } => "line",
            Event::Warning { .. } => "warning",
            Event::Error { .. } => "error",
            Event::Result { .. } => "result",
            Event::End { .. } => "end",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::End { .. })
    }

    pub fn line(text: impl Into<String>) -> Self {
        Event::Line { text: text.into() }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Event::Warning { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Event::Error { text: text.into() }
    }

    /// JSON payload (includes the `event` tag).
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_payload_shape() {
        let json = Event::Progress {
            current: 2,
            total: 6,
        }
        .to_json()
        .expect("json");
        assert_eq!(json, r#"{"event":"progress","current":2,"total":6}"#);
    }

    #[test]
    fn end_without_log_serializes_nulls() {
        let json = Event::End {
            status: RunStatus::Failure,
            exit_code: 1,
            log_name: None,
            log_path: None,
            total_steps: None,
        }
        .to_json()
        .expect("json");
        assert_eq!(
            json,
            r#"{"event":"end","status":"failure","exit_code":1,"log_name":null,"log_path":null}"#
        );
    }

    #[test]
    fn names_match_wire_protocol() {
        assert_eq!(Event::warning("w").name(), "warning");
        assert_eq!(Event::error("e").name(), "error");
        assert_eq!(Event::line("l").name(), "line");
        assert!(
            Event::End {
                status: RunStatus::Success,
                exit_code: 0,
                log_name: None,
                log_path: None,
                total_steps: None,
            }
            .is_terminal()
        );
    }
}
