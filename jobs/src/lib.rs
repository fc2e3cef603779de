//! Streaming job-execution core for a trading-bot control panel.
//!
//! A run takes raw parameters, validates them, spawns the external tool
//! (or mutates parameter files directly), classifies every output line as
//! it arrives and reports a typed event stream ending in exactly one `end`.
//!
//! - **[`core`]**: Pure, deterministic logic (request validation, argv
//!   building, line classification, progress, event model). No I/O.
//! - **[`io`]**: Side effects (config file, child processes, run logs,
//!   collaborator listings).
//!
//! [`orchestrator`] ties them together per run; [`registry`] keeps
//! conflicting runs apart and carries cancellation.

pub mod apply;
pub mod channel;
pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod registry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
