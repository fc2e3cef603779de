//! I/O helpers for the job core: config, processes, run logs and the
//! collaborator listings.

pub mod config;
pub mod git;
pub mod pairs;
pub mod process;
pub mod recorder;
pub mod run_logs;
pub mod strategy_files;
pub mod workdirs;
