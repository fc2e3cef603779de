//! Deterministic, pure logic shared by the job core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod command;
pub mod event;
pub mod progress;
pub mod types;
