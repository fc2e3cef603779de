//! Stable exit codes for the `jobs` CLI and the `end` event.

/// Run succeeded.
pub const OK: i32 = 0;
/// Run failed: invalid request, busy group, spawn or filesystem error, or a
/// non-zero step.
pub const FAILURE: i32 = 1;
/// Run was cancelled (128 + SIGINT).
pub const CANCELLED: i32 = 130;
