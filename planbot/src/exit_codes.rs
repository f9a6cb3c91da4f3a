//! Stable exit codes for planbot CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, input file, or usage.
pub const INVALID: i32 = 1;
/// The poll loop stopped on an unrecoverable error.
pub const POLL_FAILED: i32 = 2;
