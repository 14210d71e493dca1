//! Stable exit codes for engine CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, configuration, or any other error.
pub const INVALID: i32 = 1;
/// `engine check` rejected the command.
pub const DENIED: i32 = 2;
/// `engine verify` found failing commands.
pub const VERIFY_FAILED: i32 = 3;
