//! Stable exit codes for the `taskloop` CLI.

/// Command succeeded; for `run`, the controller marked the objective complete.
pub const OK: i32 = 0;
/// Invalid arguments or config, missing credentials, or a fatal completion error.
pub const INVALID: i32 = 1;
/// `taskloop run` used its whole iteration budget without completing.
pub const BUDGET_EXHAUSTED: i32 = 2;
