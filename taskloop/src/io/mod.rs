//! Side-effecting boundaries: configuration, the completion service and prompt rendering.

pub mod completion;
pub mod config;
pub mod prompt;
