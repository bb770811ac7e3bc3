//! LLM-driven plan / execute / reflect agent loop.
//!
//! A session turns one objective into a plan, executes the plan step by step
//! and reflects on the results. Every iteration a controller picks the next
//! action. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, response sanitizing,
//!   task selection, invariants). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting boundaries (config file, completion service,
//!   prompt rendering). Isolated behind traits to enable scripted tests.
//! - **[`agents`]**: Planner, executor, reflector and controllers built on a
//!   [`io::completion::CompletionService`].
//!
//! [`session`] drives the loop and is what the CLI calls.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
