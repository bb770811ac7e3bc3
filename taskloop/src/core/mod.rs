//! Deterministic, pure logic for the agent loop.
//!
//! Core modules are free of I/O. They operate on in-memory data and return
//! deterministic outputs suitable for tests.

pub mod invariants;
pub mod sanitize;
pub mod selector;
pub mod state;
pub mod types;
