//! Deterministic, pure logic for the issue workflow.
//!
//! Core modules must be free of I/O side effects. They operate on host data
//! already decoded into [`types`] and return deterministic outputs.

pub mod classifier;
pub mod decider;
pub mod extract;
pub mod marker;
pub mod types;
