//! Issue workflow agent for a GitHub repository.
//!
//! Planbot watches open issues and pull requests, posts generated plans as
//! marked comments, opens a pull request once a plan is approved, and rewrites
//! the pull request's file when a reviewer asks for a refactor. All workflow
//! state lives in comment text on the host and is re-derived on every poll.
//!
//! - **[`core`]**: Pure, deterministic logic (marker decoding, history
//!   classification, transition decisions). No I/O.
//! - **[`io`]**: Host API client, text generators, prompt rendering, config.
//!   Behind traits so tests can swap in fakes.
//!
//! [`poll`] ties the two together into the service loop.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod poll;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
