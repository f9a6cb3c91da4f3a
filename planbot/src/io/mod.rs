//! Side-effecting parts of the service: host API, text generation, config.

pub mod config;
pub mod executor;
pub mod generator;
pub mod github;
pub mod host;
pub mod process;
pub mod prompt;
