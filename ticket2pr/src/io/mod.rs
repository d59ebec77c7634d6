//! I/O adapters the pipeline reaches through traits.

pub mod agent;
pub mod backoff;
pub mod config;
pub mod git;
pub mod host;
pub mod http;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod settings_init;
pub mod signals;
pub mod snapshot;
pub mod ticket;
pub mod verifier;
pub mod workspace;
