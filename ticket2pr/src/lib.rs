//! Ticket-to-pull-request workflow orchestration.
//!
//! A run fetches a ticket, plans and implements a change through scoped agent
//! invocations, repairs it against external verifiers, and publishes the result
//! as a change request. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (naming, plan parsing, file scopes,
//!   the change set). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (git, HTTP clients, agent
//!   backends, verifiers, workspaces, signals). Each sits behind a trait so
//!   tests can substitute scripted fakes.
//!
//! Orchestration modules ([`context`], [`invoker`], [`retry`], [`steps`],
//! [`engine`], [`report`], [`run`]) compose the two into the pipeline.

pub mod context;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod invoker;
pub mod io;
pub mod logging;
pub mod report;
pub mod retry;
pub mod run;
pub mod steps;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
