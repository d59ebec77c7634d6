//! Investigation tests against the real agent and lint CLIs.
//!
//! Excluded from regular runs: they need `claude`, `codex` or `pre-commit`
//! installed and, for the agents, valid credentials.
//!
//! Run with: `cargo test --test investigation -- --ignored`

#[path = "investigation/agent_backends.rs"]
mod agent_backends;
#[path = "investigation/pre_commit.rs"]
mod pre_commit;
