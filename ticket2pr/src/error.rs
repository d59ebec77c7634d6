//! Error taxonomy surfaced to the user and mapped to exit codes.
//!
//! Collaborators work with `anyhow` internally and are converted at the step
//! boundary; each variant here corresponds to exactly one [`ErrorCategory`].

use thiserror::Error;

use crate::core::types::{ErrorCategory, ErrorDetail};
use crate::exit_codes;

/// Failure of a single agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentInvocationError {
    /// The agent touched, reported or staged files outside its allowlist.
    #[error("agent '{template}' touched files outside its allowlist: {}", .paths.join(", "))]
    ScopeViolation { template: String, paths: Vec<String> },
    /// The agent's structured response was missing or did not match the contract.
    #[error("agent '{template}' returned an invalid response: {reason}")]
    InvalidResponse { template: String, reason: String },
    /// The backend process failed, timed out or could not be started.
    #[error("agent '{template}' failed: {reason}")]
    Backend { template: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to fetch ticket: {0}")]
    TicketFetch(String),
    #[error("version control failed: {0}")]
    VersionControl(String),
    #[error(transparent)]
    AgentInvocation(#[from] AgentInvocationError),
    /// The agents' work could not be turned into a usable change (no declared files,
    /// missing plan, empty commit message).
    #[error("solve failed: {0}")]
    Solve(String),
    #[error("{verifier} still failing after {attempts} attempts:\n{last_output}")]
    VerifierUnresolved {
        verifier: String,
        attempts: u32,
        last_output: String,
    },
    #[error("failed to publish: {0}")]
    Publish(String),
    #[error("interrupted")]
    Interrupted,
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Config,
            Self::InvalidInput(_) => ErrorCategory::InvalidInput,
            Self::TicketFetch(_) => ErrorCategory::TicketFetch,
            Self::VersionControl(_) => ErrorCategory::VersionControl,
            Self::AgentInvocation(_) => ErrorCategory::AgentInvocation,
            Self::Solve(_) => ErrorCategory::Solve,
            Self::VerifierUnresolved { .. } => ErrorCategory::VerifierUnresolved,
            Self::Publish(_) => ErrorCategory::Publish,
            Self::Interrupted => ErrorCategory::Interrupted,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn exit_code(&self) -> i32 {
        exit_codes::for_category(self.category())
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            category: self.category(),
            message: self.to_string(),
        }
    }

    /// Wrap an `anyhow` chain from a git or filesystem operation.
    pub fn version_control(err: &anyhow::Error) -> Self {
        Self::VersionControl(format!("{err:#}"))
    }

    pub fn internal(err: &anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}
