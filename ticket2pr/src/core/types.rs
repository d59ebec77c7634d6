//! Shared deterministic types for the pipeline.
//!
//! These types define stable contracts between steps, the engine and the
//! report. They hold no handles to external state and serialize into the
//! per-run `report.json`.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ticket fields the pipeline consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub key: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    /// Issue type name (e.g. `Bug`, `Story`), used as the branch prefix.
    #[serde(default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Browse URL for humans.
    pub url: String,
}

/// Reference to an opened change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequestRef {
    pub number: u64,
    pub url: String,
}

/// Terminal status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Skipped,
    Failed,
}

/// Run-context fields a step may produce.
///
/// Ordered so artifact sets serialize deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    Issue,
    BranchName,
    PlanDocument,
    StagedFiles,
    TestsPlanDocument,
    CommitMessage,
    CommitSha,
    PrTitle,
    PrBody,
    ChangeRequest,
}

impl Artifact {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::BranchName => "branch_name",
            Self::PlanDocument => "plan_document",
            Self::StagedFiles => "staged_files",
            Self::TestsPlanDocument => "tests_plan_document",
            Self::CommitMessage => "commit_message",
            Self::CommitSha => "commit_sha",
            Self::PrTitle => "pr_title",
            Self::PrBody => "pr_body",
            Self::ChangeRequest => "change_request",
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classes with their own exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Config,
    InvalidInput,
    TicketFetch,
    VersionControl,
    AgentInvocation,
    Solve,
    VerifierUnresolved,
    Publish,
    Interrupted,
    Internal,
}

/// Error carried by a failed step, preserved verbatim for the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub category: ErrorCategory,
    pub message: String,
}

/// One verifier run inside a retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierAttempt {
    /// 1-indexed attempt number.
    pub number: u32,
    pub passed: bool,
    /// True when the output matched the previous attempt byte for byte.
    pub repeated_output: bool,
    pub output: String,
}

/// Entry appended to the run's step history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub artifacts: BTreeSet<Artifact>,
    /// Agent invocations started during this step.
    pub agent_invocations: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<VerifierAttempt>,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn skipped(step: &str, reason: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            status: StepStatus::Skipped,
            error: None,
            skip_reason: Some(reason.into()),
            artifacts: BTreeSet::new(),
            agent_invocations: 0,
            attempts: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// How the run's workspace was obtained, which decides whether it is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceKind {
    /// Cloned by the run; always removed when the run ends.
    Temporary,
    /// Supplied by the caller; never removed.
    UserSupplied,
}
