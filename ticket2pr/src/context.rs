//! The run context threaded through every step.
//!
//! One aggregate per run, owned by the engine and handed to steps by
//! reference. Derived textual artifacts are write-once: a second write is an
//! internal error, which keeps "populated by exactly one step" checkable.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::changeset::ChangeSetTracker;
use crate::core::types::{
    Artifact, ChangeRequestRef, Issue, StepResult, VerifierAttempt, WorkspaceKind,
};
use crate::error::PipelineError;

/// Immutable per-run switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunFlags {
    /// Run the tests-plan and tests-fix steps.
    pub fix_tests: bool,
    /// Commit with `--no-verify`.
    pub commit_no_verify: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    issue_key: String,
    workspace_path: PathBuf,
    workspace_kind: WorkspaceKind,
    base_branch: String,
    flags: RunFlags,

    #[serde(skip_serializing_if = "Option::is_none")]
    issue: Option<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan_document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tests_plan_document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pr_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pr_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    change_request: Option<ChangeRequestRef>,

    staged_files: ChangeSetTracker,
    step_history: Vec<StepResult>,
}

fn set_once<T>(slot: &mut Option<T>, value: T, artifact: Artifact) -> Result<(), PipelineError> {
    if slot.is_some() {
        return Err(PipelineError::Internal(format!(
            "{artifact} was already set by an earlier step"
        )));
    }
    *slot = Some(value);
    Ok(())
}

fn missing(artifact: Artifact) -> PipelineError {
    PipelineError::Internal(format!("{artifact} is not available yet"))
}

impl RunContext {
    pub fn new(
        issue_key: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
        workspace_kind: WorkspaceKind,
        base_branch: impl Into<String>,
        flags: RunFlags,
    ) -> Self {
        Self {
            issue_key: issue_key.into(),
            workspace_path: workspace_path.into(),
            workspace_kind,
            base_branch: base_branch.into(),
            flags,
            issue: None,
            branch_name: None,
            plan_document: None,
            tests_plan_document: None,
            commit_message: None,
            commit_sha: None,
            pr_title: None,
            pr_body: None,
            change_request: None,
            staged_files: ChangeSetTracker::new(),
            step_history: Vec::new(),
        }
    }

    pub fn issue_key(&self) -> &str {
        &self.issue_key
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    pub fn workspace_kind(&self) -> WorkspaceKind {
        self.workspace_kind
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    pub fn flags(&self) -> RunFlags {
        self.flags
    }

    pub fn issue(&self) -> Option<&Issue> {
        self.issue.as_ref()
    }

    pub fn require_issue(&self) -> Result<&Issue, PipelineError> {
        self.issue.as_ref().ok_or_else(|| missing(Artifact::Issue))
    }

    pub fn set_issue(&mut self, issue: Issue) -> Result<(), PipelineError> {
        set_once(&mut self.issue, issue, Artifact::Issue)
    }

    pub fn branch_name(&self) -> Option<&str> {
        self.branch_name.as_deref()
    }

    pub fn require_branch_name(&self) -> Result<&str, PipelineError> {
        self.branch_name().ok_or_else(|| missing(Artifact::BranchName))
    }

    pub fn set_branch_name(&mut self, name: String) -> Result<(), PipelineError> {
        set_once(&mut self.branch_name, name, Artifact::BranchName)
    }

    pub fn plan_document(&self) -> Option<&str> {
        self.plan_document.as_deref()
    }

    pub fn require_plan_document(&self) -> Result<&str, PipelineError> {
        self.plan_document().ok_or_else(|| missing(Artifact::PlanDocument))
    }

    pub fn set_plan_document(&mut self, doc: String) -> Result<(), PipelineError> {
        set_once(&mut self.plan_document, doc, Artifact::PlanDocument)
    }

    pub fn tests_plan_document(&self) -> Option<&str> {
        self.tests_plan_document.as_deref()
    }

    pub fn set_tests_plan_document(&mut self, doc: String) -> Result<(), PipelineError> {
        set_once(&mut self.tests_plan_document, doc, Artifact::TestsPlanDocument)
    }

    pub fn commit_message(&self) -> Option<&str> {
        self.commit_message.as_deref()
    }

    pub fn require_commit_message(&self) -> Result<&str, PipelineError> {
        self.commit_message()
            .ok_or_else(|| missing(Artifact::CommitMessage))
    }

    pub fn set_commit_message(&mut self, message: String) -> Result<(), PipelineError> {
        set_once(&mut self.commit_message, message, Artifact::CommitMessage)
    }

    pub fn commit_sha(&self) -> Option<&str> {
        self.commit_sha.as_deref()
    }

    pub fn set_commit_sha(&mut self, sha: String) -> Result<(), PipelineError> {
        set_once(&mut self.commit_sha, sha, Artifact::CommitSha)
    }

    pub fn pr_title(&self) -> Option<&str> {
        self.pr_title.as_deref()
    }

    pub fn set_pr_title(&mut self, title: String) -> Result<(), PipelineError> {
        set_once(&mut self.pr_title, title, Artifact::PrTitle)
    }

    pub fn pr_body(&self) -> Option<&str> {
        self.pr_body.as_deref()
    }

    pub fn set_pr_body(&mut self, body: String) -> Result<(), PipelineError> {
        set_once(&mut self.pr_body, body, Artifact::PrBody)
    }

    pub fn change_request(&self) -> Option<&ChangeRequestRef> {
        self.change_request.as_ref()
    }

    pub fn set_change_request(&mut self, cr: ChangeRequestRef) -> Result<(), PipelineError> {
        set_once(&mut self.change_request, cr, Artifact::ChangeRequest)
    }

    pub fn staged_files(&self) -> &ChangeSetTracker {
        &self.staged_files
    }

    pub fn staged_files_mut(&mut self) -> &mut ChangeSetTracker {
        &mut self.staged_files
    }

    pub fn step_history(&self) -> &[StepResult] {
        &self.step_history
    }

    /// Append to the history. Only the engine records results.
    pub(crate) fn record(&mut self, result: StepResult) {
        self.step_history.push(result);
    }

    /// Artifacts present in `self` that were absent (or different, for the change set) in `before`.
    pub fn produced_since(&self, before: &RunContext) -> BTreeSet<Artifact> {
        let mut produced = BTreeSet::new();
        let mut check = |was: bool, now: bool, artifact: Artifact| {
            if !was && now {
                produced.insert(artifact);
            }
        };
        check(before.issue.is_some(), self.issue.is_some(), Artifact::Issue);
        check(
            before.branch_name.is_some(),
            self.branch_name.is_some(),
            Artifact::BranchName,
        );
        check(
            before.plan_document.is_some(),
            self.plan_document.is_some(),
            Artifact::PlanDocument,
        );
        check(
            before.tests_plan_document.is_some(),
            self.tests_plan_document.is_some(),
            Artifact::TestsPlanDocument,
        );
        check(
            before.commit_message.is_some(),
            self.commit_message.is_some(),
            Artifact::CommitMessage,
        );
        check(
            before.commit_sha.is_some(),
            self.commit_sha.is_some(),
            Artifact::CommitSha,
        );
        check(
            before.pr_title.is_some(),
            self.pr_title.is_some(),
            Artifact::PrTitle,
        );
        check(
            before.pr_body.is_some(),
            self.pr_body.is_some(),
            Artifact::PrBody,
        );
        check(
            before.change_request.is_some(),
            self.change_request.is_some(),
            Artifact::ChangeRequest,
        );
        if before.staged_files != self.staged_files {
            produced.insert(Artifact::StagedFiles);
        }
        produced
    }
}

/// Per-step bookkeeping the engine copies into the step's [`StepResult`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepLog {
    pub agent_invocations: u32,
    pub attempts: Vec<VerifierAttempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RunContext {
        RunContext::new(
            "PROJ-1",
            "/tmp/ws",
            WorkspaceKind::UserSupplied,
            "main",
            RunFlags::default(),
        )
    }

    #[test]
    fn artifacts_are_write_once() {
        let mut ctx = ctx();
        ctx.set_branch_name("bug/PROJ-1-x".to_string()).expect("first");
        let err = ctx.set_branch_name("other".to_string()).unwrap_err();
        assert!(matches!(err, PipelineError::Internal(msg) if msg.contains("branch_name")));
        assert_eq!(ctx.branch_name(), Some("bug/PROJ-1-x"));
    }

    #[test]
    fn produced_since_reports_new_fields_only() {
        let mut before = ctx();
        before.set_pr_title("[PROJ-1] x".to_string()).expect("title");
        let mut after = before.clone();
        after.set_pr_body("body".to_string()).expect("body");
        after.staged_files_mut().add_explicit("src/a.rs").expect("stage");

        let produced: Vec<Artifact> = after.produced_since(&before).into_iter().collect();
        assert_eq!(produced, vec![Artifact::StagedFiles, Artifact::PrBody]);
    }

    #[test]
    fn missing_artifact_is_internal_error() {
        let err = ctx().require_plan_document().unwrap_err();
        assert!(matches!(err, PipelineError::Internal(msg) if msg.contains("plan_document")));
    }
}
