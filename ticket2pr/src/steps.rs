//! The step registry: twelve named steps in fixed order.
//!
//! Each step declares a precondition (run or skip), an action over the
//! [`RunContext`], and whether its failure halts the pipeline. Steps only
//! talk to the outside world through the collaborators in [`StepEnv`].

use std::fs;
use std::path::Path;

use tracing::{info, instrument, warn};

use crate::context::{RunContext, StepLog};
use crate::core::changeset::ChangeSetTracker;
use crate::core::naming::{branch_name, pr_title};
use crate::core::plan::{PLAN_FILE, TESTS_PLAN_FILE, TestsPlan, declared_files, parse_tests_plan};
use crate::core::scope::FileScope;
use crate::core::types::Issue;
use crate::error::{AgentInvocationError, PipelineError};
use crate::invoker::{AgentInvoker, AgentRequest};
use crate::io::git::{Git, GitOptions};
use crate::io::host::{ChangeRequestDraft, HostClient};
use crate::io::prompt::{PromptInput, PromptTemplate};
use crate::io::signals::CancelToken;
use crate::io::ticket::TicketClient;
use crate::io::verifier::{Availability, VerifierProvider, VerifyRequest};
use crate::retry::RetryPolicy;

/// Collaborators shared by every step of one run.
pub struct StepEnv<'a> {
    pub tickets: &'a dyn TicketClient,
    pub host: &'a dyn HostClient,
    pub invoker: &'a AgentInvoker<'a>,
    pub verifiers: &'a dyn VerifierProvider,
    pub retry: RetryPolicy,
    pub git: GitOptions,
    pub cancel: CancelToken,
    /// `%Y%m%d%H%M%S` stamp that makes branch names unique.
    pub timestamp: String,
}

impl StepEnv<'_> {
    fn git(&self, ctx: &RunContext) -> Git {
        Git::with_options(ctx.workspace_path(), self.git.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Run,
    Skip(String),
}

pub trait Step {
    fn name(&self) -> &'static str;

    fn precondition(&self, _ctx: &RunContext, _env: &StepEnv<'_>) -> Precondition {
        Precondition::Run
    }

    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        log: &mut StepLog,
    ) -> Result<(), PipelineError>;

    /// Whether a failure halts the pipeline.
    fn fatal(&self) -> bool {
        true
    }
}

/// The pipeline in execution order.
pub fn default_steps() -> Vec<Box<dyn Step>> {
    vec![
        Box::new(FetchTicket),
        Box::new(CreateBranch),
        Box::new(CheckoutBranch),
        Box::new(Plan),
        Box::new(Implement),
        Box::new(TestsPlanStep),
        Box::new(TestsFix),
        Box::new(LintFix),
        Box::new(CommitMessage),
        Box::new(CommitPush),
        Box::new(Describe),
        Box::new(OpenChangeRequest),
    ]
}

fn payload(ctx: &RunContext) -> Result<PromptInput, PipelineError> {
    Ok(PromptInput {
        issue: Some(ctx.require_issue()?.clone()),
        ..PromptInput::default()
    })
}

fn staged_list(ctx: &RunContext) -> Vec<String> {
    ctx.staged_files().files().iter().cloned().collect()
}

fn scope_of<I, S>(paths: I) -> Result<FileScope, PipelineError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    FileScope::from_paths(paths).map_err(PipelineError::Solve)
}

/// Merge an agent's staged list into the change set, all or nothing.
fn accept_staged(
    tracker: &mut ChangeSetTracker,
    template: PromptTemplate,
    staged: &[String],
    scope: &FileScope,
) -> Result<(), PipelineError> {
    tracker.accept_staged(staged, scope).map(|_| ()).map_err(|paths| {
        AgentInvocationError::ScopeViolation {
            template: template.id().to_string(),
            paths,
        }
        .into()
    })
}

/// Read a document an agent wrote into the workspace root and remove it so it cannot be committed.
fn take_document(workspace: &Path, name: &str) -> Result<Option<String>, PipelineError> {
    let path = workspace.join(name);
    if !path.is_file() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)
        .map_err(|e| PipelineError::Internal(format!("read {}: {e}", path.display())))?;
    fs::remove_file(&path)
        .map_err(|e| PipelineError::Internal(format!("remove {}: {e}", path.display())))?;
    Ok(Some(contents))
}

pub struct FetchTicket;

impl Step for FetchTicket {
    fn name(&self) -> &'static str {
        "fetch_ticket"
    }

    #[instrument(skip_all, fields(key = ctx.issue_key()))]
    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        _log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let issue = env
            .tickets
            .fetch(ctx.issue_key())
            .map_err(|e| PipelineError::TicketFetch(e.to_string()))?;
        info!(summary = %issue.summary, "fetched ticket");
        ctx.set_issue(issue)
    }
}

pub struct CreateBranch;

impl Step for CreateBranch {
    fn name(&self) -> &'static str {
        "create_branch"
    }

    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        _log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let issue = ctx.require_issue()?;
        let name = branch_name(
            &issue.key,
            &issue.summary,
            issue.issue_type.as_deref(),
            &env.timestamp,
        );
        env.host
            .create_branch(&name, ctx.base_branch())
            .map_err(|e| PipelineError::Publish(format!("create branch {name}: {e}")))?;
        if let Err(err) = env
            .tickets
            .link_branch(&issue.key, &name, &env.host.branch_url(&name))
        {
            warn!(err = %err, "could not link branch on the ticket");
        }
        ctx.set_branch_name(name)
    }
}

pub struct CheckoutBranch;

impl Step for CheckoutBranch {
    fn name(&self) -> &'static str {
        "checkout_branch"
    }

    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        _log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let branch = ctx.require_branch_name()?;
        let git = env.git(ctx);
        git.fetch_origin()
            .map_err(|e| PipelineError::version_control(&e))?;
        if git
            .branch_exists(branch)
            .map_err(|e| PipelineError::version_control(&e))?
        {
            return Err(PipelineError::VersionControl(format!(
                "branch {branch} already exists locally"
            )));
        }
        git.checkout_remote_branch(branch)
            .map_err(|e| PipelineError::version_control(&e))
    }
}

pub struct Plan;

impl Step for Plan {
    fn name(&self) -> &'static str {
        "plan"
    }

    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let request = AgentRequest {
            template: PromptTemplate::Plan,
            payload: payload(ctx)?,
            allowlist: scope_of([PLAN_FILE])?,
        };
        env.invoker.invoke(ctx.workspace_path(), &request, log)?;
        let plan = take_document(ctx.workspace_path(), PLAN_FILE)?.ok_or_else(|| {
            PipelineError::Solve(format!("the planning agent did not write {PLAN_FILE}"))
        })?;
        let files = declared_files(&plan).map_err(|e| PipelineError::Solve(e.to_string()))?;
        info!(files = files.len(), "plan declares files");
        ctx.set_plan_document(plan)
    }
}

pub struct Implement;

impl Step for Implement {
    fn name(&self) -> &'static str {
        "implement"
    }

    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let plan = ctx.require_plan_document()?.to_string();
        let declared = declared_files(&plan).map_err(|e| PipelineError::Solve(e.to_string()))?;
        let allowlist = scope_of(&declared)?;
        let request = AgentRequest {
            template: PromptTemplate::Implement,
            payload: PromptInput {
                allowed_files: declared.clone(),
                plan: Some(plan),
                ..payload(ctx)?
            },
            allowlist: allowlist.clone(),
        };
        let response = env.invoker.invoke(ctx.workspace_path(), &request, log)?;
        if response.touched.is_empty() {
            return Err(PipelineError::Solve(
                "the implementation agent changed no files".to_string(),
            ));
        }

        let tracker = ctx.staged_files_mut();
        accept_staged(tracker, request.template, &response.files_staged, &allowlist)?;
        for file in &declared {
            tracker.add_explicit(file).map_err(PipelineError::Solve)?;
        }
        info!(staged = tracker.len(), "implementation staged");
        Ok(())
    }
}

pub struct TestsPlanStep;

impl Step for TestsPlanStep {
    fn name(&self) -> &'static str {
        "tests_plan"
    }

    fn precondition(&self, ctx: &RunContext, _env: &StepEnv<'_>) -> Precondition {
        if !ctx.flags().fix_tests {
            return Precondition::Skip("--fix-tests not requested".to_string());
        }
        if ctx.staged_files().is_empty() {
            return Precondition::Skip("no staged changes".to_string());
        }
        Precondition::Run
    }

    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let request = AgentRequest {
            template: PromptTemplate::TestsPlan,
            payload: PromptInput {
                staged_files: staged_list(ctx),
                ..payload(ctx)?
            },
            allowlist: scope_of([TESTS_PLAN_FILE])?,
        };
        env.invoker.invoke(ctx.workspace_path(), &request, log)?;
        let Some(doc) = take_document(ctx.workspace_path(), TESTS_PLAN_FILE)? else {
            info!("no related tests found");
            return Ok(());
        };
        let plan = parse_tests_plan(&doc).map_err(|e| PipelineError::Solve(e.to_string()))?;
        info!(
            related_tests = plan.related_tests.len(),
            commands = plan.commands().len(),
            "tests plan written"
        );
        ctx.set_tests_plan_document(doc)
    }
}

pub struct TestsFix;

impl TestsFix {
    fn tests_plan(ctx: &RunContext) -> Option<Result<TestsPlan, PipelineError>> {
        ctx.tests_plan_document()
            .map(|doc| parse_tests_plan(doc).map_err(|e| PipelineError::Solve(e.to_string())))
    }
}

impl Step for TestsFix {
    fn name(&self) -> &'static str {
        "tests_fix"
    }

    fn precondition(&self, ctx: &RunContext, _env: &StepEnv<'_>) -> Precondition {
        if !ctx.flags().fix_tests {
            return Precondition::Skip("--fix-tests not requested".to_string());
        }
        match Self::tests_plan(ctx) {
            None => Precondition::Skip("no related tests found".to_string()),
            Some(Ok(plan)) if plan.run_commands.is_empty() => {
                Precondition::Skip("tests plan has no run commands".to_string())
            }
            // A plan that no longer parses is reported by `run`.
            Some(_) => Precondition::Run,
        }
    }

    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let plan = Self::tests_plan(ctx)
            .ok_or_else(|| PipelineError::Internal("tests plan missing".to_string()))??;
        let mut allowed = staged_list(ctx);
        allowed.extend(plan.related_tests.iter().cloned());
        allowed.sort();
        allowed.dedup();
        let allowlist = scope_of(&allowed)?;
        let workspace = ctx.workspace_path().to_path_buf();
        let verifier = env.verifiers.tests(&workspace, &plan.commands());
        let verify = VerifyRequest {
            workdir: workspace.clone(),
            files: allowed.clone(),
        };
        let base = PromptInput {
            allowed_files: allowed,
            tests_plan: ctx.tests_plan_document().map(str::to_string),
            ..payload(ctx)?
        };

        env.retry
            .run(verifier.as_ref(), &verify, &env.cancel, log, |feedback, log| {
                let request = AgentRequest {
                    template: PromptTemplate::TestsFix,
                    payload: PromptInput {
                        feedback: Some(feedback.clone()),
                        ..base.clone()
                    },
                    allowlist: allowlist.clone(),
                };
                let response = env.invoker.invoke(&workspace, &request, log)?;
                accept_staged(
                    ctx.staged_files_mut(),
                    request.template,
                    &response.files_staged,
                    &allowlist,
                )
            })
    }
}

pub struct LintFix;

impl Step for LintFix {
    fn name(&self) -> &'static str {
        "lint_fix"
    }

    fn precondition(&self, ctx: &RunContext, env: &StepEnv<'_>) -> Precondition {
        if ctx.staged_files().is_empty() {
            return Precondition::Skip("no staged files".to_string());
        }
        match env.verifiers.lint(ctx.workspace_path()).availability() {
            Availability::Available => Precondition::Run,
            Availability::Unavailable(reason) => Precondition::Skip(reason),
        }
    }

    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let staged = staged_list(ctx);
        let allowlist = scope_of(&staged)?;
        let workspace = ctx.workspace_path().to_path_buf();
        let verifier = env.verifiers.lint(&workspace);
        let verify = VerifyRequest {
            workdir: workspace.clone(),
            files: staged.clone(),
        };
        let base = PromptInput {
            allowed_files: staged,
            ..payload(ctx)?
        };

        env.retry
            .run(verifier.as_ref(), &verify, &env.cancel, log, |feedback, log| {
                let request = AgentRequest {
                    template: PromptTemplate::LintFix,
                    payload: PromptInput {
                        feedback: Some(feedback.clone()),
                        ..base.clone()
                    },
                    allowlist: allowlist.clone(),
                };
                let response = env.invoker.invoke(&workspace, &request, log)?;
                accept_staged(
                    ctx.staged_files_mut(),
                    request.template,
                    &response.files_staged,
                    &allowlist,
                )
            })
    }
}

pub struct CommitMessage;

impl Step for CommitMessage {
    fn name(&self) -> &'static str {
        "commit_message"
    }

    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let staged = staged_list(ctx);
        let git = env.git(ctx);
        let diff = git
            .diff_against_head(&staged)
            .map_err(|e| PipelineError::version_control(&e))?;
        let new_files = git
            .untracked_among(&staged)
            .map_err(|e| PipelineError::version_control(&e))?;
        let request = AgentRequest {
            template: PromptTemplate::CommitMessage,
            payload: PromptInput {
                staged_files: staged,
                diff: Some(diff),
                new_files,
                ..payload(ctx)?
            },
            allowlist: FileScope::read_only(),
        };
        let response = env.invoker.invoke(ctx.workspace_path(), &request, log)?;
        let message = clean_commit_message(&response.summary);
        if message.is_empty() {
            return Err(PipelineError::Solve(
                "the commit message agent returned an empty message".to_string(),
            ));
        }
        ctx.set_commit_message(message)
    }
}

/// Strip code fences and wrapping quotes agents like to add around a message.
pub fn clean_commit_message(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        text = body.trim_end().strip_suffix("```").unwrap_or(body).trim();
    }
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            text = text[1..text.len() - 1].trim();
        }
    }
    text.to_string()
}

pub struct CommitPush;

impl Step for CommitPush {
    fn name(&self) -> &'static str {
        "commit_push"
    }

    #[instrument(skip_all)]
    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        _log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let branch = ctx.require_branch_name()?.to_string();
        let message = ctx.require_commit_message()?.to_string();
        let git = env.git(ctx);
        let vc = |e: anyhow::Error| PipelineError::version_control(&e);

        let current = git.current_branch().map_err(vc)?;
        if current != branch {
            return Err(PipelineError::VersionControl(format!(
                "expected to be on {branch}, found {current}"
            )));
        }
        git.reset_index().map_err(vc)?;
        let mut paths = Vec::new();
        for file in ctx.staged_files().files() {
            // Deleted files are staged too, as long as git knows them.
            if ctx.workspace_path().join(file).exists() || git.is_tracked(file).map_err(vc)? {
                paths.push(file.clone());
            }
        }
        git.add_paths(&paths).map_err(vc)?;
        if git.staged_paths().map_err(vc)?.is_empty() {
            return Err(PipelineError::Solve(
                "the staged files contain no changes to commit".to_string(),
            ));
        }
        let sha = git
            .commit(&message, ctx.flags().commit_no_verify)
            .map_err(vc)?;
        git.push_branch(&branch).map_err(vc)?;
        info!(sha = %sha, branch = %branch, "pushed commit");
        ctx.set_commit_sha(sha)
    }
}

pub struct Describe;

impl Step for Describe {
    fn name(&self) -> &'static str {
        "describe"
    }

    fn run(
        &self,
        ctx: &mut RunContext,
        _env: &StepEnv<'_>,
        _log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let issue = ctx.require_issue()?;
        let title = pr_title(&issue.key, &issue.summary);
        let body = pr_body(issue, ctx.require_commit_message()?, ctx.staged_files());
        ctx.set_pr_title(title)?;
        ctx.set_pr_body(body)
    }
}

/// Deterministic change-request description.
pub fn pr_body(issue: &Issue, commit_message: &str, staged: &ChangeSetTracker) -> String {
    let (subject, rest) = commit_message
        .split_once('\n')
        .unwrap_or((commit_message, ""));
    let summary = match rest.trim() {
        "" => subject.trim(),
        body => body,
    };
    let mut out = format!(
        "Resolves [{}]({}): {}\n\n## Summary\n\n{}\n\n## Files changed\n\n",
        issue.key, issue.url, issue.summary, summary
    );
    for file in staged.files() {
        out.push_str(&format!("- `{file}`\n"));
    }
    out
}

pub struct OpenChangeRequest;

impl Step for OpenChangeRequest {
    fn name(&self) -> &'static str {
        "open_change_request"
    }

    fn run(
        &self,
        ctx: &mut RunContext,
        env: &StepEnv<'_>,
        _log: &mut StepLog,
    ) -> Result<(), PipelineError> {
        let draft = ChangeRequestDraft {
            title: ctx
                .pr_title()
                .ok_or_else(|| {
                    PipelineError::Internal("pr_title is not available yet".to_string())
                })?
                .to_string(),
            body: ctx.pr_body().unwrap_or_default().to_string(),
            head: ctx.require_branch_name()?.to_string(),
            base: ctx.base_branch().to_string(),
        };
        let reference = env
            .host
            .open_change_request(&draft)
            .map_err(|e| PipelineError::Publish(format!("open change request: {e}")))?;
        ctx.set_change_request(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunFlags;
    use crate::core::types::WorkspaceKind;
    use crate::test_support::{
        ScriptedTurn, ScriptedVerifier, ScriptedVerifiers, StepHarness, TestRepo, sample_issue,
    };

    const PLAN: &str =
        "# Plan\n\n## Files to modify\n- `src/lib.rs`: return 43\n- `src/extra.rs`\n";

    fn ctx(repo: &TestRepo, flags: RunFlags) -> RunContext {
        let mut ctx = RunContext::new(
            "PROJ-1",
            repo.work(),
            WorkspaceKind::UserSupplied,
            "main",
            flags,
        );
        ctx.set_issue(sample_issue("PROJ-1", "Fix the answer")).expect("issue");
        ctx
    }

    /// Verifies the plan is captured into the context and removed from the workspace.
    #[test]
    fn plan_is_read_then_removed() {
        let repo = TestRepo::new();
        let harness = StepHarness::new(&repo, vec![ScriptedTurn::writes(&[(PLAN_FILE, PLAN)])]);
        let mut ctx = ctx(&repo, RunFlags::default());

        harness
            .with_env(|env| Plan.run(&mut ctx, env, &mut StepLog::default()))
            .expect("plan");

        assert_eq!(ctx.plan_document(), Some(PLAN));
        assert!(!repo.work().join(PLAN_FILE).exists());
    }

    #[test]
    fn missing_plan_is_a_solve_failure() {
        let repo = TestRepo::new();
        let harness = StepHarness::new(&repo, vec![ScriptedTurn::replies("nothing to plan")]);
        let mut ctx = ctx(&repo, RunFlags::default());

        let err = harness
            .with_env(|env| Plan.run(&mut ctx, env, &mut StepLog::default()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Solve(msg) if msg.contains(PLAN_FILE)));
    }

    /// Verifies the change set is exactly the declared files, whatever the agent staged.
    #[test]
    fn implement_stages_declared_files() {
        let repo = TestRepo::new();
        let harness = StepHarness::new(
            &repo,
            vec![
                ScriptedTurn::writes(&[("src/lib.rs", "pub fn answer() -> u32 { 43 }\n")])
                    .staging(&["src/lib.rs"]),
            ],
        );
        let mut ctx = ctx(&repo, RunFlags::default());
        ctx.set_plan_document(PLAN.to_string()).expect("plan");

        harness
            .with_env(|env| Implement.run(&mut ctx, env, &mut StepLog::default()))
            .expect("implement");

        let staged: Vec<&str> = ctx.staged_files().files().iter().map(String::as_str).collect();
        assert_eq!(staged, vec!["src/extra.rs", "src/lib.rs"]);
    }

    #[test]
    fn implement_writing_undeclared_file_fails() {
        let repo = TestRepo::new();
        let harness = StepHarness::new(
            &repo,
            vec![ScriptedTurn::writes(&[("src/lib.rs", "x\n"), ("Cargo.lock", "y\n")])],
        );
        let mut ctx = ctx(&repo, RunFlags::default());
        ctx.set_plan_document(PLAN.to_string()).expect("plan");

        let err = harness
            .with_env(|env| Implement.run(&mut ctx, env, &mut StepLog::default()))
            .unwrap_err();

        assert_eq!(err.category(), crate::core::types::ErrorCategory::AgentInvocation);
        assert!(ctx.staged_files().is_empty());
    }

    #[test]
    fn test_steps_skip_without_flag() {
        let repo = TestRepo::new();
        let harness = StepHarness::new(&repo, Vec::new());
        let ctx = ctx(&repo, RunFlags::default());

        harness.with_env(|env| {
            assert!(matches!(TestsPlanStep.precondition(&ctx, env), Precondition::Skip(_)));
            assert!(matches!(TestsFix.precondition(&ctx, env), Precondition::Skip(_)));
        });
    }

    #[test]
    fn lint_skips_when_verifier_unavailable() {
        let repo = TestRepo::new();
        let mut harness = StepHarness::new(&repo, Vec::new());
        let mut ctx = ctx(&repo, RunFlags::default());
        ctx.staged_files_mut().add_explicit("src/lib.rs").expect("stage");

        let skipped = harness.with_env(|env| LintFix.precondition(&ctx, env));
        assert_eq!(
            skipped,
            Precondition::Skip("pre-commit is not installed".to_string())
        );

        harness.verifiers =
            ScriptedVerifiers::default().with_lint(ScriptedVerifier::passing("pre-commit"));
        let runs = harness.with_env(|env| LintFix.precondition(&ctx, env));
        assert_eq!(runs, Precondition::Run);
    }

    #[test]
    fn tests_fix_skips_without_run_commands() {
        let repo = TestRepo::new();
        let harness = StepHarness::new(&repo, Vec::new());
        let mut ctx = ctx(&repo, RunFlags { fix_tests: true, commit_no_verify: false });
        ctx.set_tests_plan_document("## Related tests\n- `tests/answer.rs`\n".to_string())
            .expect("tests plan");

        let precondition = harness.with_env(|env| TestsFix.precondition(&ctx, env));
        assert_eq!(
            precondition,
            Precondition::Skip("tests plan has no run commands".to_string())
        );
    }

    #[test]
    fn commit_message_fences_and_quotes_are_stripped() {
        assert_eq!(
            clean_commit_message("```text\nfix: retry uploads\n\nBody.\n```"),
            "fix: retry uploads\n\nBody."
        );
        assert_eq!(clean_commit_message("\"fix: x\""), "fix: x");
        assert_eq!(clean_commit_message("  \n "), "");
    }

    #[test]
    fn step_order_is_fixed() {
        let names: Vec<&str> = default_steps().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "fetch_ticket",
                "create_branch",
                "checkout_branch",
                "plan",
                "implement",
                "tests_plan",
                "tests_fix",
                "lint_fix",
                "commit_message",
                "commit_push",
                "describe",
                "open_change_request",
            ]
        );
    }

    #[test]
    fn pr_body_links_ticket_and_lists_files() {
        let issue = Issue {
            key: "PROJ-123".to_string(),
            summary: "Fix bug".to_string(),
            description: String::new(),
            issue_type: None,
            status: None,
            url: "https://jira.example.com/browse/PROJ-123".to_string(),
        };
        let mut staged = ChangeSetTracker::new();
        staged.add_explicit("src/b.rs").expect("b");
        staged.add_explicit("src/a.rs").expect("a");

        let body = pr_body(&issue, "fix: handle empty input\n\nGuard the parser.", &staged);

        assert!(body.starts_with(
            "Resolves [PROJ-123](https://jira.example.com/browse/PROJ-123): Fix bug"
        ));
        assert!(body.contains("## Summary\n\nGuard the parser.\n"));
        assert!(body.ends_with("- `src/a.rs`\n- `src/b.rs`\n"));
    }
}
