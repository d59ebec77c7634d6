//! Test doubles and fixtures shared by unit and integration tests.
//!
//! Everything here talks to real git (a bare `origin` plus a work clone in a
//! temp dir) but fakes the network services and the agent CLI.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde_json::json;
use tempfile::TempDir;

use crate::core::types::{ChangeRequestRef, Issue};
use crate::invoker::{AgentInvoker, InvokeOptions};
use crate::io::agent::{AgentBackend, BackendRequest};
use crate::io::backoff::Backoff;
use crate::io::config::Settings;
use crate::io::git::GitOptions;
use crate::io::host::{ChangeRequestDraft, CloneSource, HostClient, HostError};
use crate::io::http::HttpError;
use crate::io::run_log::RunLog;
use crate::io::signals::CancelToken;
use crate::io::ticket::{TicketClient, TicketError};
use crate::io::verifier::{Availability, Verifier, VerifierOutcome, VerifierProvider, VerifyRequest};
use crate::retry::RetryPolicy;
use crate::steps::StepEnv;

fn run_git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).to_string()
}

/// A work clone with a local bare `origin`, both on `main` with one commit.
pub struct TestRepo {
    _root: TempDir,
    origin: PathBuf,
    work: PathBuf,
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRepo {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let origin = root.path().join("origin.git");
        let work = root.path().join("work");
        fs::create_dir_all(&work).expect("create work dir");

        run_git(root.path(), &["init", "--quiet", "--bare", "origin.git"]);
        run_git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        run_git(&work, &["init", "--quiet"]);
        run_git(&work, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        for (key, value) in [
            ("user.email", "dev@example.com"),
            ("user.name", "Dev"),
            ("commit.gpgsign", "false"),
        ] {
            run_git(&work, &["config", key, value]);
        }
        fs::create_dir_all(work.join("src")).expect("create src");
        fs::write(work.join("src/lib.rs"), "pub fn answer() -> u32 {\n    42\n}\n")
            .expect("write lib.rs");
        fs::write(work.join("README.md"), "# widgets\n").expect("write readme");
        run_git(&work, &["add", "-A"]);
        run_git(&work, &["commit", "--quiet", "-m", "initial commit"]);
        let origin_arg = origin.to_string_lossy().to_string();
        run_git(&work, &["remote", "add", "origin", &origin_arg]);
        run_git(&work, &["push", "--quiet", "-u", "origin", "main"]);

        Self {
            _root: root,
            origin,
            work,
        }
    }

    pub fn work(&self) -> &Path {
        &self.work
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.work.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.work.join(rel)).expect("read file")
    }

    /// Run git in the work clone and return stdout.
    pub fn git(&self, args: &[&str]) -> String {
        run_git(&self.work, args)
    }

    /// Run git against the bare origin and return stdout.
    pub fn origin_git(&self, args: &[&str]) -> String {
        run_git(&self.origin, args)
    }
}

/// What one scripted agent invocation does.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    /// `(path, Some(contents))` writes, `(path, None)` deletes.
    edits: Vec<(String, Option<String>)>,
    files_written: Option<Vec<String>>,
    files_staged: Vec<String>,
    summary: String,
    raw: Option<String>,
    failure: Option<String>,
    cancel: Option<CancelToken>,
    /// Runs in the workdir before any edit, for side effects git status cannot see.
    before: Option<fn(&Path)>,
}

fn owned(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| (*p).to_string()).collect()
}

impl ScriptedTurn {
    /// Write files; `files_written` defaults to exactly these paths.
    pub fn writes(files: &[(&str, &str)]) -> Self {
        Self {
            edits: files
                .iter()
                .map(|(path, contents)| ((*path).to_string(), Some((*contents).to_string())))
                .collect(),
            summary: "done".to_string(),
            ..Self::default()
        }
    }

    /// Change nothing and answer with `summary`.
    pub fn replies(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            ..Self::default()
        }
    }

    /// Respond with `raw` verbatim instead of a well-formed response.
    pub fn raw_response(raw: &str) -> Self {
        Self {
            raw: Some(raw.to_string()),
            ..Self::default()
        }
    }

    /// The backend process fails.
    pub fn fails(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Simulate an interrupt arriving while the agent runs.
    pub fn cancelling(token: &CancelToken) -> Self {
        Self {
            cancel: Some(token.clone()),
            ..Self::default()
        }
    }

    pub fn deleting(mut self, paths: &[&str]) -> Self {
        self.edits
            .extend(paths.iter().map(|p| ((*p).to_string(), None)));
        self
    }

    /// Override the reported `files_written`.
    pub fn reporting(mut self, paths: &[&str]) -> Self {
        self.files_written = Some(owned(paths));
        self
    }

    pub fn staging(mut self, paths: &[&str]) -> Self {
        self.files_staged = owned(paths);
        self
    }

    pub fn summary(mut self, summary: &str) -> Self {
        self.summary = summary.to_string();
        self
    }

    pub fn before(mut self, hook: fn(&Path)) -> Self {
        self.before = Some(hook);
        self
    }

    fn response(&self) -> String {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let written = self.files_written.clone().unwrap_or_else(|| {
            self.edits
                .iter()
                .filter(|(_, contents)| contents.is_some())
                .map(|(path, _)| path.clone())
                .collect()
        });
        json!({
            "files_written": written,
            "files_staged": self.files_staged,
            "summary": self.summary,
        })
        .to_string()
    }
}

/// Agent backend that replays [`ScriptedTurn`]s in order.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    turns: RefCell<VecDeque<ScriptedTurn>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: RefCell::new(turns.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.turns.borrow().len()
    }
}

impl AgentBackend for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    fn invoke(&self, request: &BackendRequest) -> Result<()> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        let turn = self
            .turns
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent has no turns left"))?;
        if let Some(hook) = turn.before {
            hook(&request.workdir);
        }
        if let Some(reason) = &turn.failure {
            bail!("{reason}");
        }
        for (path, contents) in &turn.edits {
            let target = request.workdir.join(path);
            match contents {
                Some(contents) => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&target, contents)?;
                }
                None => fs::remove_file(&target)?,
            }
        }
        if let Some(token) = &turn.cancel {
            token.cancel();
            bail!("agent killed by interrupt");
        }
        fs::write(&request.output_path, turn.response())?;
        Ok(())
    }
}

/// Verifier that replays outcomes; the last one repeats forever.
#[derive(Debug)]
pub struct ScriptedVerifier {
    name: String,
    outcomes: RefCell<VecDeque<(bool, String)>>,
    availability: Availability,
    runs: Cell<u32>,
    files_seen: RefCell<Vec<Vec<String>>>,
}

impl ScriptedVerifier {
    pub fn sequence(name: &str, outcomes: &[(bool, &str)]) -> Self {
        Self {
            name: name.to_string(),
            outcomes: RefCell::new(
                outcomes
                    .iter()
                    .map(|(passed, output)| (*passed, (*output).to_string()))
                    .collect(),
            ),
            availability: Availability::Available,
            runs: Cell::new(0),
            files_seen: RefCell::new(Vec::new()),
        }
    }

    pub fn always_failing(name: &str, output: &str) -> Self {
        Self::sequence(name, &[(false, output)])
    }

    pub fn passing(name: &str) -> Self {
        Self::sequence(name, &[(true, "ok")])
    }

    pub fn unavailable(name: &str, reason: &str) -> Self {
        Self {
            availability: Availability::Unavailable(reason.to_string()),
            ..Self::sequence(name, &[])
        }
    }

    pub fn runs(&self) -> u32 {
        self.runs.get()
    }

    /// The file list of every run, in order.
    pub fn files_seen(&self) -> Vec<Vec<String>> {
        self.files_seen.borrow().clone()
    }
}

impl Verifier for ScriptedVerifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn availability(&self) -> Availability {
        self.availability.clone()
    }

    fn run(&self, request: &VerifyRequest) -> Result<VerifierOutcome> {
        self.runs.set(self.runs.get() + 1);
        self.files_seen.borrow_mut().push(request.files.clone());
        let mut outcomes = self.outcomes.borrow_mut();
        let (passed, output) = if outcomes.len() > 1 {
            outcomes.pop_front()
        } else {
            outcomes.front().cloned()
        }
        .ok_or_else(|| anyhow!("{} has no scripted outcome", self.name))?;
        Ok(VerifierOutcome { passed, output })
    }
}

struct Borrowed<'a>(&'a ScriptedVerifier);

impl Verifier for Borrowed<'_> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn availability(&self) -> Availability {
        self.0.availability()
    }

    fn run(&self, request: &VerifyRequest) -> Result<VerifierOutcome> {
        self.0.run(request)
    }
}

/// Provider handing out one scripted lint and one scripted test verifier.
pub struct ScriptedVerifiers {
    pub lint: ScriptedVerifier,
    pub tests: ScriptedVerifier,
    test_commands: RefCell<Vec<Vec<String>>>,
}

impl Default for ScriptedVerifiers {
    /// Both verifiers unavailable.
    fn default() -> Self {
        Self {
            lint: ScriptedVerifier::unavailable("pre-commit", "pre-commit is not installed"),
            tests: ScriptedVerifier::unavailable("tests", "no test commands"),
            test_commands: RefCell::new(Vec::new()),
        }
    }
}

impl ScriptedVerifiers {
    pub fn with_lint(mut self, lint: ScriptedVerifier) -> Self {
        self.lint = lint;
        self
    }

    pub fn with_tests(mut self, tests: ScriptedVerifier) -> Self {
        self.tests = tests;
        self
    }

    /// Commands the pipeline asked the test verifier to run.
    pub fn test_commands(&self) -> Vec<Vec<String>> {
        self.test_commands.borrow().clone()
    }
}

impl VerifierProvider for ScriptedVerifiers {
    fn lint(&self, _workdir: &Path) -> Box<dyn Verifier + '_> {
        Box::new(Borrowed(&self.lint))
    }

    fn tests(&self, _workdir: &Path, commands: &[String]) -> Box<dyn Verifier + '_> {
        self.test_commands.borrow_mut().push(commands.to_vec());
        Box::new(Borrowed(&self.tests))
    }
}

pub fn sample_issue(key: &str, summary: &str) -> Issue {
    Issue {
        key: key.to_string(),
        summary: summary.to_string(),
        description: "Steps to reproduce: call answer().".to_string(),
        issue_type: Some("Bug".to_string()),
        status: Some("To Do".to_string()),
        url: format!("https://acme.atlassian.net/browse/{key}"),
    }
}

/// Ticket tracker holding at most one issue.
#[derive(Debug, Default)]
pub struct FakeTicketClient {
    issue: Option<Issue>,
    fail_links: bool,
    fetches: Cell<u32>,
    links: RefCell<Vec<(String, String)>>,
}

impl FakeTicketClient {
    pub fn with_issue(issue: Issue) -> Self {
        Self {
            issue: Some(issue),
            ..Self::default()
        }
    }

    /// Every fetch answers "not found".
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failing_links(mut self) -> Self {
        self.fail_links = true;
        self
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.get()
    }

    /// `(key, branch)` pairs linked so far.
    pub fn links(&self) -> Vec<(String, String)> {
        self.links.borrow().clone()
    }
}

impl TicketClient for FakeTicketClient {
    fn fetch(&self, key: &str) -> Result<Issue, TicketError> {
        self.fetches.set(self.fetches.get() + 1);
        self.issue
            .clone()
            .filter(|issue| issue.key == key)
            .ok_or_else(|| TicketError::NotFound(key.to_string()))
    }

    fn link_branch(&self, key: &str, branch: &str, _url: &str) -> Result<(), TicketError> {
        if self.fail_links {
            return Err(TicketError::Http(HttpError::Api {
                status: 500,
                message: "remote link service down".to_string(),
            }));
        }
        self.links
            .borrow_mut()
            .push((key.to_string(), branch.to_string()));
        Ok(())
    }
}

/// Source host backed by the test repo's bare origin.
#[derive(Debug)]
pub struct FakeHostClient {
    origin: PathBuf,
    open_failure: Option<String>,
    drafts: RefCell<Vec<ChangeRequestDraft>>,
}

impl FakeHostClient {
    pub fn new(origin: &Path) -> Self {
        Self {
            origin: origin.to_path_buf(),
            open_failure: None,
            drafts: RefCell::new(Vec::new()),
        }
    }

    /// Opening a change request fails with `message`.
    pub fn rejecting_change_requests(mut self, message: &str) -> Self {
        self.open_failure = Some(message.to_string());
        self
    }

    pub fn drafts(&self) -> Vec<ChangeRequestDraft> {
        self.drafts.borrow().clone()
    }

    pub fn has_branch(&self, name: &str) -> bool {
        Command::new("git")
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")])
            .current_dir(&self.origin)
            .status()
            .is_ok_and(|s| s.success())
    }
}

impl HostClient for FakeHostClient {
    fn create_branch(&self, name: &str, base: &str) -> Result<(), HostError> {
        if !self.has_branch(base) {
            return Err(HostError::BaseBranchMissing(base.to_string()));
        }
        if !self.has_branch(name) {
            run_git(&self.origin, &["branch", "--quiet", name, base]);
        }
        Ok(())
    }

    fn open_change_request(
        &self,
        draft: &ChangeRequestDraft,
    ) -> Result<ChangeRequestRef, HostError> {
        if let Some(message) = &self.open_failure {
            return Err(HostError::Http(HttpError::Api {
                status: 422,
                message: message.clone(),
            }));
        }
        let mut drafts = self.drafts.borrow_mut();
        drafts.push(draft.clone());
        let number = drafts.len() as u64;
        Ok(ChangeRequestRef {
            number,
            url: format!("https://github.com/acme/widgets/pull/{number}"),
        })
    }

    fn branch_url(&self, name: &str) -> String {
        format!("https://github.com/acme/widgets/tree/{name}")
    }

    fn clone_source(&self) -> Result<CloneSource, HostError> {
        let url = self.origin.to_string_lossy().to_string();
        Ok(CloneSource {
            name: "widgets".to_string(),
            ssh_url: url.clone(),
            https_url: url,
        })
    }
}

/// Complete settings pointing diagnostics at `runs_dir`.
pub fn test_settings(runs_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.jira.base_url = "https://acme.atlassian.net".to_string();
    settings.jira.username = "dev@acme.io".to_string();
    settings.jira.api_token = "jira-token".to_string();
    settings.github.api_token = "gh-token".to_string();
    settings.github.repo_full_name = "acme/widgets".to_string();
    settings.core.runs_dir = Some(runs_dir.to_path_buf());
    settings.agent.timeout_secs = 30;
    settings.network.max_retries = 0;
    settings
}

pub fn invoke_options() -> InvokeOptions {
    InvokeOptions {
        timeout: Duration::from_secs(30),
        output_limit_bytes: 100_000,
        prompt_budget_bytes: 60_000,
        mcp_config_path: None,
    }
}

/// Fakes plus a run log, enough to build a [`StepEnv`] for a single step or engine test.
pub struct StepHarness {
    pub tickets: FakeTicketClient,
    pub host: FakeHostClient,
    pub agent: ScriptedAgent,
    pub verifiers: ScriptedVerifiers,
    pub retry: RetryPolicy,
    pub cancel: CancelToken,
    run_log: RunLog,
    _runs: TempDir,
}

impl StepHarness {
    pub fn new(repo: &TestRepo, turns: Vec<ScriptedTurn>) -> Self {
        let runs = tempfile::tempdir().expect("runs dir");
        let run_log = RunLog::create(runs.path(), "test-run").expect("run log");
        Self {
            tickets: FakeTicketClient::with_issue(sample_issue("PROJ-1", "Fix the answer")),
            host: FakeHostClient::new(repo.origin()),
            agent: ScriptedAgent::new(turns),
            verifiers: ScriptedVerifiers::default(),
            retry: RetryPolicy::default(),
            cancel: CancelToken::new(),
            run_log,
            _runs: runs,
        }
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    pub fn with_env<T>(&self, f: impl FnOnce(&StepEnv<'_>) -> T) -> T {
        let invoker = AgentInvoker::new(
            &self.agent,
            &self.run_log,
            invoke_options(),
            self.cancel.clone(),
        )
        .expect("invoker");
        let env = StepEnv {
            tickets: &self.tickets,
            host: &self.host,
            invoker: &invoker,
            verifiers: &self.verifiers,
            retry: self.retry,
            git: GitOptions {
                backoff: Backoff::immediate(0),
                cancel: Some(self.cancel.clone()),
                ..GitOptions::default()
            },
            cancel: self.cancel.clone(),
            timestamp: "20260101120000".to_string(),
        };
        f(&env)
    }
}
