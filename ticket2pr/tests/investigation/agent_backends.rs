//! Real agent CLIs driven through the invoker.
//!
//! Each test asks the agent for a tiny plan in a scratch repository and checks
//! that the structured response passes the contract and scope checks.
//!
//! # Running
//!
//! ```bash
//! cargo test --test investigation claude -- --ignored
//! cargo test --test investigation codex -- --ignored
//! ```

use std::process::Command;
use std::time::Duration;

use ticket2pr::context::StepLog;
use ticket2pr::core::plan::{PLAN_FILE, declared_files};
use ticket2pr::core::scope::FileScope;
use ticket2pr::invoker::{AgentInvoker, AgentRequest, InvokeOptions};
use ticket2pr::io::agent::{self, AgentBackend};
use ticket2pr::io::config::{AgentBackendKind, AgentSettings};
use ticket2pr::io::prompt::{PromptInput, PromptTemplate};
use ticket2pr::io::run_log::RunLog;
use ticket2pr::io::signals::CancelToken;
use ticket2pr::test_support::{TestRepo, sample_issue};

/// Agents are slow; a plan for a one-line change should still fit.
const AGENT_TIMEOUT: Duration = Duration::from_secs(300);

fn assert_cli_available(program: &str) {
    let output = Command::new(program)
        .arg("--version")
        .output()
        .unwrap_or_else(|e| panic!("{program} not in PATH: {e}"));
    assert!(
        output.status.success(),
        "{program} --version failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    println!("{program}: {}", String::from_utf8_lossy(&output.stdout).trim());
}

fn plan_with(backend: &dyn AgentBackend) {
    let repo = TestRepo::new();
    let runs = tempfile::tempdir().expect("runs dir");
    let run_log = RunLog::create(runs.path(), "investigation").expect("run log");
    let options = InvokeOptions {
        timeout: AGENT_TIMEOUT,
        output_limit_bytes: 1_000_000,
        prompt_budget_bytes: 60_000,
        mcp_config_path: None,
    };
    let invoker =
        AgentInvoker::new(backend, &run_log, options, CancelToken::new()).expect("invoker");
    let request = AgentRequest {
        template: PromptTemplate::Plan,
        payload: PromptInput {
            issue: Some(sample_issue(
                "PROJ-1",
                "answer() should return 43 instead of 42",
            )),
            ..PromptInput::default()
        },
        allowlist: FileScope::from_paths([PLAN_FILE]).expect("scope"),
    };
    let mut log = StepLog::default();

    let response = invoker
        .invoke(repo.work(), &request, &mut log)
        .expect("plan invocation");

    println!("summary: {}", response.summary);
    let plan = repo.read(PLAN_FILE);
    println!("{plan}");
    let files = declared_files(&plan).expect("plan declares files");
    assert!(files.iter().any(|f| f == "src/lib.rs"), "{files:?}");
    assert_eq!(log.agent_invocations, 1);
}

/// Verifies the Claude CLI is installed.
#[test]
#[ignore]
fn claude_cli_available() {
    assert_cli_available("claude");
}

/// Verifies `claude -p` produces a contract-conforming response and stays inside its scope.
#[test]
#[ignore]
fn claude_writes_plan_within_scope() {
    let backend = agent::from_settings(&AgentSettings {
        backend: AgentBackendKind::Claude,
        ..AgentSettings::default()
    });
    plan_with(backend.as_ref());
}

#[test]
#[ignore]
fn codex_cli_available() {
    assert_cli_available("codex");
}

/// Verifies `codex exec --output-schema` produces a contract-conforming response.
#[test]
#[ignore]
fn codex_writes_plan_within_scope() {
    let backend = agent::from_settings(&AgentSettings {
        backend: AgentBackendKind::Codex,
        ..AgentSettings::default()
    });
    plan_with(backend.as_ref());
}
