//! One end-to-end run: workspace, engine, release, report.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use tracing::{info, instrument, warn};

use crate::context::{RunContext, RunFlags};
use crate::core::naming::parse_issue_input;
use crate::engine::WorkflowEngine;
use crate::error::PipelineError;
use crate::invoker::{AgentInvoker, InvokeOptions};
use crate::io::agent::AgentBackend;
use crate::io::backoff::Backoff;
use crate::io::config::{NetworkSettings, Settings};
use crate::io::git::GitOptions;
use crate::io::host::HostClient;
use crate::io::run_log::{RunLog, new_run_id};
use crate::io::signals::CancelToken;
use crate::io::ticket::TicketClient;
use crate::io::verifier::VerifierProvider;
use crate::io::workspace::{WorkspaceLease, WorkspaceManager};
use crate::report::{ResultAggregator, RunReport};
use crate::retry::RetryPolicy;
use crate::steps::StepEnv;

/// What the user asked for on the command line.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Issue key or browse URL.
    pub issue: String,
    /// Existing checkout; overrides `core.workspace_path`.
    pub workspace: Option<PathBuf>,
    /// Overrides `core.base_branch`.
    pub base_branch: Option<String>,
    pub flags: RunFlags,
    /// Overrides `agent.mcp_config_path`.
    pub mcp_config_path: Option<PathBuf>,
}

/// External collaborators for a run. Production wires real clients; tests wire fakes.
pub struct Collaborators<'a> {
    pub tickets: &'a dyn TicketClient,
    pub host: &'a dyn HostClient,
    pub backend: &'a dyn AgentBackend,
    pub verifiers: &'a dyn VerifierProvider,
    pub workspaces: &'a WorkspaceManager,
}

/// Git timeouts and retries from the network settings.
pub fn git_options(network: &NetworkSettings, cancel: &CancelToken) -> GitOptions {
    GitOptions {
        network_timeout: Duration::from_secs(network.git_timeout_secs),
        backoff: Backoff::with_retries(network.max_retries),
        cancel: Some(cancel.clone()),
        ..GitOptions::default()
    }
}

/// Execute the pipeline for one issue.
///
/// Errors returned here happen before the engine starts (bad input, no
/// workspace). Once steps run, every outcome, failures included, comes back
/// as a [`RunReport`] whose `exit_code` the CLI exits with.
#[instrument(skip_all, fields(issue = %request.issue))]
pub fn run_pipeline(
    settings: &Settings,
    request: &RunRequest,
    collaborators: &Collaborators<'_>,
    cancel: &CancelToken,
    progress: impl Fn(&str) + 'static,
) -> Result<RunReport, PipelineError> {
    let key = parse_issue_input(&request.issue)
        .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
    let base_branch = request
        .base_branch
        .clone()
        .unwrap_or_else(|| settings.core.base_branch.clone());

    let run_id = new_run_id(&key);
    let run_log = RunLog::create(&settings.runs_dir(), &run_id)
        .map_err(|e| PipelineError::internal(&e))?;
    info!(run_id = %run_id, dir = %run_log.dir().display(), "run started");

    let lease = acquire_workspace(settings, request, collaborators)?;
    let options = InvokeOptions {
        timeout: Duration::from_secs(settings.agent.timeout_secs),
        output_limit_bytes: settings.agent.output_limit_bytes,
        prompt_budget_bytes: settings.agent.prompt_budget_bytes,
        mcp_config_path: request
            .mcp_config_path
            .clone()
            .or_else(|| settings.agent.mcp_config_path.clone()),
    };
    let invoker = AgentInvoker::new(collaborators.backend, &run_log, options, cancel.clone())
        .map_err(|e| PipelineError::internal(&e))?;
    let env = StepEnv {
        tickets: collaborators.tickets,
        host: collaborators.host,
        invoker: &invoker,
        verifiers: collaborators.verifiers,
        retry: RetryPolicy::new(settings.verifier.max_attempts),
        git: git_options(&settings.network, cancel),
        cancel: cancel.clone(),
        timestamp: Local::now().format("%Y%m%d%H%M%S").to_string(),
    };

    let ctx = RunContext::new(key, lease.path(), lease.kind(), base_branch, request.flags);
    let outcome = WorkflowEngine::default()
        .with_progress(progress)
        .run(ctx, &env);

    let release = lease.release();
    let report = ResultAggregator::aggregate(&outcome, &release, &run_id, run_log.dir());
    if let Err(err) = run_log.write_json("report.json", &report) {
        warn!(err = %format!("{err:#}"), "could not write report.json");
    }
    info!(status = ?report.status, exit_code = report.exit_code, "run finished");
    Ok(report)
}

fn acquire_workspace(
    settings: &Settings,
    request: &RunRequest,
    collaborators: &Collaborators<'_>,
) -> Result<WorkspaceLease, PipelineError> {
    let supplied = request
        .workspace
        .clone()
        .or_else(|| settings.core.workspace_path.clone());
    if let Some(path) = supplied {
        return collaborators
            .workspaces
            .use_existing(&path)
            .map_err(|e| PipelineError::InvalidInput(format!("{e:#}")));
    }
    let source = collaborators
        .host
        .clone_source()
        .map_err(|e| PipelineError::VersionControl(format!("look up clone URLs: {e}")))?;
    collaborators
        .workspaces
        .clone_temporary(&source)
        .map_err(|e| PipelineError::version_control(&e))
}
