//! The single entry point for generative sub-tasks.
//!
//! Every invocation renders a prompt, runs the backend, validates the
//! structured response against the JSON Schema, and then checks that every
//! file the agent touched, reported or staged is inside the request's
//! allowlist. "Touched" comes from content snapshots of the workspace taken
//! before and after, so an agent cannot escape its scope by under-reporting.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use jsonschema::Validator;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::context::StepLog;
use crate::core::scope::{FileScope, normalize_rel_path};
use crate::error::{AgentInvocationError, PipelineError};
use crate::io::agent::{AgentBackend, BackendRequest};
use crate::io::git::{Git, GitOptions};
use crate::io::prompt::{PromptBuilder, PromptInput, PromptTemplate};
use crate::io::run_log::{AGENT_RESPONSE_SCHEMA, RunLog};
use crate::io::signals::CancelToken;
use crate::io::snapshot::WorkspaceSnapshot;

/// Limits applied to every invocation.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub prompt_budget_bytes: usize,
    pub mcp_config_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub template: PromptTemplate,
    pub payload: PromptInput,
    /// Paths the invocation may create, modify or delete.
    pub allowlist: FileScope,
}

/// A response that passed contract and scope checks. Paths are normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    pub files_written: Vec<String>,
    pub files_staged: Vec<String>,
    pub summary: String,
    /// Paths whose content changed during the invocation.
    pub touched: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    files_written: Vec<String>,
    files_staged: Vec<String>,
    summary: String,
}

pub struct AgentInvoker<'a> {
    backend: &'a dyn AgentBackend,
    run_log: &'a RunLog,
    prompts: PromptBuilder,
    validator: Validator,
    options: InvokeOptions,
    cancel: CancelToken,
}

impl<'a> AgentInvoker<'a> {
    pub fn new(
        backend: &'a dyn AgentBackend,
        run_log: &'a RunLog,
        options: InvokeOptions,
        cancel: CancelToken,
    ) -> anyhow::Result<Self> {
        let schema: Value = serde_json::from_str(AGENT_RESPONSE_SCHEMA)?;
        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| anyhow!("invalid agent response schema: {err}"))?;
        Ok(Self {
            backend,
            run_log,
            prompts: PromptBuilder::new(options.prompt_budget_bytes)?,
            validator,
            options,
            cancel,
        })
    }

    #[instrument(
        skip_all,
        fields(
            template = request.template.id(),
            allowlist = request.allowlist.paths().len()
        )
    )]
    pub fn invoke(
        &self,
        workdir: &Path,
        request: &AgentRequest,
        log: &mut StepLog,
    ) -> Result<AgentResponse, PipelineError> {
        let template = request.template.id();
        log.agent_invocations += 1;

        let prompt = self
            .prompts
            .render(request.template, &request.payload)
            .map_err(|e| PipelineError::internal(&e))?;
        let paths = self
            .run_log
            .next_invocation(template)
            .map_err(|e| PipelineError::internal(&e))?;
        fs::write(&paths.prompt_path, &prompt).map_err(|e| {
            PipelineError::Internal(format!("write {}: {e}", paths.prompt_path.display()))
        })?;

        let git = Git::with_options(
            workdir,
            GitOptions {
                cancel: Some(self.cancel.clone()),
                ..GitOptions::default()
            },
        );
        let before =
            WorkspaceSnapshot::capture(&git).map_err(|e| PipelineError::version_control(&e))?;

        info!(backend = self.backend.name(), "invoking agent");
        let backend_request = BackendRequest {
            workdir: workdir.to_path_buf(),
            prompt,
            output_schema_path: paths.schema_path.clone(),
            output_path: paths.output_path.clone(),
            log_path: paths.log_path.clone(),
            timeout: self.options.timeout,
            output_limit_bytes: self.options.output_limit_bytes,
            mcp_config_path: self.options.mcp_config_path.clone(),
            cancel: self.cancel.clone(),
        };
        if let Err(err) = self.backend.invoke(&backend_request) {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Interrupted);
            }
            return Err(AgentInvocationError::Backend {
                template: template.to_string(),
                reason: format!("{err:#}"),
            }
            .into());
        }

        let raw = self.load_response(template, &paths.output_path)?;
        let after =
            WorkspaceSnapshot::capture(&git).map_err(|e| PipelineError::version_control(&e))?;
        let touched = before.changed_paths(&after);
        debug!(
            touched = touched.len(),
            written = raw.files_written.len(),
            staged = raw.files_staged.len(),
            "agent finished"
        );

        let mut invalid = Vec::new();
        let files_written = normalize_all(&raw.files_written, &mut invalid);
        let files_staged = normalize_all(&raw.files_staged, &mut invalid);
        let mut outside = request
            .allowlist
            .outside(touched.iter().chain(&files_written).chain(&files_staged));
        outside.extend(invalid);
        outside.sort();
        outside.dedup();
        if !outside.is_empty() {
            warn!(paths = ?outside, "agent left its file scope");
            return Err(AgentInvocationError::ScopeViolation {
                template: template.to_string(),
                paths: outside,
            }
            .into());
        }

        Ok(AgentResponse {
            files_written,
            files_staged,
            summary: raw.summary.trim().to_string(),
            touched,
        })
    }

    fn load_response(&self, template: &str, path: &Path) -> Result<RawResponse, PipelineError> {
        let invalid = |reason: String| -> PipelineError {
            AgentInvocationError::InvalidResponse {
                template: template.to_string(),
                reason,
            }
            .into()
        };
        let contents = fs::read_to_string(path)
            .map_err(|e| invalid(format!("no response at {}: {e}", path.display())))?;
        let value: Value = serde_json::from_str(contents.trim())
            .map_err(|e| invalid(format!("response is not JSON: {e}")))?;
        if !self.validator.is_valid(&value) {
            let messages = self
                .validator
                .iter_errors(&value)
                .map(|err| err.to_string())
                .collect::<Vec<_>>();
            return Err(invalid(messages.join("; ")));
        }
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
    }
}

/// Normalize every path; unusable ones (absolute, `..`) go to `invalid` verbatim.
fn normalize_all(paths: &[String], invalid: &mut Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    for raw in paths {
        match normalize_rel_path(raw) {
            Ok(path) => {
                if !out.contains(&path) {
                    out.push(path);
                }
            }
            Err(_) => invalid.push(raw.clone()),
        }
    }
    out
}
