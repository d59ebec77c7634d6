//! Agent backends.
//!
//! An [`AgentBackend`] runs one non-interactive agent session in a workspace
//! and leaves the agent's structured response (JSON) at `output_path`. The
//! backend knows nothing about file scopes or templates; the invoker checks
//! the response and the workspace afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::io::config::{AgentBackendKind, AgentSettings};
use crate::io::process::{CommandOutput, ProcessLimits, run_command};
use crate::io::signals::CancelToken;

/// Parameters for one backend invocation.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub workdir: PathBuf,
    pub prompt: String,
    /// JSON Schema the response must satisfy.
    pub output_schema_path: PathBuf,
    /// Where the backend must leave the response JSON.
    pub output_path: PathBuf,
    /// Backend stdout/stderr log.
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub mcp_config_path: Option<PathBuf>,
    pub cancel: CancelToken,
}

impl BackendRequest {
    fn limits(&self) -> ProcessLimits {
        ProcessLimits::new(self.timeout, self.output_limit_bytes).with_cancel(self.cancel.clone())
    }
}

/// Abstraction over agent CLIs.
pub trait AgentBackend {
    fn name(&self) -> &str;

    /// Run the agent. Must write the response to `request.output_path`.
    fn invoke(&self, request: &BackendRequest) -> Result<()>;
}

/// Build the configured backend.
pub fn from_settings(settings: &AgentSettings) -> Box<dyn AgentBackend> {
    let program = settings.program().to_string();
    let credential = settings.credential.clone();
    match settings.backend {
        AgentBackendKind::Claude => Box::new(ClaudeBackend {
            program,
            credential,
        }),
        AgentBackendKind::Codex => Box::new(CodexBackend {
            program,
            credential,
        }),
    }
}

/// `claude -p` in print mode with JSON output.
pub struct ClaudeBackend {
    pub program: String,
    pub credential: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeEnvelope {
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: String,
}

impl AgentBackend for ClaudeBackend {
    fn name(&self) -> &str {
        "claude"
    }

    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &BackendRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting claude");
        let schema = fs::read_to_string(&request.output_schema_path).with_context(|| {
            format!("read output schema {}", request.output_schema_path.display())
        })?;
        let prompt = format!(
            "{}\n\nWhen you are done, reply with only a JSON object matching this schema:\n\n```json\n{}\n```\n",
            request.prompt,
            schema.trim()
        );

        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("json")
            .arg("--permission-mode")
            .arg("acceptEdits");
        if let Some(mcp) = &request.mcp_config_path {
            cmd.arg("--mcp-config").arg(mcp);
        }
        if let Some(key) = &self.credential {
            cmd.env("ANTHROPIC_API_KEY", key);
        }
        cmd.current_dir(&request.workdir);

        let output = run_command(cmd, Some(prompt.as_bytes()), &request.limits())
            .with_context(|| format!("run {}", self.program))?;
        write_backend_log(&request.log_path, &output, request.output_limit_bytes)?;
        check_exit("claude", &output, request.timeout)?;

        let envelope: ClaudeEnvelope = serde_json::from_slice(&output.stdout)
            .context("parse claude output envelope")?;
        if envelope.is_error {
            return Err(anyhow!("claude reported an error: {}", envelope.result));
        }
        let response = extract_json_object(&envelope.result)
            .ok_or_else(|| anyhow!("claude reply contains no JSON object"))?;
        write_output(&request.output_path, response)?;
        debug!("claude completed successfully");
        Ok(())
    }
}

/// `codex exec` with a schema-constrained last message.
pub struct CodexBackend {
    pub program: String,
    pub credential: Option<String>,
}

impl AgentBackend for CodexBackend {
    fn name(&self) -> &str {
        "codex"
    }

    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &BackendRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting codex exec");
        if !request.output_schema_path.exists() {
            return Err(anyhow!(
                "missing output schema {}",
                request.output_schema_path.display()
            ));
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("exec")
            .arg("--sandbox")
            .arg("danger-full-access")
            .arg("--skip-git-repo-check")
            .arg("--output-schema")
            .arg(&request.output_schema_path)
            .arg("--output-last-message")
            .arg(&request.output_path)
            .arg("-")
            .current_dir(&request.workdir);
        if let Some(key) = &self.credential {
            cmd.env("OPENAI_API_KEY", key);
        }

        let output = run_command(cmd, Some(request.prompt.as_bytes()), &request.limits())
            .with_context(|| format!("run {} exec", self.program))?;
        write_backend_log(&request.log_path, &output, request.output_limit_bytes)?;
        check_exit("codex exec", &output, request.timeout)?;
        debug!("codex exec completed successfully");
        Ok(())
    }
}

fn check_exit(label: &str, output: &CommandOutput, timeout: Duration) -> Result<()> {
    if output.cancelled {
        return Err(anyhow!("{label} cancelled"));
    }
    if output.timed_out {
        warn!(timeout_secs = timeout.as_secs(), "{label} timed out");
        return Err(anyhow!("{label} timed out after {timeout:?}"));
    }
    if !output.status.success() {
        warn!(exit_code = ?output.status.code(), "{label} failed");
        return Err(anyhow!(
            "{label} failed with status {:?}: {}",
            output.status.code(),
            last_line(&output.stderr_lossy())
        ));
    }
    Ok(())
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
}

fn write_output(path: &Path, json: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output dir {}", parent.display()))?;
    }
    fs::write(path, format!("{json}\n")).with_context(|| format!("write {}", path.display()))
}

fn write_backend_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create backend log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&output.stdout_lossy());
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr_lossy());
    if output.timed_out {
        buf.push_str("\n[backend timed out]\n");
    }
    if output.cancelled {
        buf.push_str("\n[backend cancelled]\n");
    }
    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }
    fs::write(path, buf).with_context(|| format!("write backend log {}", path.display()))
}

/// Find the response object in free-form agent text.
///
/// Prefers the last ```json fenced block; otherwise the last top-level `{...}`
/// that parses as a JSON object.
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(block) = last_fenced_json(text) {
        return Some(block);
    }
    let mut found = None;
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<serde_json::Map<String, serde_json::Value>>();
        match stream.next() {
            Some(Ok(_)) => {
                let end = start + stream.byte_offset();
                found = Some(&text[start..end]);
                pos = end;
            }
            _ => pos = start + 1,
        }
    }
    found
}

fn last_fenced_json(text: &str) -> Option<&str> {
    let start = text.rfind("```json")?;
    let body_start = start + "```json".len();
    let body_end = text[body_start..].find("```")? + body_start;
    let body = text[body_start..body_end].trim();
    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(body)
        .ok()
        .map(|_| body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_block() {
        let text = "Done.\n```json\n{\"summary\": \"ok\"}\n```\n";
        assert_eq!(extract_json_object(text), Some("{\"summary\": \"ok\"}"));
    }

    #[test]
    fn extracts_trailing_object_after_prose() {
        let text = "I changed {some} things.\n{\"files_written\": [\"a.rs\"], \"summary\": \"x }\"}";
        assert_eq!(
            extract_json_object(text),
            Some("{\"files_written\": [\"a.rs\"], \"summary\": \"x }\"}")
        );
    }

    #[test]
    fn nested_objects_are_kept_whole() {
        let text = "{\"a\": {\"b\": 1}}";
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn prose_without_json_yields_none() {
        assert_eq!(extract_json_object("no braces here"), None);
        assert_eq!(extract_json_object("just {not json}"), None);
    }

    /// Verifies a failing backend program surfaces its exit status and leaves a log.
    #[test]
    fn codex_failure_is_reported_with_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let schema = temp.path().join("schema.json");
        std::fs::write(&schema, "{}").expect("schema");
        let script = temp.path().join("fake-codex");
        std::fs::write(&script, "#!/bin/sh\ncat >/dev/null\necho boom >&2\nexit 1\n")
            .expect("script");
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
                .expect("chmod");
        }
        let backend = CodexBackend {
            program: script.display().to_string(),
            credential: None,
        };
        let request = BackendRequest {
            workdir: temp.path().to_path_buf(),
            prompt: "prompt".to_string(),
            output_schema_path: schema,
            output_path: temp.path().join("out/response.json"),
            log_path: temp.path().join("out/backend.log"),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 1000,
            mcp_config_path: None,
            cancel: CancelToken::new(),
        };
        let err = backend.invoke(&request).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("codex exec failed"), "{message}");
        assert!(message.contains("boom"), "{message}");
        assert!(request.log_path.is_file());
    }
}
