//! Settings stored under `~/.ticket2pr/config.toml`, with environment overrides.
//!
//! Precedence is CLI flags > `TICKET2PR_*` environment variables > file >
//! defaults. The file is meant to be human-editable; missing fields fall back
//! to defaults, but credentials have none and must be supplied.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const CONFIG_DIR_NAME: &str = ".ticket2pr";
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Overrides the settings file location.
pub const CONFIG_PATH_ENV: &str = "TICKET2PR_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub core: CoreSettings,
    pub jira: JiraSettings,
    pub github: GithubSettings,
    pub agent: AgentSettings,
    pub verifier: VerifierSettings,
    pub network: NetworkSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreSettings {
    /// Branch new work is based on and change requests target.
    pub base_branch: String,
    /// Existing checkout to reuse instead of cloning a temporary one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,
    /// Where per-run diagnostics are written (defaults to `~/.ticket2pr/runs`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs_dir: Option<PathBuf>,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            workspace_path: None,
            runs_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JiraSettings {
    pub base_url: String,
    pub username: String,
    pub api_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubSettings {
    pub api_token: String,
    /// Target repository as `owner/repo`.
    pub repo_full_name: String,
    pub api_base_url: String,
    /// Open change requests as drafts.
    pub draft: bool,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            repo_full_name: String::new(),
            api_base_url: "https://api.github.com".to_string(),
            draft: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentBackendKind {
    #[default]
    Claude,
    Codex,
}

impl AgentBackendKind {
    pub fn default_program(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
        }
    }
}

impl FromStr for AgentBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            other => Err(format!("unknown agent backend '{other}' (expected claude or codex)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSettings {
    pub backend: AgentBackendKind,
    /// Executable to spawn; defaults to the backend's CLI name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    /// API key handed to the agent CLI; when unset the CLI's own login is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Prompt size above which droppable prompt sections are removed.
    pub prompt_budget_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_config_path: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            backend: AgentBackendKind::default(),
            program: None,
            credential: None,
            timeout_secs: 30 * 60,
            output_limit_bytes: 200_000,
            prompt_budget_bytes: 60_000,
            mcp_config_path: None,
        }
    }
}

impl AgentSettings {
    pub fn program(&self) -> &str {
        self.program
            .as_deref()
            .unwrap_or_else(|| self.backend.default_program())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifierSettings {
    /// Verifier runs per repair loop, including the first.
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Lint/format command; the staged files are appended as arguments.
    pub lint_command: Vec<String>,
    /// Lint is skipped when this file is absent from the workspace root.
    pub lint_config_file: String,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_secs: 15 * 60,
            output_limit_bytes: 100_000,
            lint_command: vec![
                "pre-commit".to_string(),
                "run".to_string(),
                "--files".to_string(),
            ],
            lint_config_file: ".pre-commit-config.yaml".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkSettings {
    /// Per-request timeout for ticket and host API calls.
    pub timeout_secs: u64,
    /// Retries for transient failures (HTTP and git network operations).
    pub max_retries: u32,
    /// Per-attempt timeout for `git clone/fetch/push`.
    pub git_timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            git_timeout_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Settings {
    /// Read settings from `path`. A missing file is a configuration error.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::Config(format!(
                "no settings file at {} (run `ticket2pr init`)",
                path.display()
            )));
        }
        let contents = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("read {}: {e}", path.display()))
        })?;
        toml::from_str(&contents)
            .map_err(|e| PipelineError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Apply `TICKET2PR_*` overrides using `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TICKET2PR_BASE_BRANCH") {
            self.core.base_branch = v;
        }
        if let Some(v) = get("TICKET2PR_WORKSPACE_PATH") {
            self.core.workspace_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("TICKET2PR_RUNS_DIR") {
            self.core.runs_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("TICKET2PR_JIRA_BASE_URL") {
            self.jira.base_url = v;
        }
        if let Some(v) = get("TICKET2PR_JIRA_USERNAME") {
            self.jira.username = v;
        }
        if let Some(v) = get("TICKET2PR_JIRA_API_TOKEN") {
            self.jira.api_token = v;
        }
        if let Some(v) = get("TICKET2PR_GITHUB_API_TOKEN") {
            self.github.api_token = v;
        }
        if let Some(v) = get("TICKET2PR_GITHUB_REPO") {
            self.github.repo_full_name = v;
        }
        if let Some(v) = get("TICKET2PR_GITHUB_API_URL") {
            self.github.api_base_url = v;
        }
        if let Some(v) = get("TICKET2PR_AGENT_BACKEND") {
            self.agent.backend = v.parse().map_err(PipelineError::Config)?;
        }
        if let Some(v) = get("TICKET2PR_AGENT_PROGRAM") {
            self.agent.program = Some(v);
        }
        if let Some(v) = get("TICKET2PR_AGENT_CREDENTIAL") {
            self.agent.credential = Some(v);
        }
        if let Some(v) = get("TICKET2PR_VERIFIER_MAX_ATTEMPTS") {
            self.verifier.max_attempts = v.trim().parse().map_err(|_| {
                PipelineError::Config(format!(
                    "TICKET2PR_VERIFIER_MAX_ATTEMPTS must be a positive integer, got '{v}'"
                ))
            })?;
        }
        Ok(())
    }

    /// Check that every required field is present and well-formed.
    ///
    /// All problems are reported together so a user can fix the file in one pass.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut problems = Vec::new();
        if self.core.base_branch.trim().is_empty() {
            problems.push("core.base_branch must not be empty".to_string());
        }
        if !is_http_url(&self.jira.base_url) {
            problems.push("jira.base_url must be an http(s) URL".to_string());
        }
        if self.jira.username.trim().is_empty() {
            problems.push("jira.username is required".to_string());
        }
        if self.jira.api_token.trim().is_empty() {
            problems.push("jira.api_token is required".to_string());
        }
        if self.github.api_token.trim().is_empty() {
            problems.push("github.api_token is required".to_string());
        }
        if !is_repo_full_name(&self.github.repo_full_name) {
            problems.push("github.repo_full_name must look like owner/repo".to_string());
        }
        if !is_http_url(&self.github.api_base_url) {
            problems.push("github.api_base_url must be an http(s) URL".to_string());
        }
        if self.agent.program.as_deref().is_some_and(|p| p.trim().is_empty()) {
            problems.push("agent.program must not be empty when set".to_string());
        }
        if self.agent.timeout_secs == 0 {
            problems.push("agent.timeout_secs must be > 0".to_string());
        }
        if self.agent.output_limit_bytes == 0 {
            problems.push("agent.output_limit_bytes must be > 0".to_string());
        }
        if self.verifier.max_attempts == 0 {
            problems.push("verifier.max_attempts must be >= 1".to_string());
        }
        if self.verifier.timeout_secs == 0 {
            problems.push("verifier.timeout_secs must be > 0".to_string());
        }
        if self
            .verifier
            .lint_command
            .first()
            .is_none_or(|c| c.trim().is_empty())
        {
            problems.push("verifier.lint_command must be a non-empty array".to_string());
        }
        if self.network.timeout_secs == 0 || self.network.git_timeout_secs == 0 {
            problems.push("network timeouts must be > 0".to_string());
        }
        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.logging.level.trim().to_ascii_lowercase().as_str())
        {
            problems.push(
                "logging.level must be one of trace, debug, info, warn, error".to_string(),
            );
        }

        if problems.is_empty() {
            return Ok(());
        }
        Err(PipelineError::Config(format!(
            "invalid settings:\n- {}",
            problems.join("\n- ")
        )))
    }

    /// Directory for per-run diagnostics.
    pub fn runs_dir(&self) -> PathBuf {
        if let Some(dir) = &self.core.runs_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .map(|home| home.join(CONFIG_DIR_NAME).join("runs"))
            .unwrap_or_else(|| std::env::temp_dir().join("ticket2pr-runs"))
    }

    /// One-line description safe to log (no secrets).
    pub fn redacted_summary(&self) -> String {
        format!(
            "jira={} github={} base_branch={} agent={:?} max_attempts={}",
            self.jira.base_url,
            self.github.repo_full_name,
            self.core.base_branch,
            self.agent.backend,
            self.verifier.max_attempts
        )
    }
}

pub fn is_http_url(value: &str) -> bool {
    let v = value.trim();
    let rest = v
        .strip_prefix("https://")
        .or_else(|| v.strip_prefix("http://"));
    rest.is_some_and(|r| !r.is_empty() && !r.starts_with('/'))
}

pub fn is_repo_full_name(value: &str) -> bool {
    let valid_part = |p: &str| {
        !p.is_empty()
            && p
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    match value.trim().split_once('/') {
        Some((owner, repo)) => valid_part(owner) && valid_part(repo),
        None => false,
    }
}

/// `~/.ticket2pr/config.toml`.
pub fn default_config_path() -> Result<PathBuf, PipelineError> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or_else(|| PipelineError::Config("cannot determine home directory".to_string()))
}

/// Resolve the settings path: explicit flag, then `TICKET2PR_CONFIG`, then the default.
pub fn resolve_config_path<F>(explicit: Option<&Path>, lookup: F) -> Result<PathBuf, PipelineError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = lookup(CONFIG_PATH_ENV).filter(|v| !v.trim().is_empty()) {
        return Ok(PathBuf::from(path));
    }
    default_config_path()
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("settings path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp settings {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace settings {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn complete() -> Settings {
        let mut s = Settings::default();
        s.jira.base_url = "https://acme.atlassian.net".to_string();
        s.jira.username = "dev@acme.io".to_string();
        s.jira.api_token = "jira-token".to_string();
        s.github.api_token = "gh-token".to_string();
        s.github.repo_full_name = "acme/widgets".to_string();
        s
    }

    /// Verifies the logged summary names the target without carrying any token.
    #[test]
    fn redacted_summary_omits_secrets() {
        let summary = complete().redacted_summary();
        assert!(summary.contains("acme/widgets"), "{summary}");
        assert!(!summary.contains("jira-token"), "{summary}");
        assert!(!summary.contains("gh-token"), "{summary}");
        assert!(!summary.contains("dev@acme.io"), "{summary}");
    }

    #[test]
    fn load_missing_is_config_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Settings::load(&temp.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("ticket2pr init"));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("config.toml");
        let settings = complete();
        write_settings(&path, &settings).expect("write");
        let loaded = Settings::load(&path).expect("load");
        assert_eq!(loaded, settings);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[github]\nrepo_full_name = \"acme/widgets\"\n").expect("write");
        let loaded = Settings::load(&path).expect("load");
        assert_eq!(loaded.github.repo_full_name, "acme/widgets");
        assert_eq!(loaded.github.api_base_url, "https://api.github.com");
        assert_eq!(loaded.verifier.max_attempts, 3);
        assert_eq!(loaded.core.base_branch, "main");
    }

    /// Verifies environment values win over file values.
    #[test]
    fn env_overrides_file_values() {
        let mut settings = complete();
        let env: HashMap<&str, &str> = HashMap::from([
            ("TICKET2PR_GITHUB_REPO", "other/repo"),
            ("TICKET2PR_AGENT_BACKEND", "codex"),
            ("TICKET2PR_VERIFIER_MAX_ATTEMPTS", "5"),
            ("TICKET2PR_JIRA_API_TOKEN", ""),
        ]);
        settings
            .apply_env(|k| env.get(k).map(|v| (*v).to_string()))
            .expect("apply env");
        assert_eq!(settings.github.repo_full_name, "other/repo");
        assert_eq!(settings.agent.backend, AgentBackendKind::Codex);
        assert_eq!(settings.agent.program(), "codex");
        assert_eq!(settings.verifier.max_attempts, 5);
        assert_eq!(settings.jira.api_token, "jira-token");
    }

    #[test]
    fn bad_env_value_is_config_error() {
        let mut settings = complete();
        let err = settings
            .apply_env(|k| (k == "TICKET2PR_VERIFIER_MAX_ATTEMPTS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut settings = Settings::default();
        settings.verifier.max_attempts = 0;
        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("jira.base_url"));
        assert!(err.contains("jira.api_token"));
        assert!(err.contains("github.api_token"));
        assert!(err.contains("owner/repo"));
        assert!(err.contains("max_attempts"));
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn repo_and_url_shapes() {
        assert!(is_repo_full_name("acme/widgets.rs"));
        assert!(!is_repo_full_name("acme"));
        assert!(!is_repo_full_name("acme/widgets/extra"));
        assert!(is_http_url("http://jira.local"));
        assert!(!is_http_url("jira.local"));
        assert!(!is_http_url("https://"));
    }

    #[test]
    fn config_path_prefers_flag_then_env() {
        let flag = Path::new("/tmp/flag.toml");
        let from_flag = resolve_config_path(Some(flag), |_| Some("/tmp/env.toml".to_string()))
            .expect("resolve");
        assert_eq!(from_flag, flag);
        let from_env =
            resolve_config_path(None, |_| Some("/tmp/env.toml".to_string())).expect("resolve");
        assert_eq!(from_env, PathBuf::from("/tmp/env.toml"));
    }
}
