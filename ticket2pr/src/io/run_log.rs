//! Per-run diagnostics directory.
//!
//! Each run gets `<runs_dir>/<run-id>/` holding the rendered prompt, backend
//! log and raw response of every agent invocation, plus the final
//! `report.json`. It lives outside the workspace so nothing here can end up in
//! a commit, and nothing reads it back across runs.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;

/// JSON Schema every agent response must satisfy.
pub const AGENT_RESPONSE_SCHEMA: &str = include_str!("../../schemas/agent_response.schema.json");

#[derive(Debug)]
pub struct RunLog {
    run_id: String,
    dir: PathBuf,
    invocations: Cell<u32>,
}

/// Files belonging to one agent invocation.
#[derive(Debug, Clone)]
pub struct InvocationPaths {
    pub prompt_path: PathBuf,
    pub output_path: PathBuf,
    pub log_path: PathBuf,
    pub schema_path: PathBuf,
}

impl RunLog {
    /// Create `<runs_dir>/<run_id>/` and write the response schema into it.
    pub fn create(runs_dir: &Path, run_id: &str) -> Result<Self> {
        let dir = runs_dir.join(run_id);
        fs::create_dir_all(&dir).with_context(|| format!("create run dir {}", dir.display()))?;
        fs::write(dir.join("agent_response.schema.json"), AGENT_RESPONSE_SCHEMA)
            .with_context(|| format!("write schema into {}", dir.display()))?;
        Ok(Self {
            run_id: run_id.to_string(),
            dir,
            invocations: Cell::new(0),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh numbered directory for the next invocation of `template`.
    pub fn next_invocation(&self, template: &str) -> Result<InvocationPaths> {
        let seq = self.invocations.get() + 1;
        self.invocations.set(seq);
        let dir = self.dir.join("agents").join(format!("{seq:02}-{template}"));
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(InvocationPaths {
            prompt_path: dir.join("prompt.md"),
            output_path: dir.join("response.json"),
            log_path: dir.join("backend.log"),
            schema_path: self.dir.join("agent_response.schema.json"),
        })
    }

    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
        payload.push('\n');
        fs::write(&path, payload).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

/// `<timestamp>-<KEY>-<short id>`, unique enough for concurrent runs of different tickets.
pub fn new_run_id(issue_key: &str) -> String {
    let mut rng = rand::thread_rng();
    let short_id = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!(
        "{}-{issue_key}-{short_id}",
        Local::now().format("%Y%m%d-%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocations_get_sequential_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::create(temp.path(), "run-1").expect("create");
        let first = log.next_invocation("plan").expect("first");
        let second = log.next_invocation("implement").expect("second");
        assert!(first.prompt_path.ends_with("agents/01-plan/prompt.md"));
        assert!(second.output_path.ends_with("agents/02-implement/response.json"));
        assert!(first.schema_path.is_file());
    }

    #[test]
    fn schema_is_valid_json() {
        let value: serde_json::Value =
            serde_json::from_str(AGENT_RESPONSE_SCHEMA).expect("schema json");
        assert_eq!(value["type"], "object");
    }

    #[test]
    fn run_id_contains_issue_key() {
        let id = new_run_id("PROJ-1");
        assert!(id.contains("-PROJ-1-"));
        assert_ne!(id, new_run_id("PROJ-1"));
    }
}
