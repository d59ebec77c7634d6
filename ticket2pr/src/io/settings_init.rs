//! Interactive `ticket2pr init`.
//!
//! Asks for every required setting, validates each answer as it is typed,
//! shows a redacted summary and writes the file only after confirmation.
//! Input and output are injected so the flow is testable without a terminal.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::io::config::{AgentBackendKind, Settings, is_http_url, is_repo_full_name, write_settings};

struct Prompter<'a, R, W> {
    input: &'a mut R,
    output: &'a mut W,
}

impl<R: BufRead, W: Write> Prompter<'_, R, W> {
    /// Ask until `check` accepts the answer. An empty answer keeps `current` when there is one.
    fn ask<F>(&mut self, label: &str, current: &str, secret: bool, check: F) -> Result<String>
    where
        F: Fn(&str) -> Result<(), String>,
    {
        loop {
            let shown = if current.is_empty() {
                String::new()
            } else if secret {
                " [keep current]".to_string()
            } else {
                format!(" [{current}]")
            };
            write!(self.output, "{label}{shown}: ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line).context("read answer")? == 0 {
                return Err(anyhow!("input closed before '{label}' was answered"));
            }
            let answer = match line.trim() {
                "" => current.to_string(),
                other => other.to_string(),
            };
            match check(&answer) {
                Ok(()) => return Ok(answer),
                Err(problem) => writeln!(self.output, "  {problem}")?,
            }
        }
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        write!(self.output, "{question} [Y/n]: ")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line).context("read confirmation")? == 0 {
            return Ok(false);
        }
        Ok(matches!(
            line.trim().to_ascii_lowercase().as_str(),
            "" | "y" | "yes"
        ))
    }
}

fn required(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("a value is required".to_string());
    }
    Ok(())
}

/// Run the interactive flow and write the result to `path`.
///
/// `existing` seeds the defaults so re-running init only changes what the user retypes.
pub fn run_init<R: BufRead, W: Write>(
    path: &Path,
    input: &mut R,
    output: &mut W,
    existing: Option<Settings>,
) -> Result<Settings> {
    let mut settings = existing.unwrap_or_default();
    let mut p = Prompter { input, output };
    writeln!(p.output, "Configuring ticket2pr ({})", path.display())?;

    settings.jira.base_url = p.ask("Jira base URL", &settings.jira.base_url, false, |v| {
        if is_http_url(v) {
            Ok(())
        } else {
            Err("expected an http(s) URL such as https://acme.atlassian.net".to_string())
        }
    })?;
    settings.jira.username = p.ask("Jira username", &settings.jira.username, false, required)?;
    settings.jira.api_token = p.ask("Jira API token", &settings.jira.api_token, true, required)?;
    settings.github.repo_full_name = p.ask(
        "GitHub repository (owner/repo)",
        &settings.github.repo_full_name,
        false,
        |v| {
            if is_repo_full_name(v) {
                Ok(())
            } else {
                Err("expected owner/repo".to_string())
            }
        },
    )?;
    settings.github.api_token =
        p.ask("GitHub API token", &settings.github.api_token, true, required)?;
    settings.core.base_branch =
        p.ask("Base branch", &settings.core.base_branch, false, required)?;
    let backend = p.ask(
        "Agent backend (claude or codex)",
        settings.agent.backend.default_program(),
        false,
        |v| v.parse::<AgentBackendKind>().map(|_| ()),
    )?;
    settings.agent.backend = backend.parse().map_err(|e: String| anyhow!(e))?;

    settings
        .validate()
        .map_err(|e| anyhow!("settings are still incomplete: {e}"))?;
    writeln!(p.output, "\n{}", settings.redacted_summary())?;
    if !p.confirm(&format!("Write settings to {}?", path.display()))? {
        return Err(anyhow!("init aborted; nothing was written"));
    }
    write_settings(path, &settings)?;
    writeln!(p.output, "Saved {}", path.display())?;
    info!(path = %path.display(), "settings written");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const ANSWERS: &str = "not a url\nhttps://acme.atlassian.net\ndev@acme.io\njira-token\nacme\nacme/widgets\ngh-token\n\ncodex\n\n";

    /// Verifies invalid answers are re-asked and the confirmed settings are written.
    #[test]
    fn init_writes_validated_settings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cfg/config.toml");
        let mut input = Cursor::new(ANSWERS.as_bytes());
        let mut output = Vec::new();

        let settings = run_init(&path, &mut input, &mut output, None).expect("init");

        assert_eq!(settings.jira.base_url, "https://acme.atlassian.net");
        assert_eq!(settings.github.repo_full_name, "acme/widgets");
        assert_eq!(settings.core.base_branch, "main");
        assert_eq!(settings.agent.backend, AgentBackendKind::Codex);
        let loaded = Settings::load(&path).expect("load");
        assert_eq!(loaded, settings);

        let transcript = String::from_utf8(output).expect("utf8");
        assert!(transcript.contains("expected an http(s) URL"));
        assert!(transcript.contains("expected owner/repo"));
        assert!(!transcript.contains("gh-token"));
    }

    #[test]
    fn declining_confirmation_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let answers = ANSWERS.trim_end_matches('\n').to_string() + "\nn\n";
        let mut input = Cursor::new(answers.into_bytes());
        let mut output = Vec::new();

        let err = run_init(&path, &mut input, &mut output, None).unwrap_err();
        assert!(err.to_string().contains("aborted"));
        assert!(!path.exists());
    }

    /// Verifies blank answers keep existing values, secrets included.
    #[test]
    fn rerun_keeps_existing_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut first = Cursor::new(ANSWERS.as_bytes());
        let existing = run_init(&path, &mut first, &mut Vec::new(), None).expect("first");

        let mut blank = Cursor::new("\n".repeat(8).into_bytes());
        let settings =
            run_init(&path, &mut blank, &mut Vec::new(), Some(existing.clone())).expect("rerun");
        assert_eq!(settings, existing);
    }

    #[test]
    fn closed_input_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut input = Cursor::new(Vec::new());
        let err = run_init(&temp.path().join("c.toml"), &mut input, &mut Vec::new(), None)
            .unwrap_err();
        assert!(err.to_string().contains("input closed"));
    }
}
