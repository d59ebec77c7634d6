//! Prompt rendering for agent invocations.
//!
//! Templates are Markdown with `<!-- section:KEY required|droppable -->`
//! markers. When a rendered prompt exceeds the byte budget, droppable
//! sections go first, then the last section is truncated. Every template puts
//! its bulkiest input (verifier output, diff) last so that is what gets cut.

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::plan::{PLAN_FILE, TESTS_PLAN_FILE};
use crate::core::types::Issue;

const TEMPLATES: &[(&str, &str)] = &[
    ("_ticket", include_str!("prompts/_ticket.md")),
    ("_response", include_str!("prompts/_response.md")),
    ("_feedback", include_str!("prompts/_feedback.md")),
    ("plan", include_str!("prompts/plan.md")),
    ("implement", include_str!("prompts/implement.md")),
    ("tests_plan", include_str!("prompts/tests_plan.md")),
    ("tests_fix", include_str!("prompts/tests_fix.md")),
    ("lint_fix", include_str!("prompts/lint_fix.md")),
    ("commit_message", include_str!("prompts/commit_message.md")),
];

/// Sections dropped, in order, when a prompt is over budget.
const DROP_ORDER: &[&str] = &["history", "new_files", "tests_plan"];

const SECTION_PATTERN: &str = r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->";

/// Which agent role a prompt is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    Plan,
    Implement,
    TestsPlan,
    TestsFix,
    LintFix,
    CommitMessage,
}

impl PromptTemplate {
    pub fn id(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Implement => "implement",
            Self::TestsPlan => "tests_plan",
            Self::TestsFix => "tests_fix",
            Self::LintFix => "lint_fix",
            Self::CommitMessage => "commit_message",
        }
    }

    fn summary_hint(self) -> &'static str {
        match self {
            Self::CommitMessage => "the full commit message.",
            Self::Plan | Self::TestsPlan => "two or three sentences on what you found.",
            _ => "two or three sentences on what you changed.",
        }
    }
}

/// Verifier failure handed to a repair invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifierFeedback {
    pub verifier: String,
    /// Attempt that produced `output` (1-based).
    pub attempt: u32,
    pub max_attempts: u32,
    /// Output of the latest failed run only; earlier outputs are summarized in `history`.
    pub output: String,
    /// True when `output` is identical to the previous attempt's.
    pub unchanged: bool,
    pub history: Vec<String>,
}

/// Everything a template may reference. Unused fields are left empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptInput {
    pub issue: Option<Issue>,
    pub allowed_files: Vec<String>,
    pub staged_files: Vec<String>,
    pub plan: Option<String>,
    pub tests_plan: Option<String>,
    pub feedback: Option<VerifierFeedback>,
    pub diff: Option<String>,
    pub new_files: Vec<String>,
}

#[derive(Serialize)]
struct RenderContext<'a> {
    #[serde(flatten)]
    input: &'a PromptInput,
    plan_file: &'static str,
    tests_plan_file: &'static str,
    summary_hint: &'static str,
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Renders templates and enforces the prompt byte budget.
pub struct PromptBuilder {
    env: Environment<'static>,
    section_re: Regex,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("load prompt template {name}"))?;
        }
        Ok(Self {
            env,
            section_re: Regex::new(SECTION_PATTERN).context("compile section pattern")?,
            budget_bytes,
        })
    }

    pub fn render(&self, template: PromptTemplate, input: &PromptInput) -> Result<String> {
        let rendered = self
            .env
            .get_template(template.id())
            .and_then(|t| {
                t.render(RenderContext {
                    input,
                    plan_file: PLAN_FILE,
                    tests_plan_file: TESTS_PLAN_FILE,
                    summary_hint: template.summary_hint(),
                })
            })
            .with_context(|| format!("render prompt {}", template.id()))?;
        let mut sections = self.parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    fn parse_sections(&self, rendered: &str) -> Vec<ParsedSection> {
        let markers: Vec<(usize, usize, String, bool)> = self
            .section_re
            .captures_iter(rendered)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((
                    whole.start(),
                    whole.end(),
                    caps.get(1)?.as_str().to_string(),
                    caps.get(2)?.as_str() == "required",
                ))
            })
            .collect();
        let mut sections = Vec::new();
        for (i, (_, body_start, key, required)) in markers.iter().enumerate() {
            let body_end = markers
                .get(i + 1)
                .map(|next| next.0)
                .unwrap_or(rendered.len());
            let content = rendered[*body_start..body_end].trim().to_string();
            if !content.is_empty() {
                sections.push(ParsedSection {
                    key: key.clone(),
                    required: *required,
                    content,
                });
            }
        }
        sections
    }
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len() + 2).sum()
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }
    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    const MARKER: &str = "\n[truncated]";
    let excess = total - budget;
    let keep = last.content.len().saturating_sub(excess + MARKER.len());
    let mut cut = keep;
    while !last.content.is_char_boundary(cut) {
        cut -= 1;
    }
    let before_len = last.content.len();
    last.content.truncate(cut);
    last.content.push_str(MARKER);
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue() -> Issue {
        Issue {
            key: "PROJ-7".to_string(),
            summary: "Retry flaky uploads".to_string(),
            description: "Uploads fail on 503.".to_string(),
            issue_type: Some("Bug".to_string()),
            status: None,
            url: "https://jira.example.com/browse/PROJ-7".to_string(),
        }
    }

    fn feedback(output: &str) -> VerifierFeedback {
        VerifierFeedback {
            verifier: "tests".to_string(),
            attempt: 2,
            max_attempts: 3,
            output: output.to_string(),
            unchanged: true,
            history: vec!["attempt 1: failed (12 lines)".to_string()],
        }
    }

    /// Verifies the implementation prompt names every allowed file and carries the plan.
    #[test]
    fn implement_prompt_lists_allowed_files() {
        let builder = PromptBuilder::new(50_000).expect("builder");
        let prompt = builder
            .render(
                PromptTemplate::Implement,
                &PromptInput {
                    issue: Some(issue()),
                    allowed_files: vec!["src/upload.rs".to_string(), "tests/upload.rs".to_string()],
                    plan: Some("## Files\n- `src/upload.rs`".to_string()),
                    ..PromptInput::default()
                },
            )
            .expect("render");
        assert!(prompt.contains("- `src/upload.rs`\n- `tests/upload.rs`"));
        assert!(prompt.contains("<plan>"));
        assert!(prompt.contains("Ticket PROJ-7 (Bug)"));
        assert!(prompt.contains("`files_written`"));
        assert!(!prompt.contains("section:"));
    }

    #[test]
    fn plan_prompt_names_plan_file() {
        let builder = PromptBuilder::new(50_000).expect("builder");
        let prompt = builder
            .render(
                PromptTemplate::Plan,
                &PromptInput {
                    issue: Some(issue()),
                    ..PromptInput::default()
                },
            )
            .expect("render");
        assert!(prompt.contains("`PLAN.md`"));
        assert!(prompt.contains("Uploads fail on 503."));
    }

    /// Verifies repair prompts put the latest output last and flag repeated output.
    #[test]
    fn repair_prompt_ends_with_latest_feedback() {
        let builder = PromptBuilder::new(50_000).expect("builder");
        let prompt = builder
            .render(
                PromptTemplate::TestsFix,
                &PromptInput {
                    issue: Some(issue()),
                    allowed_files: vec!["src/upload.rs".to_string()],
                    feedback: Some(feedback("FAILED test_upload")),
                    ..PromptInput::default()
                },
            )
            .expect("render");
        assert!(prompt.trim_end().ends_with("</feedback>"));
        assert!(prompt.contains("attempt 2 of 3"));
        assert!(prompt.contains("identical to the previous attempt"));
        assert!(prompt.contains("- attempt 1: failed (12 lines)"));
    }

    /// Verifies an oversized prompt drops history first and then truncates the feedback.
    #[test]
    fn budget_drops_history_then_truncates_feedback() {
        let builder = PromptBuilder::new(1_800).expect("builder");
        let prompt = builder
            .render(
                PromptTemplate::LintFix,
                &PromptInput {
                    issue: Some(issue()),
                    allowed_files: vec!["src/upload.rs".to_string()],
                    feedback: Some(feedback(&"E501 line too long\n".repeat(500))),
                    ..PromptInput::default()
                },
            )
            .expect("render");
        assert!(prompt.len() <= 1_800, "len {}", prompt.len());
        assert!(!prompt.contains("<history>"));
        assert!(prompt.contains("<contract>"));
        assert!(prompt.contains("[truncated]"));
    }
}
