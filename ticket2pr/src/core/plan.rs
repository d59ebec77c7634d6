//! Parsing of the plan documents agents write into the workspace.
//!
//! Both documents are Markdown. The implementation plan declares the files it
//! will touch as list items under any heading containing "Files"; the tests
//! plan lists related tests and the shell commands that run them.

use thiserror::Error;

use crate::core::scope::normalize_rel_path;

/// Implementation plan written by the planning agent.
pub const PLAN_FILE: &str = "PLAN.md";
/// Tests plan, written only when related tests exist.
pub const TESTS_PLAN_FILE: &str = "TESTS_PLAN.md";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan declares an invalid path: {0}")]
    InvalidPath(String),
    #[error("plan declares no files under a 'Files' heading")]
    NoDeclaredFiles,
}

/// Commands and files extracted from a tests plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestsPlan {
    pub related_tests: Vec<String>,
    pub setup_commands: Vec<String>,
    pub run_commands: Vec<String>,
}

impl TestsPlan {
    /// Setup commands followed by run commands, in document order.
    pub fn commands(&self) -> Vec<String> {
        self.setup_commands
            .iter()
            .chain(self.run_commands.iter())
            .cloned()
            .collect()
    }
}

struct Line<'a> {
    text: &'a str,
    in_fence: bool,
}

struct Section<'a> {
    /// Lowercased heading text without the leading `#`s.
    heading: String,
    lines: Vec<Line<'a>>,
}

fn split_sections(doc: &str) -> Vec<Section<'_>> {
    let mut sections = vec![Section {
        heading: String::new(),
        lines: Vec::new(),
    }];
    let mut in_fence = false;
    for text in doc.lines() {
        let trimmed = text.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && trimmed.starts_with('#') {
            sections.push(Section {
                heading: trimmed.trim_start_matches('#').trim().to_lowercase(),
                lines: Vec::new(),
            });
            continue;
        }
        if let Some(current) = sections.last_mut() {
            current.lines.push(Line { text, in_fence });
        }
    }
    sections
}

fn list_item(line: &str) -> Option<&str> {
    let t = line.trim_start();
    let rest = if let Some(rest) = t
        .strip_prefix("- ")
        .or_else(|| t.strip_prefix("* "))
        .or_else(|| t.strip_prefix("+ "))
    {
        rest
    } else {
        let digits = t.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let after = &t[digits..];
        after
            .strip_prefix(". ")
            .or_else(|| after.strip_prefix(") "))?
    };
    let rest = rest.trim();
    let rest = rest
        .strip_prefix("[ ] ")
        .or_else(|| rest.strip_prefix("[x] "))
        .unwrap_or(rest);
    Some(rest.trim())
}

fn backticked(item: &str) -> Option<&str> {
    let start = item.find('`')?;
    let after = &item[start + 1..];
    let end = after.find('`')?;
    Some(after[..end].trim())
}

/// Leading whitespace width, tabs counting as four columns.
fn indent(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// A bare word only counts as a path when it has a directory or an extension;
/// backticked tokens may be extensionless (`Makefile`).
fn looks_like_path(candidate: &str, backticked: bool) -> bool {
    if candidate.is_empty()
        || candidate
            .chars()
            .any(|c| c.is_whitespace() || "()[]{}<>|;$=!?".contains(c))
    {
        return false;
    }
    backticked || candidate.contains('/') || candidate.contains('.')
}

fn item_path(item: &str) -> Option<&str> {
    let (candidate, quoted) = match backticked(item) {
        Some(inner) => (inner, true),
        None => (item.split_whitespace().next()?, false),
    };
    let candidate = candidate
        .trim_matches(|c: char| c == '*' || c == '"' || c == '\'')
        .trim_end_matches([':', ',', ';']);
    looks_like_path(candidate, quoted).then_some(candidate)
}

/// Paths from the top-level list items of `section`. Nested items describe a
/// file, they do not declare one.
fn collect_paths(section: &Section<'_>, out: &mut Vec<String>) -> Result<(), PlanError> {
    let mut top_level: Option<usize> = None;
    for line in &section.lines {
        if line.in_fence {
            continue;
        }
        let Some(item) = list_item(line.text) else {
            continue;
        };
        let depth = indent(line.text);
        match top_level {
            Some(top) if depth > top => continue,
            Some(top) if depth == top => {}
            _ => top_level = Some(depth),
        }
        let Some(path) = item_path(item) else {
            continue;
        };
        let normalized = normalize_rel_path(path).map_err(PlanError::InvalidPath)?;
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    Ok(())
}

fn collect_commands(section: &Section<'_>, out: &mut Vec<String>) {
    for line in &section.lines {
        let command = if line.in_fence {
            let t = line.text.trim();
            if t.is_empty() || t.starts_with('#') {
                continue;
            }
            t.strip_prefix("$ ").unwrap_or(t)
        } else {
            match list_item(line.text).and_then(backticked) {
                Some(inner) if !inner.is_empty() => inner,
                _ => continue,
            }
        };
        out.push(command.to_string());
    }
}

fn has_word(heading: &str, word: &str) -> bool {
    heading
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}

/// Files declared by an implementation plan, in first-mention order.
pub fn declared_files(plan: &str) -> Result<Vec<String>, PlanError> {
    let mut files = Vec::new();
    for section in split_sections(plan) {
        if has_word(&section.heading, "files") {
            collect_paths(&section, &mut files)?;
        }
    }
    if files.is_empty() {
        return Err(PlanError::NoDeclaredFiles);
    }
    Ok(files)
}

/// Parse a tests plan. Missing sections yield empty lists.
pub fn parse_tests_plan(doc: &str) -> Result<TestsPlan, PlanError> {
    let mut plan = TestsPlan::default();
    for section in split_sections(doc) {
        if section.heading.contains("related tests") {
            collect_paths(&section, &mut plan.related_tests)?;
        } else if section.heading.contains("setup") {
            collect_commands(&section, &mut plan.setup_commands);
        } else if section.heading.contains("run command") {
            collect_commands(&section, &mut plan.run_commands);
        }
    }
    Ok(plan)
}
