//! Deterministic names derived from ticket fields.

use thiserror::Error;

/// Longest summary slug kept in a branch name.
pub const BRANCH_SLUG_MAX: usize = 100;
/// Longest branch name produced.
pub const BRANCH_NAME_MAX: usize = 255;
const TYPE_PREFIX_MAX: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{input}' is not an issue key (PROJ-123) or an issue browse URL")]
pub struct IssueInputError {
    pub input: String,
}

/// Lowercase `input` and reduce it to `[a-z0-9-]`, collapsing dash runs.
///
/// The result never starts or ends with `-` and is at most `max_len` chars.
pub fn sanitize_branch_name(input: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = false;
    for ch in input.chars().flat_map(char::to_lowercase) {
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '-'
        };
        if mapped == '-' {
            if last_dash {
                continue;
            }
            last_dash = true;
        } else {
            last_dash = false;
        }
        out.push(mapped);
    }
    let trimmed: String = out.trim_matches('-').chars().take(max_len).collect();
    trimmed.trim_end_matches('-').to_string()
}

/// Build `[<type>/]<KEY>-<summary-slug>-<timestamp>`, capped at [`BRANCH_NAME_MAX`].
///
/// The timestamp keeps names unique across runs for the same ticket without
/// querying the host for existing branches.
pub fn branch_name(key: &str, summary: &str, issue_type: Option<&str>, timestamp: &str) -> String {
    let prefix = issue_type
        .map(|t| sanitize_branch_name(t, TYPE_PREFIX_MAX))
        .filter(|t| !t.is_empty())
        .map(|t| format!("{t}/"))
        .unwrap_or_default();
    let slug = sanitize_branch_name(summary, BRANCH_SLUG_MAX);
    let mut stem = if slug.is_empty() {
        format!("{prefix}{key}")
    } else {
        format!("{prefix}{key}-{slug}")
    };
    let suffix = format!("-{timestamp}");
    let room = BRANCH_NAME_MAX.saturating_sub(suffix.len());
    if stem.len() > room {
        // Every component is ASCII at this point, so byte truncation is safe.
        stem.truncate(room);
        while stem.ends_with('-') {
            stem.pop();
        }
    }
    format!("{stem}{suffix}")
}

/// Change-request title: exactly `[<KEY>] <summary>`.
pub fn pr_title(key: &str, summary: &str) -> String {
    format!("[{key}] {}", summary.trim())
}

/// Accept an issue key or a browse URL and return the upper-cased key.
///
/// ```
/// use ticket2pr::core::naming::parse_issue_input;
/// assert_eq!(parse_issue_input("proj-7").unwrap(), "PROJ-7");
/// assert_eq!(
///     parse_issue_input("https://acme.atlassian.net/browse/PROJ-7?focus=1").unwrap(),
///     "PROJ-7"
/// );
/// ```
pub fn parse_issue_input(input: &str) -> Result<String, IssueInputError> {
    let trimmed = input.trim();
    let err = || IssueInputError {
        input: input.to_string(),
    };
    if !trimmed.contains("://") {
        return normalize_key(trimmed).ok_or_else(err);
    }

    if let Some((_, query)) = trimmed.split_once('?') {
        for pair in query.split(['&', '#']) {
            if let Some(value) = pair.strip_prefix("selectedIssue=")
                && let Some(key) = normalize_key(value)
            {
                return Ok(key);
            }
        }
    }
    let path = trimmed.split(['?', '#']).next().unwrap_or_default();
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if segment == "browse" {
            return segments.next().and_then(normalize_key).ok_or_else(err);
        }
    }
    Err(err())
}

fn normalize_key(raw: &str) -> Option<String> {
    let (project, number) = raw.rsplit_once('-')?;
    let mut project_chars = project.chars();
    let first = project_chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !project_chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}-{number}", project.to_ascii_uppercase()))
}
