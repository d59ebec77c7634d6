//! Ticket-tracking client (Jira REST API v2).

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::core::types::Issue;
use crate::io::backoff::Backoff;
use crate::io::config::JiraSettings;
use crate::io::http::{HttpError, check_status, read_json};

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("issue {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Narrow view of the ticket tracker used by the pipeline.
pub trait TicketClient {
    fn fetch(&self, key: &str) -> Result<Issue, TicketError>;

    /// Attach a link to the work branch on the ticket.
    fn link_branch(&self, key: &str, branch: &str, url: &str) -> Result<(), TicketError>;
}

pub struct JiraClient {
    base_url: String,
    username: String,
    token: String,
    client: Client,
    backoff: Backoff,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    fields: JiraFields,
}

#[derive(Debug, Deserialize)]
struct JiraFields {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    issuetype: Option<Named>,
    #[serde(default)]
    status: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

impl JiraClient {
    pub fn new(settings: &JiraSettings, client: Client, backoff: Backoff) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            token: settings.api_token.clone(),
            client,
            backoff,
        }
    }

    pub fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{key}", self.base_url)
    }

    fn issue_url(&self, key: &str) -> String {
        format!("{}/rest/api/2/issue/{key}", self.base_url)
    }
}

impl TicketClient for JiraClient {
    #[instrument(skip_all, fields(key))]
    fn fetch(&self, key: &str) -> Result<Issue, TicketError> {
        let url = self.issue_url(key);
        debug!(url, "fetching issue");
        let raw: JiraIssue = self
            .backoff
            .retry("jira fetch", HttpError::is_transient, || {
                let response = self
                    .client
                    .get(&url)
                    .basic_auth(&self.username, Some(&self.token))
                    .query(&[("fields", "summary,description,issuetype,status")])
                    .header("Accept", "application/json")
                    .send()?;
                read_json(response)
            })
            .map_err(|err| match err {
                HttpError::NotFound(_) => TicketError::NotFound(key.to_string()),
                other => TicketError::Http(other),
            })?;
        info!(key = %raw.key, "fetched issue");
        Ok(issue_from_raw(raw, &self.browse_url(key)))
    }

    #[instrument(skip_all, fields(key, branch))]
    fn link_branch(&self, key: &str, branch: &str, url: &str) -> Result<(), TicketError> {
        let endpoint = format!("{}/remotelink", self.issue_url(key));
        let body = json!({
            "object": {
                "url": url,
                "title": format!("Branch: {branch}"),
            }
        });
        self.backoff
            .retry("jira remote link", HttpError::is_transient, || {
                let response = self
                    .client
                    .post(&endpoint)
                    .basic_auth(&self.username, Some(&self.token))
                    .json(&body)
                    .send()?;
                check_status(response).map(|_| ())
            })?;
        Ok(())
    }
}

fn issue_from_raw(raw: JiraIssue, url: &str) -> Issue {
    Issue {
        key: raw.key,
        summary: raw.fields.summary.trim().to_string(),
        description: raw.fields.description.unwrap_or_default(),
        issue_type: raw.fields.issuetype.map(|t| t.name),
        status: raw.fields.status.map(|s| s.name),
        url: url.to_string(),
    }
}
