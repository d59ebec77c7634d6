//! Source-hosting client (GitHub REST API).

use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, instrument};

use crate::core::types::ChangeRequestRef;
use crate::io::backoff::Backoff;
use crate::io::config::GithubSettings;
use crate::io::http::{HttpError, check_status, read_json};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("base branch '{0}' not found on the remote")]
    BaseBranchMissing(String),
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Clone URLs for the target repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneSource {
    /// Repository name, used to name the temporary checkout.
    pub name: String,
    pub ssh_url: String,
    pub https_url: String,
}

/// Everything needed to open a change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequestDraft {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// Narrow view of the source host used by the pipeline.
pub trait HostClient {
    /// Create `name` on the remote from the head of `base`. An existing branch is not an error.
    fn create_branch(&self, name: &str, base: &str) -> Result<(), HostError>;

    fn open_change_request(&self, draft: &ChangeRequestDraft)
    -> Result<ChangeRequestRef, HostError>;

    /// Web URL of a branch, for linking from the ticket.
    fn branch_url(&self, name: &str) -> String;

    fn clone_source(&self) -> Result<CloneSource, HostError>;
}

pub struct GitHubClient {
    api_base: String,
    web_base: String,
    repo: String,
    token: String,
    draft: bool,
    client: Client,
    backoff: Backoff,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    ssh_url: String,
    clone_url: String,
}

impl GitHubClient {
    pub fn new(settings: &GithubSettings, client: Client, backoff: Backoff) -> Self {
        let api_base = settings.api_base_url.trim_end_matches('/').to_string();
        Self {
            web_base: web_base_for(&api_base),
            api_base,
            repo: settings.repo_full_name.trim().to_string(),
            token: settings.api_token.clone(),
            draft: settings.draft,
            client,
            backoff,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}{path}", self.api_base, self.repo)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn base_sha(&self, base: &str) -> Result<String, HostError> {
        let url = self.url(&format!("/git/ref/heads/{base}"));
        let found: Result<GitRef, HttpError> =
            self.backoff
                .retry("github get ref", HttpError::is_transient, || {
                    read_json(self.authed(self.client.get(&url)).send()?)
                });
        match found {
            Ok(r) => Ok(r.object.sha),
            Err(HttpError::NotFound(_)) => Err(HostError::BaseBranchMissing(base.to_string())),
            Err(other) => Err(other.into()),
        }
    }
}

impl HostClient for GitHubClient {
    #[instrument(skip_all, fields(name, base))]
    fn create_branch(&self, name: &str, base: &str) -> Result<(), HostError> {
        let sha = self.base_sha(base)?;
        let url = self.url("/git/refs");
        let body = json!({ "ref": format!("refs/heads/{name}"), "sha": sha });
        let created = self
            .backoff
            .retry("github create ref", HttpError::is_transient, || {
                check_status(self.authed(self.client.post(&url)).json(&body).send()?).map(|_| ())
            });
        match created {
            Ok(()) => {
                info!(name, "created remote branch");
                Ok(())
            }
            Err(HttpError::Api { status: 422, .. }) => {
                info!(name, "remote branch already exists");
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    #[instrument(skip_all, fields(head = %draft.head, base = %draft.base))]
    fn open_change_request(
        &self,
        draft: &ChangeRequestDraft,
    ) -> Result<ChangeRequestRef, HostError> {
        let url = self.url("/pulls");
        let body = json!({
            "title": draft.title,
            "body": draft.body,
            "head": draft.head,
            "base": draft.base,
            "draft": self.draft,
        });
        let pr: PullRequest = self
            .backoff
            .retry("github create pull", HttpError::is_transient, || {
                read_json(self.authed(self.client.post(&url)).json(&body).send()?)
            })?;
        info!(number = pr.number, url = %pr.html_url, "opened pull request");
        Ok(ChangeRequestRef {
            number: pr.number,
            url: pr.html_url,
        })
    }

    fn branch_url(&self, name: &str) -> String {
        format!("{}/{}/tree/{name}", self.web_base, self.repo)
    }

    fn clone_source(&self) -> Result<CloneSource, HostError> {
        let url = self.url("");
        let repo: Repository = self
            .backoff
            .retry("github get repo", HttpError::is_transient, || {
                read_json(self.authed(self.client.get(&url)).send()?)
            })?;
        Ok(CloneSource {
            name: repo.name,
            ssh_url: repo.ssh_url,
            https_url: repo.clone_url,
        })
    }
}

/// `https://api.github.com` -> `https://github.com`;
/// GitHub Enterprise `https://host/api/v3` -> `https://host`.
fn web_base_for(api_base: &str) -> String {
    if api_base == "https://api.github.com" {
        return "https://github.com".to_string();
    }
    api_base
        .strip_suffix("/api/v3")
        .unwrap_or(api_base)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_base: &str) -> GitHubClient {
        let settings = GithubSettings {
            api_token: "t".to_string(),
            repo_full_name: "acme/widgets".to_string(),
            api_base_url: api_base.to_string(),
            draft: true,
        };
        GitHubClient::new(&settings, Client::new(), Backoff::immediate(0))
    }

    #[test]
    fn branch_url_points_at_web_ui() {
        assert_eq!(
            client("https://api.github.com/").branch_url("bug/PROJ-1-x"),
            "https://github.com/acme/widgets/tree/bug/PROJ-1-x"
        );
        assert_eq!(
            client("https://git.acme.io/api/v3").branch_url("b"),
            "https://git.acme.io/acme/widgets/tree/b"
        );
    }

    #[test]
    fn api_urls_are_repo_scoped() {
        assert_eq!(
            client("https://api.github.com").url("/pulls"),
            "https://api.github.com/repos/acme/widgets/pulls"
        );
    }
}
