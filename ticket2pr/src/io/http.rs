//! Shared blocking HTTP plumbing for the ticket and host clients.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// HTTP-level failure, classified so callers can decide whether to retry.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request never produced a response.
    #[error("request failed: {message}")]
    Transport { message: String, transient: bool },

    #[error("authentication rejected (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl HttpError {
    /// Connection problems, timeouts, 429 and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { transient, .. } => *transient,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Auth { .. } | Self::NotFound(_) | Self::InvalidResponse(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Auth { status, .. } | Self::Api { status, .. } => Some(*status),
            Self::NotFound(_) => Some(404),
            Self::Transport { .. } | Self::InvalidResponse(_) => None,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::InvalidResponse(err.to_string());
        }
        Self::Transport {
            transient: err.is_timeout() || err.is_connect(),
            message: err.to_string(),
        }
    }
}

/// Build the blocking client used by every collaborator.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("ticket2pr/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("build HTTP client")
}

/// Map non-success statuses to [`HttpError`], passing successful responses through.
pub fn check_status(response: Response) -> Result<Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .ok()
        .map(|body| summarize_body(&body))
        .unwrap_or_else(|| "no response body".to_string());
    Err(match status.as_u16() {
        401 | 403 => HttpError::Auth {
            status: status.as_u16(),
            message,
        },
        404 => HttpError::NotFound(message),
        code => HttpError::Api {
            status: code,
            message,
        },
    })
}

/// Check the status and decode a JSON body.
pub fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, HttpError> {
    check_status(response)?
        .json()
        .map_err(|e| HttpError::InvalidResponse(e.to_string()))
}

fn summarize_body(body: &str) -> String {
    const MAX: usize = 500;
    let trimmed = body.trim();
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }
    let mut end = MAX;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
