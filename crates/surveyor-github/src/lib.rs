//! # GitHub configuration source
//!
//! Implements [`surveyor::ConfigSource`] against the GitHub REST API:
//! recursive tree listing of the default branch, raw file contents, and
//! the latest commit id (passed to the pipeline as provenance).
//!
//! Authentication is a bearer token. Anonymous operation works but is
//! subject to GitHub's unauthenticated rate limits, which a fleet of any
//! size will exhaust within a few ticks.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use surveyor_github::GithubConfigSource;
//!
//! let source = GithubConfigSource::new("collect-intel", "survey-blueprints")
//!     .with_branch("main")
//!     .with_token(std::env::var("GITHUB_TOKEN").ok());
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use surveyor::constants::{DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use surveyor::{ConfigSource, TreeEntry};
use tracing::{debug, warn};

/// Default GitHub API base.
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Errors from the GitHub source.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GithubSourceError {
    /// Transport-level failure.
    #[error("github request failed: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("github returned {status} for {path}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request path.
        path: String,
    },

    /// Response body did not match the expected shape.
    #[error("github response unparsable: {0}")]
    Decode(String),
}

impl From<GithubSourceError> for surveyor::Error {
    fn from(err: GithubSourceError) -> Self {
        surveyor::Error::Source(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeNode>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeNode {
    path: String,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
}

/// A [`ConfigSource`] backed by a GitHub repository.
pub struct GithubConfigSource {
    client: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
    branch: String,
    token: Option<String>,
}

impl GithubConfigSource {
    /// Create a source for `owner/repo`, branch `main`, anonymous.
    #[must_use]
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_REQUEST_TIMEOUT)
            .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
            .user_agent("surveyor-scheduler")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            branch: "main".to_string(),
            token: None,
        }
    }

    /// Branch to read (default `main`).
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Bearer token; `None` keeps anonymous access.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Override the API base URL (GitHub Enterprise, tests).
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, url: &str, accept: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(url).header("Accept", accept);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send(
        &self,
        url: &str,
        accept: &str,
        path: &str,
    ) -> Result<reqwest::Response, GithubSourceError> {
        let response = self
            .request(url, accept)
            .send()
            .await
            .map_err(|e| GithubSourceError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GithubSourceError::Status {
                status: response.status().as_u16(),
                path: path.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ConfigSource for GithubConfigSource {
    async fn list_tree(&self) -> surveyor::Result<Vec<TreeEntry>> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_base, self.owner, self.repo, self.branch
        );
        let response = self
            .send(&url, "application/vnd.github+json", "git/trees")
            .await
            .map_err(surveyor::Error::from)?;
        let body: TreeResponse = response
            .json()
            .await
            .map_err(|e| GithubSourceError::Decode(e.to_string()))
            .map_err(surveyor::Error::from)?;

        if body.truncated {
            // GitHub truncates enormous trees; a partial listing would
            // silently drop blueprints from scheduling.
            warn!(
                owner = %self.owner,
                repo = %self.repo,
                "github tree listing truncated; some blueprints may be invisible"
            );
        }

        let entries: Vec<TreeEntry> = body
            .tree
            .into_iter()
            .filter(|node| node.node_type == "blob")
            .map(|node| TreeEntry {
                path: node.path,
                size: node.size,
            })
            .collect();
        debug!(count = entries.len(), "listed configuration tree");
        Ok(entries)
    }

    async fn fetch_file(&self, path: &str) -> surveyor::Result<String> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.api_base, self.owner, self.repo, path, self.branch
        );
        let response = self
            .send(&url, "application/vnd.github.raw", path)
            .await
            .map_err(surveyor::Error::from)?;
        response
            .text()
            .await
            .map_err(|e| GithubSourceError::Transport(e.to_string()))
            .map_err(surveyor::Error::from)
    }

    async fn latest_commit(&self) -> surveyor::Result<String> {
        let url = format!(
            "{}/repos/{}/{}/commits/{}",
            self.api_base, self.owner, self.repo, self.branch
        );
        let response = self
            .send(&url, "application/vnd.github+json", "commits")
            .await
            .map_err(surveyor::Error::from)?;
        let body: CommitResponse = response
            .json()
            .await
            .map_err(|e| GithubSourceError::Decode(e.to_string()))
            .map_err(surveyor::Error::from)?;
        Ok(body.sha)
    }
}
