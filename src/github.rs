//! Pull-request issuing against the GitHub REST API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

const GITHUB_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "dagsmith";

/// Everything needed to open one pull request.
#[derive(Debug, Clone, Serialize)]
pub struct PullRequestSpec {
    #[serde(skip)]
    pub owner: String,
    #[serde(skip)]
    pub repo: String,
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

/// The subset of GitHub's pull-request response we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: i64,
    pub html_url: String,
}

/// Seam between the orchestrator and whatever opens pull requests.
#[async_trait]
pub trait PullRequestIssuer: Send + Sync {
    async fn create_pull_request(&self, spec: &PullRequestSpec) -> Result<PullRequest>;
}

pub struct GitHubClient {
    http: reqwest::Client,
    token: String,
}

impl GitHubClient {
    pub fn new(token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
        }
    }

    fn pulls_url(owner: &str, repo: &str) -> String {
        format!("{GITHUB_API_BASE}/repos/{owner}/{repo}/pulls")
    }
}

#[async_trait]
impl PullRequestIssuer for GitHubClient {
    async fn create_pull_request(&self, spec: &PullRequestSpec) -> Result<PullRequest> {
        let url = Self::pulls_url(&spec.owner, &spec.repo);
        let pr: PullRequest = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .json(spec)
            .send()
            .await
            .context("failed to send pull request to GitHub")?
            .error_for_status()
            .context("GitHub pull request API returned error status")?
            .json()
            .await
            .context("failed to parse pull request response from GitHub")?;

        info!(
            number = pr.number,
            url = %pr.html_url,
            "opened pull request"
        );
        Ok(pr)
    }
}
