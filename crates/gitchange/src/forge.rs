//! Forge pull-request client.
//!
//! The `PullRequestCreator` trait is the seam other forges plug into; the
//! shipped implementation speaks the GitHub-compatible REST surface
//! (github.com and GitHub Enterprise under `<host>/api/v3`). Creation is
//! idempotent: an already-open pull request with the same head/base pair is
//! returned unchanged.

use std::time::{Duration, Instant};

use gitchange_retry::Backoff;
use serde::Deserialize;
use thiserror::Error;

/// Forge API failures, all retried with backoff by the reconciler.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// The token was rejected.
    #[error("forge authentication failed: {0}")]
    AuthFailed(String),
    /// The forge asked us to slow down; `retry_after` is seconds when the
    /// response carried a `Retry-After` header.
    #[error("forge rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },
    /// Transport failures, 5xx responses, and malformed payloads.
    #[error("forge upstream error: {0}")]
    Upstream(String),
}

/// An open pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestHandle {
    pub number: u64,
    pub url: String,
}

/// Everything needed to open (or find) a pull request.
#[derive(Debug, Clone)]
pub struct CreatePullRequest<'a> {
    pub repository: &'a str,
    pub base: &'a str,
    pub head: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub token: &'a str,
}

/// The seam a forge implementation fills.
pub trait PullRequestCreator {
    fn create(
        &self,
        request: &CreatePullRequest<'_>,
    ) -> impl Future<Output = Result<PullRequestHandle, ForgeError>> + Send;
}

/// GitHub-compatible forge client.
#[derive(Debug, Clone, Default)]
pub struct GithubForge {
    http: reqwest::Client,
    api_base_override: Option<String>,
}

impl GithubForge {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            api_base_override: None,
        }
    }

    /// Point the client at a fixed API base instead of deriving one from the
    /// repository host.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base_override = Some(base.into());
        self
    }

    fn api_base(&self, host: &str) -> String {
        match &self.api_base_override {
            Some(base) => base.trim_end_matches('/').to_string(),
            None if host == "github.com" => "https://api.github.com".to_string(),
            None => format!("https://{host}/api/v3"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    number: u64,
    html_url: String,
}

impl PullRequestCreator for GithubForge {
    async fn create(
        &self,
        request: &CreatePullRequest<'_>,
    ) -> Result<PullRequestHandle, ForgeError> {
        let (host, owner, repo) = repository_slug(request.repository)?;
        let pulls_url = format!("{}/repos/{owner}/{repo}/pulls", self.api_base(&host));

        let response = self
            .http
            .post(&pulls_url)
            .bearer_auth(request.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, "gitchange-operator")
            .json(&serde_json::json!({
                "title": request.title,
                "head": request.head,
                "base": request.base,
                "body": request.body,
            }))
            .send()
            .await
            .map_err(|e| ForgeError::Upstream(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            201 => {
                let payload: PullRequestPayload = response
                    .json()
                    .await
                    .map_err(|e| ForgeError::Upstream(format!("malformed create response: {e}")))?;
                Ok(PullRequestHandle {
                    number: payload.number,
                    url: payload.html_url,
                })
            }
            // Unprocessable usually means the pull request already exists;
            // resolve it to the open one for idempotence.
            422 => {
                let detail = response.text().await.unwrap_or_default();
                self.find_open(&pulls_url, &owner, request)
                    .await?
                    .ok_or(ForgeError::Upstream(format!(
                        "pull request was rejected and no open one matches: {detail}"
                    )))
            }
            401 => Err(ForgeError::AuthFailed(body_summary(response).await)),
            403 => {
                if rate_limited(&response) {
                    Err(ForgeError::RateLimited {
                        retry_after: retry_after_seconds(&response),
                    })
                } else {
                    Err(ForgeError::AuthFailed(body_summary(response).await))
                }
            }
            429 => Err(ForgeError::RateLimited {
                retry_after: retry_after_seconds(&response),
            }),
            _ => Err(ForgeError::Upstream(format!(
                "unexpected status {status}: {}",
                body_summary(response).await
            ))),
        }
    }
}

impl GithubForge {
    async fn find_open(
        &self,
        pulls_url: &str,
        owner: &str,
        request: &CreatePullRequest<'_>,
    ) -> Result<Option<PullRequestHandle>, ForgeError> {
        let response = self
            .http
            .get(pulls_url)
            .query(&[
                ("head", format!("{owner}:{}", request.head)),
                ("base", request.base.to_string()),
                ("state", "open".to_string()),
            ])
            .bearer_auth(request.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, "gitchange-operator")
            .send()
            .await
            .map_err(|e| ForgeError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ForgeError::Upstream(format!(
                "pull request lookup failed with {}",
                response.status()
            )));
        }

        let open: Vec<PullRequestPayload> = response
            .json()
            .await
            .map_err(|e| ForgeError::Upstream(format!("malformed lookup response: {e}")))?;
        Ok(open.into_iter().next().map(|p| PullRequestHandle {
            number: p.number,
            url: p.html_url,
        }))
    }
}

/// Retry a forge call with backoff, honoring `Retry-After`.
pub async fn create_with_retry<C: PullRequestCreator + Sync>(
    forge: &C,
    request: &CreatePullRequest<'_>,
    backoff: &Backoff,
    deadline: Instant,
) -> Result<PullRequestHandle, ForgeError> {
    let mut attempt = 1;
    loop {
        match forge.create(request).await {
            Ok(handle) => return Ok(handle),
            Err(err) => {
                if attempt >= backoff.max_attempts {
                    return Err(err);
                }
                let mut delay = backoff.delay(attempt);
                if let ForgeError::RateLimited {
                    retry_after: Some(seconds),
                } = &err
                {
                    delay = delay.max(Duration::from_secs(*seconds));
                }
                if Instant::now() + delay >= deadline {
                    return Err(err);
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// `(host, owner, repo)` of an HTTPS repository URL.
fn repository_slug(repository: &str) -> Result<(String, String, String), ForgeError> {
    let stripped = repository
        .strip_prefix("https://")
        .or_else(|| repository.strip_prefix("http://"))
        .ok_or_else(|| {
            ForgeError::Upstream(format!("{repository:?} is not an http(s) repository URL"))
        })?;
    let stripped = stripped.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = stripped.split('/');
    let host = parts.next().unwrap_or_default().to_string();
    let segments: Vec<&str> = parts.collect();
    if host.is_empty() || segments.len() < 2 {
        return Err(ForgeError::Upstream(format!(
            "cannot derive owner/repo from {repository:?}"
        )));
    }
    let repo = segments[segments.len() - 1].to_string();
    let owner = segments[segments.len() - 2].to_string();
    Ok((host, owner, repo))
}

fn rate_limited(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "0")
        || response.headers().contains_key(reqwest::header::RETRY_AFTER)
}

fn retry_after_seconds(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

async fn body_summary(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    body.chars().take(200).collect()
}
