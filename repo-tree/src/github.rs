#![doc = "GitHub REST client implementing the core `ListingSource` contract."]
//
//! # GitHub listing source
//!
//! Bridges [`repo_tree_core::contract::ListingSource`] to the GitHub REST API:
//! - `GET {api_base}/repos/{owner}/{repo}` for the default branch.
//! - `GET {api_base}/repos/{owner}/{repo}/git/trees/{branch}?recursive=true` for the listing.
//!
//! The token is optional. Without it the client is anonymous and subject to
//! GitHub's unauthenticated quota; private repositories are visible only as far
//! as the token allows.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use repo_tree_core::contract::{FetchError, ListingEntry, ListingSource};

use crate::load_config::GitHubConfig;

const USER_AGENT: &str = concat!("repo-tree/", env!("CARGO_PKG_VERSION"));

/// Everything but RFC 3986 unreserved characters is escaped inside a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

/// A branch may span several segments (`feature/x`); each is escaped on its own.
fn branch_path(branch: &str) -> String {
    branch.split('/').map(segment).collect::<Vec<_>>().join("/")
}

#[derive(Debug, Deserialize)]
struct RepoDetails {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<ListingEntry>,
    #[serde(default)]
    truncated: bool,
}

pub struct GitHubClient {
    http: Client,
    api_base: String,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                tracing::error!(error = ?e, "GITHUB_TOKEN is not a valid header value");
                e
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        tracing::info!(
            api_base = %config.api_base,
            token_set = config.token.is_some(),
            "Initialized GitHubClient"
        );
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        tracing::debug!(url = %url, "GitHub API request");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = %status, url = %url, "GitHub API returned error status");
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ListingSource for GitHubClient {
    async fn fetch_default_branch(&self, owner: &str, repo: &str) -> Result<String, FetchError> {
        let url = format!("{}/repos/{}/{}", self.api_base, segment(owner), segment(repo));
        let details: RepoDetails = self.get_json(&url).await?;
        tracing::info!(owner, repo, branch = %details.default_branch, "Resolved default branch");
        Ok(details.default_branch)
    }

    async fn fetch_listing(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Vec<ListingEntry>, FetchError> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=true",
            self.api_base,
            segment(owner),
            segment(repo),
            branch_path(branch)
        );
        let response: TreeResponse = self.get_json(&url).await?;
        if response.truncated {
            tracing::warn!(
                owner,
                repo,
                branch,
                entries = response.tree.len(),
                "GitHub truncated the listing; rendering the partial tree"
            );
        }
        Ok(response.tree)
    }
}
