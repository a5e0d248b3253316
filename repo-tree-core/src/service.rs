//! End-to-end tree pipeline: resolve branch → consult cache → fetch → build → render → store.
//!
//! [`TreeService`] owns the two process-wide caches (rendered trees keyed by
//! `owner:repo:branch`, resolved default branches keyed by `owner:repo`) and a
//! [`ListingSource`]. It is constructed once at startup and shared by reference
//! (behind an `Arc`) with every request handler.
//!
//! # Responsibilities
//! - Serve a rendered tree from cache when fresh, reporting [`CacheStatus::Hit`].
//! - On a miss, call the upstream with no cache lock held, then build and render.
//! - Store into the cache only after a render fully succeeds, so an upstream
//!   failure never leaves a partial entry behind.
//!
//! Admission control is not done here; the HTTP layer runs the rate limiter
//! before calling into the service.

use std::time::Duration;

use tracing::{debug, error, info};

use crate::cache::{CacheKey, TtlCache};
use crate::contract::ListingSource;
use crate::error::{Result, ServiceError};
use crate::render::render;
use crate::trie::build;

/// Repository coordinates of one tree request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRequest {
    pub owner: String,
    pub repo: String,
    /// `None` means the repository's default branch.
    pub branch: Option<String>,
    /// Skip cache lookups. Fresh results are still stored.
    pub bypass_cache: bool,
}

impl TreeRequest {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: None,
            bypass_cache: false,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn bypassing_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    /// Parse `owner/repo` or `owner/repo/branch...` (leading `/` optional).
    /// Everything after the repository is the branch, so `feature/x` survives.
    pub fn from_path(path: &str) -> Result<Self> {
        let path = path.trim_start_matches('/');
        let mut parts = path.splitn(3, '/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();
        if owner.is_empty() || repo.is_empty() {
            return Err(ServiceError::InvalidRequest(format!(
                "missing owner or repository in {path:?}"
            )));
        }

        let mut request = TreeRequest::new(owner, repo);
        if let Some(branch) = parts.next().map(|b| b.trim_end_matches('/')) {
            if !branch.is_empty() {
                request.branch = Some(branch.to_string());
            }
        }
        request.validate()?;
        Ok(request)
    }

    /// Reject `.` and `..` segments. Upstream URLs are built from these
    /// coordinates, and a URL parser would resolve such segments to another path.
    pub fn validate(&self) -> Result<()> {
        let branch_segments = self.branch.iter().flat_map(|b| b.split('/'));
        let dot_segment = [self.owner.as_str(), self.repo.as_str()]
            .into_iter()
            .chain(branch_segments)
            .find(|segment| matches!(*segment, "." | ".."));
        match dot_segment {
            Some(segment) => Err(ServiceError::InvalidRequest(format!(
                "{segment:?} is not allowed as a path segment"
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeOutcome {
    pub text: String,
    pub branch: String,
    pub cache: CacheStatus,
}

pub struct TreeService<S> {
    source: S,
    trees: TtlCache<CacheKey, String>,
    branches: TtlCache<CacheKey, String>,
}

impl<S: ListingSource> TreeService<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            trees: TtlCache::new(ttl),
            branches: TtlCache::new(ttl),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The branch named by the request, or the repository's default branch.
    pub async fn resolve_branch(&self, request: &TreeRequest) -> Result<String> {
        if let Some(branch) = &request.branch {
            return Ok(branch.clone());
        }

        let key = CacheKey::default_branch(&request.owner, &request.repo);
        if !request.bypass_cache {
            if let Some(branch) = self.branches.get(&key) {
                debug!(%key, branch = %branch, "Default branch cache hit");
                return Ok(branch);
            }
        }

        info!(owner = %request.owner, repo = %request.repo, "Fetching default branch");
        let branch = self
            .source
            .fetch_default_branch(&request.owner, &request.repo)
            .await
            .map_err(|e| {
                error!(error = %e, owner = %request.owner, repo = %request.repo, "Default branch lookup failed");
                ServiceError::Upstream {
                    what: "default branch",
                    source: e,
                }
            })?;
        self.branches.set(key, branch.clone());
        Ok(branch)
    }

    /// Rendered tree for `request`, from cache when fresh.
    pub async fn tree(&self, request: &TreeRequest) -> Result<TreeOutcome> {
        request.validate()?;
        let branch = self.resolve_branch(request).await?;
        let key = CacheKey::tree(&request.owner, &request.repo, &branch);

        if !request.bypass_cache {
            if let Some(text) = self.trees.get(&key) {
                debug!(%key, "Tree cache hit");
                return Ok(TreeOutcome {
                    text,
                    branch,
                    cache: CacheStatus::Hit,
                });
            }
        }
        debug!(%key, bypass = request.bypass_cache, "Tree cache miss");

        info!(owner = %request.owner, repo = %request.repo, branch = %branch, "Fetching listing");
        let entries = self
            .source
            .fetch_listing(&request.owner, &request.repo, &branch)
            .await
            .map_err(|e| {
                error!(error = %e, %key, "Listing fetch failed");
                ServiceError::Upstream {
                    what: "tree",
                    source: e,
                }
            })?;

        let root_label = format!("{}/{} ({})", request.owner, request.repo, branch);
        let rendered = render(&build(&entries, &root_label));
        info!(
            %key,
            entries = entries.len(),
            directories = rendered.directories,
            files = rendered.files,
            "Rendered tree"
        );

        self.trees.set(key, rendered.text.clone());
        Ok(TreeOutcome {
            text: rendered.text,
            branch,
            cache: CacheStatus::Miss,
        })
    }

    /// Drop expired entries from both caches; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.trees.purge_expired() + self.branches.purge_expired()
    }

    pub fn cached_trees(&self) -> usize {
        self.trees.len()
    }
}
