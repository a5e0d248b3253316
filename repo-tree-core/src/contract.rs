//! # contract: the listing collaborator interface
//!
//! This module defines the single trait ([`ListingSource`]) through which the core
//! obtains a repository's default branch and its flat listing, plus the plain data
//! types that cross that boundary.
//!
//! ## Interface & Extensibility
//! - Implement [`ListingSource`] to plug in a new upstream (GitHub, a local fixture, ...).
//! - All methods are async and return [`FetchError`] on any upstream failure.
//! - Entries may arrive in any order; the core never relies on listing order.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall` so consumers can generate deterministic
//!   mocks (`MockListingSource`) for unit and integration tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Kind of a single listing entry, as reported by the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A file.
    Blob,
    /// A directory.
    Tree,
    /// A git submodule pointer. Rendered as a leaf.
    Commit,
}

impl EntryKind {
    pub fn is_tree(self) -> bool {
        matches!(self, EntryKind::Tree)
    }
}

/// One path in a flat listing. `path` is slash separated with no leading slash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

impl ListingEntry {
    pub fn blob(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Blob,
        }
    }

    pub fn tree(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Tree,
        }
    }
}

/// Failure reported by a [`ListingSource`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed with status: {status} ({url})")]
    Status { status: u16, url: String },

    #[error("error making request: {0}")]
    Request(String),

    #[error("error parsing response: {0}")]
    Decode(String),
}

/// Upstream that knows a repository's default branch and its full listing.
///
/// The trait is `Send` + `Sync` and intended for async/await usage; it is
/// implemented by the real HTTP client and by test mocks.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Resolve the repository's default branch name.
    async fn fetch_default_branch(&self, owner: &str, repo: &str) -> Result<String, FetchError>;

    /// Fetch every path of the repository at `branch`, recursively.
    async fn fetch_listing(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Vec<ListingEntry>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_upstream_entry_kinds() {
        let raw = r#"[
            {"path": "src", "type": "tree"},
            {"path": "src/lib.rs", "type": "blob"},
            {"path": "vendor/dep", "type": "commit"}
        ]"#;
        let entries: Vec<ListingEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(entries[0], ListingEntry::tree("src"));
        assert_eq!(entries[1], ListingEntry::blob("src/lib.rs"));
        assert_eq!(entries[2].kind, EntryKind::Commit);
        assert!(!entries[2].kind.is_tree());
    }

    #[test]
    fn rejects_unknown_kind() {
        let raw = r#"{"path": "x", "type": "symlink"}"#;
        assert!(serde_json::from_str::<ListingEntry>(raw).is_err());
    }
}
