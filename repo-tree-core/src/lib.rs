#![doc = "repo-tree-core: core logic library for repo-tree."]

//! Turns a repository's flat path listing into a `tree`-style text rendering,
//! and holds the two pieces of shared state that guard that pipeline: a TTL
//! cache of rendered output and a per-client token bucket rate limiter.
//!
//! # Usage
//! - [`trie::build`] + [`render::render`] for the pure listing → text transform.
//! - [`service::TreeService`] for the cached, upstream-backed pipeline.
//! - [`limiter::TokenBucketLimiter`] for admission control in front of it.
//! - Implement [`contract::ListingSource`] to plug in an upstream.

pub mod cache;
pub mod contract;
pub mod error;
pub mod limiter;
pub mod render;
pub mod service;
pub mod trie;

pub use error::ServiceError;
