use std::time::Duration;

use mockall::predicate::eq;
use repo_tree_core::contract::{FetchError, ListingEntry, MockListingSource};
use repo_tree_core::service::{CacheStatus, TreeRequest, TreeService};
use repo_tree_core::ServiceError;

const TTL: Duration = Duration::from_secs(600);

fn sample_listing() -> Vec<ListingEntry> {
    vec![
        ListingEntry::blob("src/lib.rs"),
        ListingEntry::tree("src"),
        ListingEntry::blob("Cargo.toml"),
    ]
}

#[tokio::test]
async fn explicit_branch_renders_then_serves_from_cache() {
    let mut source = MockListingSource::new();
    source.expect_fetch_default_branch().never();
    source
        .expect_fetch_listing()
        .with(eq("octo"), eq("demo"), eq("dev"))
        .times(1)
        .returning(|_, _, _| Ok(sample_listing()));

    let service = TreeService::new(source, TTL);
    let request = TreeRequest::new("octo", "demo").with_branch("dev");

    let first = service.tree(&request).await.expect("first render");
    assert_eq!(first.cache, CacheStatus::Miss);
    assert_eq!(first.branch, "dev");
    assert_eq!(
        first.text,
        "octo/demo (dev)\n├── Cargo.toml\n└── src/\n    └── lib.rs\n\n1 directories, 2 files\n"
    );

    let second = service.tree(&request).await.expect("cached render");
    assert_eq!(second.cache, CacheStatus::Hit);
    assert_eq!(second.text, first.text);
}

#[tokio::test]
async fn default_branch_is_resolved_once_and_cached() {
    let mut source = MockListingSource::new();
    source
        .expect_fetch_default_branch()
        .with(eq("octo"), eq("demo"))
        .times(1)
        .returning(|_, _| Ok("main".to_string()));
    source
        .expect_fetch_listing()
        .with(eq("octo"), eq("demo"), eq("main"))
        .times(1)
        .returning(|_, _, _| Ok(vec![ListingEntry::blob("README.md")]));

    let service = TreeService::new(source, TTL);
    let request = TreeRequest::new("octo", "demo");

    let first = service.tree(&request).await.unwrap();
    let second = service.tree(&request).await.unwrap();
    assert_eq!(first.branch, "main");
    assert_eq!(first.cache, CacheStatus::Miss);
    assert_eq!(second.cache, CacheStatus::Hit);
    assert!(first.text.starts_with("octo/demo (main)\n└── README.md\n"));
}

#[tokio::test]
async fn bypass_refetches_and_refreshes_cache() {
    let mut source = MockListingSource::new();
    source
        .expect_fetch_default_branch()
        .times(2)
        .returning(|_, _| Ok("main".to_string()));
    source
        .expect_fetch_listing()
        .times(2)
        .returning(|_, _, _| Ok(vec![ListingEntry::blob("a")]));

    let service = TreeService::new(source, TTL);
    let cached = TreeRequest::new("o", "r");
    let bypass = TreeRequest::new("o", "r").bypassing_cache(true);

    assert_eq!(service.tree(&cached).await.unwrap().cache, CacheStatus::Miss);
    assert_eq!(service.tree(&bypass).await.unwrap().cache, CacheStatus::Miss);
    assert_eq!(service.tree(&cached).await.unwrap().cache, CacheStatus::Hit);
}

#[tokio::test]
async fn upstream_failure_is_not_cached() {
    let mut source = MockListingSource::new();
    let mut calls = 0;
    source.expect_fetch_listing().times(2).returning(move |_, _, _| {
        calls += 1;
        if calls == 1 {
            Err(FetchError::Status {
                status: 502,
                url: "https://api.example/trees".to_string(),
            })
        } else {
            Ok(vec![ListingEntry::blob("ok.txt")])
        }
    });

    let service = TreeService::new(source, TTL);
    let request = TreeRequest::new("o", "r").with_branch("main");

    let err = service.tree(&request).await.unwrap_err();
    assert!(err.is_upstream());
    assert!(err.to_string().contains("Failed to get tree"));
    assert!(err.to_string().contains("502"));
    assert_eq!(service.cached_trees(), 0);

    let recovered = service.tree(&request).await.unwrap();
    assert_eq!(recovered.cache, CacheStatus::Miss);
    assert_eq!(service.cached_trees(), 1);
}

#[tokio::test]
async fn default_branch_failure_surfaces_as_upstream() {
    let mut source = MockListingSource::new();
    source
        .expect_fetch_default_branch()
        .returning(|_, _| Err(FetchError::Status { status: 404, url: "repos/o/r".into() }));
    source.expect_fetch_listing().never();

    let service = TreeService::new(source, TTL);
    let err = service.tree(&TreeRequest::new("o", "r")).await.unwrap_err();
    match err {
        ServiceError::Upstream { what, .. } => assert_eq!(what, "default branch"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn expired_entries_are_refetched() {
    let mut source = MockListingSource::new();
    source
        .expect_fetch_listing()
        .times(2)
        .returning(|_, _, _| Ok(vec![ListingEntry::blob("a")]));

    let service = TreeService::new(source, Duration::from_millis(20));
    let request = TreeRequest::new("o", "r").with_branch("main");

    assert_eq!(service.tree(&request).await.unwrap().cache, CacheStatus::Miss);
    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(service.purge_expired(), 1);
    assert_eq!(service.tree(&request).await.unwrap().cache, CacheStatus::Miss);
}
