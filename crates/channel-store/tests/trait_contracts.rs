//! Trait contract tests for ChannelStore.
//!
//! These tests pin the behavioral contract of the store trait using the
//! in-memory fake. Any conforming implementation must pass these.

use channel_store::fakes::MemoryChannelStore;
use channel_store::storage_traits::*;
use channel_store::StoreError;
use chrono::{TimeZone, Utc};

fn published(track: &str, arch: &str, risk: RiskLevel, rev: u64) -> PublishedRevision {
    PublishedRevision {
        track: track.to_string(),
        architecture: arch.to_string(),
        risk,
        revision: Revision(rev),
        version: "v1.32.1".to_string(),
        published_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
    }
}

fn seeded() -> MemoryChannelStore {
    MemoryChannelStore::with_entries(
        "k8s",
        vec![
            published("1.32", "amd64", RiskLevel::Edge, 20),
            published("1.32", "amd64", RiskLevel::Beta, 18),
            published("1.32", "arm64", RiskLevel::Edge, 21),
            published("1.31", "amd64", RiskLevel::Stable, 9),
        ],
    )
    .at_time(Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap())
}

#[tokio::test]
async fn list_returns_every_slot() {
    let store = seeded();
    let snapshot = store.list_published(None).await.unwrap();

    assert_eq!(snapshot.snap_name, "k8s");
    assert_eq!(snapshot.entries().len(), 4);
}

#[tokio::test]
async fn list_with_track_filter_keeps_all_risks_of_that_track() {
    let store = seeded();
    let snapshot = store.list_published(Some("1.32")).await.unwrap();

    assert_eq!(snapshot.entries().len(), 3);
    assert!(snapshot.entries().iter().all(|e| e.track == "1.32"));
}

#[tokio::test]
async fn list_is_ordered_by_track_arch_risk() {
    let store = seeded();
    let snapshot = store.list_published(None).await.unwrap();
    let keys: Vec<_> = snapshot
        .entries()
        .iter()
        .map(|e| (e.track.as_str(), e.architecture.as_str(), e.risk))
        .collect();

    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[tokio::test]
async fn unreachable_store_fails_whole_read() {
    let store = seeded();
    store.set_unreachable(true);

    let err = store.list_published(None).await.unwrap_err();
    assert!(matches!(err, StoreError::Http(_)));
}

#[tokio::test]
async fn release_moves_revision_into_channel() {
    let store = seeded();
    let channel: Channel = "1.32/beta".parse().unwrap();

    store.release(Revision(20), &channel).await.unwrap();

    let snapshot = store.list_published(Some("1.32")).await.unwrap();
    let beta = snapshot.at("1.32", "amd64", RiskLevel::Beta).unwrap();
    assert_eq!(beta.revision, Revision(20));
    // Source slot is untouched.
    let edge = snapshot.at("1.32", "amd64", RiskLevel::Edge).unwrap();
    assert_eq!(edge.revision, Revision(20));
    assert_eq!(store.releases().len(), 1);
}

#[tokio::test]
async fn release_keeps_architecture_of_revision() {
    let store = seeded();
    store
        .release(Revision(21), &"1.32/beta".parse().unwrap())
        .await
        .unwrap();

    let snapshot = store.list_published(None).await.unwrap();
    assert_eq!(
        snapshot.at("1.32", "arm64", RiskLevel::Beta).map(|e| e.revision),
        Some(Revision(21))
    );
    assert_eq!(
        snapshot.at("1.32", "amd64", RiskLevel::Beta).map(|e| e.revision),
        Some(Revision(18))
    );
}

#[tokio::test]
async fn release_unknown_revision_fails() {
    let store = seeded();
    let err = store
        .release(Revision(999), &"1.32/beta".parse().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::RevisionNotFound { .. }));
    assert!(store.releases().is_empty());
}

#[tokio::test]
async fn rejected_release_leaves_map_unchanged() {
    let store = seeded();
    store.reject_revision(Revision(20));
    let before = store.list_published(None).await.unwrap();

    let err = store
        .release(Revision(20), &"1.32/beta".parse().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::ReleaseRejected { .. }));
    assert_eq!(store.list_published(None).await.unwrap(), before);
}

#[tokio::test]
async fn superseded_revision_can_still_be_released() {
    let store = seeded();
    store
        .release(Revision(20), &"1.32/beta".parse().unwrap())
        .await
        .unwrap();

    // r18 no longer occupies any slot but is still a known revision.
    store
        .release(Revision(18), &"1.32/candidate".parse().unwrap())
        .await
        .unwrap();

    let snapshot = store.list_published(Some("1.32")).await.unwrap();
    assert_eq!(
        snapshot.at("1.32", "amd64", RiskLevel::Candidate).unwrap().revision,
        Revision(18)
    );
}
