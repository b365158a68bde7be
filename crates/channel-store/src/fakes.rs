//! In-memory fakes for the store trait (testing only)
//!
//! `MemoryChannelStore` keeps a channel map in a `Vec` and records every
//! mutation so tests can assert on side effects.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::storage_traits::*;

/// A release call applied to the fake store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseCall {
    pub revision: Revision,
    pub channel: Channel,
}

/// In-memory channel map.
///
/// Every revision ever published stays known after it is superseded, so
/// `release` can re-publish it with its original architecture and version.
#[derive(Debug)]
pub struct MemoryChannelStore {
    snap_name: String,
    entries: Mutex<Vec<PublishedRevision>>,
    uploads: Mutex<HashMap<Revision, (String, String)>>,
    releases: Mutex<Vec<ReleaseCall>>,
    rejected: Mutex<HashSet<Revision>>,
    unreachable: AtomicBool,
    clock: DateTime<Utc>,
}

impl MemoryChannelStore {
    pub fn new(snap_name: &str) -> Self {
        Self::with_entries(snap_name, Vec::new())
    }

    pub fn with_entries(snap_name: &str, entries: Vec<PublishedRevision>) -> Self {
        let uploads = entries
            .iter()
            .map(|e| (e.revision, (e.architecture.clone(), e.version.clone())))
            .collect();
        Self {
            snap_name: snap_name.to_string(),
            entries: Mutex::new(entries),
            uploads: Mutex::new(uploads),
            releases: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
            unreachable: AtomicBool::new(false),
            clock: Utc::now(),
        }
    }

    /// Pin the timestamp used for snapshots and new releases.
    pub fn at_time(mut self, clock: DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish an entry directly, replacing whatever occupies its slot.
    pub fn publish(&self, entry: PublishedRevision) {
        self.uploads.lock().unwrap().insert(
            entry.revision,
            (entry.architecture.clone(), entry.version.clone()),
        );
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| {
            !(e.track == entry.track && e.architecture == entry.architecture && e.risk == entry.risk)
        });
        entries.push(entry);
    }

    /// Make every future `release` of `revision` fail.
    pub fn reject_revision(&self, revision: Revision) {
        self.rejected.lock().unwrap().insert(revision);
    }

    /// Make reads fail as if the store were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Every successful release applied so far, in call order.
    pub fn releases(&self) -> Vec<ReleaseCall> {
        self.releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    fn snap_name(&self) -> &str {
        &self.snap_name
    }

    async fn list_published(&self, track_filter: Option<&str>) -> StoreResult<ChannelSnapshot> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Http("connection refused".to_string()));
        }
        let entries = self.entries.lock().unwrap().clone();
        let snapshot = ChannelSnapshot::new(&self.snap_name, self.clock, entries);
        Ok(match track_filter {
            Some(track) => snapshot.for_track(track),
            None => snapshot,
        })
    }

    async fn release(&self, revision: Revision, channel: &Channel) -> StoreResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Http("connection refused".to_string()));
        }
        if self.rejected.lock().unwrap().contains(&revision) {
            return Err(StoreError::ReleaseRejected {
                revision: revision.to_string(),
                channel: channel.to_string(),
                reason: "rejected by fake store".to_string(),
            });
        }

        let (architecture, version) = self
            .uploads
            .lock()
            .unwrap()
            .get(&revision)
            .cloned()
            .ok_or_else(|| StoreError::RevisionNotFound {
                revision: revision.to_string(),
            })?;

        let mut entries = self.entries.lock().unwrap();
        let already = entries.iter().any(|e| {
            e.revision == revision
                && e.track == channel.track
                && e.risk == channel.risk
                && e.architecture == architecture
        });
        if !already {
            entries.retain(|e| {
                !(e.track == channel.track
                    && e.architecture == architecture
                    && e.risk == channel.risk)
            });
            entries.push(PublishedRevision {
                track: channel.track.clone(),
                architecture,
                risk: channel.risk,
                revision,
                version,
                published_at: Some(self.clock),
            });
        }
        drop(entries);

        self.releases.lock().unwrap().push(ReleaseCall {
            revision,
            channel: channel.clone(),
        });
        Ok(())
    }
}
