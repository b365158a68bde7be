//! Channel-Store: Snap Store Channel Map Access for snap-promote
//!
//! This crate is the only layer that talks to the store. It models the
//! published channel map and provides the read/mutate interface the promotion
//! engine is written against.
//!
//! ## Layer 0 - Store access
//!
//! Focus: complete, consistent snapshots and atomic single-channel releases.
//!
//! ## Key Components
//!
//! - `ChannelStore`: backend-agnostic trait (`list_published`, `release`)
//! - `SnapStoreClient`: info API reads plus `snapcraft release`
//! - `fakes::MemoryChannelStore`: in-memory store for tests and trial runs

mod error;
pub mod fakes;
pub mod snapstore;
pub mod storage_traits;

pub use error::StoreError;
pub use snapstore::{
    parse_channel_map, SnapStoreClient, SnapStoreConfig, StoreCredentials, CREDENTIALS_ENV,
    DEFAULT_INFO_URL,
};
pub use storage_traits::{
    Channel, ChannelSnapshot, ChannelStore, PublishedRevision, Revision, RiskLevel, StoreResult,
};
