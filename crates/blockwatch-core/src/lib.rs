//! blockwatch-core — domain model and state engine for blockwatch.
//!
//! # Overview
//!
//! blockwatch monitors the validators of a proof-of-stake chain and turns
//! changes in their signing behavior into notifications. This crate holds
//! everything that is independent of transports and chat platforms:
//!
//! - [`types`] — blocks, validators, signature windows
//! - [`groups`] — the user-defined missed-blocks partition
//! - [`events`] — the sealed domain-event type and its renderers
//! - [`state`] — the sliding-window store and signature counting
//! - [`snapshot`] — immutable captures and snapshot diffing
//! - [`manager`] — the write-through facade over state + storage
//! - [`store`] — the persistence trait implemented by blockwatch-storage
//! - [`config`] — the TOML configuration records

pub mod config;
pub mod error;
pub mod events;
pub mod groups;
pub mod manager;
pub mod report;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod types;

pub use config::{ChainConfig, Config, ExplorerConfig};
pub use error::{ConfigError, StoreError};
pub use events::{RenderData, RenderFormat, ReportEvent};
pub use groups::{MissedBlocksGroup, MissedBlocksGroups};
pub use manager::StateManager;
pub use report::Report;
pub use snapshot::{diff, Snapshot, SnapshotEntry};
pub use state::{SlashingParams, State};
pub use store::{MemoryStore, Store};
pub use types::{Block, Link, SignatureInfo, Validator};
