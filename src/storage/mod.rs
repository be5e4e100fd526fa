//! Storage services consumed by the coordinator.
//!
//! Two stores back the coordinator:
//!
//! - [`PersistentStore`]: durable cache job records, content records and the
//!   per-device index of cached blocks.
//! - [`FastStore`]: low-latency coordination state, i.e. counters, per-node task
//!   assignments and the validator sets rebuilt on every election.
//!
//! [`MemoryStore`] implements both and is the default backend. With the
//! `rocksdb` feature, [`RocksStore`] provides a durable [`PersistentStore`].

mod memory;
#[cfg(feature = "rocksdb")]
mod rocks;

pub use memory::MemoryStore;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;

use crate::error::Result;
use crate::types::{CacheStatus, DeviceId, GeoKey, JobId, LocalIndex, TaskAssignment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persisted state of one block of a cache job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub job_id: JobId,
    pub cid: String,
    pub device_id: Option<DeviceId>,
    pub status: CacheStatus,
    pub size: u64,
    pub reliability: u32,
    /// Index the block was dispatched under on its device.
    #[serde(default)]
    pub local_index: Option<LocalIndex>,
}

/// Persisted summary of one cache job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: CacheStatus,
    /// Whether the job placed blocks on edge nodes rather than candidates.
    pub on_edges: bool,
}

/// Persisted state of a content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub cid: String,
    pub area: String,
    pub reliability_target: u32,
    pub reliability: u32,
    pub total_size: Option<u64>,
    pub jobs: Vec<JobRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable storage for replication state.
pub trait PersistentStore: Send + Sync {
    /// Insert or replace a block record of a job in `area`.
    fn save_block(&self, area: &str, record: &BlockRecord) -> Result<()>;

    /// All block records of a job.
    fn job_blocks(&self, area: &str, job_id: &str) -> Result<Vec<BlockRecord>>;

    /// Whether any block of the job is still waiting for a result.
    fn has_undone_blocks(&self, area: &str, job_id: &str) -> Result<bool>;

    /// Devices confirmed to hold `cid` in `area`.
    fn nodes_with_block(&self, area: &str, cid: &str) -> Result<Vec<DeviceId>>;

    fn save_content(&self, record: &ContentRecord) -> Result<()>;

    fn load_content(&self, cid: &str) -> Result<Option<ContentRecord>>;

    /// Record that `device_id` caches `cid` under `fid`.
    fn record_cached_block(&self, device_id: &str, cid: &str, fid: LocalIndex) -> Result<()>;

    /// Blocks a device claims to cache, as cid -> local index.
    fn cached_blocks(&self, device_id: &str) -> Result<HashMap<String, LocalIndex>>;
}

/// Fast coordination store.
///
/// Task assignment operations are atomic per device.
pub trait FastStore: Send + Sync {
    /// Next value of the global job counter.
    fn next_job_seq(&self) -> Result<u64>;

    /// Next local index for a device.
    fn next_local_index(&self, device_id: &str) -> Result<LocalIndex>;

    fn task(&self, device_id: &str) -> Result<Option<TaskAssignment>>;

    /// Bind the device to `task` unless it is bound to a different task.
    ///
    /// Returns `false` on conflict.
    fn claim_task(&self, device_id: &str, task: &TaskAssignment) -> Result<bool>;

    fn release_task(&self, device_id: &str) -> Result<()>;

    /// Release the device only if it is still bound to `task`.
    fn release_task_if(&self, device_id: &str, task: &TaskAssignment) -> Result<()>;

    fn add_validator(&self, device_id: &str) -> Result<()>;

    fn validators(&self) -> Result<Vec<DeviceId>>;

    /// Drop the validator set and every validator's geographic assignments.
    fn clear_validators(&self) -> Result<()>;

    fn add_validator_geo(&self, device_id: &str, geo: &str) -> Result<()>;

    fn validator_geos(&self, device_id: &str) -> Result<Vec<GeoKey>>;
}
