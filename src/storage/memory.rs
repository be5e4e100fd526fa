//! In-memory store backend.

use super::{BlockRecord, ContentRecord, FastStore, PersistentStore};
use crate::error::Result;
use crate::types::{CacheStatus, DeviceId, GeoKey, LocalIndex, TaskAssignment};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Store keeping everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    /// (area, job) -> cid -> record
    blocks: RwLock<HashMap<(String, String), BTreeMap<String, BlockRecord>>>,
    /// (area, cid) -> devices holding it
    holders: RwLock<HashMap<(String, String), BTreeSet<DeviceId>>>,
    contents: RwLock<HashMap<String, ContentRecord>>,
    cached: RwLock<HashMap<DeviceId, HashMap<String, LocalIndex>>>,

    job_seq: AtomicU64,
    local_indexes: Mutex<HashMap<DeviceId, LocalIndex>>,
    tasks: Mutex<HashMap<DeviceId, TaskAssignment>>,
    validators: RwLock<BTreeSet<DeviceId>>,
    validator_geos: RwLock<HashMap<DeviceId, BTreeSet<GeoKey>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentStore for MemoryStore {
    fn save_block(&self, area: &str, record: &BlockRecord) -> Result<()> {
        self.blocks
            .write()
            .entry((area.to_string(), record.job_id.clone()))
            .or_default()
            .insert(record.cid.clone(), record.clone());

        if let (CacheStatus::Succeeded, Some(device)) = (record.status, &record.device_id) {
            self.holders
                .write()
                .entry((area.to_string(), record.cid.clone()))
                .or_default()
                .insert(device.clone());
        }
        Ok(())
    }

    fn job_blocks(&self, area: &str, job_id: &str) -> Result<Vec<BlockRecord>> {
        let blocks = self.blocks.read();
        Ok(blocks
            .get(&(area.to_string(), job_id.to_string()))
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    fn has_undone_blocks(&self, area: &str, job_id: &str) -> Result<bool> {
        let blocks = self.blocks.read();
        Ok(blocks
            .get(&(area.to_string(), job_id.to_string()))
            .map(|m| m.values().any(|b| b.status == CacheStatus::Created))
            .unwrap_or(false))
    }

    fn nodes_with_block(&self, area: &str, cid: &str) -> Result<Vec<DeviceId>> {
        let holders = self.holders.read();
        Ok(holders
            .get(&(area.to_string(), cid.to_string()))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn save_content(&self, record: &ContentRecord) -> Result<()> {
        self.contents
            .write()
            .insert(record.cid.clone(), record.clone());
        Ok(())
    }

    fn load_content(&self, cid: &str) -> Result<Option<ContentRecord>> {
        Ok(self.contents.read().get(cid).cloned())
    }

    fn record_cached_block(&self, device_id: &str, cid: &str, fid: LocalIndex) -> Result<()> {
        self.cached
            .write()
            .entry(device_id.to_string())
            .or_default()
            .insert(cid.to_string(), fid);
        Ok(())
    }

    fn cached_blocks(&self, device_id: &str) -> Result<HashMap<String, LocalIndex>> {
        Ok(self.cached.read().get(device_id).cloned().unwrap_or_default())
    }
}

impl FastStore for MemoryStore {
    fn next_job_seq(&self) -> Result<u64> {
        Ok(self.job_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn next_local_index(&self, device_id: &str) -> Result<LocalIndex> {
        let mut indexes = self.local_indexes.lock();
        let next = indexes.entry(device_id.to_string()).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    fn task(&self, device_id: &str) -> Result<Option<TaskAssignment>> {
        Ok(self.tasks.lock().get(device_id).cloned())
    }

    fn claim_task(&self, device_id: &str, task: &TaskAssignment) -> Result<bool> {
        let mut tasks = self.tasks.lock();
        match tasks.get(device_id) {
            Some(current) if current != task => Ok(false),
            Some(_) => Ok(true),
            None => {
                tasks.insert(device_id.to_string(), task.clone());
                Ok(true)
            }
        }
    }

    fn release_task(&self, device_id: &str) -> Result<()> {
        self.tasks.lock().remove(device_id);
        Ok(())
    }

    fn release_task_if(&self, device_id: &str, task: &TaskAssignment) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.get(device_id) == Some(task) {
            tasks.remove(device_id);
        }
        Ok(())
    }

    fn add_validator(&self, device_id: &str) -> Result<()> {
        self.validators.write().insert(device_id.to_string());
        Ok(())
    }

    fn validators(&self) -> Result<Vec<DeviceId>> {
        Ok(self.validators.read().iter().cloned().collect())
    }

    fn clear_validators(&self) -> Result<()> {
        self.validators.write().clear();
        self.validator_geos.write().clear();
        Ok(())
    }

    fn add_validator_geo(&self, device_id: &str, geo: &str) -> Result<()> {
        self.validator_geos
            .write()
            .entry(device_id.to_string())
            .or_default()
            .insert(geo.to_string());
        Ok(())
    }

    fn validator_geos(&self, device_id: &str) -> Result<Vec<GeoKey>> {
        Ok(self
            .validator_geos
            .read()
            .get(device_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }
}
