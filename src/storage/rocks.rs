//! Persistent store backed by RocksDB.

use super::{BlockRecord, ContentRecord, PersistentStore};
use crate::error::Result;
use crate::types::{CacheStatus, DeviceId, LocalIndex};
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::collections::HashMap;
use std::path::Path;

const BLOCK_PREFIX: &str = "block/";
const HOLDER_PREFIX: &str = "holder/";
const CONTENT_PREFIX: &str = "content/";
const CACHED_PREFIX: &str = "cached/";

/// Persistent replication state in a RocksDB database.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    fn job_prefix(area: &str, job_id: &str) -> String {
        format!("{}{}/{}/", BLOCK_PREFIX, area, job_id)
    }

    fn holder_prefix(area: &str, cid: &str) -> String {
        format!("{}{}/{}/", HOLDER_PREFIX, area, cid)
    }

    fn cached_prefix(device_id: &str) -> String {
        format!("{}{}/", CACHED_PREFIX, device_id)
    }

    /// Visit every (key suffix, value) stored under `prefix`.
    fn scan_prefix<F>(&self, prefix: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &[u8]) -> Result<()>,
    {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let suffix = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            visit(&suffix, &value)?;
        }
        Ok(())
    }
}

impl PersistentStore for RocksStore {
    fn save_block(&self, area: &str, record: &BlockRecord) -> Result<()> {
        let mut batch = rocksdb::WriteBatch::default();
        let key = format!("{}{}", Self::job_prefix(area, &record.job_id), record.cid);
        batch.put(key.as_bytes(), bincode::serialize(record)?);

        if let (CacheStatus::Succeeded, Some(device)) = (record.status, &record.device_id) {
            let holder = format!("{}{}", Self::holder_prefix(area, &record.cid), device);
            batch.put(holder.as_bytes(), b"");
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn job_blocks(&self, area: &str, job_id: &str) -> Result<Vec<BlockRecord>> {
        let mut records = Vec::new();
        self.scan_prefix(&Self::job_prefix(area, job_id), |_, value| {
            records.push(bincode::deserialize(value)?);
            Ok(())
        })?;
        Ok(records)
    }

    fn has_undone_blocks(&self, area: &str, job_id: &str) -> Result<bool> {
        Ok(self
            .job_blocks(area, job_id)?
            .iter()
            .any(|b| b.status == CacheStatus::Created))
    }

    fn nodes_with_block(&self, area: &str, cid: &str) -> Result<Vec<DeviceId>> {
        let mut devices = Vec::new();
        self.scan_prefix(&Self::holder_prefix(area, cid), |device, _| {
            devices.push(device.to_string());
            Ok(())
        })?;
        Ok(devices)
    }

    fn save_content(&self, record: &ContentRecord) -> Result<()> {
        let key = format!("{}{}", CONTENT_PREFIX, record.cid);
        self.db.put(key.as_bytes(), bincode::serialize(record)?)?;
        Ok(())
    }

    fn load_content(&self, cid: &str) -> Result<Option<ContentRecord>> {
        let key = format!("{}{}", CONTENT_PREFIX, cid);
        match self.db.get(key.as_bytes())? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn record_cached_block(&self, device_id: &str, cid: &str, fid: LocalIndex) -> Result<()> {
        let key = format!("{}{}", Self::cached_prefix(device_id), cid);
        self.db.put(key.as_bytes(), fid.to_be_bytes())?;
        Ok(())
    }

    fn cached_blocks(&self, device_id: &str) -> Result<HashMap<String, LocalIndex>> {
        let mut blocks = HashMap::new();
        self.scan_prefix(&Self::cached_prefix(device_id), |cid, value| {
            let mut buf = [0u8; 8];
            if value.len() == buf.len() {
                buf.copy_from_slice(value);
                blocks.insert(cid.to_string(), LocalIndex::from_be_bytes(buf));
            }
            Ok(())
        })?;
        Ok(blocks)
    }
}
