//! In-memory state of content items and their cache jobs.

use crate::error::Result;
use crate::storage::{BlockRecord, ContentRecord, JobRecord};
use crate::types::{BlockInfo, CacheResultReport, CacheStatus, DeviceId, GeoKey, JobId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// One replication attempt of a content item into its area.
#[derive(Debug, Clone)]
pub struct CacheJob {
    pub id: JobId,
    pub content_id: String,
    pub status: CacheStatus,
    /// Bytes confirmed cached. Never decreases.
    pub done_size: u64,
    pub reliability: u32,
    /// Place blocks on edge nodes instead of candidates.
    pub on_edges: bool,
    pub blocks: HashMap<String, BlockInfo>,
    /// Blocks that found no node on their last placement attempt.
    pub unassigned: BTreeSet<String>,
}

impl CacheJob {
    pub fn new(id: impl Into<String>, content_id: impl Into<String>, on_edges: bool) -> Self {
        Self {
            id: id.into(),
            content_id: content_id.into(),
            status: CacheStatus::Created,
            done_size: 0,
            reliability: 0,
            on_edges,
            blocks: HashMap::new(),
            unassigned: BTreeSet::new(),
        }
    }

    /// Whether the block still needs a placement in this job.
    pub fn needs_placement(&self, cid: &str) -> bool {
        match self.blocks.get(cid) {
            None => true,
            Some(block) => block.status == CacheStatus::Failed && block.device_id.is_none(),
        }
    }

    pub fn has_undone_blocks(&self) -> bool {
        self.blocks.values().any(|b| b.status == CacheStatus::Created)
    }

    /// Devices that were handed a block of this job.
    pub fn devices(&self) -> BTreeSet<DeviceId> {
        self.blocks
            .values()
            .filter_map(|b| b.device_id.clone())
            .collect()
    }

    pub fn block_record(&self, cid: &str) -> Option<BlockRecord> {
        self.blocks.get(cid).map(|b| BlockRecord {
            job_id: self.id.clone(),
            cid: b.cid.clone(),
            device_id: b.device_id.clone(),
            status: b.status,
            size: b.size,
            reliability: b.reliability,
            local_index: b.local_index,
        })
    }
}

/// Result of applying one completion report to a job.
#[derive(Debug, Default)]
pub struct ReportOutcome {
    /// The report changed a block; its new state must be persisted.
    pub applied: bool,
    /// Child blocks discovered by a successful report.
    pub links: Vec<String>,
}

/// A content item being replicated.
#[derive(Debug, Clone)]
pub struct ContentItem {
    /// CID of the DAG root.
    pub cid: String,
    /// Area the item is replicated into.
    pub area: GeoKey,
    pub reliability_target: u32,
    /// Number of jobs that completed successfully.
    pub reliability: u32,
    /// Learned from the root block's completion report.
    pub total_size: Option<u64>,
    /// Jobs in creation order.
    pub jobs: Vec<CacheJob>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(cid: impl Into<String>, area: impl Into<String>, reliability_target: u32) -> Self {
        let now = Utc::now();
        Self {
            cid: cid.into(),
            area: area.into(),
            reliability_target,
            reliability: 0,
            total_size: None,
            jobs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Later jobs place blocks on edges once some job has cached the item.
    pub fn must_have_cache(&self) -> bool {
        self.reliability > 0
    }

    pub fn job(&self, job_id: &str) -> Option<&CacheJob> {
        self.jobs.iter().find(|j| j.id == job_id)
    }

    pub fn job_mut(&mut self, job_id: &str) -> Option<&mut CacheJob> {
        self.jobs.iter_mut().find(|j| j.id == job_id)
    }

    pub fn latest_job(&self) -> Option<&CacheJob> {
        self.jobs.last()
    }

    /// Whether a job has cached every known byte of the item.
    pub fn is_complete(&self, job: &CacheJob) -> bool {
        matches!(self.total_size, Some(total) if job.done_size >= total)
    }

    /// Apply a completion report from `device_id` to a job.
    ///
    /// Only blocks still waiting for a result change state; re-sent reports and
    /// reports for blocks assigned elsewhere are ignored.
    pub fn apply_report(
        &mut self,
        job_id: &str,
        device_id: &str,
        report: &CacheResultReport,
    ) -> ReportOutcome {
        let root = self.cid.clone();
        let Some(job) = self.job_mut(job_id) else {
            warn!(job_id = %job_id, cid = %report.cid, "Report for unknown job");
            return ReportOutcome::default();
        };
        if job.status.is_terminal() {
            debug!(job_id = %job_id, cid = %report.cid, "Report for finished job ignored");
            return ReportOutcome::default();
        }

        let Some(block) = job.blocks.get_mut(&report.cid) else {
            warn!(job_id = %job_id, cid = %report.cid, "Report for unknown block");
            return ReportOutcome::default();
        };
        if block.device_id.as_deref() != Some(device_id) {
            warn!(
                job_id = %job_id,
                cid = %report.cid,
                device_id = %device_id,
                "Report from a device the block is not assigned to"
            );
            return ReportOutcome::default();
        }
        if block.status != CacheStatus::Created {
            debug!(job_id = %job_id, cid = %report.cid, "Duplicate report ignored");
            return ReportOutcome::default();
        }

        let mut outcome = ReportOutcome {
            applied: true,
            links: Vec::new(),
        };

        if report.success {
            block.status = CacheStatus::Succeeded;
            block.size = report.size;
            block.reliability = 1;
            job.done_size += report.size;
            outcome.links = report.links.clone();
        } else {
            block.status = CacheStatus::Failed;
            block.reliability = 0;
        }

        if report.success && report.cid == root {
            self.total_size = Some(report.size + report.links_size);
        }
        self.updated_at = Utc::now();
        outcome
    }

    pub fn to_record(&self) -> ContentRecord {
        ContentRecord {
            cid: self.cid.clone(),
            area: self.area.clone(),
            reliability_target: self.reliability_target,
            reliability: self.reliability,
            total_size: self.total_size,
            jobs: self
                .jobs
                .iter()
                .map(|j| JobRecord {
                    job_id: j.id.clone(),
                    status: j.status,
                    on_edges: j.on_edges,
                })
                .collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Rebuild an item from its persisted record and the block records of each job.
    pub fn from_record<F>(record: ContentRecord, mut job_blocks: F) -> Result<Self>
    where
        F: FnMut(&str) -> Result<Vec<BlockRecord>>,
    {
        let mut item = Self {
            cid: record.cid,
            area: record.area,
            reliability_target: record.reliability_target,
            reliability: record.reliability,
            total_size: record.total_size,
            jobs: Vec::with_capacity(record.jobs.len()),
            created_at: record.created_at,
            updated_at: record.updated_at,
        };

        for job_record in record.jobs {
            let mut job = CacheJob::new(&job_record.job_id, &item.cid, job_record.on_edges);
            job.status = job_record.status;

            for block in job_blocks(&job_record.job_id)? {
                if block.status == CacheStatus::Succeeded {
                    job.done_size += block.size;
                }
                if block.status == CacheStatus::Failed && block.device_id.is_none() {
                    job.unassigned.insert(block.cid.clone());
                }
                job.blocks.insert(
                    block.cid.clone(),
                    BlockInfo {
                        cid: block.cid,
                        device_id: block.device_id,
                        geo: None,
                        status: block.status,
                        reliability: block.reliability,
                        size: block.size,
                        local_index: block.local_index,
                    },
                );
            }

            if job.status == CacheStatus::Created && item.is_complete(&job) {
                job.status = CacheStatus::Succeeded;
                job.reliability = 1;
            }
            item.jobs.push(job);
        }

        Ok(item)
    }
}
