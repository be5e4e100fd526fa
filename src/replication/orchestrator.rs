//! Replication orchestrator.
//!
//! Completion reports from workers and newly discovered blocks share one FIFO
//! worklist. Producers push and send a wake signal into a channel of capacity
//! one; when a signal is already pending the new one is dropped. A single
//! processor drains the whole queue on every wake, so coalesced signals never
//! lose work.

use super::content::{CacheJob, ContentItem};
use crate::config::ReplicationConfig;
use crate::error::{EdgeError, Result};
use crate::geo::GeoInfo;
use crate::observability;
use crate::registry::NodeRegistry;
use crate::rpc::WorkerRpc;
use crate::shutdown::ShutdownCoordinator;
use crate::storage::{FastStore, PersistentStore};
use crate::types::{
    BlockInfo, BlockRequest, CacheBlocksRequest, CacheResultReport, CacheStatus, DeviceId, JobId,
    LocalIndex, Node, NodeRole, TaskAssignment,
};
use futures::future::join_all;
use lru::LruCache;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const JOB_ID_PREFIX: &str = "cache_info_";

type ContentHandle = Arc<AsyncMutex<ContentItem>>;

/// One unit of work for the processor.
#[derive(Debug, Clone)]
pub enum WorkItem {
    /// A completion report sent by a worker.
    Report {
        device_id: DeviceId,
        report: CacheResultReport,
    },
    /// Blocks of a job that need a node.
    Dispatch {
        content_id: String,
        job_id: JobId,
        cids: Vec<String>,
    },
    /// A node holding a task went offline.
    NodeLost {
        device_id: DeviceId,
        task: TaskAssignment,
    },
}

/// Replication statistics.
#[derive(Debug, Default)]
pub struct ReplicationStats {
    pub reports: AtomicU64,
    pub blocks_dispatched: AtomicU64,
    pub dispatch_failures: AtomicU64,
    pub placement_failures: AtomicU64,
    pub jobs_succeeded: AtomicU64,
    pub jobs_failed: AtomicU64,
}

impl ReplicationStats {
    pub fn snapshot(&self) -> ReplicationStatsSnapshot {
        ReplicationStatsSnapshot {
            reports: self.reports.load(Ordering::Relaxed),
            blocks_dispatched: self.blocks_dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            placement_failures: self.placement_failures.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReplicationStatsSnapshot {
    pub reports: u64,
    pub blocks_dispatched: u64,
    pub dispatch_failures: u64,
    pub placement_failures: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
}

/// Read-only view of a job, returned to API callers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub content_id: String,
    pub status: CacheStatus,
    pub done_size: u64,
    pub total_size: Option<u64>,
    pub blocks: usize,
    pub unassigned: usize,
}

impl JobSummary {
    fn of(content: &ContentItem, job: &CacheJob) -> Self {
        Self {
            job_id: job.id.clone(),
            content_id: content.cid.clone(),
            status: job.status,
            done_size: job.done_size,
            total_size: content.total_size,
            blocks: job.blocks.len(),
            unassigned: job.unassigned.len(),
        }
    }
}

/// A block bound to a node, ready to be sent.
struct Placement {
    node: Node,
    cid: String,
    local_index: LocalIndex,
}

/// Outcome of one dispatch round.
#[derive(Debug, Default)]
struct DispatchSummary {
    dispatched: usize,
    errors: Vec<EdgeError>,
}

/// Drives replication of content items across the fleet.
pub struct ReplicationOrchestrator {
    area: String,
    dispatch_timeout: Duration,
    registry: Arc<NodeRegistry>,
    persistent: Arc<dyn PersistentStore>,
    fast: Arc<dyn FastStore>,
    rpc: Arc<dyn WorkerRpc>,
    contents: Mutex<LruCache<String, ContentHandle>>,
    queue: Mutex<VecDeque<WorkItem>>,
    wake_tx: mpsc::Sender<()>,
    wake_rx: Mutex<Option<mpsc::Receiver<()>>>,
    /// Held by the one active drain.
    draining: AsyncMutex<()>,
    stats: ReplicationStats,
}

impl ReplicationOrchestrator {
    pub fn new(
        config: &ReplicationConfig,
        area: impl Into<String>,
        registry: Arc<NodeRegistry>,
        persistent: Arc<dyn PersistentStore>,
        fast: Arc<dyn FastStore>,
        rpc: Arc<dyn WorkerRpc>,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.content_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let (wake_tx, wake_rx) = mpsc::channel(1);

        Self {
            area: area.into(),
            dispatch_timeout: config.dispatch_timeout,
            registry,
            persistent,
            fast,
            rpc,
            contents: Mutex::new(LruCache::new(capacity)),
            queue: Mutex::new(VecDeque::new()),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
            draining: AsyncMutex::new(()),
            stats: ReplicationStats::default(),
        }
    }

    pub fn stats(&self) -> ReplicationStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of queued work items.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Spawn the processor. Only the first call starts one.
    pub fn start(self: &Arc<Self>, shutdown: ShutdownCoordinator) -> Option<JoinHandle<()>> {
        let mut wake_rx = self.wake_rx.lock().take()?;
        let this = Arc::clone(self);

        Some(tokio::spawn(async move {
            info!("Replication processor started");
            loop {
                tokio::select! {
                    _ = shutdown.wait_for_shutdown() => break,
                    signal = wake_rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                        this.drain().await;
                    }
                }
            }
            info!("Replication processor stopped");
        }))
    }

    /// Queue a completion report from a worker.
    pub fn cache_result(&self, device_id: &str, report: CacheResultReport) {
        debug!(device_id = %device_id, cid = %report.cid, success = report.success, "Cache result queued");
        self.enqueue(WorkItem::Report {
            device_id: device_id.to_string(),
            report,
        });
    }

    /// Queue the loss of a node that was working on `task`.
    ///
    /// Its blocks still waiting for a result become unassigned and the job is
    /// settled, so they are placed elsewhere or the job fails.
    pub fn node_lost(&self, device_id: &str, task: TaskAssignment) {
        debug!(device_id = %device_id, job_id = %task.job_id, "Node loss queued");
        self.enqueue(WorkItem::NodeLost {
            device_id: device_id.to_string(),
            task,
        });
    }

    fn enqueue(&self, item: WorkItem) {
        self.queue.lock().push_back(item);
        // A pending signal already covers this item.
        let _ = self.wake_tx.try_send(());
    }

    /// Process queued work until the queue is empty.
    ///
    /// Returns the number of items processed. Concurrent callers wait for the
    /// active drain to finish first.
    pub async fn drain(&self) -> usize {
        let _active = self.draining.lock().await;
        let mut processed = 0;
        loop {
            let next = self.queue.lock().pop_front();
            let Some(item) = next else {
                break;
            };
            if let Err(e) = self.process(item).await {
                error!(error = %e, "Failed to process replication work item");
            }
            processed += 1;
        }
        processed
    }

    async fn process(&self, item: WorkItem) -> Result<()> {
        match item {
            WorkItem::Report { device_id, report } => self.handle_report(&device_id, report).await,
            WorkItem::Dispatch {
                content_id,
                job_id,
                cids,
            } => {
                let handle = self
                    .content_handle(&content_id)?
                    .ok_or_else(|| EdgeError::ContentNotFound(content_id.clone()))?;
                self.dispatch_blocks(&handle, &job_id, cids).await;

                let mut content = handle.lock().await;
                self.settle(&mut content, &job_id, false, false);
                self.save_content(&content);
                Ok(())
            }
            WorkItem::NodeLost { device_id, task } => self.handle_node_lost(&device_id, &task).await,
        }
    }

    /// Submit a content item for caching into this coordinator's area.
    ///
    /// Returns the id of the job replicating it. A submission while the latest
    /// job of the item is still running returns that job.
    pub async fn cache_content(&self, cid: &str, reliability_target: u32) -> Result<JobId> {
        crate::content_id::parse(cid)?;

        let handle = match self.content_handle(cid)? {
            Some(handle) => handle,
            None => self.insert_content(ContentItem::new(cid, &self.area, reliability_target)),
        };

        let job_id = {
            let mut content = handle.lock().await;
            content.reliability_target = reliability_target;

            if let Some(job) = content.latest_job() {
                if job.status == CacheStatus::Created {
                    info!(cid = %cid, job_id = %job.id, "Content already being cached");
                    return Ok(job.id.clone());
                }
            }

            let seq = self.fast.next_job_seq()?;
            let job_id = format!("{}{}", JOB_ID_PREFIX, seq);
            let on_edges = content.must_have_cache();
            content.jobs.push(CacheJob::new(&job_id, cid, on_edges));
            content.updated_at = chrono::Utc::now();

            info!(
                cid = %cid,
                job_id = %job_id,
                area = %content.area,
                on_edges,
                "Created cache job"
            );
            job_id
        };

        let summary = self.dispatch_blocks(&handle, &job_id, vec![cid.to_string()]).await;

        let mut content = handle.lock().await;
        if summary.dispatched == 0 {
            self.settle(&mut content, &job_id, false, false);
        }
        self.save_content(&content);
        drop(content);

        match summary.errors.into_iter().next() {
            Some(e) if summary.dispatched == 0 => Err(e),
            _ => Ok(job_id),
        }
    }

    /// Summary of a job of a content item.
    pub async fn job_summary(&self, cid: &str, job_id: Option<&str>) -> Result<JobSummary> {
        let handle = self
            .content_handle(cid)?
            .ok_or_else(|| EdgeError::ContentNotFound(cid.to_string()))?;
        let content = handle.lock().await;
        let job = match job_id {
            Some(id) => content.job(id),
            None => content.latest_job(),
        }
        .ok_or_else(|| EdgeError::ContentNotFound(format!("{} job {:?}", cid, job_id)))?;
        Ok(JobSummary::of(&content, job))
    }

    /// Pick a node for one block.
    ///
    /// Looks among online nodes in `area`, edge nodes when `must_have_cache` is set
    /// and candidate nodes otherwise, skipping `exclude`. Chooses uniformly at random.
    pub fn find_node(
        &self,
        area: &str,
        must_have_cache: bool,
        exclude: &HashSet<DeviceId>,
    ) -> Result<Node> {
        let role = if must_have_cache {
            NodeRole::Edge
        } else {
            NodeRole::Candidate
        };
        let region = GeoInfo::parse(area);
        let nodes = self.registry.find_in_region(role, &region, exclude);

        nodes
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| {
                EdgeError::NodeNotFound(format!(
                    "no {} node in area '{}' outside {} excluded",
                    role,
                    area,
                    exclude.len()
                ))
            })
    }

    fn content_handle(&self, cid: &str) -> Result<Option<ContentHandle>> {
        if let Some(handle) = self.contents.lock().get(cid) {
            return Ok(Some(Arc::clone(handle)));
        }

        let Some(record) = self.persistent.load_content(cid)? else {
            return Ok(None);
        };
        let area = record.area.clone();
        let item = ContentItem::from_record(record, |job_id| {
            self.persistent.job_blocks(&area, job_id)
        })?;
        debug!(cid = %cid, jobs = item.jobs.len(), "Content reloaded from storage");
        Ok(Some(self.insert_content(item)))
    }

    /// Cache an item, keeping the existing handle if another caller got there first.
    fn insert_content(&self, item: ContentItem) -> ContentHandle {
        let mut contents = self.contents.lock();
        if let Some(existing) = contents.get(&item.cid) {
            return Arc::clone(existing);
        }
        let cid = item.cid.clone();
        let handle = Arc::new(AsyncMutex::new(item));
        contents.put(cid, Arc::clone(&handle));
        handle
    }

    async fn handle_report(&self, device_id: &str, report: CacheResultReport) -> Result<()> {
        self.stats.reports.fetch_add(1, Ordering::Relaxed);
        observability::record_cache_report(report.success);

        let Some(task) = self.fast.task(device_id)? else {
            warn!(device_id = %device_id, cid = %report.cid, "Cache result from device without a task");
            return Ok(());
        };
        if let Some(job_id) = &report.job_id {
            if job_id != &task.job_id {
                warn!(
                    device_id = %device_id,
                    reported = %job_id,
                    current = %task.job_id,
                    "Cache result for a job the device is not working on"
                );
                return Ok(());
            }
        }

        let handle = self
            .content_handle(&task.content_id)?
            .ok_or_else(|| EdgeError::ContentNotFound(task.content_id.clone()))?;
        let mut content = handle.lock().await;

        let outcome = content.apply_report(&task.job_id, device_id, &report);
        if !outcome.applied {
            return Ok(());
        }

        if let Some(job) = content.job(&task.job_id) {
            self.save_block(&content.area, job, &report.cid);
            if report.success {
                let fid = report
                    .fid
                    .or_else(|| job.blocks.get(&report.cid).and_then(|b| b.local_index));
                if let Some(fid) = fid {
                    if let Err(e) = self.persistent.record_cached_block(device_id, &report.cid, fid) {
                        warn!(device_id = %device_id, cid = %report.cid, error = %e, "Failed to record cached block");
                    }
                }
            } else {
                warn!(
                    device_id = %device_id,
                    job_id = %task.job_id,
                    cid = %report.cid,
                    error = report.error.as_deref().unwrap_or("unknown"),
                    "Worker failed to cache block"
                );
            }
        }

        let spawned = !outcome.links.is_empty();
        if spawned {
            debug!(job_id = %task.job_id, links = outcome.links.len(), "Queueing discovered blocks");
            self.enqueue(WorkItem::Dispatch {
                content_id: task.content_id.clone(),
                job_id: task.job_id.clone(),
                cids: outcome.links,
            });
        }

        self.settle(&mut content, &task.job_id, spawned, true);
        self.save_content(&content);
        Ok(())
    }

    async fn handle_node_lost(&self, device_id: &str, task: &TaskAssignment) -> Result<()> {
        let Some(handle) = self.content_handle(&task.content_id)? else {
            return Ok(());
        };
        let mut content = handle.lock().await;
        let area = content.area.clone();
        let Some(job) = content.job_mut(&task.job_id) else {
            return Ok(());
        };
        if job.status.is_terminal() {
            return Ok(());
        }

        let stranded: Vec<String> = job
            .blocks
            .values()
            .filter(|b| b.status == CacheStatus::Created && b.device_id.as_deref() == Some(device_id))
            .map(|b| b.cid.clone())
            .collect();
        if stranded.is_empty() {
            return Ok(());
        }

        for cid in &stranded {
            job.blocks.insert(cid.clone(), BlockInfo::unassigned(cid));
            job.unassigned.insert(cid.clone());
            self.save_block(&area, job, cid);
        }
        warn!(
            device_id = %device_id,
            job_id = %task.job_id,
            blocks = stranded.len(),
            "Node went offline with blocks in flight"
        );

        self.settle(&mut content, &task.job_id, false, true);
        self.save_content(&content);
        Ok(())
    }

    /// Move a job to a terminal state when it has nothing left to wait for.
    ///
    /// With `allow_retry`, blocks left unassigned by earlier passes are queued for
    /// another placement attempt instead of failing the job.
    fn settle(&self, content: &mut ContentItem, job_id: &str, spawned: bool, allow_retry: bool) {
        let area = content.area.clone();
        let complete = match content.job(job_id) {
            Some(job) if job.status.is_terminal() => return,
            Some(job) => content.is_complete(job),
            None => return,
        };

        if !complete {
            if spawned {
                return;
            }
            let undone = match self.persistent.has_undone_blocks(&area, job_id) {
                Ok(undone) => undone,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Failed to read job blocks, using memory state");
                    content.job(job_id).map(|j| j.has_undone_blocks()).unwrap_or(false)
                }
            };
            if undone {
                return;
            }

            if allow_retry {
                let retry: Vec<String> = match content.job_mut(job_id) {
                    Some(job) => std::mem::take(&mut job.unassigned).into_iter().collect(),
                    None => Vec::new(),
                };
                if !retry.is_empty() {
                    info!(job_id = %job_id, blocks = retry.len(), "Retrying unassigned blocks");
                    self.enqueue(WorkItem::Dispatch {
                        content_id: content.cid.clone(),
                        job_id: job_id.to_string(),
                        cids: retry,
                    });
                    return;
                }
            }
        }

        let status = if complete {
            CacheStatus::Succeeded
        } else {
            CacheStatus::Failed
        };
        self.finish_job(content, job_id, status);
    }

    fn finish_job(&self, content: &mut ContentItem, job_id: &str, status: CacheStatus) {
        let total_size = content.total_size;
        let Some(job) = content.job_mut(job_id) else {
            return;
        };
        job.status = status;
        let done_size = job.done_size;
        let devices = job.devices();
        let task = TaskAssignment::new(&job.content_id, &job.id);

        if status == CacheStatus::Succeeded {
            job.reliability = 1;
            content.reliability += 1;
            self.stats.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
            info!(cid = %content.cid, job_id = %job_id, done_size, "Cache job succeeded");
        } else {
            self.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                cid = %content.cid,
                job_id = %job_id,
                done_size,
                total_size = ?total_size,
                "Cache job failed"
            );
        }
        observability::record_job_finished(status == CacheStatus::Succeeded);
        content.updated_at = chrono::Utc::now();

        for device in devices {
            if let Err(e) = self.fast.release_task_if(&device, &task) {
                warn!(device_id = %device, error = %e, "Failed to release task");
            }
        }
    }

    /// Place and send blocks of a job.
    ///
    /// The content lock is released while requests are in flight.
    async fn dispatch_blocks(
        &self,
        handle: &ContentHandle,
        job_id: &str,
        cids: Vec<String>,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        let (placements, content_id) = {
            let mut content = handle.lock().await;
            let placements = self.place_blocks(&mut content, job_id, cids, &mut summary.errors);
            (placements, content.cid.clone())
        };
        if placements.is_empty() {
            return summary;
        }

        let area = handle.lock().await.area.clone();
        let requests = self.build_requests(&area, &content_id, job_id, placements);

        let sends = requests.into_iter().map(|(node, request)| async move {
            let cids: Vec<String> = request.cids().map(str::to_string).collect();
            let result = match tokio::time::timeout(
                self.dispatch_timeout,
                self.rpc.cache_blocks(&node, request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(EdgeError::Timeout(self.dispatch_timeout.as_millis() as u64)),
            };
            (node, cids, result)
        });
        let results = join_all(sends).await;

        let mut failed: Vec<(DeviceId, Vec<String>)> = Vec::new();
        for (node, cids, result) in results {
            observability::record_dispatch(cids.len(), result.is_ok());
            match result {
                Ok(()) => {
                    summary.dispatched += cids.len();
                    self.stats
                        .blocks_dispatched
                        .fetch_add(cids.len() as u64, Ordering::Relaxed);
                    debug!(device_id = %node.device_id, job_id = %job_id, blocks = cids.len(), "Blocks dispatched");
                }
                Err(e) => {
                    self.stats.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(device_id = %node.device_id, job_id = %job_id, blocks = cids.len(), error = %e, "Dispatch failed");
                    failed.push((node.device_id.clone(), cids));
                    summary.errors.push(e);
                }
            }
        }

        if !failed.is_empty() {
            let mut content = handle.lock().await;
            let area = content.area.clone();
            if let Some(job) = content.job_mut(job_id) {
                let task = TaskAssignment::new(&job.content_id, &job.id);
                for (device_id, cids) in failed {
                    for cid in cids {
                        let still_waiting = job.blocks.get(&cid).map_or(false, |b| {
                            b.status == CacheStatus::Created
                                && b.device_id.as_deref() == Some(device_id.as_str())
                        });
                        if still_waiting {
                            job.blocks.insert(cid.clone(), BlockInfo::unassigned(&cid));
                            job.unassigned.insert(cid.clone());
                            self.save_block(&area, job, &cid);
                        }
                    }

                    // The device no longer shows up in the job's blocks.
                    if !job.devices().contains(&device_id) {
                        if let Err(e) = self.fast.release_task_if(&device_id, &task) {
                            warn!(device_id = %device_id, error = %e, "Failed to release task");
                        }
                    }
                }
            }
        }

        summary
    }

    /// Bind each block needing a node to one, recording its new state.
    fn place_blocks(
        &self,
        content: &mut ContentItem,
        job_id: &str,
        cids: Vec<String>,
        errors: &mut Vec<EdgeError>,
    ) -> Vec<Placement> {
        let area = content.area.clone();
        let content_id = content.cid.clone();
        let Some(job) = content.job_mut(job_id) else {
            warn!(job_id = %job_id, "Dispatch for unknown job");
            return Vec::new();
        };
        if job.status.is_terminal() {
            debug!(job_id = %job_id, "Dispatch for finished job skipped");
            return Vec::new();
        }

        let task = TaskAssignment::new(&content_id, job_id);
        let on_edges = job.on_edges;
        let mut placements = Vec::new();

        for cid in cids {
            if !job.needs_placement(&cid) {
                continue;
            }

            match self.place_block(&area, &cid, on_edges, &task) {
                Ok((node, local_index)) => {
                    job.blocks
                        .insert(cid.clone(), BlockInfo::assigned(&cid, &node, local_index));
                    job.unassigned.remove(&cid);
                    placements.push(Placement {
                        node,
                        cid: cid.clone(),
                        local_index,
                    });
                }
                Err(e) => {
                    self.stats.placement_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(job_id = %job_id, cid = %cid, error = %e, "Block left unassigned");
                    job.blocks.insert(cid.clone(), BlockInfo::unassigned(&cid));
                    job.unassigned.insert(cid.clone());
                    errors.push(e);
                }
            }
            self.save_block(&area, job, &cid);
        }

        placements
    }

    fn place_block(
        &self,
        area: &str,
        cid: &str,
        on_edges: bool,
        task: &TaskAssignment,
    ) -> Result<(Node, LocalIndex)> {
        let exclude: HashSet<DeviceId> = match self.persistent.nodes_with_block(area, cid) {
            Ok(holders) => holders.into_iter().collect(),
            Err(e) => {
                warn!(cid = %cid, error = %e, "Failed to read block holders");
                HashSet::new()
            }
        };

        let node = self.find_node(area, on_edges, &exclude)?;

        if !self.fast.claim_task(&node.device_id, task)? {
            let current = self.fast.task(&node.device_id)?;
            let (content_id, job_id) = current
                .map(|t| (t.content_id, t.job_id))
                .unwrap_or_default();
            return Err(EdgeError::AssignmentConflict {
                device_id: node.device_id,
                content_id,
                job_id,
            });
        }

        let local_index = self.fast.next_local_index(&node.device_id)?;
        Ok((node, local_index))
    }

    /// Group placements into one request per (target, source) pair.
    fn build_requests(
        &self,
        area: &str,
        content_id: &str,
        job_id: &str,
        placements: Vec<Placement>,
    ) -> Vec<(Node, CacheBlocksRequest)> {
        let mut grouped: BTreeMap<(DeviceId, Option<String>), (Node, Vec<BlockRequest>)> =
            BTreeMap::new();

        for placement in placements {
            let source_url = self.source_url(area, &placement.cid, &placement.node.device_id);
            grouped
                .entry((placement.node.device_id.clone(), source_url))
                .or_insert_with(|| (placement.node.clone(), Vec::new()))
                .1
                .push(BlockRequest {
                    cid: placement.cid,
                    local_index: placement.local_index,
                });
        }

        grouped
            .into_iter()
            .map(|((_, source_url), (node, blocks))| {
                let request = CacheBlocksRequest {
                    blocks,
                    source_url,
                    content_id: content_id.to_string(),
                    job_id: job_id.to_string(),
                };
                (node, request)
            })
            .collect()
    }

    /// Address of an online candidate already holding `cid`, other than `target`.
    fn source_url(&self, area: &str, cid: &str, target: &str) -> Option<String> {
        let holders = self.persistent.nodes_with_block(area, cid).ok()?;
        holders
            .iter()
            .filter(|id| id.as_str() != target)
            .filter_map(|id| self.registry.get(id))
            .find(|node| node.online && node.is_candidate())
            .map(|node| node.address)
    }

    fn save_block(&self, area: &str, job: &CacheJob, cid: &str) {
        if let Some(record) = job.block_record(cid) {
            if let Err(e) = self.persistent.save_block(area, &record) {
                warn!(job_id = %job.id, cid = %cid, error = %e, "Failed to persist block record");
            }
        }
    }

    fn save_content(&self, content: &ContentItem) {
        if let Err(e) = self.persistent.save_content(&content.to_record()) {
            warn!(cid = %content.cid, error = %e, "Failed to persist content record");
        }
    }
}
