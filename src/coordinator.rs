//! The coordinator: every component wired over one node registry.

use crate::access::AccessPointDirectory;
use crate::config::{EdgeplaneConfig, StorageBackend};
use crate::election::{ElectionReport, ValidatorElection};
use crate::error::{EdgeError, Result};
use crate::grouping::GeoGroupingService;
use crate::registry::NodeRegistry;
use crate::replication::{JobSummary, ReplicationOrchestrator};
use crate::rpc::{HttpWorkerRpc, WorkerRpc};
use crate::shutdown::{ServiceHandle, ShutdownCoordinator};
use crate::spot_check::{AuditOutcome, SpotCheckEngine};
use crate::storage::{FastStore, MemoryStore, PersistentStore};
use crate::types::{
    CacheResultReport, FleetStatus, GroupName, JobId, Node, NodeOnlineRequest, NodeRole,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Control plane of the edge fleet.
pub struct Coordinator {
    config: EdgeplaneConfig,
    registry: Arc<NodeRegistry>,
    grouping: Arc<GeoGroupingService>,
    fast: Arc<dyn FastStore>,
    replication: Arc<ReplicationOrchestrator>,
    election: ValidatorElection,
    spot_check: SpotCheckEngine,
    access_points: AccessPointDirectory,
}

impl Coordinator {
    /// Build a coordinator over explicit stores and worker RPC.
    pub fn new(
        config: EdgeplaneConfig,
        persistent: Arc<dyn PersistentStore>,
        fast: Arc<dyn FastStore>,
        rpc: Arc<dyn WorkerRpc>,
    ) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        let grouping = Arc::new(GeoGroupingService::new(config.grouping.clone()));

        let replication = Arc::new(ReplicationOrchestrator::new(
            &config.replication,
            config.coordinator.area.clone(),
            registry.clone(),
            persistent.clone(),
            fast.clone(),
            rpc.clone(),
        ));
        let election = ValidatorElection::new(registry.clone(), grouping.clone(), fast.clone());
        let spot_check = SpotCheckEngine::new(
            registry.clone(),
            grouping.clone(),
            persistent,
            fast.clone(),
            rpc,
            config.spot_check.verify_timeout,
        );

        Self {
            config,
            registry,
            grouping,
            fast,
            replication,
            election,
            spot_check,
            access_points: AccessPointDirectory::new(),
        }
    }

    /// Build a coordinator with the stores and RPC client named by `config`.
    pub fn from_config(config: EdgeplaneConfig) -> Result<Self> {
        let memory = Arc::new(MemoryStore::new());
        let persistent: Arc<dyn PersistentStore> = match config.storage.backend {
            StorageBackend::Memory => memory.clone(),
            #[cfg(feature = "rocksdb")]
            StorageBackend::Rocksdb => {
                std::fs::create_dir_all(&config.storage.data_dir)?;
                Arc::new(crate::storage::RocksStore::open(&config.storage.data_dir)?)
            }
            #[cfg(not(feature = "rocksdb"))]
            StorageBackend::Rocksdb => {
                return Err(EdgeError::Config(
                    "storage backend 'rocksdb' requires the rocksdb feature".to_string(),
                ))
            }
        };
        let rpc = Arc::new(HttpWorkerRpc::new(&config.network));

        Ok(Self::new(config, persistent, memory, rpc))
    }

    pub fn config(&self) -> &EdgeplaneConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn grouping(&self) -> &Arc<GeoGroupingService> {
        &self.grouping
    }

    pub fn replication(&self) -> &Arc<ReplicationOrchestrator> {
        &self.replication
    }

    pub fn access_points(&self) -> &AccessPointDirectory {
        &self.access_points
    }

    /// Register a worker. Edge nodes are also placed in a group.
    pub fn node_online(&self, request: NodeOnlineRequest) -> Result<Option<GroupName>> {
        if request.device_id.is_empty() {
            return Err(EdgeError::InvalidInput("device id is required".to_string()));
        }
        if request.ip.is_empty() || request.port == 0 {
            return Err(EdgeError::InvalidInput(format!(
                "invalid address {}:{}",
                request.ip, request.port
            )));
        }

        let address = format!(
            "{}://{}:{}",
            self.config.network.worker_scheme, request.ip, request.port
        );
        let node = Node::new(
            request.device_id,
            request.role,
            request.geo,
            request.bandwidth,
            address,
        );

        let group = match node.role {
            NodeRole::Edge => Some(self.grouping.assign_group(&node)),
            NodeRole::Candidate => None,
        };
        self.registry.register(node);
        Ok(group)
    }

    /// Remove a worker, its group membership and its task assignment.
    ///
    /// Blocks the worker had in flight are handed back to the replication
    /// processor for placement elsewhere.
    pub fn node_offline(&self, device_id: &str) -> Result<()> {
        self.registry
            .remove(device_id)
            .ok_or_else(|| EdgeError::NodeNotFound(device_id.to_string()))?;

        self.grouping.release(device_id);
        let task = match self.fast.task(device_id) {
            Ok(task) => task,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Failed to read task assignment");
                None
            }
        };
        if let Err(e) = self.fast.release_task(device_id) {
            warn!(device_id = %device_id, error = %e, "Failed to clear task assignment");
        }
        if let Some(task) = task {
            self.replication.node_lost(device_id, task);
        }
        Ok(())
    }

    /// Queue a worker's completion report.
    pub fn cache_result(&self, device_id: &str, report: CacheResultReport) {
        self.replication.cache_result(device_id, report);
    }

    pub async fn cache_content(&self, cid: &str, reliability: u32) -> Result<JobId> {
        self.replication.cache_content(cid, reliability).await
    }

    pub async fn job_summary(&self, cid: &str, job_id: Option<&str>) -> Result<JobSummary> {
        self.replication.job_summary(cid, job_id).await
    }

    pub fn elect(&self) -> Result<ElectionReport> {
        self.election.elect()
    }

    pub async fn spot_check(&self) -> Result<Vec<AuditOutcome>> {
        self.spot_check.run_cycle().await
    }

    pub fn status(&self) -> FleetStatus {
        FleetStatus {
            edges_online: self.registry.count(NodeRole::Edge),
            candidates_online: self.registry.count(NodeRole::Candidate),
            validators: self.registry.validator_count(),
            groups: self.grouping.group_counts(),
        }
    }

    /// Start the replication processor and the periodic loops.
    pub fn start(self: &Arc<Self>, shutdown: &ShutdownCoordinator) -> Vec<ServiceHandle> {
        let mut services = Vec::new();

        if let Some(handle) = self.replication.start(shutdown.clone()) {
            services.push(ServiceHandle::task("replication-processor", handle));
        }

        if self.config.election.enabled {
            let this = Arc::clone(self);
            let handle = spawn_periodic(
                "election",
                self.config.election.interval,
                shutdown.clone(),
                move || {
                    let this = Arc::clone(&this);
                    async move {
                        if let Err(e) = this.elect() {
                            error!(error = %e, "Validator election failed");
                        }
                    }
                },
            );
            services.push(ServiceHandle::task("election", handle));
        }

        if self.config.spot_check.enabled {
            let this = Arc::clone(self);
            let handle = spawn_periodic(
                "spot-check",
                self.config.spot_check.interval,
                shutdown.clone(),
                move || {
                    let this = Arc::clone(&this);
                    async move {
                        if let Err(e) = this.spot_check().await {
                            error!(error = %e, "Spot check cycle failed");
                        }
                    }
                },
            );
            services.push(ServiceHandle::task("spot-check", handle));
        }

        services
    }
}

/// Run `tick` every `period` until shutdown. The first run happens one period in.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: ShutdownCoordinator,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, period = ?period, "Periodic task started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                _ = shutdown.wait_for_shutdown() => {
                    info!(task = name, "Periodic task shutting down");
                    break;
                }
            }
        }
    })
}
