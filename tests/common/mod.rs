//! Common test utilities for integration tests.

pub mod fixtures;
pub mod mock_rpc;

use edgeplane::config::EdgeplaneConfig;
use edgeplane::coordinator::Coordinator;
use edgeplane::storage::MemoryStore;
use std::sync::Arc;

// Re-export common types
pub use fixtures::*;
pub use mock_rpc::*;

/// Area served by test coordinators.
pub const TEST_AREA: &str = "asia-china";

/// A coordinator over in-memory stores and a recording worker RPC.
pub struct TestCoordinator {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<MemoryStore>,
    pub rpc: Arc<RecordingRpc>,
}

impl TestCoordinator {
    pub fn new() -> Self {
        let mut config = EdgeplaneConfig::development();
        config.coordinator.area = TEST_AREA.to_string();
        Self::with_config(config)
    }

    pub fn with_config(config: EdgeplaneConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let rpc = Arc::new(RecordingRpc::new());
        let coordinator = Arc::new(Coordinator::new(
            config,
            store.clone(),
            store.clone(),
            rpc.clone(),
        ));
        Self {
            coordinator,
            store,
            rpc,
        }
    }

    /// Bring an edge online and return its group.
    pub fn edge(&self, id: &str, geo: &str, bandwidth: u64) -> String {
        self.coordinator
            .node_online(online_request(id, edgeplane::NodeRole::Edge, geo, bandwidth))
            .expect("edge online")
            .expect("edges are grouped")
    }

    /// Bring a candidate online.
    pub fn candidate(&self, id: &str, geo: &str) {
        self.coordinator
            .node_online(online_request(id, edgeplane::NodeRole::Candidate, geo, 0))
            .expect("candidate online");
    }

    /// Queue a report and process the worklist.
    pub async fn report(&self, device_id: &str, report: edgeplane::CacheResultReport) -> usize {
        self.coordinator.cache_result(device_id, report);
        self.coordinator.replication().drain().await
    }
}

impl Default for TestCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
