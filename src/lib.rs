//! Edgeplane - control plane of a geographically distributed edge caching network.
//!
//! Edgeplane tracks the worker nodes of an edge fleet, organises edge nodes
//! into bandwidth-balanced groups per location, drives replication of
//! content-addressed data across the fleet, elects validators among candidate
//! nodes and runs spot checks that confirm edges really hold what they claim.
//!
//! # Features
//!
//! - **Geo grouping**: edges are packed into groups whose total bandwidth stays
//!   below a high water mark.
//! - **Replication orchestration**: a content DAG is walked block by block as
//!   workers report back, with at most one task per node.
//! - **Validator election**: city-level validators first, then the nearest
//!   candidates elsewhere.
//! - **Spot checks**: validators re-fetch sampled blocks and the computed CIDs
//!   are compared against the expected ones.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Edgeplane                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HTTP API: node lifecycle | cache jobs | access points      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Coordinator: grouping | replication | election | audit     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Node registry | worker RPC | persistent + fast stores      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use edgeplane::config::EdgeplaneConfig;
//!
//! #[tokio::main]
//! async fn main() -> edgeplane::Result<()> {
//!     let config = EdgeplaneConfig::development();
//!     edgeplane::run(config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod access;
pub mod content_id;
pub mod coordinator;
pub mod election;
pub mod geo;
pub mod grouping;
pub mod registry;
pub mod replication;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod spot_check;
pub mod storage;

pub mod cli;
pub mod client;
pub mod observability;

// Re-exports
pub use error::{EdgeError, Result};
pub use types::*;

use config::EdgeplaneConfig;
use coordinator::Coordinator;
use shutdown::{ServiceHandle, ShutdownCoordinator, ShutdownManager, SignalHandler};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run the coordinator with the given configuration until SIGTERM/SIGINT.
pub async fn run(config: EdgeplaneConfig) -> Result<()> {
    observability::init(&config.observability)?;
    config.validate()?;

    info!(
        name = %config.coordinator.name,
        area = %config.coordinator.area,
        "Starting edgeplane coordinator"
    );

    let shutdown = ShutdownCoordinator::new();
    let mut shutdown_manager = ShutdownManager::new(shutdown.clone());
    let mut handles = Vec::new();

    let coordinator = Arc::new(Coordinator::from_config(config.clone())?);
    for service in coordinator.start(&shutdown) {
        shutdown_manager.register(service);
    }

    if config.observability.metrics_enabled {
        info!("Starting metrics server on {}", config.observability.metrics_addr);
        let obs_config = config.observability.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = observability::run_metrics_server(obs_config).await {
                error!("Metrics server error: {}", e);
            }
        });
        handles.push(("metrics", handle));
    }

    let api_addr = config.server.bind_addr;
    let api_coordinator = coordinator.clone();
    let api_shutdown = shutdown.clone();
    let api = tokio::spawn(async move {
        if let Err(e) = server::run_server(api_addr, api_coordinator, api_shutdown.clone()).await {
            error!("API server error: {}", e);
            api_shutdown.shutdown();
        }
    });
    shutdown_manager.register(ServiceHandle::task("api", api));

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        SignalHandler::new(signal_shutdown).run().await;
    });

    shutdown.wait_for_shutdown().await;
    info!("Shutting down edgeplane gracefully...");

    shutdown_manager.run().await;

    for (name, handle) in handles {
        if !handle.is_finished() {
            warn!(service = %name, "Force aborting service");
            handle.abort();
        }
    }

    info!("Edgeplane shutdown complete");
    Ok(())
}
