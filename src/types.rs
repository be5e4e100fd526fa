//! Core type definitions for the edgeplane coordinator.
//!
//! This module contains the data model shared by the registry, grouping,
//! replication, election and spot-check components, plus the logical
//! request/response shapes exchanged with worker nodes.
//!
//! # Key Types
//!
//! - [`Node`]: one worker machine as tracked by the registry
//! - [`BlockInfo`]: placement and progress of one block of a cache job
//! - [`CacheResultReport`]: completion report sent back by a worker
//! - [`CacheBlocksRequest`]: replication request sent to a worker
//! - [`VerifyChallenge`] / [`VerifyResult`]: spot-check request and answer
//!
//! # Example
//!
//! ```rust
//! use edgeplane::types::{Node, NodeRole};
//!
//! let node = Node::new("edge-1", NodeRole::Edge, "asia-china-guangdong-shenzhen", 300, "http://10.0.0.1:3456");
//! assert!(node.is_edge());
//! assert!(!node.is_validator);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Globally unique worker identifier.
pub type DeviceId = String;

/// Geographic key of a node or region (`continent-country-province-city`).
pub type GeoKey = String;

/// Name of an edge group within one geographic key.
pub type GroupName = String;

/// Replication job identifier.
pub type JobId = String;

/// Worker-local identifier of a cached block.
pub type LocalIndex = u64;

/// Role of a worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Serves cached content to end consumers.
    Edge,
    /// Serves content and may be elected validator.
    Candidate,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Edge => write!(f, "edge"),
            NodeRole::Candidate => write!(f, "candidate"),
        }
    }
}

/// A worker node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub device_id: DeviceId,
    pub role: NodeRole,
    pub geo: GeoKey,
    /// Upload bandwidth capacity in grouping units.
    pub bandwidth: u64,
    /// Base URL the node is reachable at.
    pub address: String,
    pub online: bool,
    /// Only ever set on candidate nodes.
    pub is_validator: bool,
}

impl Node {
    pub fn new(
        device_id: impl Into<String>,
        role: NodeRole,
        geo: impl Into<String>,
        bandwidth: u64,
        address: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            role,
            geo: geo.into(),
            bandwidth,
            address: address.into(),
            online: true,
            is_validator: false,
        }
    }

    pub fn is_edge(&self) -> bool {
        self.role == NodeRole::Edge
    }

    pub fn is_candidate(&self) -> bool {
        self.role == NodeRole::Candidate
    }
}

/// Status of a cache job or of one of its blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Assigned and dispatched, no result yet.
    Created,
    Failed,
    Succeeded,
}

impl CacheStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CacheStatus::Created)
    }
}

/// Placement and progress of one block of a cache job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInfo {
    pub cid: String,
    /// `None` while the block is waiting for a placement.
    pub device_id: Option<DeviceId>,
    pub geo: Option<GeoKey>,
    pub status: CacheStatus,
    pub reliability: u32,
    pub size: u64,
    /// Index the block was dispatched under on its device.
    pub local_index: Option<LocalIndex>,
}

impl BlockInfo {
    /// A block assigned to a device and dispatched.
    pub fn assigned(cid: impl Into<String>, node: &Node, local_index: LocalIndex) -> Self {
        Self {
            cid: cid.into(),
            device_id: Some(node.device_id.clone()),
            geo: Some(node.geo.clone()),
            status: CacheStatus::Created,
            reliability: 0,
            size: 0,
            local_index: Some(local_index),
        }
    }

    /// A block no node could take this pass.
    pub fn unassigned(cid: impl Into<String>) -> Self {
        Self {
            cid: cid.into(),
            device_id: None,
            geo: None,
            status: CacheStatus::Failed,
            reliability: 0,
            size: 0,
            local_index: None,
        }
    }
}

/// Current task of a worker node: the content and job it is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub content_id: String,
    pub job_id: JobId,
}

impl TaskAssignment {
    pub fn new(content_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            job_id: job_id.into(),
        }
    }
}

/// Registration sent by a worker when it comes online.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOnlineRequest {
    pub device_id: DeviceId,
    pub role: NodeRole,
    pub geo: GeoKey,
    #[serde(default)]
    pub bandwidth: u64,
    pub ip: String,
    pub port: u16,
}

/// Completion report for one block, sent by a worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheResultReport {
    pub cid: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Size of this block in bytes.
    #[serde(default)]
    pub size: u64,
    /// Child block CIDs discovered while fetching the block.
    #[serde(default)]
    pub links: Vec<String>,
    /// Cumulative size of everything reachable through `links`.
    #[serde(default)]
    pub links_size: u64,
    #[serde(default)]
    pub job_id: Option<JobId>,
    /// Local index the worker stored the block under.
    #[serde(default)]
    pub fid: Option<LocalIndex>,
}

impl CacheResultReport {
    /// A successful report for a leaf block.
    pub fn ok(cid: impl Into<String>, size: u64) -> Self {
        Self {
            cid: cid.into(),
            success: true,
            size,
            ..Default::default()
        }
    }

    /// A failed report.
    pub fn failed(cid: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            cid: cid.into(),
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Attach discovered links.
    pub fn with_links(mut self, links: Vec<String>, links_size: u64) -> Self {
        self.links = links;
        self.links_size = links_size;
        self
    }
}

/// One block a worker should fetch or serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequest {
    pub cid: String,
    pub local_index: LocalIndex,
}

/// Replication request sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheBlocksRequest {
    pub blocks: Vec<BlockRequest>,
    /// Peer to fetch from when the worker cannot source a block locally.
    pub source_url: Option<String>,
    pub content_id: String,
    pub job_id: JobId,
}

impl CacheBlocksRequest {
    pub fn cids(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.cid.as_str())
    }
}

/// One challenge bundled into a verification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyChallenge {
    /// Edge being challenged.
    pub device_id: DeviceId,
    /// Local identifier of the block on the edge.
    pub fid: LocalIndex,
    /// URL the validator fetches the block from.
    pub url: String,
}

/// A validator's answer for one challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub device_id: DeviceId,
    /// CID computed from the fetched bytes.
    pub cid: String,
}

/// One scheduler endpoint published for an area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerInfo {
    pub url: String,
    pub weight: u32,
    pub online: bool,
    pub access_token: String,
}

/// All scheduler endpoints of one area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub area_id: String,
    pub schedulers: Vec<SchedulerInfo>,
}

/// Snapshot of the fleet as seen by the coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetStatus {
    pub edges_online: usize,
    pub candidates_online: usize,
    pub validators: usize,
    /// Number of edge groups per geographic key.
    pub groups: HashMap<GeoKey, usize>,
}
