//! Directory of live worker nodes.
//!
//! The registry is the single owner of mutable node state. Other components
//! hold a shared handle and look nodes up by device id; they never keep their
//! own copy of mutable fields such as the validator flag.

use crate::error::{EdgeError, Result};
use crate::geo::{GeoInfo, GeoLevel};
use crate::observability;
use crate::types::{DeviceId, Node, NodeRole};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::{debug, info};

/// In-memory registry of edge and candidate nodes.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: DashMap<DeviceId, Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, replacing any previous entry with the same id.
    ///
    /// A re-registered candidate keeps its validator flag.
    pub fn register(&self, mut node: Node) -> Option<Node> {
        info!(
            device_id = %node.device_id,
            role = %node.role,
            geo = %node.geo,
            bandwidth = node.bandwidth,
            "Node online"
        );
        let previous = match self.nodes.entry(node.device_id.clone()) {
            Entry::Occupied(mut entry) => {
                node.is_validator = entry.get().is_validator && node.is_candidate();
                Some(entry.insert(node))
            }
            Entry::Vacant(entry) => {
                entry.insert(node);
                None
            }
        };
        self.publish_counts();
        previous
    }

    /// Remove a node from the registry.
    pub fn remove(&self, device_id: &str) -> Option<Node> {
        let removed = self.nodes.remove(device_id).map(|(_, node)| node);
        if removed.is_some() {
            info!(device_id = %device_id, "Node offline");
            self.publish_counts();
        }
        removed
    }

    pub fn get(&self, device_id: &str) -> Option<Node> {
        self.nodes.get(device_id).map(|n| n.clone())
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.nodes.contains_key(device_id)
    }

    /// Apply a mutation to a registered node.
    pub fn update<F>(&self, device_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Node),
    {
        let mut node = self
            .nodes
            .get_mut(device_id)
            .ok_or_else(|| EdgeError::NodeNotFound(device_id.to_string()))?;
        f(&mut *node);
        Ok(())
    }

    pub fn set_validator(&self, device_id: &str, is_validator: bool) -> Result<()> {
        self.update(device_id, |node| {
            node.is_validator = is_validator && node.is_candidate();
        })
    }

    /// Clear the validator flag on every node.
    pub fn clear_validators(&self) {
        for mut node in self.nodes.iter_mut() {
            node.is_validator = false;
        }
    }

    /// Online nodes of `role` inside `region`, minus `exclude`.
    pub fn find_in_region(
        &self,
        role: NodeRole,
        region: &GeoInfo,
        exclude: &HashSet<DeviceId>,
    ) -> Vec<Node> {
        self.select(role, exclude, |geo| region.contains(geo))
    }

    /// Online candidates matching `geo` at exactly `level`, minus `exclude`.
    pub fn candidates_at_level(
        &self,
        geo: &GeoInfo,
        level: GeoLevel,
        exclude: &HashSet<DeviceId>,
    ) -> Vec<Node> {
        self.select(NodeRole::Candidate, exclude, |other| geo.matches_at(other, level))
    }

    /// Online candidates at the nearest level around `geo` where any exist.
    ///
    /// Returns the level the candidates were found at, `GeoLevel::Global` when none exist.
    pub fn nearest_candidates(
        &self,
        geo: &GeoInfo,
        exclude: &HashSet<DeviceId>,
    ) -> (Vec<Node>, GeoLevel) {
        for level in GeoLevel::SEARCH_ORDER {
            let found = self.candidates_at_level(geo, level, exclude);
            if !found.is_empty() {
                debug!(geo = %geo, level = ?level, count = found.len(), "Found candidates");
                return (found, level);
            }
        }
        (Vec::new(), GeoLevel::Global)
    }

    fn select<P>(&self, role: NodeRole, exclude: &HashSet<DeviceId>, geo_matches: P) -> Vec<Node>
    where
        P: Fn(&GeoInfo) -> bool,
    {
        let mut found: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| n.online && n.role == role && !exclude.contains(&n.device_id))
            .filter(|n| geo_matches(&GeoInfo::parse(&n.geo)))
            .map(|n| n.clone())
            .collect();
        // DashMap iteration order is unspecified; keep results stable.
        found.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        found
    }

    /// Online node count per role.
    pub fn count(&self, role: NodeRole) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.online && n.role == role)
            .count()
    }

    pub fn validator_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_validator).count()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.iter().map(|n| n.clone()).collect()
    }

    fn publish_counts(&self) {
        observability::update_fleet_metrics(
            self.count(NodeRole::Edge),
            self.count(NodeRole::Candidate),
        );
    }
}
