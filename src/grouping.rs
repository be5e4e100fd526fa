//! Bandwidth-bounded grouping of edge nodes per geographic key.
//!
//! Edge nodes in the same geographic key are packed into groups whose summed
//! upload bandwidth stays at or below a high-water mark. A group accepts new
//! members only while its total is below the low-water mark; once it reaches
//! the low-water mark it is marked full and never reopened, even if members
//! later leave. Assignments are sticky: a device keeps its group for as long
//! as it stays registered.
//!
//! Each geographic key is written by one caller at a time (the map entry for
//! the key is held for the whole decision); different keys proceed in parallel.

use crate::config::GroupingConfig;
use crate::observability;
use crate::types::{DeviceId, GeoKey, GroupName, Node};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const GROUP_PREFIX: &str = "Group_";

#[derive(Debug, Clone)]
struct Group {
    name: GroupName,
    members: BTreeMap<DeviceId, u64>,
}

impl Group {
    fn total(&self) -> u64 {
        self.members.values().sum()
    }
}

/// Groups of one geographic key.
#[derive(Debug, Default)]
struct GeoGroups {
    /// In creation order.
    groups: Vec<Group>,
    /// Groups still open for joins, in the order they were opened.
    not_full: Vec<GroupName>,
}

impl GeoGroups {
    fn group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.name == name)
    }
}

/// Read-only view of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub name: GroupName,
    pub geo: GeoKey,
    pub members: BTreeMap<DeviceId, u64>,
    pub total_bandwidth: u64,
    pub open: bool,
}

/// Assigns edge nodes to bandwidth-bounded groups.
pub struct GeoGroupingService {
    config: GroupingConfig,
    geos: DashMap<GeoKey, GeoGroups>,
    /// Sticky assignment: device -> (geo, group).
    assignments: DashMap<DeviceId, (GeoKey, GroupName)>,
    group_seq: AtomicU64,
}

impl GeoGroupingService {
    pub fn new(config: GroupingConfig) -> Self {
        Self {
            config,
            geos: DashMap::new(),
            assignments: DashMap::new(),
            group_seq: AtomicU64::new(0),
        }
    }

    fn next_group_name(&self) -> GroupName {
        let seq = self.group_seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}{}", GROUP_PREFIX, seq)
    }

    /// Assign an edge node to a group and return the group name.
    ///
    /// A device that already has a group gets the same group back, whatever its
    /// current bandwidth or geographic key. A node whose bandwidth alone exceeds
    /// the high-water mark ends up alone in a new group.
    pub fn assign_group(&self, node: &Node) -> GroupName {
        if let Some(existing) = self.assignments.get(&node.device_id) {
            return existing.1.clone();
        }

        let mut geo = self.geos.entry(node.geo.clone()).or_default();

        // Lost a race with another assignment of the same device.
        if let Some(existing) = self.assignments.get(&node.device_id) {
            return existing.1.clone();
        }

        let high = self.config.high_water_mark;
        let joinable = geo
            .not_full
            .iter()
            .find(|name| {
                geo.groups
                    .iter()
                    .find(|g| &g.name == *name)
                    .map(|g| g.total() + node.bandwidth <= high)
                    .unwrap_or(false)
            })
            .cloned();

        let name = match joinable {
            Some(name) => name,
            None => {
                let name = self.next_group_name();
                geo.groups.push(Group {
                    name: name.clone(),
                    members: BTreeMap::new(),
                });
                debug!(geo = %node.geo, group = %name, "Created group");
                name
            }
        };

        let total = match geo.group_mut(&name) {
            Some(group) => {
                group.members.insert(node.device_id.clone(), node.bandwidth);
                group.total()
            }
            None => 0,
        };

        if total < self.config.low_water_mark {
            if !geo.not_full.contains(&name) {
                geo.not_full.push(name.clone());
            }
        } else {
            geo.not_full.retain(|n| n != &name);
        }

        self.assignments
            .insert(node.device_id.clone(), (node.geo.clone(), name.clone()));
        drop(geo);

        info!(
            device_id = %node.device_id,
            geo = %node.geo,
            group = %name,
            total_bandwidth = total,
            "Edge node grouped"
        );
        observability::update_group_metrics(self.total_groups());
        name
    }

    /// Remove a device from its group and forget its sticky assignment.
    ///
    /// Empty groups are dropped. A group that was marked full stays closed to new
    /// joins after members leave.
    pub fn release(&self, device_id: &str) -> Option<GroupName> {
        let (geo_key, name) = self.assignments.get(device_id).map(|a| a.clone())?;

        if let Some(mut geo) = self.geos.get_mut(&geo_key) {
            let mut emptied = false;
            if let Some(group) = geo.group_mut(&name) {
                group.members.remove(device_id);
                emptied = group.members.is_empty();
            }
            if emptied {
                geo.groups.retain(|g| g.name != name);
                geo.not_full.retain(|n| n != &name);
            }
            self.assignments.remove(device_id);
        }
        // Drop geo keys that no longer hold any group.
        self.geos.remove_if(&geo_key, |_, g| g.groups.is_empty());

        debug!(device_id = %device_id, group = %name, "Edge node left group");
        observability::update_group_metrics(self.total_groups());
        Some(name)
    }

    pub fn group_of(&self, device_id: &str) -> Option<GroupName> {
        self.assignments.get(device_id).map(|a| a.1.clone())
    }

    /// Snapshots of every group of a geographic key, in creation order.
    pub fn groups(&self, geo: &str) -> Vec<GroupSnapshot> {
        self.geos
            .get(geo)
            .map(|g| {
                g.groups
                    .iter()
                    .map(|group| GroupSnapshot {
                        name: group.name.clone(),
                        geo: geo.to_string(),
                        members: group.members.clone(),
                        total_bandwidth: group.total(),
                        open: g.not_full.contains(&group.name),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of groups per geographic key, for keys with at least one group.
    pub fn group_counts(&self) -> HashMap<GeoKey, usize> {
        self.geos
            .iter()
            .filter(|e| !e.groups.is_empty())
            .map(|e| (e.key().clone(), e.groups.len()))
            .collect()
    }

    pub fn total_groups(&self) -> usize {
        self.geos.iter().map(|e| e.groups.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeRole;

    fn service() -> GeoGroupingService {
        GeoGroupingService::new(GroupingConfig::default())
    }

    fn edge(id: &str, geo: &str, bandwidth: u64) -> Node {
        Node::new(id, NodeRole::Edge, geo, bandwidth, format!("http://{}:3456", id))
    }

    #[test]
    fn test_nodes_share_group_until_low_water() {
        let svc = service();
        let g1 = svc.assign_group(&edge("e1", "geo-a", 400));
        let g2 = svc.assign_group(&edge("e2", "geo-a", 400));
        assert_eq!(g1, g2);

        // 800 + 300 would exceed 1024.
        let g3 = svc.assign_group(&edge("e3", "geo-a", 300));
        assert_ne!(g1, g3);

        // 800 + 100 = 900 reaches the low-water mark and closes the group.
        let g4 = svc.assign_group(&edge("e4", "geo-a", 100));
        assert_eq!(g1, g4);
        let groups = svc.groups("geo-a");
        let first = groups.iter().find(|g| g.name == g1).unwrap();
        assert_eq!(first.total_bandwidth, 900);
        assert!(!first.open);
    }

    #[test]
    fn test_join_between_marks_allowed_up_to_high() {
        let svc = service();
        let g1 = svc.assign_group(&edge("e1", "geo-a", 850));
        let g2 = svc.assign_group(&edge("e2", "geo-a", 174));
        assert_eq!(g1, g2);
        assert_eq!(svc.groups("geo-a")[0].total_bandwidth, 1024);
    }

    #[test]
    fn test_geo_keys_are_isolated() {
        let svc = service();
        let a = svc.assign_group(&edge("e1", "geo-a", 100));
        let b = svc.assign_group(&edge("e2", "geo-b", 100));
        assert_ne!(a, b);
        assert_eq!(svc.group_counts().len(), 2);
    }

    #[test]
    fn test_assignment_is_sticky() {
        let svc = service();
        let first = svc.assign_group(&edge("e1", "geo-a", 100));
        let again = svc.assign_group(&edge("e1", "geo-a", 1000));
        let moved = svc.assign_group(&edge("e1", "geo-b", 1));
        assert_eq!(first, again);
        assert_eq!(first, moved);
        assert_eq!(svc.groups("geo-a")[0].members.get("e1"), Some(&100));
    }

    #[test]
    fn test_full_group_stays_closed_after_leave() {
        let svc = service();
        let g1 = svc.assign_group(&edge("e1", "geo-a", 500));
        svc.assign_group(&edge("e2", "geo-a", 450));
        assert!(!svc.groups("geo-a")[0].open);

        svc.release("e2");
        let snapshot = &svc.groups("geo-a")[0];
        assert_eq!(snapshot.total_bandwidth, 500);
        assert!(!snapshot.open);

        let g3 = svc.assign_group(&edge("e3", "geo-a", 10));
        assert_ne!(g1, g3);
    }

    #[test]
    fn test_release_drops_empty_groups() {
        let svc = service();
        svc.assign_group(&edge("e1", "geo-a", 100));
        assert_eq!(svc.total_groups(), 1);

        assert!(svc.release("e1").is_some());
        assert_eq!(svc.total_groups(), 0);
        assert!(svc.group_of("e1").is_none());
        assert!(svc.release("e1").is_none());
        assert!(svc.group_counts().is_empty());
    }

    #[test]
    fn test_oversized_node_gets_own_group() {
        let svc = service();
        let g1 = svc.assign_group(&edge("e1", "geo-a", 2000));
        let g2 = svc.assign_group(&edge("e2", "geo-a", 10));
        assert_ne!(g1, g2);
    }

    #[test]
    fn test_group_totals_never_exceed_high_water() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let svc = service();
        let mut rng = StdRng::seed_from_u64(7);
        for i in 0..500 {
            let geo = format!("geo-{}", i % 5);
            svc.assign_group(&edge(&format!("e{}", i), &geo, rng.gen_range(1..=1024)));
        }

        for geo in svc.group_counts().keys() {
            for group in svc.groups(geo) {
                assert!(group.total_bandwidth <= 1024, "{} over limit", group.name);
            }
        }
    }
}
