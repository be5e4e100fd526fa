//! Validator election.
//!
//! Every run rebuilds the validator set from scratch. Each geographic key with
//! edge groups wants one validator per group. Candidates in the same city are
//! used first; regions left short are then served by the nearest remaining
//! candidates, pass after pass, until every need is met or a pass finds nobody.

use crate::error::{EdgeError, Result};
use crate::geo::{GeoInfo, GeoLevel};
use crate::grouping::GeoGroupingService;
use crate::observability;
use crate::registry::NodeRegistry;
use crate::storage::FastStore;
use crate::types::{DeviceId, GeoKey, Node};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one election run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionReport {
    /// Validator -> geographic keys it is responsible for.
    pub validators: BTreeMap<DeviceId, BTreeSet<GeoKey>>,
    /// Geographic keys left short, with the number of validators missing.
    pub unmet: BTreeMap<GeoKey, usize>,
    /// Number of passes run, including the local pass.
    pub passes: usize,
}

impl ElectionReport {
    /// Validators assigned to a geographic key.
    pub fn validators_for(&self, geo: &str) -> usize {
        self.validators.values().filter(|geos| geos.contains(geo)).count()
    }
}

/// Working state of one run.
#[derive(Default)]
struct Ballot {
    assigned: HashSet<DeviceId>,
    report: ElectionReport,
}

impl Ballot {
    /// Assign up to `wanted` of `candidates` to `geo`; returns how many were taken.
    fn assign(&mut self, geo: &str, mut candidates: Vec<Node>, wanted: usize) -> usize {
        candidates.shuffle(&mut rand::thread_rng());
        let mut taken = 0;
        for node in candidates.into_iter().take(wanted) {
            if !self.assigned.insert(node.device_id.clone()) {
                continue;
            }
            self.report
                .validators
                .entry(node.device_id)
                .or_default()
                .insert(geo.to_string());
            taken += 1;
        }
        taken
    }
}

/// Elects candidate nodes as validators for regions with edge groups.
pub struct ValidatorElection {
    registry: Arc<NodeRegistry>,
    grouping: Arc<GeoGroupingService>,
    fast: Arc<dyn FastStore>,
}

impl ValidatorElection {
    pub fn new(
        registry: Arc<NodeRegistry>,
        grouping: Arc<GeoGroupingService>,
        fast: Arc<dyn FastStore>,
    ) -> Self {
        Self {
            registry,
            grouping,
            fast,
        }
    }

    /// Run a full election: reset, local pass, backoff passes, commit.
    pub fn elect(&self) -> Result<ElectionReport> {
        self.reset()?;

        let group_counts: BTreeMap<GeoKey, usize> = self.grouping.group_counts().into_iter().collect();
        let mut ballot = Ballot::default();
        let mut need = self.local_pass(&mut ballot, &group_counts);
        ballot.report.passes = 1;

        while !need.is_empty() {
            ballot.report.passes += 1;
            let mut found = 0;

            for (geo, missing) in need.iter_mut() {
                let info = GeoInfo::parse(geo);
                let (candidates, level) = self.registry.nearest_candidates(&info, &ballot.assigned);
                let taken = ballot.assign(geo, candidates, *missing);
                if taken > 0 {
                    debug!(geo = %geo, level = ?level, taken, pass = ballot.report.passes, "Backoff validators assigned");
                }
                *missing -= taken;
                found += taken;
            }
            need.retain(|_, missing| *missing > 0);

            if found == 0 {
                for (geo, missing) in &need {
                    let e = EdgeError::InsufficientValidators {
                        geo: geo.clone(),
                        missing: *missing,
                    };
                    warn!(geo = %geo, missing, error = %e, "Not enough candidates to cover region");
                }
                ballot.report.unmet = need;
                break;
            }
        }

        self.commit(&ballot.report);

        info!(
            validators = ballot.report.validators.len(),
            regions = group_counts.len(),
            unmet = ballot.report.unmet.len(),
            passes = ballot.report.passes,
            "Validator election complete"
        );
        observability::record_election(ballot.report.validators.len(), ballot.report.unmet.len());
        Ok(ballot.report)
    }

    /// Clear every validator flag and the stored validator sets.
    fn reset(&self) -> Result<()> {
        self.registry.clear_validators();
        self.fast.clear_validators()
    }

    /// Assign city-level candidates; returns what is still missing per region.
    fn local_pass(
        &self,
        ballot: &mut Ballot,
        group_counts: &BTreeMap<GeoKey, usize>,
    ) -> BTreeMap<GeoKey, usize> {
        let mut need = BTreeMap::new();

        for (geo, &groups) in group_counts {
            let info = GeoInfo::parse(geo);
            let taken = if info.granularity() == GeoLevel::City {
                let candidates =
                    self.registry
                        .candidates_at_level(&info, GeoLevel::City, &ballot.assigned);
                ballot.assign(geo, candidates, groups)
            } else {
                0
            };

            if taken < groups {
                need.insert(geo.clone(), groups - taken);
            }
        }

        need
    }

    /// Flag validators and persist their assignments. Failures are logged and
    /// the rest of the assignment is still committed.
    fn commit(&self, report: &ElectionReport) {
        for (device_id, geos) in &report.validators {
            if let Err(e) = self.registry.set_validator(device_id, true) {
                warn!(device_id = %device_id, error = %e, "Failed to flag validator");
            }
            if let Err(e) = self.fast.add_validator(device_id) {
                warn!(device_id = %device_id, error = %e, "Failed to persist validator");
            }
            for geo in geos {
                if let Err(e) = self.fast.add_validator_geo(device_id, geo) {
                    warn!(device_id = %device_id, geo = %geo, error = %e, "Failed to persist validator region");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GroupingConfig;
    use crate::storage::MemoryStore;
    use crate::types::NodeRole;

    struct Fixture {
        registry: Arc<NodeRegistry>,
        grouping: Arc<GeoGroupingService>,
        store: Arc<MemoryStore>,
        election: ValidatorElection,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(NodeRegistry::new());
        let grouping = Arc::new(GeoGroupingService::new(GroupingConfig::default()));
        let store = Arc::new(MemoryStore::new());
        let election = ValidatorElection::new(registry.clone(), grouping.clone(), store.clone());
        Fixture {
            registry,
            grouping,
            store,
            election,
        }
    }

    impl Fixture {
        fn edge(&self, id: &str, geo: &str, bandwidth: u64) {
            let node = Node::new(id, NodeRole::Edge, geo, bandwidth, format!("http://{}", id));
            self.registry.register(node.clone());
            self.grouping.assign_group(&node);
        }

        fn candidate(&self, id: &str, geo: &str) {
            self.registry
                .register(Node::new(id, NodeRole::Candidate, geo, 100, format!("http://{}", id)));
        }
    }

    const SZ: &str = "asia-china-guangdong-shenzhen";

    #[test]
    fn test_local_candidates_cover_groups() {
        let f = fixture();
        f.edge("e1", SZ, 1000);
        f.edge("e2", SZ, 1000);
        f.candidate("c1", SZ);
        f.candidate("c2", SZ);
        f.candidate("c3", SZ);

        let report = f.election.elect().unwrap();
        assert_eq!(report.validators_for(SZ), 2);
        assert_eq!(report.passes, 1);
        assert!(report.unmet.is_empty());
        assert_eq!(f.registry.validator_count(), 2);
        assert_eq!(f.store.validators().unwrap().len(), 2);
    }

    #[test]
    fn test_backoff_pass_fills_shortfall() {
        let f = fixture();
        f.edge("e1", SZ, 1000);
        f.edge("e2", SZ, 1000);
        f.edge("e3", SZ, 1000);
        f.candidate("c1", SZ);
        f.candidate("c2", SZ);
        f.candidate("c3", "asia-china-guangdong-guangzhou");

        let report = f.election.elect().unwrap();
        assert_eq!(report.validators_for(SZ), 3);
        assert_eq!(report.passes, 2);
        assert!(report.unmet.is_empty());
        assert_eq!(f.store.validator_geos("c3").unwrap(), vec![SZ.to_string()]);
    }

    #[test]
    fn test_insufficient_candidates_is_soft_failure() {
        let f = fixture();
        f.edge("e1", SZ, 1000);
        f.edge("e2", SZ, 1000);
        f.candidate("c1", "europe-germany-berlin-berlin");

        let report = f.election.elect().unwrap();
        assert_eq!(report.validators_for(SZ), 1);
        assert_eq!(report.unmet.get(SZ), Some(&1));
        assert!(f.registry.get("c1").unwrap().is_validator);
    }

    #[test]
    fn test_rerun_resets_previous_assignments() {
        let f = fixture();
        f.edge("e1", SZ, 1000);
        f.candidate("c1", SZ);
        f.election.elect().unwrap();
        assert!(f.registry.get("c1").unwrap().is_validator);

        f.grouping.release("e1");
        f.registry.remove("e1");
        let report = f.election.elect().unwrap();
        assert!(report.validators.is_empty());
        assert!(!f.registry.get("c1").unwrap().is_validator);
        assert!(f.store.validator_geos("c1").unwrap().is_empty());
    }

    #[test]
    fn test_coarse_region_skips_local_pass() {
        let f = fixture();
        f.edge("e1", "asia-china", 1000);
        f.candidate("c1", "asia-china-beijing-beijing");

        let report = f.election.elect().unwrap();
        assert_eq!(report.validators_for("asia-china"), 1);
        assert_eq!(report.passes, 2);
    }
}
