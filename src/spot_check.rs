//! Integrity spot checks.
//!
//! Each validator samples one not yet sampled group in every region it is
//! responsible for, challenges each online edge in that group for one randomly
//! chosen block the edge claims to cache, and reports the CID it computed from
//! the bytes it fetched. Outcomes are logged and returned to the caller; they do
//! not feed any reputation score.

use crate::content_id;
use crate::error::{EdgeError, Result};
use crate::grouping::GeoGroupingService;
use crate::observability;
use crate::registry::NodeRegistry;
use crate::rpc::WorkerRpc;
use crate::storage::{FastStore, PersistentStore};
use crate::types::{DeviceId, GroupName, LocalIndex, Node, VerifyChallenge, VerifyResult};
use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Verdict of one challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Computed and expected CIDs name the same content.
    Passed,
    Mismatch,
    /// The validator returned something that is not a CID.
    Undecodable,
    /// The validator did not answer for this edge.
    NoResponse,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Mismatch => "mismatch",
            Verdict::Undecodable => "undecodable",
            Verdict::NoResponse => "no_response",
        }
    }
}

/// Audit record of one challenged edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub validator: DeviceId,
    pub edge: DeviceId,
    pub fid: LocalIndex,
    pub expected: String,
    pub computed: Option<String>,
    pub verdict: Verdict,
}

/// Challenges prepared for one validator.
struct ChallengeSet {
    validator: Node,
    challenges: Vec<VerifyChallenge>,
    /// edge -> expected cid
    expected: HashMap<DeviceId, String>,
}

/// Runs spot check cycles.
pub struct SpotCheckEngine {
    registry: Arc<NodeRegistry>,
    grouping: Arc<GeoGroupingService>,
    persistent: Arc<dyn PersistentStore>,
    fast: Arc<dyn FastStore>,
    rpc: Arc<dyn WorkerRpc>,
    verify_timeout: Duration,
}

impl SpotCheckEngine {
    pub fn new(
        registry: Arc<NodeRegistry>,
        grouping: Arc<GeoGroupingService>,
        persistent: Arc<dyn PersistentStore>,
        fast: Arc<dyn FastStore>,
        rpc: Arc<dyn WorkerRpc>,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            grouping,
            persistent,
            fast,
            rpc,
            verify_timeout,
        }
    }

    /// Run one cycle over every current validator.
    pub async fn run_cycle(&self) -> Result<Vec<AuditOutcome>> {
        let sets = self.prepare()?;
        if sets.is_empty() {
            debug!("Spot check found nothing to challenge");
            return Ok(Vec::new());
        }

        let audits = sets.into_iter().map(|set| self.audit(set));
        let outcomes: Vec<AuditOutcome> = join_all(audits).await.into_iter().flatten().collect();

        let passed = outcomes.iter().filter(|o| o.verdict == Verdict::Passed).count();
        info!(
            challenged = outcomes.len(),
            passed,
            failed = outcomes.len() - passed,
            "Spot check cycle complete"
        );
        Ok(outcomes)
    }

    /// Sample groups and blocks for every validator.
    fn prepare(&self) -> Result<Vec<ChallengeSet>> {
        let mut sampled: HashSet<GroupName> = HashSet::new();
        let mut sets = Vec::new();
        let mut rng = rand::thread_rng();

        for validator_id in self.fast.validators()? {
            let Some(validator) = self.registry.get(&validator_id).filter(|n| n.online) else {
                debug!(validator = %validator_id, "Validator offline, skipped");
                continue;
            };

            let mut set = ChallengeSet {
                validator,
                challenges: Vec::new(),
                expected: HashMap::new(),
            };

            for geo in self.fast.validator_geos(&validator_id)? {
                let unsampled: Vec<_> = self
                    .grouping
                    .groups(&geo)
                    .into_iter()
                    .filter(|g| !sampled.contains(&g.name))
                    .collect();
                let Some(group) = unsampled.choose(&mut rng) else {
                    debug!(validator = %validator_id, geo = %geo, "No unsampled group left");
                    continue;
                };
                sampled.insert(group.name.clone());

                for edge_id in group.members.keys() {
                    let Some(edge) = self.registry.get(edge_id).filter(|n| n.online && n.is_edge())
                    else {
                        continue;
                    };
                    if set.expected.contains_key(edge_id) {
                        continue;
                    }

                    let mut blocks: Vec<(String, LocalIndex)> =
                        self.persistent.cached_blocks(edge_id)?.into_iter().collect();
                    blocks.sort();
                    let Some((cid, fid)) = blocks.choose(&mut rng).cloned() else {
                        continue;
                    };

                    set.challenges.push(VerifyChallenge {
                        device_id: edge.device_id.clone(),
                        fid,
                        url: edge.address.clone(),
                    });
                    set.expected.insert(edge.device_id, cid);
                }
            }

            if !set.challenges.is_empty() {
                sets.push(set);
            }
        }

        Ok(sets)
    }

    /// Send one validator its challenges and judge the answers.
    async fn audit(&self, set: ChallengeSet) -> Vec<AuditOutcome> {
        let validator_id = set.validator.device_id.clone();
        let request = self
            .rpc
            .verify_data(&set.validator, set.challenges.clone());

        let results: Vec<VerifyResult> = match tokio::time::timeout(self.verify_timeout, request).await {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                warn!(validator = %validator_id, error = %e, "Verification request failed");
                Vec::new()
            }
            Err(_) => {
                let e = EdgeError::Timeout(self.verify_timeout.as_millis() as u64);
                warn!(validator = %validator_id, error = %e, "Verification request timed out");
                Vec::new()
            }
        };

        let computed: HashMap<DeviceId, String> = results
            .into_iter()
            .map(|r| (r.device_id, r.cid))
            .collect();

        set.challenges
            .iter()
            .map(|challenge| {
                let expected = set
                    .expected
                    .get(&challenge.device_id)
                    .cloned()
                    .unwrap_or_default();
                let computed = computed.get(&challenge.device_id).cloned();
                let verdict = judge(&expected, computed.as_deref());

                let outcome = AuditOutcome {
                    validator: validator_id.clone(),
                    edge: challenge.device_id.clone(),
                    fid: challenge.fid,
                    expected,
                    computed,
                    verdict,
                };
                log_outcome(&outcome);
                observability::record_spot_check(verdict.as_str());
                outcome
            })
            .collect()
    }
}

fn judge(expected: &str, computed: Option<&str>) -> Verdict {
    let Some(computed) = computed else {
        return Verdict::NoResponse;
    };
    match content_id::same_content(expected, computed) {
        Ok(true) => Verdict::Passed,
        Ok(false) => Verdict::Mismatch,
        Err(_) => Verdict::Undecodable,
    }
}

fn log_outcome(outcome: &AuditOutcome) {
    if outcome.verdict == Verdict::Passed {
        info!(
            validator = %outcome.validator,
            edge = %outcome.edge,
            fid = outcome.fid,
            cid = %outcome.expected,
            "Spot check passed"
        );
    } else {
        warn!(
            validator = %outcome.validator,
            edge = %outcome.edge,
            fid = outcome.fid,
            expected = %outcome.expected,
            computed = outcome.computed.as_deref().unwrap_or("-"),
            verdict = outcome.verdict.as_str(),
            "Spot check failed"
        );
    }
}
