//! Worker RPC double that records requests instead of sending them.

use async_trait::async_trait;
use edgeplane::error::{EdgeError, Result};
use edgeplane::rpc::WorkerRpc;
use edgeplane::types::{
    CacheBlocksRequest, DeviceId, LocalIndex, Node, VerifyChallenge, VerifyResult,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct RecordingRpc {
    dispatched: Mutex<Vec<(DeviceId, CacheBlocksRequest)>>,
    failing: Mutex<HashSet<DeviceId>>,
    /// (edge, fid) -> CID the validator computes.
    answers: Mutex<HashMap<(DeviceId, LocalIndex), String>>,
    verify_calls: Mutex<Vec<(DeviceId, Vec<VerifyChallenge>)>>,
}

impl RecordingRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every dispatch to `device_id` fail.
    pub fn fail_device(&self, device_id: &str) {
        self.failing.lock().insert(device_id.to_string());
    }

    pub fn heal_device(&self, device_id: &str) {
        self.failing.lock().remove(device_id);
    }

    /// Successful dispatches so far.
    pub fn dispatched(&self) -> Vec<(DeviceId, CacheBlocksRequest)> {
        self.dispatched.lock().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.lock().len()
    }

    /// Device the latest successful dispatch of `cid` went to.
    pub fn device_for(&self, cid: &str) -> Option<DeviceId> {
        self.dispatched
            .lock()
            .iter()
            .rev()
            .find(|(_, request)| request.cids().any(|c| c == cid))
            .map(|(device, _)| device.clone())
    }

    /// Local index `cid` was dispatched under.
    pub fn local_index_for(&self, cid: &str) -> Option<LocalIndex> {
        self.dispatched
            .lock()
            .iter()
            .rev()
            .flat_map(|(_, request)| request.blocks.iter())
            .find(|block| block.cid == cid)
            .map(|block| block.local_index)
    }

    /// Set what a validator computes for block `fid` on `edge`.
    pub fn answer(&self, edge: &str, fid: LocalIndex, cid: &str) {
        self.answers
            .lock()
            .insert((edge.to_string(), fid), cid.to_string());
    }

    pub fn verify_calls(&self) -> Vec<(DeviceId, Vec<VerifyChallenge>)> {
        self.verify_calls.lock().clone()
    }
}

#[async_trait]
impl WorkerRpc for RecordingRpc {
    async fn cache_blocks(&self, target: &Node, request: CacheBlocksRequest) -> Result<()> {
        if self.failing.lock().contains(&target.device_id) {
            return Err(EdgeError::DispatchFailure {
                device_id: target.device_id.clone(),
                reason: "connection refused".to_string(),
            });
        }
        self.dispatched
            .lock()
            .push((target.device_id.clone(), request));
        Ok(())
    }

    async fn verify_data(
        &self,
        validator: &Node,
        challenges: Vec<VerifyChallenge>,
    ) -> Result<Vec<VerifyResult>> {
        self.verify_calls
            .lock()
            .push((validator.device_id.clone(), challenges.clone()));

        let answers = self.answers.lock();
        Ok(challenges
            .into_iter()
            .filter_map(|c| {
                answers
                    .get(&(c.device_id.clone(), c.fid))
                    .map(|cid| VerifyResult {
                        device_id: c.device_id,
                        cid: cid.clone(),
                    })
            })
            .collect())
    }
}
