//! Calls made by the coordinator to worker nodes.

use crate::config::NetworkConfig;
use crate::error::{EdgeError, Result};
use crate::types::{CacheBlocksRequest, Node, VerifyChallenge, VerifyResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CACHE_BLOCKS_PATH: &str = "worker/cache_blocks";
const VERIFY_DATA_PATH: &str = "worker/verify_data";

/// RPC interface to worker nodes.
#[async_trait::async_trait]
pub trait WorkerRpc: Send + Sync {
    /// Ask a worker to fetch and cache a batch of blocks.
    async fn cache_blocks(&self, target: &Node, request: CacheBlocksRequest) -> Result<()>;

    /// Ask a validator to fetch each challenged block and compute its content id.
    async fn verify_data(
        &self,
        validator: &Node,
        challenges: Vec<VerifyChallenge>,
    ) -> Result<Vec<VerifyResult>>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyDataRequest {
    pub challenges: Vec<VerifyChallenge>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyDataResponse {
    pub results: Vec<VerifyResult>,
}

/// HTTP implementation of [`WorkerRpc`].
pub struct HttpWorkerRpc {
    client: reqwest::Client,
}

impl HttpWorkerRpc {
    pub fn new(config: &NetworkConfig) -> Self {
        Self::with_timeouts(config.connect_timeout, config.request_timeout)
    }

    pub fn with_timeouts(connect_timeout: Duration, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }

    fn endpoint(node: &Node, path: &str) -> String {
        format!("{}/{}", node.address.trim_end_matches('/'), path)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        node: &Node,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(Self::endpoint(node, path))
            .json(body)
            .send()
            .await
            .map_err(|e| EdgeError::DispatchFailure {
                device_id: node.device_id.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(EdgeError::DispatchFailure {
                device_id: node.device_id.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl WorkerRpc for HttpWorkerRpc {
    async fn cache_blocks(&self, target: &Node, request: CacheBlocksRequest) -> Result<()> {
        self.post(target, CACHE_BLOCKS_PATH, &request).await?;
        Ok(())
    }

    async fn verify_data(
        &self,
        validator: &Node,
        challenges: Vec<VerifyChallenge>,
    ) -> Result<Vec<VerifyResult>> {
        let response = self
            .post(validator, VERIFY_DATA_PATH, &VerifyDataRequest { challenges })
            .await?;

        let body: VerifyDataResponse = response
            .json()
            .await
            .map_err(|e| EdgeError::Serialization(e.to_string()))?;
        Ok(body.results)
    }
}
