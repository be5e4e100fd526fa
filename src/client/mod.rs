//! Client library for the coordinator API.

use crate::election::ElectionReport;
use crate::error::{EdgeError, Result};
use crate::replication::JobSummary;
use crate::server::{
    AddAccessPointRequest, ApiResponse, AreaRequest, CacheContentRequest, CacheContentResponse,
    CacheResultRequest, JobStatusRequest, NodeOfflineRequest, NodeOnlineResponse,
};
use crate::spot_check::AuditOutcome;
use crate::types::{AccessPoint, CacheResultReport, FleetStatus, GroupName, NodeOnlineRequest};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Default connection timeout for client requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout for client operations.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the coordinator API.
#[derive(Clone)]
pub struct CoordinatorClient {
    base_url: String,
    client: Client,
}

impl CoordinatorClient {
    /// Create a client for `addr` (`host:port` or a full URL) with default timeouts.
    pub fn new(addr: &str) -> Self {
        Self::with_timeouts(addr, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeouts(addr: &str, connect_timeout: Duration, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr)
        };

        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check server health.
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EdgeError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }

    pub async fn status(&self) -> Result<FleetStatus> {
        self.get("status").await
    }

    pub async fn node_online(&self, request: &NodeOnlineRequest) -> Result<Option<GroupName>> {
        let response: NodeOnlineResponse = self.post("node/online", request).await?;
        Ok(response.group)
    }

    pub async fn node_offline(&self, device_id: &str) -> Result<()> {
        let request = NodeOfflineRequest {
            device_id: device_id.to_string(),
        };
        self.post("node/offline", &request).await
    }

    pub async fn cache_result(&self, device_id: &str, report: CacheResultReport) -> Result<()> {
        let request = CacheResultRequest {
            device_id: device_id.to_string(),
            report,
        };
        self.post("cache/result", &request).await
    }

    /// Submit a content item for caching; returns the job id.
    pub async fn cache_content(&self, cid: &str, reliability: u32) -> Result<String> {
        let request = CacheContentRequest {
            cid: cid.to_string(),
            reliability,
        };
        let response: CacheContentResponse = self.post("cache/content", &request).await?;
        Ok(response.job_id)
    }

    pub async fn job_status(&self, cid: &str, job_id: Option<&str>) -> Result<JobSummary> {
        let request = JobStatusRequest {
            cid: cid.to_string(),
            job_id: job_id.map(str::to_string),
        };
        self.post("cache/job", &request).await
    }

    pub async fn run_election(&self) -> Result<ElectionReport> {
        self.post("election/run", &()).await
    }

    pub async fn run_spot_check(&self) -> Result<Vec<AuditOutcome>> {
        self.post("spot_check/run", &()).await
    }

    pub async fn add_access_point(
        &self,
        area_id: &str,
        url: &str,
        weight: u32,
        access_token: &str,
    ) -> Result<()> {
        let request = AddAccessPointRequest {
            area_id: area_id.to_string(),
            url: url.to_string(),
            weight,
            access_token: access_token.to_string(),
        };
        self.post("access_points/add", &request).await
    }

    pub async fn remove_access_point(&self, area_id: &str) -> Result<AccessPoint> {
        self.post("access_points/remove", &area(area_id)).await
    }

    pub async fn list_access_points(&self) -> Result<Vec<String>> {
        self.get("access_points").await
    }

    pub async fn show_access_point(&self, area_id: &str) -> Result<AccessPoint> {
        self.post("access_points/show", &area(area_id)).await
    }

    pub async fn get_access_points(&self, area_id: &str) -> Result<Vec<String>> {
        self.post("access_points/get", &area(area_id)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EdgeError::Network(e.to_string()))?;
        Self::unwrap_response(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| EdgeError::Network(e.to_string()))?;
        Self::unwrap_response(response).await
    }

    async fn unwrap_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| EdgeError::Serialization(e.to_string()))?;

        if !body.success {
            return Err(EdgeError::Internal(format!(
                "HTTP {}: {}",
                status,
                body.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        // Unit payloads travel as `null`.
        serde_json::from_value(body.data.unwrap_or(serde_json::Value::Null))
            .map_err(|e| EdgeError::Serialization(e.to_string()))
    }
}

fn area(area_id: &str) -> AreaRequest {
    AreaRequest {
        area_id: area_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(CoordinatorClient::new("127.0.0.1:3456").base_url(), "http://127.0.0.1:3456");
        assert_eq!(
            CoordinatorClient::new("https://coord.example/").base_url(),
            "https://coord.example"
        );
    }
}
