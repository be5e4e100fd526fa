//! HTTP API of the coordinator.
//!
//! Workers call the node and cache-result endpoints; operators use the rest
//! through [`crate::client::CoordinatorClient`] or the CLI.

use crate::coordinator::Coordinator;
use crate::election::ElectionReport;
use crate::error::{EdgeError, Result};
use crate::replication::JobSummary;
use crate::shutdown::ShutdownCoordinator;
use crate::spot_check::AuditOutcome;
use crate::types::{AccessPoint, CacheResultReport, FleetStatus, GroupName, NodeOnlineRequest};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Response envelope of every API call.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// An [`EdgeError`] rendered as an HTTP response.
struct ApiError(EdgeError);

impl From<EdgeError> for ApiError {
    fn from(e: EdgeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EdgeError::NodeNotFound(_) | EdgeError::ContentNotFound(_) => StatusCode::NOT_FOUND,
            EdgeError::InvalidCid { .. } | EdgeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EdgeError::AssignmentConflict { .. } => StatusCode::CONFLICT,
            EdgeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EdgeError::DispatchFailure { .. } | EdgeError::Network(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, kind = self.0.kind(), "API request failed");
        }
        (status, Json(ApiResponse::<()>::err(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeOnlineResponse {
    /// Group assigned to an edge node.
    pub group: Option<GroupName>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeOfflineRequest {
    pub device_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheResultRequest {
    pub device_id: String,
    pub report: CacheResultReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheContentRequest {
    pub cid: String,
    #[serde(default = "default_reliability")]
    pub reliability: u32,
}

fn default_reliability() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheContentResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusRequest {
    pub cid: String,
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddAccessPointRequest {
    pub area_id: String,
    pub url: String,
    pub weight: u32,
    pub access_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AreaRequest {
    pub area_id: String,
}

/// Build the API router.
pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(handle_status))
        .route("/node/online", post(handle_node_online))
        .route("/node/offline", post(handle_node_offline))
        .route("/cache/result", post(handle_cache_result))
        .route("/cache/content", post(handle_cache_content))
        .route("/cache/job", post(handle_job_status))
        .route("/election/run", post(handle_election))
        .route("/spot_check/run", post(handle_spot_check))
        .route("/access_points", get(handle_list_access_points))
        .route("/access_points/add", post(handle_add_access_point))
        .route("/access_points/remove", post(handle_remove_access_point))
        .route("/access_points/show", post(handle_show_access_point))
        .route("/access_points/get", post(handle_get_access_points))
        .with_state(coordinator)
}

/// Serve the API on `listener` until shutdown.
pub async fn serve(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    shutdown: ShutdownCoordinator,
) -> Result<()> {
    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await
        .map_err(|e| EdgeError::Network(e.to_string()))
}

/// Bind `addr` and serve the API until shutdown.
pub async fn run_server(
    addr: SocketAddr,
    coordinator: Arc<Coordinator>,
    shutdown: ShutdownCoordinator,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Coordinator API listening");
    serve(listener, coordinator, shutdown).await
}

// API Handlers

async fn health_check() -> &'static str {
    "OK"
}

async fn handle_status(State(coordinator): State<Arc<Coordinator>>) -> ApiResult<FleetStatus> {
    ok(coordinator.status())
}

async fn handle_node_online(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<NodeOnlineRequest>,
) -> ApiResult<NodeOnlineResponse> {
    let group = coordinator.node_online(request)?;
    ok(NodeOnlineResponse { group })
}

async fn handle_node_offline(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<NodeOfflineRequest>,
) -> ApiResult<()> {
    coordinator.node_offline(&request.device_id)?;
    ok(())
}

async fn handle_cache_result(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<CacheResultRequest>,
) -> ApiResult<()> {
    coordinator.cache_result(&request.device_id, request.report);
    ok(())
}

async fn handle_cache_content(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<CacheContentRequest>,
) -> ApiResult<CacheContentResponse> {
    let job_id = coordinator
        .cache_content(&request.cid, request.reliability)
        .await?;
    ok(CacheContentResponse { job_id })
}

async fn handle_job_status(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<JobStatusRequest>,
) -> ApiResult<JobSummary> {
    let summary = coordinator
        .job_summary(&request.cid, request.job_id.as_deref())
        .await?;
    ok(summary)
}

async fn handle_election(State(coordinator): State<Arc<Coordinator>>) -> ApiResult<ElectionReport> {
    ok(coordinator.elect()?)
}

async fn handle_spot_check(
    State(coordinator): State<Arc<Coordinator>>,
) -> ApiResult<Vec<AuditOutcome>> {
    ok(coordinator.spot_check().await?)
}

async fn handle_list_access_points(
    State(coordinator): State<Arc<Coordinator>>,
) -> ApiResult<Vec<String>> {
    ok(coordinator.access_points().list())
}

async fn handle_add_access_point(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<AddAccessPointRequest>,
) -> ApiResult<()> {
    coordinator.access_points().add(
        &request.area_id,
        &request.url,
        request.weight,
        &request.access_token,
    )?;
    ok(())
}

async fn handle_remove_access_point(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<AreaRequest>,
) -> ApiResult<AccessPoint> {
    ok(coordinator.access_points().remove(&request.area_id)?)
}

async fn handle_show_access_point(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<AreaRequest>,
) -> ApiResult<AccessPoint> {
    let access_point = coordinator
        .access_points()
        .show(&request.area_id)
        .ok_or_else(|| EdgeError::InvalidInput(format!("unknown area {}", request.area_id)))?;
    ok(access_point)
}

async fn handle_get_access_points(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<AreaRequest>,
) -> ApiResult<Vec<String>> {
    ok(coordinator.access_points().get(&request.area_id))
}
