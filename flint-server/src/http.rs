//! HTTP/WebSocket API.
//!
//! All routes live under `/api`. Mutating endpoints require the bearer
//! token; the serial-console WebSocket authenticates via a `token` query
//! parameter instead, since browsers cannot set headers on WS upgrades.

use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use flint_hypervisor::{
    bridge, ConsoleTransport, HypervisorClient, HypervisorError, LifecycleAction, NetworkAction,
    VmCreateSpec,
};

use crate::activity::ActivityLog;
use crate::auth;

/// Shared state for HTTP handlers.
pub struct AppState {
    pub client: Arc<HypervisorClient>,
    pub activity: Arc<ActivityLog>,
    pub token: String,
}

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiError {
    error: String,
    message: String,
}

impl ApiError {
    fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// Map a control-layer error onto an HTTP status.
fn api_error(e: HypervisorError) -> (StatusCode, Json<ApiError>) {
    let (status, kind) = match &e {
        HypervisorError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        HypervisorError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
        HypervisorError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        HypervisorError::Precondition(_) => (StatusCode::CONFLICT, "precondition"),
        HypervisorError::Hypervisor(_) => (StatusCode::INTERNAL_SERVER_ERROR, "hypervisor"),
        HypervisorError::Integrity(_) => (StatusCode::INTERNAL_SERVER_ERROR, "integrity"),
        HypervisorError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io"),
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "Request failed");
    }
    (status, Json(ApiError::new(kind, &e.to_string())))
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Deserialize)]
struct ActionRequest {
    action: String,
}

#[derive(Deserialize)]
struct FromTemplateRequest {
    source: String,
}

#[derive(Deserialize)]
struct DeleteVmQuery {
    #[serde(default)]
    disks: bool,
}

#[derive(Deserialize)]
struct CreateSnapshotRequest {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct CreateVolumeRequest {
    name: String,
    capacity_gb: u64,
    #[serde(default = "default_volume_format")]
    format: String,
}

fn default_volume_format() -> String {
    "qcow2".to_string()
}

#[derive(Deserialize)]
struct CreateNetworkRequest {
    name: String,
    bridge: String,
}

#[derive(Deserialize)]
struct DownloadImageRequest {
    url: String,
}

#[derive(Deserialize)]
struct ImportImageRequest {
    path: String,
}

#[derive(Serialize)]
struct ConsoleTicket {
    websocket_path: String,
    token: String,
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let api = Router::new()
        // Domains
        .route("/vms", get(list_vms).post(create_vm))
        .route("/vms/from-template", post(create_from_template))
        .route("/vms/:uuid", get(get_vm).delete(delete_vm))
        .route("/vms/:uuid/action", post(vm_action))
        .route("/vms/:uuid/attach-disk", post(attach_disk))
        .route("/vms/:uuid/attach-nic", post(attach_nic))
        .route("/vms/:uuid/serial-console", get(serial_console_ticket))
        .route("/vms/:uuid/serial-console/ws", get(serial_console_ws))
        .route("/vms/:uuid/performance", get(vm_performance))
        .route("/vms/:uuid/agent", get(vm_agent_status))
        .route("/vms/:uuid/snapshots", get(list_snapshots).post(create_snapshot))
        .route("/vms/:uuid/snapshots/:name", delete(delete_snapshot))
        .route("/vms/:uuid/snapshots/:name/revert", post(revert_snapshot))
        // Host
        .route("/host/status", get(host_status))
        .route("/host/resources", get(host_resources))
        // Storage
        .route("/storage-pools", get(list_pools))
        .route(
            "/storage-pools/:pool/volumes",
            get(list_volumes).post(create_volume),
        )
        .route("/storage-pools/:pool/volumes/:volume", delete(delete_volume))
        // Networks
        .route("/networks", get(list_networks).post(create_network))
        .route("/networks/:name", post(update_network).delete(delete_network))
        // Images
        .route("/images", get(list_images))
        .route("/images/download", post(download_image))
        .route("/images/import-from-path", post(import_image))
        .route("/images/:id", delete(delete_image))
        // Activity feed
        .route("/activity", get(list_activity))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Domain handlers
// ============================================================================

async fn list_vms(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let summaries = state
        .client
        .list_domain_summaries()
        .await
        .map_err(api_error)?;
    Ok(Json(summaries))
}

async fn create_vm(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<VmCreateSpec>,
) -> ApiResult<impl IntoResponse> {
    let details = state.client.create_domain(&spec).await.map_err(api_error)?;
    info!(vm = %details.name, uuid = %details.uuid, "Domain created via API");
    Ok(Json(details))
}

async fn create_from_template(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FromTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    let details = state
        .client
        .create_from_template(&request.source)
        .await
        .map_err(api_error)?;
    Ok(Json(details))
}

async fn get_vm(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let details = state
        .client
        .get_domain_details(&uuid)
        .await
        .map_err(api_error)?;
    Ok(Json(details))
}

async fn delete_vm(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<DeleteVmQuery>,
) -> ApiResult<StatusCode> {
    state
        .client
        .delete_domain(&uuid, query.disks)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn vm_action(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Json(request): Json<ActionRequest>,
) -> ApiResult<StatusCode> {
    let action = LifecycleAction::parse(&request.action).map_err(api_error)?;
    state
        .client
        .domain_action(&uuid, action)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn attach_disk(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Json(spec): Json<flint_hypervisor::AttachDiskSpec>,
) -> ApiResult<StatusCode> {
    state
        .client
        .attach_disk(&uuid, &spec)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn attach_nic(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Json(spec): Json<flint_hypervisor::AttachNicSpec>,
) -> ApiResult<StatusCode> {
    state
        .client
        .attach_nic(&uuid, &spec)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn vm_performance(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let sample = state.client.get_performance(&uuid).await.map_err(api_error)?;
    Ok(Json(sample))
}

async fn vm_agent_status(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let details = state
        .client
        .get_domain_details(&uuid)
        .await
        .map_err(api_error)?;
    let status = state
        .client
        .get_guest_agent_status(&details.name)
        .await
        .map_err(api_error)?;
    Ok(Json(status))
}

// ============================================================================
// Serial console
// ============================================================================

async fn serial_console_ticket(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> ApiResult<impl IntoResponse> {
    // Existence check before handing out a ticket
    state.client.get_performance(&uuid).await.map_err(api_error)?;
    Ok(Json(ConsoleTicket {
        websocket_path: format!("/api/vms/{uuid}/serial-console/ws"),
        token: state.token.clone(),
    }))
}

async fn serial_console_ws(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if query.token != state.token {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new("unauthorized", "invalid console token")),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_console_session(socket, state, uuid))
}

async fn handle_console_session(mut socket: WebSocket, state: Arc<AppState>, uuid: String) {
    info!(uuid = %uuid, "Console session opened");
    match state.client.open_console(&uuid).await {
        Ok(channel) => {
            bridge(channel, WsTransport { socket }).await;
            info!(uuid = %uuid, "Console session closed");
        }
        Err(e) => {
            warn!(uuid = %uuid, error = %e, "Console open failed");
            let _ = socket
                .send(Message::Text(format!("console unavailable: {e}")))
                .await;
            let _ = socket.send(Message::Close(None)).await;
        }
    }
}

/// WebSocket as a console transport: binary frames carry raw bytes.
struct WsTransport {
    socket: WebSocket,
}

#[async_trait]
impl ConsoleTransport for WsTransport {
    async fn send(&mut self, data: Bytes) -> std::io::Result<()> {
        self.socket
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
    }

    async fn recv(&mut self) -> Option<std::io::Result<Bytes>> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Binary(data))) => return Some(Ok(Bytes::from(data))),
                Some(Ok(Message::Text(text))) => return Some(Ok(Bytes::from(text.into_bytes()))),
                Some(Ok(Message::Close(_))) | None => return None,
                // Ping/pong are answered by the websocket layer
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Some(Err(std::io::Error::new(std::io::ErrorKind::Other, e)))
                }
            }
        }
    }
}

// ============================================================================
// Snapshot handlers
// ============================================================================

async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let snapshots = state.client.list_snapshots(&uuid).await.map_err(api_error)?;
    Ok(Json(snapshots))
}

async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Json(request): Json<CreateSnapshotRequest>,
) -> ApiResult<impl IntoResponse> {
    let meta = state
        .client
        .create_snapshot(&uuid, &request.name, &request.description)
        .await
        .map_err(api_error)?;
    Ok(Json(meta))
}

async fn delete_snapshot(
    State(state): State<Arc<AppState>>,
    Path((uuid, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .client
        .delete_snapshot(&uuid, &name)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revert_snapshot(
    State(state): State<Arc<AppState>>,
    Path((uuid, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .client
        .revert_snapshot(&uuid, &name)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Host handlers
// ============================================================================

async fn host_status(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let health = state.client.host_status().await.map_err(api_error)?;
    Ok(Json(health))
}

async fn host_resources(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let resources = state.client.host_resources().await.map_err(api_error)?;
    Ok(Json(resources))
}

// ============================================================================
// Storage handlers
// ============================================================================

async fn list_pools(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let pools = state.client.list_pools().await.map_err(api_error)?;
    Ok(Json(pools))
}

async fn list_volumes(
    State(state): State<Arc<AppState>>,
    Path(pool): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let volumes = state.client.list_volumes(&pool).await.map_err(api_error)?;
    Ok(Json(volumes))
}

async fn create_volume(
    State(state): State<Arc<AppState>>,
    Path(pool): Path<String>,
    Json(request): Json<CreateVolumeRequest>,
) -> ApiResult<impl IntoResponse> {
    let volume = state
        .client
        .create_volume(&pool, &request.name, request.capacity_gb, &request.format)
        .await
        .map_err(api_error)?;
    Ok(Json(volume))
}

async fn delete_volume(
    State(state): State<Arc<AppState>>,
    Path((pool, volume)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .client
        .delete_volume(&pool, &volume)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Network handlers
// ============================================================================

async fn list_networks(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let networks = state.client.list_networks().await.map_err(api_error)?;
    Ok(Json(networks))
}

async fn create_network(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateNetworkRequest>,
) -> ApiResult<impl IntoResponse> {
    let network = state
        .client
        .create_network(&request.name, &request.bridge)
        .await
        .map_err(api_error)?;
    Ok(Json(network))
}

async fn update_network(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<ActionRequest>,
) -> ApiResult<StatusCode> {
    let action = NetworkAction::parse(&request.action).map_err(api_error)?;
    state
        .client
        .update_network(&name, action)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_network(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.client.delete_network(&name).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Image handlers
// ============================================================================

async fn list_images(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let images = state.client.list_images().await.map_err(api_error)?;
    Ok(Json(images))
}

async fn download_image(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DownloadImageRequest>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .client
        .download_image(&request.url)
        .await
        .map_err(api_error)?;
    Ok(Json(record))
}

async fn import_image(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportImageRequest>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .client
        .import_image(FsPath::new(&request.path))
        .await
        .map_err(api_error)?;
    Ok(Json(record))
}

async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.client.delete_image(&id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Activity feed
// ============================================================================

async fn list_activity(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.activity.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use flint_hypervisor::{ActivitySink, ImageLibrary, MockHypervisor};
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestServer {
        router: Router,
        token: String,
        _library_dir: tempfile::TempDir,
    }

    fn test_server() -> TestServer {
        let mock = Arc::new(MockHypervisor::new());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ubuntu-24.04.qcow2"), b"base").unwrap();
        let library = Arc::new(ImageLibrary::new(dir.path()));

        let activity = Arc::new(ActivityLog::new(100));
        let token = auth::generate_token();

        let client = Arc::new(
            HypervisorClient::new(mock, library)
                .with_sink(activity.clone() as Arc<dyn ActivitySink>)
                .with_sample_window(Duration::from_millis(10)),
        );

        let state = Arc::new(AppState {
            client,
            activity,
            token: token.clone(),
        });

        TestServer {
            router: build_router(state),
            token,
            _library_dir: dir,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn create_body() -> String {
        serde_json::json!({
            "name": "web-01",
            "memory_mb": 2048,
            "vcpus": 2,
            "disk_pool": "default",
            "disk_size_gb": 20,
            "image_name": "ubuntu-24.04",
            "image_kind": "template",
            "enable_cloud_init": false,
            "start_on_create": false,
            "network_name": "default"
        })
        .to_string()
    }

    #[tokio::test]
    async fn list_vms_is_public() {
        let server = test_server();
        let response = server
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/vms")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn create_requires_bearer_token() {
        let server = test_server();
        let response = server
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/vms")
                    .header("content-type", "application/json")
                    .body(Body::from(create_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = server
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/vms")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {}", server.token))
                    .body(Body::from(create_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let details = body_json(response).await;
        assert_eq!(details["name"], "web-01");
        assert_eq!(details["disks"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_uuid_is_a_bad_request() {
        let server = test_server();
        let response = server
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/vms/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn absent_domain_is_not_found() {
        let server = test_server();
        let response = server
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/vms/f47ac10b-58cc-4372-a567-0e02b2c3d479")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reserved_network_delete_is_rejected() {
        let server = test_server();
        let response = server
            .router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/networks/default")
                    .header("authorization", format!("Bearer {}", server.token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn activity_reflects_mutations() {
        let server = test_server();
        let response = server
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/vms")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {}", server.token))
                    .body(Body::from(create_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = server
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/activity")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let events = body_json(response).await;
        let events = events.as_array().unwrap();
        assert!(!events.is_empty());
        assert_eq!(events[0]["action"], "vm.create");
        assert_eq!(events[0]["status"], "success");
    }

    #[tokio::test]
    async fn console_ticket_requires_auth_and_names_the_ws_path() {
        let server = test_server();

        // Create and start a domain
        let response = server
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/vms")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {}", server.token))
                    .body(Body::from(create_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let uuid = body_json(response).await["uuid"].as_str().unwrap().to_string();

        let unauth = server
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/vms/{uuid}/serial-console"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unauth.status(), StatusCode::UNAUTHORIZED);

        let response = server
            .router
            .oneshot(
                Request::builder()
                    .uri(format!("/api/vms/{uuid}/serial-console"))
                    .header("authorization", format!("Bearer {}", server.token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ticket = body_json(response).await;
        assert_eq!(
            ticket["websocket_path"],
            format!("/api/vms/{uuid}/serial-console/ws")
        );
        assert!(auth::validate_token(ticket["token"].as_str().unwrap()));
    }

    #[tokio::test]
    async fn snapshot_flow_over_http() {
        let server = test_server();
        let auth_header = format!("Bearer {}", server.token);

        let response = server
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/vms")
                    .header("content-type", "application/json")
                    .header("authorization", &auth_header)
                    .body(Body::from(create_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let uuid = body_json(response).await["uuid"].as_str().unwrap().to_string();

        let response = server
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/vms/{uuid}/snapshots"))
                    .header("content-type", "application/json")
                    .header("authorization", &auth_header)
                    .body(Body::from(
                        serde_json::json!({"name": "baseline", "description": "first"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = server
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/vms/{uuid}/snapshots"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let snapshots = body_json(response).await;
        assert_eq!(snapshots.as_array().unwrap().len(), 1);
        assert_eq!(snapshots[0]["name"], "baseline");

        let response = server
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/vms/{uuid}/snapshots/baseline/revert"))
                    .header("authorization", &auth_header)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
