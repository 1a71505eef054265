use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ConfigHandle;
use crate::error::{Error, Result};
use crate::k8s::ClusterClient;
use crate::model::{
    Deployment, DeploymentDetail, DeploymentSummary, DeploymentsResponse, DirectoryListing,
    FileContent,
};

pub struct AppState {
    pub cluster: ClusterClient,
    pub config: ConfigHandle,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config))
        .route("/deployments", get(list_deployments))
        .route("/deployments/{namespace}/{name}", get(get_deployment))
        .route("/deployments/{namespace}/{name}/scale", patch(scale_deployment))
        .route(
            "/deployments/{namespace}/{name}/pods/{pod}/logs",
            get(pod_logs),
        )
        .route(
            "/deployments/{namespace}/{name}/pods/{pod}/files",
            get(list_files),
        )
        .route(
            "/deployments/{namespace}/{name}/pods/{pod}/file",
            get(read_file),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl<T> Envelope<T> {
    fn data(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    fn with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data,
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    kubernetes: KubernetesHealth,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KubernetesHealth {
    connected: bool,
    server_version: String,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let version = state.cluster.server_version().await;
    let connected = version.is_some();

    Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" },
        timestamp: Utc::now().to_rfc3339(),
        kubernetes: KubernetesHealth {
            connected,
            server_version: version.unwrap_or_else(|| "unknown".to_string()),
        },
    })
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<crate::config::AppConfig> {
    Json(state.config.snapshot().as_ref().clone())
}

async fn list_deployments(State(state): State<Arc<AppState>>) -> Json<DeploymentsResponse> {
    let config = state.config.snapshot();
    let deployments = state.cluster.all_deployments(&config.exclude_namespaces).await;
    let summary = DeploymentSummary::tally(&deployments);

    Json(DeploymentsResponse {
        deployments,
        summary,
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn get_deployment(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Envelope<DeploymentDetail>>> {
    ensure_namespace_allowed(&state, &namespace)?;
    let detail = state.cluster.deployment_detail(&namespace, &name).await?;
    Ok(Json(Envelope::data(detail)))
}

#[derive(Debug, Deserialize)]
struct ScaleRequest {
    replicas: i32,
}

async fn scale_deployment(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(request): Json<ScaleRequest>,
) -> Result<Json<Envelope<Deployment>>> {
    if !state.config.snapshot().settings.scaling_enabled {
        return Err(Error::ScalingDisabled);
    }
    ensure_namespace_allowed(&state, &namespace)?;
    if request.replicas != 0 && request.replicas != 1 {
        return Err(Error::InvalidRequest(
            "replicas must be 0 or 1".to_string(),
        ));
    }

    // Existence check first so a missing deployment reads as 404, not as a
    // failed scale write.
    state.cluster.deployment(&namespace, &name).await?;
    state
        .cluster
        .scale_deployment(&namespace, &name, request.replicas)
        .await?;

    let updated = state.cluster.deployment(&namespace, &name).await?;
    let plural = if request.replicas == 1 { "" } else { "s" };
    Ok(Json(Envelope::with_message(
        updated,
        format!("Deployment scaled to {} replica{plural}", request.replicas),
    )))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogQuery {
    container: Option<String>,
    tail_lines: Option<i64>,
}

async fn pod_logs(
    State(state): State<Arc<AppState>>,
    Path((namespace, _name, pod)): Path<(String, String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<String> {
    ensure_namespace_allowed(&state, &namespace)?;
    state
        .cluster
        .pod_logs(
            &namespace,
            &pod,
            query.container.as_deref(),
            query.tail_lines.unwrap_or(100),
        )
        .await
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    container: Option<String>,
    path: Option<String>,
}

async fn list_files(
    State(state): State<Arc<AppState>>,
    Path((namespace, _name, pod)): Path<(String, String, String)>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Envelope<DirectoryListing>>> {
    ensure_namespace_allowed(&state, &namespace)?;
    let container = require_container(query.container)?;
    let path = query.path.unwrap_or_else(|| "/".to_string());

    let listing = state
        .cluster
        .list_directory(&namespace, &pod, &container, &path)
        .await?;
    Ok(Json(Envelope::data(listing)))
}

async fn read_file(
    State(state): State<Arc<AppState>>,
    Path((namespace, _name, pod)): Path<(String, String, String)>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Envelope<FileContent>>> {
    ensure_namespace_allowed(&state, &namespace)?;
    let container = require_container(query.container)?;
    let path = query
        .path
        .filter(|path| !path.is_empty())
        .ok_or_else(|| Error::InvalidRequest("path query parameter is required".to_string()))?;

    let content = state
        .cluster
        .read_file(&namespace, &pod, &container, &path)
        .await?;
    Ok(Json(Envelope::data(content)))
}

fn ensure_namespace_allowed(state: &AppState, namespace: &str) -> Result<()> {
    if state.config.snapshot().is_excluded(namespace) {
        return Err(Error::NamespaceExcluded(namespace.to_string()));
    }
    Ok(())
}

fn require_container(container: Option<String>) -> Result<String> {
    container
        .filter(|container| !container.is_empty())
        .ok_or_else(|| Error::InvalidRequest("container query parameter is required".to_string()))
}
