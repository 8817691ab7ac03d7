//! Axum routes for the atlas service.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::atlas::{BuildSummary, LayerInput, LookupError, LookupResult, SnapshotManifest};
use crate::diff::SnapshotDiff;
use crate::error::AtlasError;
use crate::hash::{NodeHash, HASH_SCHEME};
use crate::store::SnapshotStore;
use crate::types::LayerKey;

use super::middleware::{record_build_metrics, record_lookup};
use super::state::ServiceState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to build a new generation from a complete batch of layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Every layer of the new generation.
    pub layers: Vec<LayerInput>,
}

/// Point lookup request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupRequest {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Restrict the search to these layers.
    #[serde(default)]
    pub layers: Option<Vec<LayerKey>>,
}

/// Query parameters for a diff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiffQuery {
    /// Older generation.
    pub from: u64,
    /// Newer generation.
    pub to: u64,
}

/// Service health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` once a snapshot is committed, `empty` before.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Hash family of every tree node.
    pub hash_scheme: String,
    /// Committed generation, 0 when none.
    pub generation: u64,
    /// Top-level root of the committed snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<NodeHash>,
    /// Admitted layers in the committed snapshot.
    pub layers: usize,
    /// Districts across those layers.
    pub total_districts: usize,
    /// Seconds since the service started.
    pub uptime_secs: i64,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    let error = error.into();
    if status.is_server_error() {
        tracing::error!(code, error = %error, "Request failed");
    } else {
        tracing::warn!(code, error = %error, "Request error");
    }
    (status, Json(ErrorResponse::new(code, error)))
}

fn atlas_error(e: AtlasError) -> ApiError {
    let (status, code) = match &e {
        AtlasError::Cancelled => (StatusCode::CONFLICT, "BUILD_CANCELLED"),
        AtlasError::ConcurrentCommit { .. } => (StatusCode::CONFLICT, "CONCURRENT_COMMIT"),
        AtlasError::UnknownGeneration(_) => (StatusCode::NOT_FOUND, "UNKNOWN_GENERATION"),
        AtlasError::Diff(_) => (StatusCode::UNPROCESSABLE_ENTITY, "DIFF_FAILED"),
        AtlasError::Integrity(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTEGRITY_FAILURE"),
        AtlasError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
        AtlasError::Hash(_) | AtlasError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
    };
    api_error(status, code, e.to_string())
}

fn lookup_error(e: LookupError) -> ApiError {
    let (status, code) = match &e {
        LookupError::NoSnapshot => (StatusCode::SERVICE_UNAVAILABLE, "NO_SNAPSHOT"),
        LookupError::InvalidPoint { .. } => (StatusCode::BAD_REQUEST, "INVALID_POINT"),
        LookupError::UnknownLayer(_) => (StatusCode::NOT_FOUND, "UNKNOWN_LAYER"),
        LookupError::Collision { .. } => (StatusCode::CONFLICT, "LOOKUP_COLLISION"),
        LookupError::Proof { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "PROOF_FAILED"),
    };
    let (status, Json(body)) = api_error(status, code, e.to_string());
    let body = match e {
        LookupError::Collision { district_ids, .. } => body.with_details(district_ids.join(",")),
        _ => body,
    };
    (status, Json(body))
}

fn join_error(e: tokio::task::JoinError) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "TASK_FAILED", e.to_string())
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Build and commit a new generation.
async fn build_handler<S: SnapshotStore + 'static>(
    State(state): State<ServiceState<S>>,
    Json(request): Json<BuildRequest>,
) -> Result<Json<BuildSummary>, ApiError> {
    let start = Instant::now();
    let layer_count = request.layers.len();
    let atlas = Arc::clone(&state.atlas);

    // Tessellation and hashing are CPU-bound.
    let outcome = tokio::task::spawn_blocking(move || atlas.build_atlas(request.layers))
        .await
        .map_err(join_error)?
        .map_err(atlas_error)?;

    let summary = outcome.summary();
    record_build_metrics(
        layer_count,
        summary.total_districts,
        summary.layer_errors.len(),
        start.elapsed().as_millis() as u64,
    );
    Ok(Json(summary))
}

/// Manifest of the committed snapshot.
async fn current_handler<S: SnapshotStore + 'static>(
    State(state): State<ServiceState<S>>,
) -> Result<Json<SnapshotManifest>, ApiError> {
    state
        .atlas
        .current()
        .map(|snapshot| Json(snapshot.manifest()))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "NO_SNAPSHOT", "No snapshot has been committed"))
}

/// Manifest of a stored generation.
async fn generation_handler<S: SnapshotStore + 'static>(
    State(state): State<ServiceState<S>>,
    Path(generation): Path<u64>,
) -> Result<Json<SnapshotManifest>, ApiError> {
    let atlas = Arc::clone(&state.atlas);
    let snapshot = tokio::task::spawn_blocking(move || atlas.snapshot(generation))
        .await
        .map_err(join_error)?
        .map_err(atlas_error)?;
    Ok(Json(snapshot.manifest()))
}

/// Districts containing a point, with proofs.
async fn lookup_handler<S: SnapshotStore + 'static>(
    State(state): State<ServiceState<S>>,
    Json(request): Json<LookupRequest>,
) -> Result<Json<LookupResult>, ApiError> {
    let result = state
        .atlas
        .lookup(request.latitude, request.longitude, request.layers.as_deref())
        .map_err(lookup_error)?;
    record_lookup(result.claims().len());
    Ok(Json(result))
}

/// District-level diff between two generations.
async fn diff_handler<S: SnapshotStore + 'static>(
    State(state): State<ServiceState<S>>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<SnapshotDiff>, ApiError> {
    let atlas = Arc::clone(&state.atlas);
    let diff = tokio::task::spawn_blocking(move || atlas.diff(query.from, query.to))
        .await
        .map_err(join_error)?
        .map_err(atlas_error)?;
    Ok(Json(diff))
}

/// Health check with the committed generation.
async fn health_handler<S: SnapshotStore + 'static>(
    State(state): State<ServiceState<S>>,
) -> Json<HealthResponse> {
    let current = state.atlas.current();
    Json(HealthResponse {
        status: if current.is_some() { "healthy" } else { "empty" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        hash_scheme: HASH_SCHEME.to_string(),
        generation: current.as_ref().map_or(0, |s| s.generation),
        root: current.as_ref().map(|s| s.root),
        layers: current.as_ref().map_or(0, |s| s.layers.len()),
        total_districts: current.as_ref().map_or(0, |s| s.total_districts),
        uptime_secs: state.uptime_secs(),
    })
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the atlas service.
pub fn create_router<S: SnapshotStore + 'static>(state: ServiceState<S>) -> Router {
    Router::new()
        .route("/api/atlas/build", post(build_handler::<S>))
        .route("/api/atlas/current", get(current_handler::<S>))
        .route("/api/atlas/:generation", get(generation_handler::<S>))
        .route("/api/lookup", post(lookup_handler::<S>))
        .route("/api/diff", get(diff_handler::<S>))
        .route("/health", get(health_handler::<S>))
        .with_state(state)
}
