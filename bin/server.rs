// Registry Reconciliation - Web Server
// JSON read surface over the reconciliation engine (axum)

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use registry_recon::{
    check_consistency, compute_scores, list_datasets, open_database, reconcile, resolve_dataset, DatasetKind,
    DatasetVersion, ReconConfig, ReconError, ReconSummary, ReconciledRow, ScoreRunStats, Warning,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    config: Arc<ReconConfig>,
}

impl AppState {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::internal("database lock poisoned"))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: &str) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
        }
    }
}

impl From<ReconError> for ApiError {
    fn from(err: ReconError) -> Self {
        let status = match &err {
            ReconError::DatasetNotFound { .. } => StatusCode::NOT_FOUND,
            ReconError::InvalidConfig(_) | ReconError::OverrideConstraintViolation { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "request failed");
        }
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Query parameters (dataset tags)
// ============================================================================

#[derive(Deserialize)]
struct DatasetsQuery {
    kind: Option<String>,
}

#[derive(Deserialize)]
struct PairQuery {
    entities: String,
    results: String,
    overrides: Option<String>,
    batch_size: Option<usize>,
}

#[derive(Serialize)]
struct ReconcileResponse {
    summary: ReconSummary,
    rows: Vec<ReconciledRow>,
}

#[derive(Serialize)]
struct ConsistencyResponse {
    total: usize,
    errors: usize,
    warnings: Vec<Warning>,
}

fn parse_kind(value: &str) -> Result<DatasetKind, ApiError> {
    value.parse::<DatasetKind>().map_err(|message| ApiError {
        status: StatusCode::BAD_REQUEST,
        message,
    })
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok(registry_recon::VERSION))
}

/// GET /api/datasets?kind= - Imported dataset versions
async fn get_datasets(
    State(state): State<AppState>,
    Query(query): Query<DatasetsQuery>,
) -> ApiResult<Vec<DatasetVersion>> {
    let kind = query.kind.as_deref().map(parse_kind).transpose()?;
    let conn = state.conn()?;
    Ok(Json(ApiResponse::ok(list_datasets(&conn, kind)?)))
}

/// GET /api/datasets/:kind/:tag - One dataset version by tag
async fn get_dataset_by_tag(
    State(state): State<AppState>,
    Path((kind, tag)): Path<(String, String)>,
) -> ApiResult<DatasetVersion> {
    let kind = parse_kind(&kind)?;

    // Decode URL-encoded tag
    let decoded_tag = urlencoding::decode(&tag)
        .unwrap_or_else(|_| tag.clone().into())
        .into_owned();

    let conn = state.conn()?;
    Ok(Json(ApiResponse::ok(resolve_dataset(&conn, kind, &decoded_tag)?)))
}

/// GET /api/reconcile?entities=&results=&overrides=
async fn get_reconcile(
    State(state): State<AppState>,
    Query(query): Query<PairQuery>,
) -> ApiResult<ReconcileResponse> {
    let conn = state.conn()?;
    let entities = resolve_dataset(&conn, DatasetKind::Entities, &query.entities)?;
    let results = resolve_dataset(&conn, DatasetKind::Results, &query.results)?;
    let overrides = query
        .overrides
        .as_deref()
        .map(|tag| resolve_dataset(&conn, DatasetKind::Overrides, tag))
        .transpose()?;

    let rows = reconcile(&conn, entities.id, results.id, overrides.map(|o| o.id), &state.config)?;
    Ok(Json(ApiResponse::ok(ReconcileResponse {
        summary: ReconSummary::of(&rows),
        rows,
    })))
}

/// GET /api/consistency?entities=&results=&overrides=
async fn get_consistency(
    State(state): State<AppState>,
    Query(query): Query<PairQuery>,
) -> ApiResult<ConsistencyResponse> {
    let Some(override_tag) = query.overrides.as_deref() else {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            message: "missing query parameter: overrides".to_string(),
        });
    };

    let conn = state.conn()?;
    let entities = resolve_dataset(&conn, DatasetKind::Entities, &query.entities)?;
    let results = resolve_dataset(&conn, DatasetKind::Results, &query.results)?;
    let overrides = resolve_dataset(&conn, DatasetKind::Overrides, override_tag)?;

    let warnings = check_consistency(&conn, entities.id, results.id, overrides.id)?;
    Ok(Json(ApiResponse::ok(ConsistencyResponse {
        total: warnings.len(),
        errors: warnings
            .iter()
            .filter(|w| w.severity == registry_recon::Severity::Error)
            .count(),
        warnings,
    })))
}

/// POST /api/score?entities=&results=&batch_size= - Fill the score cache
async fn post_score(
    State(state): State<AppState>,
    Query(query): Query<PairQuery>,
) -> ApiResult<ScoreRunStats> {
    let conn = state.conn()?;
    let entities = resolve_dataset(&conn, DatasetKind::Entities, &query.entities)?;
    let results = resolve_dataset(&conn, DatasetKind::Results, &query.results)?;
    let batch_size = query.batch_size.unwrap_or(state.config.scheduler.batch_size);

    let stats = compute_scores(&conn, entities.id, results.id, batch_size, &state.config)?;
    Ok(Json(ApiResponse::ok(stats)))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🌐 Registry Reconciliation - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::var("RECON_DB").unwrap_or_else(|_| "recon.db".to_string());
    let conn = open_database(std::path::Path::new(&db_path))
        .with_context(|| format!("Failed to open database: {}", db_path))?;
    println!("✓ Database opened: {}", db_path);

    let config = match std::env::var("RECON_CONFIG") {
        Ok(path) => ReconConfig::from_file(std::path::Path::new(&path))
            .with_context(|| format!("Failed to load config: {}", path))?,
        Err(_) => ReconConfig::default(),
    };

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        config: Arc::new(config),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/datasets", get(get_datasets))
        .route("/datasets/:kind/:tag", get(get_dataset_by_tag))
        .route("/reconcile", get(get_reconcile))
        .route("/consistency", get(get_consistency))
        .route("/score", post(post_score))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = std::env::var("RECON_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(%addr, "server listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/reconcile?entities=<tag>&results=<tag>", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
