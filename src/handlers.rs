use crate::errors::{AppError, ResultExt};
use crate::lookup::LookupService;
use crate::models::*;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Lookup-or-fetch orchestrator (cache store, DGII client, metrics).
    pub lookup: Arc<LookupService>,
}

/// Routes under `/api/v1`, without rate limiting or state attached.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/lookup", get(lookup_get).post(lookup_post))
        .route("/api/v1/stats", get(stats))
}

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rnc-lookup-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/v1/lookup?id=<rnc or cédula>
///
/// Returns the taxpayer profile, from cache when fresh.
///
/// # Returns
///
/// * `200` - `TaxpayerProfile` JSON (`cache: true` when served from cache).
/// * `400` - identifier has no digits.
/// * `404` - DGII reports the identifier as not registered.
/// * `503` - DGII unreachable, rate limiting, or an ambiguous page; retry later.
pub async fn lookup_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LookupQuery>,
) -> Result<Json<TaxpayerProfile>, AppError> {
    tracing::info!("GET /lookup - id: {}", params.id);
    let profile = state.lookup.lookup(&params.id).await?;
    Ok(Json(profile))
}

/// POST /api/v1/lookup
///
/// Same as the GET form with `{"id": "..."}` as body.
pub async fn lookup_post(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LookupRequest>,
) -> Result<Json<TaxpayerProfile>, AppError> {
    tracing::info!("POST /lookup - id: {}", payload.id);
    let profile = state.lookup.lookup(payload.id.trim()).await?;
    Ok(Json(profile))
}

/// GET /api/v1/stats
///
/// Daily usage counters, most recent day first.
pub async fn stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DailyUsageMetrics>>, AppError> {
    let days = state
        .lookup
        .metrics()
        .daily_totals()
        .await
        .context("Failed to load usage metrics")?;
    Ok(Json(days))
}
