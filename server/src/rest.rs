//! HTTP surface: routing, per-class rate limiting, handlers and the
//! mapping from domain errors onto HTTP statuses.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::rejection::JsonRejection,
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

use crate::db;
use crate::errors::Error;
use crate::ingest;
use crate::localtime;
use crate::metrics;
use crate::model::{
    DashboardResponse, DeviceStatus, DevicesResponse, IngestRequest, IngestResponse,
    LatestResponse, StatsResponse,
};
use crate::query::{self, DashboardParams, LatestParams};
use crate::ratelimit::{self, Decision, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub limiter: Arc<RateLimiter>,
    pub environment: String,
}

/// Per-route-class quota handed to the rate-limit middleware.
#[derive(Clone)]
struct RouteQuota {
    limiter: Arc<RateLimiter>,
    class: &'static str,
    per_minute: u32,
}

pub fn create_router(state: AppState, cors_origins: &str) -> Router {
    let ingest_routes = Router::new()
        .route("/api/sensors", post(ingest_readings))
        .route_layer(middleware::from_fn_with_state(
            RouteQuota {
                limiter: state.limiter.clone(),
                class: "ingest",
                per_minute: ratelimit::INGEST_PER_MINUTE,
            },
            enforce_quota,
        ));

    let read_routes = Router::new()
        .route("/api/dashboard/data", get(dashboard_data))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:device_id/status", get(device_status))
        .route("/api/stats", get(system_stats))
        .route("/api/sensors/latest", get(latest_readings))
        .route_layer(middleware::from_fn_with_state(
            RouteQuota {
                limiter: state.limiter.clone(),
                class: "read",
                per_minute: ratelimit::READ_PER_MINUTE,
            },
            enforce_quota,
        ));

    let export_routes = Router::new()
        .route("/api/dashboard/export-csv", get(export_csv))
        .route_layer(middleware::from_fn_with_state(
            RouteQuota {
                limiter: state.limiter.clone(),
                class: "export",
                per_minute: ratelimit::EXPORT_PER_MINUTE,
            },
            enforce_quota,
        ));

    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/test-connection", get(test_connection))
        .route("/api/reset-limits", post(reset_limits))
        .merge(ingest_routes)
        .merge(read_routes)
        .merge(export_routes)
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(allowed: &str) -> CorsLayer {
    if allowed.trim() == "*" {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn enforce_quota(State(quota): State<RouteQuota>, req: Request, next: Next) -> Response {
    let ip = client_ip(&req);

    match quota.limiter.check(ip, quota.class, quota.per_minute, Utc::now()) {
        Decision::Allowed => next.run(req).await,
        Decision::Limited { retry_after_secs } => {
            metrics::RATE_LIMITED_TOTAL.inc();
            warn!(
                "Rate limit exceeded for {} on {} routes, retry in {}s",
                ip, quota.class, retry_after_secs
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                Json(json!({
                    "error": "Rate limit exceeded",
                    "message": "Too many requests. Please slow down.",
                    "retry_after": retry_after_secs,
                })),
            )
                .into_response()
        }
    }
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "service": "Environmental Monitoring API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "ingest": "POST /api/sensors",
            "dashboard": "GET /api/dashboard/data",
            "export": "GET /api/dashboard/export-csv",
            "devices": "GET /api/devices",
            "device_status": "GET /api/devices/{device_id}/status",
            "stats": "GET /api/stats",
            "latest": "GET /api/sensors/latest",
            "health": "GET /api/health",
        },
    }))
}

async fn ingest_readings(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    metrics::INGEST_REQUESTS_TOTAL.inc();

    let Json(request) = payload.map_err(|rejection| {
        Error::Validation(format!("Invalid JSON payload: {}", rejection.body_text()))
    })?;

    let now = Utc::now();
    let outcome = ingest::ingest(&state.pool, &request, now).await?;
    metrics::INGEST_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());

    let response = IngestResponse {
        message: "Data received successfully".to_string(),
        readings_saved: outcome.readings_saved,
        failed_readings: outcome.failed_readings,
        device_id: outcome.device_id,
        timestamp_utc: now,
        timestamp_local: localtime::format_local(now),
    };

    Ok((StatusCode::CREATED, Json(response)).into_response())
}

async fn dashboard_data(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let response = query::dashboard_data(&state.pool, &params, Utc::now()).await?;
    Ok(Json(response))
}

async fn export_csv(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<Response, ApiError> {
    let export = query::export_csv(&state.pool, &params, Utc::now()).await?;

    let headers = [
        (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", export.filename),
        ),
    ];

    Ok((headers, export.body).into_response())
}

async fn list_devices(State(state): State<AppState>) -> Result<Json<DevicesResponse>, ApiError> {
    let response = query::devices_overview(&state.pool, Utc::now()).await?;
    Ok(Json(response))
}

async fn device_status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceStatus>, ApiError> {
    let response = query::device_status(&state.pool, &device_id, Utc::now()).await?;
    Ok(Json(response))
}

async fn system_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let response = query::stats(&state.pool, Utc::now()).await?;
    Ok(Json(response))
}

async fn latest_readings(
    State(state): State<AppState>,
    Query(params): Query<LatestParams>,
) -> Result<Json<LatestResponse>, ApiError> {
    let response = query::latest_readings(&state.pool, &params, Utc::now()).await?;
    Ok(Json(response))
}

async fn health(State(state): State<AppState>) -> Response {
    let now = Utc::now();

    match db::ping(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected",
                "environment": state.environment,
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp_utc": now,
                "timestamp_local": localtime::format_local(now),
            })),
        )
            .into_response(),
        Err(err) => {
            metrics::DB_FAILURES_TOTAL.inc();
            error!("Health check failed: {}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "disconnected",
                    "environment": state.environment,
                    "version": env!("CARGO_PKG_VERSION"),
                    "timestamp_utc": now,
                    "timestamp_local": localtime::format_local(now),
                })),
            )
                .into_response()
        }
    }
}

async fn test_connection() -> Json<serde_json::Value> {
    let now = Utc::now();

    Json(json!({
        "message": "Connection successful",
        "server_time_utc": now,
        "server_time_local": localtime::format_local(now),
        "sample_payload": {
            "device_id": "AA:BB:CC:DD:EE:FF",
            "sensors": [
                {"type": "temperature", "value": 23.5, "unit": "C"},
                {"type": "humidity", "value": 61.2, "unit": "%"},
            ],
        },
    }))
}

async fn reset_limits(State(state): State<AppState>) -> Response {
    if state.environment != "development" {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Only available in development mode"})),
        )
            .into_response();
    }

    state.limiter.reset();
    Json(json!({"message": "Rate limits reset"})).into_response()
}

/// Wrapper mapping domain failures onto HTTP statuses. Everything not
/// explicitly matched stays an opaque 500.
pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(err) = self.0.downcast_ref::<Error>() {
            match err {
                Error::Validation(msg) => {
                    return (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response();
                }
                Error::DeviceNotFound(_) => {
                    return (
                        StatusCode::NOT_FOUND,
                        Json(json!({"error": err.to_string()})),
                    )
                        .into_response();
                }
                Error::Database(_) | Error::Migration(_) => {
                    metrics::DB_FAILURES_TOTAL.inc();
                }
            }
        }

        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Internal server error"})),
        )
            .into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
