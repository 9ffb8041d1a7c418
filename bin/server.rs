// Address Match - Lookup Server
// REST API with Axum: one address in, one match (or reason) out

use address_match::{
    CorpusIndex, LookupResponse, MatchConfig, SqliteStore, Waterfall,
};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Shared application state; the index is read-only after startup
#[derive(Clone)]
struct AppState {
    waterfall: Arc<Waterfall>,
    index: Arc<CorpusIndex>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    fn err(data: T, error: String) -> Self {
        Self {
            success: false,
            data,
            error: Some(error),
        }
    }
}

#[derive(Deserialize)]
struct MatchRequest {
    raw_address: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    canonical_addresses: usize,
    version: &'static str,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(HealthResponse {
        status: "OK",
        canonical_addresses: state.index.len(),
        version: address_match::VERSION,
    }))
}

/// POST /api/match_address - Match one raw address
///
/// 200 with a match, 404 without one, 400 when the body or address is unusable
async fn match_address(
    State(state): State<AppState>,
    payload: Result<Json<MatchRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection, "invalid match request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<Option<LookupResponse>>::err(None, rejection.body_text())),
            )
                .into_response();
        }
    };

    let response = state.waterfall.lookup(&state.index, &request.raw_address);

    let status = if !response.parse_ok() {
        StatusCode::BAD_REQUEST
    } else if response.matched.is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };

    let body = match response.unmatch_reason.clone() {
        Some(reason) if status != StatusCode::OK => ApiResponse::err(Some(response), reason),
        _ => ApiResponse::ok(Some(response)),
    };
    (status, Json(body)).into_response()
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/match_address", post(match_address))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

fn load_state() -> Result<AppState> {
    let db_path = PathBuf::from(std::env::var("ADDRESS_MATCH_DB").unwrap_or_else(|_| "address_match.db".to_string()));
    let config_path = std::env::var("ADDRESS_MATCH_CONFIG").ok().map(PathBuf::from);

    if !db_path.exists() {
        anyhow::bail!("database not found at {:?}; run `address-match ingest` first", db_path);
    }

    let config = MatchConfig::load(config_path.as_deref()).context("Failed to load config")?;
    let waterfall = Waterfall::new(config)?;

    let mut store = SqliteStore::open(&db_path).context("Failed to open database")?;
    waterfall.ensure_index(&mut store).context("Index build failed")?;
    let index = waterfall.load_index(&store)?;
    println!("✓ Database opened: {:?} ({} canonical addresses)", db_path, index.len());

    Ok(AppState {
        waterfall: Arc::new(waterfall),
        index: Arc::new(index),
    })
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🌐 Address Match - Lookup Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let state = load_state()?;
    let app = build_router(state);

    let addr = std::env::var("ADDRESS_MATCH_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "lookup server listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: POST http://{}/api/match_address", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use address_match::PhoneticKeyGenerator;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let waterfall = Waterfall::new(MatchConfig::default()).unwrap();
        let index = CorpusIndex::from_addresses(vec![(1, "123 MAIN ST")], &PhoneticKeyGenerator::new(8), 10);
        build_router(AppState {
            waterfall: Arc::new(waterfall),
            index: Arc::new(index),
        })
    }

    async fn post_json(body: &str) -> (StatusCode, serde_json::Value) {
        let response = test_router()
            .oneshot(
                Request::post("/api/match_address")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_match_found() {
        let (status, json) = post_json(r#"{"raw_address": "123 Main Street"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["match"]["address_id"], 1);
        assert_eq!(json["data"]["match"]["match_type"], "exact");
    }

    #[tokio::test]
    async fn test_no_match_is_404() {
        let (status, json) = post_json(r#"{"raw_address": "999 Nowhere Blvd"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["data"]["match"].is_null());
    }

    #[tokio::test]
    async fn test_bad_requests_are_400() {
        let (status, _) = post_json(r#"{"raw_address": ""}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post_json("not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
