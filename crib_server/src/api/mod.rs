//! HTTP/WebSocket API for the cribbage server.
//!
//! # Modules
//!
//! - [`matches`]: Match endpoints (create, view, moves, counts)
//! - [`websocket`]: Live match updates
//! - [`middleware`]: Bearer token authentication for protected endpoints
//! - [`request_id`]: Request ids, access logging and HTTP metrics
//!
//! # Endpoints Overview
//!
//! ```text
//! GET  /health                                   - Health check (public)
//! POST /api/v1/matches                           - Start a match
//! GET  /api/v1/matches/{id}                      - Caller's view of a match
//! POST /api/v1/matches/{id}/moves                - Discard, play a card, or go
//! GET  /api/v1/matches/{id}/moves                - Audit trail
//! POST /api/v1/matches/{id}/next-hand            - Deal the next hand
//! POST /api/v1/matches/{id}/counts               - Claim a hand or crib count
//! POST /api/v1/matches/{id}/corrections          - Correct a claim
//! GET  /ws/{id}?token=<jwt>                      - Live updates
//! ```
//!
//! Everything under `/api/v1` requires `Authorization: Bearer <jwt>`.
//!
//! # CORS
//!
//! CORS is configured permissively for development. In production, configure
//! appropriate origins, methods, and headers.

pub mod matches;
pub mod middleware;
pub mod request_id;
pub mod websocket;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use cribbage::{Hub, MatchManager, db::Database};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::auth::TokenVerifier;

/// Application state shared across all HTTP handlers and WebSocket connections.
///
/// # Fields
///
/// - `manager`: Owns every live match
/// - `hub`: Subscriptions for WebSocket clients; the manager publishes into it
/// - `tokens`: Bearer token verification
/// - `database`: Pool for health checks, `None` with the in-memory store
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<MatchManager>,
    pub hub: Arc<Hub>,
    pub tokens: Arc<TokenVerifier>,
    pub database: Option<Database>,
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Arguments
///
/// - `state`: Application state with managers
///
/// # Returns
///
/// Configured Axum router ready to serve requests
///
/// # Example
///
/// ```rust,no_run
/// # use crib_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:8121").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    let root_routes = Router::new()
        .route("/health", get(health_check))
        // Browsers can't set headers on a WebSocket handshake, so the token rides in the query
        .route("/ws/{match_id}", get(websocket::websocket_handler));

    Router::new()
        .merge(root_routes)
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/matches", post(matches::create_match))
        .route("/matches/{match_id}", get(matches::get_match))
        .route(
            "/matches/{match_id}/moves",
            get(matches::list_moves).post(matches::submit_move),
        )
        .route("/matches/{match_id}/next-hand", post(matches::next_hand))
        .route("/matches/{match_id}/counts", post(matches::submit_count))
        .route(
            "/matches/{match_id}/corrections",
            post(matches::correct_count),
        )
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth_middleware,
        ))
}

/// Health check endpoint for monitoring and load balancers.
///
/// Reports how many matches are held in memory and how many the store
/// knows about.
///
/// # Response
///
/// Returns `200 OK` if the store (and the database, when there is one)
/// answers, or `503 Service Unavailable` if it doesn't.
///
/// # Example
///
/// ```bash
/// curl http://localhost:8121/health
/// # {"status":"healthy","version":"1.0.0","database":true,"matches":{"live":3,"stored":41},"timestamp":"2026-10-19T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_healthy = match &state.database {
        Some(db) => db.health_check().await.is_ok(),
        None => true,
    };
    let live_matches = state.manager.live_matches().await;
    crate::metrics::live_matches(live_matches);
    let stored_matches = match state.manager.stored_matches().await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!("Health check could not count stored matches: {}", e);
            None
        }
    };

    let healthy = db_healthy && stored_matches.is_some();
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": state.database.as_ref().map(|_| db_healthy),
        "matches": {
            "live": live_matches,
            "stored": stored_matches,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
