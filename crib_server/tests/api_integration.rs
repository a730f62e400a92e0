//! Integration tests for the HTTP API.
//!
//! The router runs over the in-memory store, so these need no database.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Duration as TokenTtl;
use crib_server::{
    api::{AppState, create_router, request_id::REQUEST_ID_HEADER},
    auth::TokenVerifier,
};
use cribbage::{
    Hub, MatchManager,
    db::MemoryMatchStore,
    matches::{ManagerConfig, MatchId},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt; // For `oneshot` method

const SECRET: &str = "test_secret_key_for_testing_only_0123456789";

struct TestServer {
    app: axum::Router,
    manager: Arc<MatchManager>,
    tokens: Arc<TokenVerifier>,
}

impl TestServer {
    fn new() -> Self {
        let hub = Arc::new(Hub::new(16));
        let config = ManagerConfig {
            lock_timeout: Duration::from_millis(25),
            ..ManagerConfig::default()
        };
        let manager = Arc::new(MatchManager::new(
            Arc::new(MemoryMatchStore::new()),
            hub.clone(),
            config,
        ));
        let tokens = Arc::new(TokenVerifier::new(SECRET));
        let app = create_router(AppState {
            manager: manager.clone(),
            hub,
            tokens: tokens.clone(),
            database: None,
        });
        Self {
            app,
            manager,
            tokens,
        }
    }

    fn token(&self, player_id: i64) -> String {
        self.tokens
            .issue(player_id, TokenTtl::minutes(15))
            .unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, body)
    }

    async fn get(&self, player_id: i64, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(player_id)))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = self.send(request).await;
        (status, body)
    }

    async fn post(&self, player_id: i64, uri: &str, body: Value) -> (StatusCode, Value) {
        let (status, _, body) = self.post_with_headers(player_id, uri, body).await;
        (status, body)
    }

    async fn post_with_headers(
        &self,
        player_id: i64,
        uri: &str,
        body: Value,
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(player_id)))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Starts a two-player match for players 1 and 2, created by player 1.
    async fn start_match(&self) -> Value {
        let (status, body) = self
            .post(1, "/api/v1/matches", json!({"players": [1, 2]}))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }
}

fn match_id(snapshot: &Value) -> MatchId {
    snapshot["match_id"].as_str().unwrap().parse().unwrap()
}

/// The first two cards of the viewer's own hand, as a discard body.
fn discard_two(snapshot: &Value, seat: usize) -> Value {
    let hand = snapshot["players"][seat]["hand"].as_array().unwrap();
    json!({"type": "discard", "cards": [hand[0], hand[1]]})
}

// ============================================================================
// Health and Authentication
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let server = TestServer::new();

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = server.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], Value::Null);
    assert_eq!(body["matches"]["live"], 0);
    assert_eq!(body["matches"]["stored"], 0);
    assert!(headers.contains_key(REQUEST_ID_HEADER));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let server = TestServer::new();

    let request = Request::builder()
        .uri("/health")
        .header(REQUEST_ID_HEADER, "trace-me-42")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = server.send(request).await;

    assert_eq!(headers[REQUEST_ID_HEADER], "trace-me-42");
}

#[tokio::test]
async fn test_match_routes_require_token() {
    let server = TestServer::new();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/matches")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"players": [1, 2]}).to_string()))
        .unwrap();
    let (status, _, _) = server.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = TokenVerifier::new("some_other_secret_that_is_long_enough")
        .issue(1, TokenTtl::minutes(15))
        .unwrap();
    let request = Request::builder()
        .uri(format!("/api/v1/matches/{}", uuid::Uuid::new_v4()))
        .header(header::AUTHORIZATION, format!("Bearer {forged}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = server.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Match Lifecycle
// ============================================================================

#[tokio::test]
async fn test_create_match_returns_callers_view() {
    let server = TestServer::new();
    let snapshot = server.start_match().await;

    assert_eq!(snapshot["version"], 1);
    assert_eq!(snapshot["state"]["stage"], "discard");
    assert_eq!(snapshot["state"]["settings"]["arbiter"], 1);
    assert_eq!(snapshot["players"][0]["hand"].as_array().unwrap().len(), 6);
    assert_eq!(snapshot["players"][1]["hand"], Value::Null);
    assert_eq!(snapshot["players"][1]["hand_count"], 6);
    assert_eq!(server.manager.live_matches().await, 1);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (_, _, health) = server.send(request).await;
    assert_eq!(health["matches"]["live"], 1);
    assert_eq!(health["matches"]["stored"], 1);
}

#[tokio::test]
async fn test_create_match_with_chosen_id_and_arbiter() {
    let server = TestServer::new();
    let id = uuid::Uuid::new_v4();

    let (status, body) = server
        .post(
            7,
            "/api/v1/matches",
            json!({"match_id": id, "players": [1, 2, 3], "his_heels": false, "arbiter": 7}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(match_id(&body), id);
    assert_eq!(body["state"]["settings"]["arbiter"], 7);
    assert_eq!(body["state"]["settings"]["his_heels"], false);
    // The creator isn't seated, so sees no cards at all.
    for player in body["players"].as_array().unwrap() {
        assert_eq!(player["hand"], Value::Null);
    }

    let (status, body) = server
        .post(7, "/api/v1/matches", json!({"match_id": id, "players": [1, 2]}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn test_create_match_rejects_bad_player_lists() {
    let server = TestServer::new();

    for players in [json!([1]), json!([1, 2, 3, 4, 5]), json!([1, 1])] {
        let (status, body) = server
            .post(1, "/api/v1/matches", json!({"players": players}))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{players}");
        assert_eq!(body["kind"], "validation");
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn test_unknown_match_is_not_found() {
    let server = TestServer::new();
    let uri = format!("/api/v1/matches/{}", uuid::Uuid::new_v4());

    let (status, body) = server.get(1, &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_spectator_sees_no_cards() {
    let server = TestServer::new();
    let snapshot = server.start_match().await;
    let uri = format!("/api/v1/matches/{}", match_id(&snapshot));

    let (status, body) = server.get(99, &uri).await;
    assert_eq!(status, StatusCode::OK);
    for player in body["players"].as_array().unwrap() {
        assert_eq!(player["hand"], Value::Null);
        assert_eq!(player["hand_count"], 6);
    }
}

// ============================================================================
// Moves
// ============================================================================

#[tokio::test]
async fn test_submit_move_advances_version() {
    let server = TestServer::new();
    let snapshot = server.start_match().await;
    let uri = format!("/api/v1/matches/{}/moves", match_id(&snapshot));

    let (status, body) = server.post(1, &uri, discard_two(&snapshot, 0)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["version"], 2);
    assert_eq!(body["players"][0]["hand"].as_array().unwrap().len(), 4);
    assert_eq!(body["players"][0]["discarded"], true);
    assert_eq!(body["state"]["crib_count"], 2);
}

#[tokio::test]
async fn test_outsider_move_is_forbidden() {
    let server = TestServer::new();
    let snapshot = server.start_match().await;
    let uri = format!("/api/v1/matches/{}/moves", match_id(&snapshot));

    let (status, body) = server.post(99, &uri, json!({"type": "go"})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "authorization");
}

#[tokio::test]
async fn test_illegal_moves_are_unprocessable() {
    let server = TestServer::new();
    let snapshot = server.start_match().await;
    let id = match_id(&snapshot);
    let uri = format!("/api/v1/matches/{id}/moves");

    for body in [
        json!({"type": "shuffle"}),
        json!({"type": "discard"}),
        json!({"type": "discard", "cards": ["ZZ", "5H"]}),
        json!({"type": "go"}),
    ] {
        let (status, response) = server.post(1, &uri, body.clone()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
        assert_eq!(response["kind"], "validation");
    }

    // Nothing was committed.
    let (_, current) = server.get(1, &format!("/api/v1/matches/{id}")).await;
    assert_eq!(current["version"], 1);
}

#[tokio::test]
async fn test_audit_trail_hides_other_discards() {
    let server = TestServer::new();
    let snapshot = server.start_match().await;
    let id = match_id(&snapshot);
    let uri = format!("/api/v1/matches/{id}/moves");

    let (status, _) = server.post(1, &uri, discard_two(&snapshot, 0)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, own) = server.get(1, &uri).await;
    assert_eq!(status, StatusCode::OK);
    let own = own.as_array().unwrap();
    assert_eq!(own.len(), 2);
    assert_eq!(own[0]["move_type"], "deal");
    assert_eq!(own[1]["move_type"], "discard");
    assert_eq!(own[1]["cards"].as_array().unwrap().len(), 2);

    let (_, other) = server.get(2, &uri).await;
    assert_eq!(other[1]["move_type"], "discard");
    assert!(other[1]["cards"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_next_hand_before_counting_is_unprocessable() {
    let server = TestServer::new();
    let snapshot = server.start_match().await;
    let uri = format!("/api/v1/matches/{}/next-hand", match_id(&snapshot));

    let (status, body) = server.post(1, &uri, json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "validation");
}

// ============================================================================
// Counts
// ============================================================================

#[tokio::test]
async fn test_count_claims_are_validated() {
    let server = TestServer::new();
    let snapshot = server.start_match().await;
    let uri = format!("/api/v1/matches/{}/counts", match_id(&snapshot));

    // No hand can score 19.
    let (status, body) = server
        .post(1, &uri, json!({"kind": "hand", "claim": 19}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "validation");

    // Nothing has been counted yet.
    let (status, _) = server
        .post(1, &uri, json!({"kind": "hand", "claim": 8}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = server
        .post(99, &uri, json!({"kind": "hand", "claim": 8}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_correcting_a_non_count_is_unprocessable() {
    let server = TestServer::new();
    let snapshot = server.start_match().await;
    let uri = format!("/api/v1/matches/{}/corrections", match_id(&snapshot));

    // Move 1 is the deal.
    let (status, body) = server
        .post(1, &uri, json!({"move_id": 1, "new_claim": 8}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "validation");
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_busy_match_returns_retry_after() {
    let server = TestServer::new();
    let snapshot = server.start_match().await;
    let id = match_id(&snapshot);

    let guard = server.manager.get_locked(id).await.unwrap();
    let (status, headers, body) = server
        .post_with_headers(
            1,
            &format!("/api/v1/matches/{id}/moves"),
            discard_two(&snapshot, 0),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(headers[header::RETRY_AFTER], "1");
    assert_eq!(body["kind"], "busy");
    drop(guard);

    let (status, body) = server
        .post(1, &format!("/api/v1/matches/{id}/moves"), discard_two(&snapshot, 0))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);
}
