//! Match API handlers.
//!
//! Thin wrappers over [`MatchManager`](cribbage::MatchManager): every handler
//! resolves the authenticated player, calls one manager operation and maps
//! the outcome to a status code. All routes require a bearer token.
//!
//! # Examples
//!
//! Start a match:
//! ```bash
//! curl -X POST http://localhost:8121/api/v1/matches \
//!   -H "Authorization: Bearer TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"players": [1, 2]}'
//! ```
//!
//! Play a card:
//! ```bash
//! curl -X POST http://localhost:8121/api/v1/matches/$ID/moves \
//!   -H "Authorization: Bearer TOKEN" \
//!   -d '{"type": "play_card", "card": "5H"}'
//! ```

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use cribbage::{
    MatchError, MatchSettings, MatchSnapshot, PlayerId,
    db::MatchMove,
    matches::{CorrectionRequest, CountRecord, CountRequest, ErrorKind, MatchId, MoveRequest},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AppState, request_id::RequestId};
use crate::logging::log_refused;

/// Seconds a client should wait before retrying a busy match.
pub const RETRY_AFTER_SECS: u64 = 1;

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateMatchRequest {
    /// Chosen by the lobby; generated when absent.
    #[serde(default)]
    pub match_id: Option<MatchId>,
    pub players: Vec<PlayerId>,
    #[serde(default)]
    pub his_heels: Option<bool>,
    /// Defaults to the creator.
    #[serde(default)]
    pub arbiter: Option<PlayerId>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// A [`MatchError`] on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub MatchError);

impl From<MatchError> for ApiError {
    fn from(err: MatchError) -> Self {
        Self(err)
    }
}

/// HTTP status for each error kind.
#[must_use]
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::Busy => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Concurrency => StatusCode::CONFLICT,
        ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        if kind == ErrorKind::Fatal {
            tracing::error!("Match request failed: {}", self.0);
        }

        let body = ErrorResponse {
            error: self.0.client_message(),
            kind: kind.as_str().to_string(),
        };
        let mut response = (status_for(kind), Json(body)).into_response();
        if kind == ErrorKind::Busy {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}

/// Logs authorization refusals, then hands the error back.
fn refused(
    request_id: &RequestId,
    match_id: MatchId,
    player_id: PlayerId,
    err: MatchError,
) -> ApiError {
    if err.kind() == ErrorKind::Authorization {
        log_refused(
            request_id.as_str(),
            &match_id.to_string(),
            player_id,
            &err.to_string(),
        );
    }
    ApiError(err)
}

/// Start a new match and deal the first hand.
///
/// # Request Body
///
/// ```json
/// { "match_id": null, "players": [1, 2, 3], "his_heels": true, "arbiter": 1 }
/// ```
///
/// # Response
///
/// Returns `201 Created` with the match as the caller sees it.
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Wrong number of players, duplicates, or id taken
pub async fn create_match(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Json(request): Json<CreateMatchRequest>,
) -> Result<(StatusCode, Json<MatchSnapshot>), ApiError> {
    let match_id = request.match_id.unwrap_or_else(Uuid::new_v4);
    let defaults = MatchSettings::default();
    let settings = MatchSettings {
        his_heels: request.his_heels.unwrap_or(defaults.his_heels),
        arbiter: Some(request.arbiter.unwrap_or(player_id)),
    };

    state
        .manager
        .create_match(match_id, request.players, settings)
        .await?;
    crate::metrics::live_matches(state.manager.live_matches().await);

    let snapshot = state
        .manager
        .snapshot_for_viewer(match_id, Some(player_id))
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Get a match as the caller sees it.
///
/// Players see their own cards; anyone else gets the spectator view.
///
/// # Errors
///
/// - `404 Not Found`: No such match
/// - `503 Service Unavailable`: Match busy, retry after `Retry-After`
pub async fn get_match(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Path(match_id): Path<MatchId>,
) -> Result<Json<MatchSnapshot>, ApiError> {
    let snapshot = state
        .manager
        .snapshot_for_viewer(match_id, Some(player_id))
        .await?;
    Ok(Json(snapshot))
}

/// Submit a discard, a card to peg, or a go.
///
/// # Request Body
///
/// ```json
/// { "type": "discard", "cards": ["5H", "10S"] }
/// ```
///
/// # Errors
///
/// - `403 Forbidden`: Caller isn't seated in this match
/// - `422 Unprocessable Entity`: Illegal move for the current state
/// - `409 Conflict`: Match changed underneath the request
pub async fn submit_move(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Extension(request_id): Extension<RequestId>,
    Path(match_id): Path<MatchId>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<MatchSnapshot>, ApiError> {
    state
        .manager
        .apply_move(match_id, player_id, &request)
        .await
        .map(Json)
        .map_err(|e| refused(&request_id, match_id, player_id, e))
}

/// Deal the next hand once the current one has been counted.
pub async fn next_hand(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Extension(request_id): Extension<RequestId>,
    Path(match_id): Path<MatchId>,
) -> Result<Json<MatchSnapshot>, ApiError> {
    state
        .manager
        .next_hand(match_id, player_id)
        .await
        .map(Json)
        .map_err(|e| refused(&request_id, match_id, player_id, e))
}

/// Record a claimed count for the caller's hand or crib.
///
/// # Request Body
///
/// ```json
/// { "kind": "hand", "claim": 12, "final": false }
/// ```
///
/// # Response
///
/// Returns `201 Created` with the claim next to the engine's count.
pub async fn submit_count(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Extension(request_id): Extension<RequestId>,
    Path(match_id): Path<MatchId>,
    Json(request): Json<CountRequest>,
) -> Result<(StatusCode, Json<CountRecord>), ApiError> {
    state
        .manager
        .submit_count(match_id, player_id, request)
        .await
        .map(|record| (StatusCode::CREATED, Json(record)))
        .map_err(|e| refused(&request_id, match_id, player_id, e))
}

/// Correct an earlier count claim.
///
/// # Request Body
///
/// ```json
/// { "move_id": 17, "new_claim": 8 }
/// ```
///
/// # Errors
///
/// - `403 Forbidden`: Not the submitter, or not the arbiter for a finalized claim
/// - `422 Unprocessable Entity`: Not a count, or an impossible score
pub async fn correct_count(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Extension(request_id): Extension<RequestId>,
    Path(match_id): Path<MatchId>,
    Json(request): Json<CorrectionRequest>,
) -> Result<(StatusCode, Json<CountRecord>), ApiError> {
    state
        .manager
        .correct_count(match_id, player_id, request)
        .await
        .map(|record| (StatusCode::CREATED, Json(record)))
        .map_err(|e| refused(&request_id, match_id, player_id, e))
}

/// The match's audit trail, oldest first.
pub async fn list_moves(
    State(state): State<AppState>,
    Extension(player_id): Extension<PlayerId>,
    Path(match_id): Path<MatchId>,
) -> Result<Json<Vec<MatchMove>>, ApiError> {
    let moves = state
        .manager
        .moves_for_viewer(match_id, Some(player_id))
        .await?;
    Ok(Json(moves))
}
