//! Authentication middleware for match endpoints.
//!
//! Validates the bearer token from the `Authorization` header and injects
//! the player id into request extensions for downstream handlers.
//!
//! # Extracting the Player ID
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//!
//! async fn protected_handler(Extension(player_id): Extension<i64>) -> String {
//!     format!("Authenticated as player {}", player_id)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use super::AppState;

/// The token from an `Authorization: Bearer <token>` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Authentication middleware that validates JWT tokens and injects the player ID.
///
/// # Behavior
///
/// - **Success**: Token valid → Injects `player_id: i64` into request extensions → Calls next handler
/// - **Missing header**: Returns `401 Unauthorized`
/// - **Invalid/expired token**: Returns `401 Unauthorized`
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    match state.tokens.authenticate(bearer_token(request.headers())) {
        Ok(claims) => {
            request.extensions_mut().insert(claims.sub);
            Ok(next.run(request).await)
        }
        Err(e) => {
            tracing::debug!("Rejected bearer token: {}", e);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
