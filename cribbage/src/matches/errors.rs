//! Errors surfaced by the match manager.

use thiserror::Error;

use super::MatchId;
use crate::{
    db::StoreError,
    game::{AuthorizationError, FatalError, GameError, ValidationError},
};

/// Coarse classification callers map to responses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Busy,
    NotFound,
    Concurrency,
    Fatal,
}

impl ErrorKind {
    /// Label used in metrics and error bodies.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::Busy => "busy",
            Self::NotFound => "not_found",
            Self::Concurrency => "concurrency",
            Self::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error("match {match_id} is busy, retry shortly")]
    Busy { match_id: MatchId },

    #[error("match {0} not found")]
    NotFound(MatchId),

    #[error("match {match_id} changed underneath us: expected version {expected}, found {actual}")]
    Concurrency {
        match_id: MatchId,
        expected: i64,
        actual: i64,
    },

    #[error("stored state of match {match_id} is unreadable: {reason}")]
    CorruptState { match_id: MatchId, reason: String },

    #[error("failed to serialize match state: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl From<GameError> for MatchError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::Validation(e) => Self::Validation(e),
            GameError::Authorization(e) => Self::Authorization(e),
            GameError::Fatal(e) => Self::Fatal(e),
        }
    }
}

impl MatchError {
    /// Lifts a store error, keeping not-found distinct from real failures.
    pub(crate) fn from_store(match_id: MatchId, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::AlreadyExists(_) => Self::Validation(ValidationError::MatchExists),
            StoreError::VersionConflict { expected, actual } => Self::Concurrency {
                match_id,
                expected,
                actual,
            },
            other => Self::Storage(other),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Concurrency { .. } => ErrorKind::Concurrency,
            Self::Fatal(_) | Self::CorruptState { .. } | Self::Serialization(_) | Self::Storage(_) => {
                ErrorKind::Fatal
            }
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Busy
    }

    /// Get a sanitized error message safe for client consumption
    ///
    /// Storage and internal failures are reduced to a generic message so
    /// nothing about the database or the state blob leaks to players.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Fatal => "Internal server error".to_string(),
            ErrorKind::Concurrency => "Match was updated concurrently, reload and retry".to_string(),
            ErrorKind::NotFound => "Match not found".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type MatchResult<T> = Result<T, MatchError>;
