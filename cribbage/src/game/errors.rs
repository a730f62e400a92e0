//! Engine error types.
//!
//! Validation and authorization errors are raised before any mutation, so a
//! rejected move never leaves a match half-applied. Fatal errors mean the
//! operation cannot complete and must be surfaced to an operator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    constants::Points,
    entities::Card,
    state_machine::Stage,
};

/// A move or request that breaks the rules of the game.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum ValidationError {
    #[error("invalid card code {0:?}")]
    InvalidCard(String),
    #[error("must discard exactly {expected} card(s), got {got}")]
    WrongDiscardCount { expected: usize, got: usize },
    #[error("the same card was submitted twice")]
    DuplicateCard,
    #[error("{0} is not in your hand")]
    CardNotInHand(Card),
    #[error("{card} would take the count past 31 (count is {total})")]
    ExceedsThirtyOne { card: Card, total: Points },
    #[error("can't say go while holding a playable card")]
    GoWithLegalPlay,
    #[error("not your turn")]
    OutOfTurn,
    #[error("not allowed while the match is {actual}")]
    WrongStage { actual: Stage },
    #[error("already discarded this hand")]
    AlreadyDiscarded,
    #[error("{0} is not a possible hand score")]
    ImpossibleScore(i64),
    #[error("malformed move: {0}")]
    MalformedMove(String),
    #[error("a match needs 2 to 4 players, got {0}")]
    InvalidPlayerCount(usize),
    #[error("a player can only hold one seat")]
    DuplicatePlayer,
    #[error("no hand has been scored yet")]
    NoScoredHand,
    #[error("move {0} has no verified count to correct")]
    MoveNotCorrectable(i64),
    #[error("match already exists")]
    MatchExists,
}

/// A caller acting on something that isn't theirs.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum AuthorizationError {
    #[error("not seated in this match")]
    NotSeated,
    #[error("only the original submitter can correct an open claim")]
    NotSubmitter,
    #[error("only the arbiter can correct a finalized claim")]
    NotArbiter,
    #[error("only the dealer counts the crib")]
    NotDealer,
}

/// Unrecoverable failures. These abort the operation.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("secure shuffle unavailable: {0}")]
    Entropy(String),
    #[error("deck exhausted while dealing")]
    DeckExhausted,
    #[error("internal consistency error: {0}")]
    Internal(&'static str),
}

/// Any error the engine can raise while applying a move.
#[derive(Debug, Error)]
pub enum GameError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

pub type GameResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entities::Suit;

    #[test]
    fn test_validation_messages() {
        let err = ValidationError::ExceedsThirtyOne {
            card: Card(10, Suit::Spade),
            total: 25,
        };
        assert_eq!(
            err.to_string(),
            "10♠ would take the count past 31 (count is 25)"
        );

        let err = ValidationError::WrongStage {
            actual: Stage::Pegging,
        };
        assert!(err.to_string().contains("pegging"));
    }

    #[test]
    fn test_game_error_wraps_kinds() {
        let err: GameError = ValidationError::OutOfTurn.into();
        assert!(matches!(err, GameError::Validation(ValidationError::OutOfTurn)));

        let err: GameError = AuthorizationError::NotDealer.into();
        assert_eq!(err.to_string(), "only the dealer counts the crib");

        let err: GameError = FatalError::DeckExhausted.into();
        assert!(matches!(err, GameError::Fatal(_)));
    }
}
