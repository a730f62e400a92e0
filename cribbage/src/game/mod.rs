//! Cribbage rules: cards, scoring, pegging and the match state machine.
//!
//! Nothing in here does I/O or holds locks; the match manager owns the
//! concurrency and persistence around it.

pub mod constants;
pub mod entities;
pub mod errors;
pub mod pegging;
pub mod scoring;
pub mod state_machine;

pub use errors::{AuthorizationError, FatalError, GameError, GameResult, ValidationError};
pub use state_machine::{
    ClaimKind, GameEvent, HandRecord, MatchSettings, MatchState, Move, PlayerId, Seat, SeatScore,
    Stage,
};
