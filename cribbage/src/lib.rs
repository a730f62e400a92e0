//! # Cribbage
//!
//! A multiplayer cribbage match engine for 2 to 4 seats.
//!
//! The game itself is a plain state machine ([`MatchState`]) driven one move
//! at a time. Around it, the [`MatchManager`] runs many matches at once: each
//! match has its own lock, every committed move is persisted with a
//! compare-and-swap on a version counter, and sanitized per-viewer snapshots
//! are pushed to subscribers after the lock is released.
//!
//! ## Core Modules
//!
//! - [`game`]: Cards, hand scoring, pegging and the match state machine
//! - [`matches`]: Match manager, snapshots and the broadcast hub
//! - [`db`]: Durable match storage (Postgres or in-memory)
//!
//! ## Example
//!
//! ```
//! use cribbage::{Card, game::scoring::score_hand};
//!
//! let hand = ["5C", "5D", "5S", "JH"].map(|code| code.parse::<Card>().unwrap());
//! let starter: Card = "5H".parse().unwrap();
//! assert_eq!(score_hand(&hand, starter, false).total, 29);
//! ```

/// Durable storage for match state and the move audit trail.
pub mod db;

/// Core game logic, entities, and state machine.
pub mod game;
pub use game::{
    ClaimKind, GameError, MatchSettings, MatchState, Move, PlayerId, Seat, Stage,
    constants::{self, WINNING_SCORE},
    entities::{self, Card, Suit},
};

/// Concurrent match management and real-time fan-out.
pub mod matches;
pub use matches::{Hub, MatchError, MatchId, MatchManager, MatchSnapshot};
