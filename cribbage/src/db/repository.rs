//! Match storage behind a trait, so the manager can run against Postgres in
//! production and an in-memory store in tests and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;
use uuid::Uuid;

use super::timeouts::{DEFAULT_TRANSACTION_TIMEOUT, with_default_timeout, with_timeout};
use crate::game::{
    ClaimKind, PlayerId, Seat, Stage,
    constants::Points,
    entities::{Card, parse_cards},
};

pub type MatchId = Uuid;

/// Errors raised by a [`MatchStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("match {0} not found")]
    NotFound(MatchId),
    #[error("match {0} already exists")]
    AlreadyExists(MatchId),
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: i64, actual: i64 },
    #[error("stored row is malformed: {0}")]
    Malformed(String),
    #[error("database operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Kind of an audit-trail row.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    Deal,
    Discard,
    PlayCard,
    Go,
    NextHand,
    Count,
    Correction,
}

impl MoveType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deal => "deal",
            Self::Discard => "discard",
            Self::PlayCard => "play_card",
            Self::Go => "go",
            Self::NextHand => "next_hand",
            Self::Count => "count",
            Self::Correction => "correction",
        }
    }
}

impl fmt::Display for MoveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MoveType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deal" => Ok(Self::Deal),
            "discard" => Ok(Self::Discard),
            "play_card" => Ok(Self::PlayCard),
            "go" => Ok(Self::Go),
            "next_hand" => Ok(Self::NextHand),
            "count" => Ok(Self::Count),
            "correction" => Ok(Self::Correction),
            other => Err(StoreError::Malformed(format!("unknown move type {other:?}"))),
        }
    }
}

/// A move about to be written.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewMove {
    pub player_id: Option<PlayerId>,
    pub seat: Option<Seat>,
    pub move_type: MoveType,
    pub cards: Vec<Card>,
    pub claim_kind: Option<ClaimKind>,
    pub claimed_score: Option<Points>,
    pub verified_score: Option<Points>,
    pub finalized: bool,
    pub corrected: bool,
    pub supersedes: Option<i64>,
}

impl NewMove {
    #[must_use]
    pub fn new(move_type: MoveType, player_id: Option<PlayerId>, seat: Option<Seat>) -> Self {
        Self {
            player_id,
            seat,
            move_type,
            cards: Vec::new(),
            claim_kind: None,
            claimed_score: None,
            verified_score: None,
            finalized: false,
            corrected: false,
            supersedes: None,
        }
    }

    #[must_use]
    pub fn with_cards(mut self, cards: Vec<Card>) -> Self {
        self.cards = cards;
        self
    }

    /// Stamps this row with the id of the match it belongs to.
    #[must_use]
    pub fn into_record(self, id: i64, match_id: MatchId, created_at: DateTime<Utc>) -> MatchMove {
        MatchMove {
            id,
            match_id,
            player_id: self.player_id,
            seat: self.seat,
            move_type: self.move_type,
            cards: self.cards,
            claim_kind: self.claim_kind,
            claimed_score: self.claimed_score,
            verified_score: self.verified_score,
            finalized: self.finalized,
            corrected: self.corrected,
            supersedes: self.supersedes,
            created_at,
        }
    }
}

/// An immutable audit-trail row.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MatchMove {
    pub id: i64,
    pub match_id: MatchId,
    pub player_id: Option<PlayerId>,
    pub seat: Option<Seat>,
    pub move_type: MoveType,
    pub cards: Vec<Card>,
    pub claim_kind: Option<ClaimKind>,
    pub claimed_score: Option<Points>,
    pub verified_score: Option<Points>,
    pub finalized: bool,
    pub corrected: bool,
    pub supersedes: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A match as stored: the serialized state and its version token.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistedMatch {
    pub state_json: Value,
    pub state_version: i64,
}

/// Durable storage for match state and moves.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Stores a new match at version 1 together with its opening moves.
    async fn insert_match(
        &self,
        match_id: MatchId,
        state_json: &Value,
        stage: Stage,
        moves: &[NewMove],
    ) -> StoreResult<i64>;

    async fn load_match(&self, match_id: MatchId) -> StoreResult<Option<PersistedMatch>>;

    /// Replaces the state if it is still at `expected_version` and appends
    /// `moves`, all in one transaction. Returns the new version.
    async fn commit(
        &self,
        match_id: MatchId,
        expected_version: i64,
        state_json: &Value,
        stage: Stage,
        moves: &[NewMove],
    ) -> StoreResult<i64>;

    /// Appends a move without touching the match state.
    async fn record_move(&self, match_id: MatchId, mv: NewMove) -> StoreResult<MatchMove>;

    async fn find_move(&self, match_id: MatchId, move_id: i64) -> StoreResult<Option<MatchMove>>;

    /// Every move of a match, oldest first.
    async fn list_moves(&self, match_id: MatchId) -> StoreResult<Vec<MatchMove>>;

    /// Number of stored matches, for health reporting.
    async fn count_matches(&self) -> StoreResult<i64>;
}

/// PostgreSQL implementation of `MatchStore`
pub struct PgMatchStore {
    pool: PgPool,
}

impl PgMatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const MOVE_COLUMNS: &str = "id, match_id, player_id, seat, move_type, cards, claim_kind, \
     claimed_score, verified_score, finalized, corrected, supersedes, created_at";

fn to_i32(value: Option<usize>) -> Option<i32> {
    value.and_then(|v| i32::try_from(v).ok())
}

fn move_from_row(row: &PgRow) -> StoreResult<MatchMove> {
    let move_type: String = row.try_get("move_type")?;
    let codes: Vec<String> = row.try_get("cards")?;
    let cards = parse_cards(&codes).map_err(|e| StoreError::Malformed(e.to_string()))?;
    let claim_kind = match row.try_get::<Option<String>, _>("claim_kind")?.as_deref() {
        None => None,
        Some("hand") => Some(ClaimKind::Hand),
        Some("crib") => Some(ClaimKind::Crib),
        Some(other) => {
            return Err(StoreError::Malformed(format!("unknown claim kind {other:?}")));
        }
    };
    let score = |column: &str| -> StoreResult<Option<Points>> {
        row.try_get::<Option<i32>, _>(column)?
            .map(|v| Points::try_from(v).map_err(|_| StoreError::Malformed(format!("{column} = {v}"))))
            .transpose()
    };

    Ok(MatchMove {
        id: row.try_get("id")?,
        match_id: row.try_get("match_id")?,
        player_id: row.try_get("player_id")?,
        seat: row
            .try_get::<Option<i32>, _>("seat")?
            .and_then(|s| usize::try_from(s).ok()),
        move_type: move_type.parse()?,
        cards,
        claim_kind,
        claimed_score: score("claimed_score")?,
        verified_score: score("verified_score")?,
        finalized: row.try_get("finalized")?,
        corrected: row.try_get("corrected")?,
        supersedes: row.try_get("supersedes")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn insert_move(
    conn: &mut PgConnection,
    match_id: MatchId,
    mv: &NewMove,
) -> StoreResult<MatchMove> {
    let cards: Vec<String> = mv.cards.iter().map(|card| card.code()).collect();
    let row = sqlx::query(&format!(
        "INSERT INTO match_moves
            (match_id, player_id, seat, move_type, cards, claim_kind,
             claimed_score, verified_score, finalized, corrected, supersedes)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         RETURNING {MOVE_COLUMNS}"
    ))
    .bind(match_id)
    .bind(mv.player_id)
    .bind(to_i32(mv.seat))
    .bind(mv.move_type.as_str())
    .bind(cards)
    .bind(mv.claim_kind.map(ClaimKind::as_str))
    .bind(mv.claimed_score.map(i32::from))
    .bind(mv.verified_score.map(i32::from))
    .bind(mv.finalized)
    .bind(mv.corrected)
    .bind(mv.supersedes)
    .fetch_one(&mut *conn)
    .await?;
    move_from_row(&row)
}

#[async_trait]
impl MatchStore for PgMatchStore {
    async fn insert_match(
        &self,
        match_id: MatchId,
        state_json: &Value,
        stage: Stage,
        moves: &[NewMove],
    ) -> StoreResult<i64> {
        with_timeout(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;
            let inserted = sqlx::query(
                "INSERT INTO matches (id, state_json, state_version, stage)
                 VALUES ($1, $2, 1, $3)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(match_id)
            .bind(state_json.clone())
            .bind(stage.to_string())
            .execute(&mut *tx)
            .await?;
            if inserted.rows_affected() == 0 {
                return Err(StoreError::AlreadyExists(match_id));
            }
            for mv in moves {
                insert_move(&mut tx, match_id, mv).await?;
            }
            tx.commit().await?;
            Ok::<_, StoreError>(1)
        })
        .await
    }

    async fn load_match(&self, match_id: MatchId) -> StoreResult<Option<PersistedMatch>> {
        let row = with_default_timeout(
            sqlx::query("SELECT state_json, state_version FROM matches WHERE id = $1")
                .bind(match_id)
                .fetch_optional(&self.pool),
        )
        .await?;

        row.map(|r| -> StoreResult<PersistedMatch> {
            Ok(PersistedMatch {
                state_json: r.try_get("state_json")?,
                state_version: r.try_get("state_version")?,
            })
        })
        .transpose()
    }

    async fn commit(
        &self,
        match_id: MatchId,
        expected_version: i64,
        state_json: &Value,
        stage: Stage,
        moves: &[NewMove],
    ) -> StoreResult<i64> {
        with_timeout(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;
            let updated = sqlx::query(
                "UPDATE matches
                 SET state_json = $3, stage = $4,
                     state_version = state_version + 1, updated_at = NOW()
                 WHERE id = $1 AND state_version = $2
                 RETURNING state_version",
            )
            .bind(match_id)
            .bind(expected_version)
            .bind(state_json.clone())
            .bind(stage.to_string())
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = updated else {
                // Either the match is gone or someone else committed first.
                let actual: Option<i64> =
                    sqlx::query_scalar("SELECT state_version FROM matches WHERE id = $1")
                        .bind(match_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(match actual {
                    Some(actual) => StoreError::VersionConflict {
                        expected: expected_version,
                        actual,
                    },
                    None => StoreError::NotFound(match_id),
                });
            };
            let version: i64 = row.try_get("state_version")?;

            for mv in moves {
                insert_move(&mut tx, match_id, mv).await?;
            }
            tx.commit().await?;
            Ok::<_, StoreError>(version)
        })
        .await
    }

    async fn record_move(&self, match_id: MatchId, mv: NewMove) -> StoreResult<MatchMove> {
        with_default_timeout(async {
            let mut conn = self.pool.acquire().await?;
            insert_move(&mut conn, match_id, &mv).await
        })
        .await
    }

    async fn find_move(&self, match_id: MatchId, move_id: i64) -> StoreResult<Option<MatchMove>> {
        let row = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {MOVE_COLUMNS} FROM match_moves WHERE match_id = $1 AND id = $2"
            ))
            .bind(match_id)
            .bind(move_id)
            .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(move_from_row).transpose()
    }

    async fn list_moves(&self, match_id: MatchId) -> StoreResult<Vec<MatchMove>> {
        let rows = with_default_timeout(
            sqlx::query(&format!(
                "SELECT {MOVE_COLUMNS} FROM match_moves WHERE match_id = $1 ORDER BY id ASC"
            ))
            .bind(match_id)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(move_from_row).collect()
    }

    async fn count_matches(&self) -> StoreResult<i64> {
        with_default_timeout(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM matches").fetch_one(&self.pool),
        )
        .await
    }
}
