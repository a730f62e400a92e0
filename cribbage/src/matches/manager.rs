//! Match manager: the one place match state is read and written.
//!
//! Each live match sits behind its own async mutex. A mutation takes that
//! lock with a bounded wait, applies the move to a working copy, commits the
//! copy to the store with a compare-and-swap on the version, and only then
//! swaps it in. Snapshots go out to subscribers after the lock is released.

use serde::Serialize;
use std::{
    collections::HashMap,
    ops::Deref,
    sync::Arc,
    time::Instant,
};
use tokio::{
    sync::{Mutex, OwnedMutexGuard, RwLock},
    time::timeout,
};

use super::{
    MatchId,
    broadcast::{Broadcaster, match_channel, player_channel},
    config::ManagerConfig,
    errors::{MatchError, MatchResult},
    messages::{
        CorrectionRequest, CountRecord, CountRequest, MoveRequest, move_cards, move_type_of,
        validate_claim,
    },
    snapshot::MatchSnapshot,
};
use crate::{
    db::{MatchMove, MatchStore, MoveType, NewMove},
    game::{
        AuthorizationError, FatalError, GameEvent, GameResult, MatchSettings, MatchState,
        PlayerId, Seat, Stage, ValidationError,
    },
};

/// A match's state together with the store version it was committed at.
#[derive(Debug)]
pub struct LiveMatch {
    pub state: MatchState,
    pub version: i64,
}

type Slot = Arc<Mutex<LiveMatch>>;

/// Exclusive access to one match. The lock is released when this is dropped.
pub struct MatchGuard {
    match_id: MatchId,
    guard: OwnedMutexGuard<LiveMatch>,
}

impl MatchGuard {
    #[must_use]
    pub fn match_id(&self) -> MatchId {
        self.match_id
    }
}

impl Deref for MatchGuard {
    type Target = LiveMatch;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

/// Payload of `match_updated` events.
#[derive(Serialize)]
struct MatchUpdate<'a> {
    snapshot: &'a MatchSnapshot,
    events: &'a [GameEvent],
}

/// Snapshots captured under the lock, published after it is released.
struct Publication {
    match_id: MatchId,
    public: MatchSnapshot,
    private: Vec<(PlayerId, MatchSnapshot)>,
    events: Vec<GameEvent>,
}

impl Publication {
    fn capture(match_id: MatchId, live: &LiveMatch, events: Vec<GameEvent>) -> Self {
        let public = MatchSnapshot::for_viewer(match_id, live.version, &live.state, None);
        let private = live
            .state
            .players
            .iter()
            .map(|&player| {
                let snapshot =
                    MatchSnapshot::for_viewer(match_id, live.version, &live.state, Some(player));
                (player, snapshot)
            })
            .collect();
        Self {
            match_id,
            public,
            private,
            events,
        }
    }
}

/// Registry of live matches.
pub struct MatchManager {
    store: Arc<dyn MatchStore>,
    broadcaster: Arc<dyn Broadcaster>,
    config: ManagerConfig,
    matches: RwLock<HashMap<MatchId, Slot>>,
}

impl MatchManager {
    /// Create a new match manager
    ///
    /// # Arguments
    ///
    /// * `store` - Durable storage for state and moves
    /// * `broadcaster` - Where snapshots are published after each commit
    /// * `config` - Lock timeout and buffer sizes
    pub fn new(
        store: Arc<dyn MatchStore>,
        broadcaster: Arc<dyn Broadcaster>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            store,
            broadcaster,
            config,
            matches: RwLock::new(HashMap::new()),
        }
    }

    /// Number of matches currently held in memory.
    pub async fn live_matches(&self) -> usize {
        self.matches.read().await.len()
    }

    /// Number of matches in the store, live or not.
    pub async fn stored_matches(&self) -> MatchResult<i64> {
        self.store
            .count_matches()
            .await
            .map_err(MatchError::Storage)
    }

    /// Finds the slot for a match, loading it from the store on first use.
    async fn slot(&self, match_id: MatchId) -> MatchResult<Slot> {
        if let Some(slot) = self.matches.read().await.get(&match_id) {
            return Ok(slot.clone());
        }

        let persisted = self
            .store
            .load_match(match_id)
            .await
            .map_err(|e| MatchError::from_store(match_id, e))?
            .ok_or(MatchError::NotFound(match_id))?;
        let state: MatchState = serde_json::from_value(persisted.state_json).map_err(|e| {
            log::error!("Match {match_id} has an unreadable state blob: {e}");
            MatchError::CorruptState {
                match_id,
                reason: e.to_string(),
            }
        })?;

        // Another request may have loaded it while we were reading.
        let mut matches = self.matches.write().await;
        let slot = matches
            .entry(match_id)
            .or_insert_with(|| {
                log::info!(
                    "Rehydrated match {match_id} at version {} ({})",
                    persisted.state_version,
                    state.stage
                );
                Arc::new(Mutex::new(LiveMatch {
                    state,
                    version: persisted.state_version,
                }))
            })
            .clone();
        Ok(slot)
    }

    /// Drops the in-memory copy so the next request reloads from the store.
    async fn evict(&self, match_id: MatchId) {
        self.matches.write().await.remove(&match_id);
    }

    /// Takes the lock for a match, waiting at most the configured timeout.
    ///
    /// # Returns
    ///
    /// * `MatchResult<MatchGuard>` - The guard, or `Busy` if the wait ran out
    pub async fn get_locked(&self, match_id: MatchId) -> MatchResult<MatchGuard> {
        let slot = self.slot(match_id).await?;
        let started = Instant::now();
        let guard = timeout(self.config.lock_timeout, slot.lock_owned())
            .await
            .map_err(|_| {
                log::warn!(
                    "Timed out after {:?} waiting for match {match_id}",
                    self.config.lock_timeout
                );
                MatchError::Busy { match_id }
            })?;
        metrics::histogram!("match_lock_wait_seconds").record(started.elapsed().as_secs_f64());
        Ok(MatchGuard { match_id, guard })
    }

    /// Starts a match and deals its first hand.
    ///
    /// # Arguments
    ///
    /// * `match_id` - Id chosen by the lobby service
    /// * `players` - Player ids in seat order (2 to 4)
    /// * `settings` - Rule options
    ///
    /// # Returns
    ///
    /// * `MatchResult<MatchSnapshot>` - Public view of the new match
    pub async fn create_match(
        &self,
        match_id: MatchId,
        players: Vec<PlayerId>,
        settings: MatchSettings,
    ) -> MatchResult<MatchSnapshot> {
        if self.matches.read().await.contains_key(&match_id) {
            return Err(ValidationError::MatchExists.into());
        }

        let mut state = MatchState::new(players, settings)?;
        state.deal()?;
        let events: Vec<GameEvent> = state.drain_events().into();
        let state_json = serde_json::to_value(&state)?;

        let version = self
            .store
            .insert_match(
                match_id,
                &state_json,
                state.stage,
                &[NewMove::new(MoveType::Deal, None, None)],
            )
            .await
            .map_err(|e| MatchError::from_store(match_id, e))?;

        let live = LiveMatch { state, version };
        let publication = Publication::capture(match_id, &live, events);
        self.matches
            .write()
            .await
            .insert(match_id, Arc::new(Mutex::new(live)));

        log::info!(
            "Created match {match_id} with {} seats",
            publication.private.len()
        );
        metrics::counter!("matches_created_total").increment(1);
        let snapshot = publication.public.clone();
        self.publish(publication);
        Ok(snapshot)
    }

    /// Applies a player's move.
    pub async fn apply_move(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        request: &MoveRequest,
    ) -> MatchResult<MatchSnapshot> {
        let mv = request.parse().map_err(|e| self.rejected(e.into()))?;
        self.mutate(match_id, player_id, mv.name(), |state, seat| {
            state.apply(seat, &mv)?;
            Ok(vec![
                NewMove::new(move_type_of(&mv), Some(player_id), Some(seat))
                    .with_cards(move_cards(&mv)),
            ])
        })
        .await
    }

    /// Moves a counted hand on to the next deal.
    pub async fn next_hand(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
    ) -> MatchResult<MatchSnapshot> {
        self.mutate(match_id, player_id, "next_hand", |state, seat| {
            state.next_hand()?;
            Ok(vec![
                NewMove::new(MoveType::NextHand, Some(player_id), Some(seat)),
                NewMove::new(MoveType::Deal, None, None),
            ])
        })
        .await
    }

    /// Lock, apply to a working copy, commit with compare-and-swap, swap in,
    /// unlock, publish.
    async fn mutate<F>(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        label: &'static str,
        apply: F,
    ) -> MatchResult<MatchSnapshot>
    where
        F: FnOnce(&mut MatchState, Seat) -> GameResult<Vec<NewMove>>,
    {
        let mut guard = self.get_locked(match_id).await.map_err(|e| self.rejected(e))?;
        let seat = guard
            .state
            .seat_of(player_id)
            .ok_or_else(|| self.rejected(AuthorizationError::NotSeated.into()))?;

        let mut working = guard.state.clone();
        let moves = apply(&mut working, seat).map_err(|e| self.rejected(e.into()))?;
        let events: Vec<GameEvent> = working.drain_events().into();
        let state_json = serde_json::to_value(&working)?;

        let started = Instant::now();
        let committed = self
            .store
            .commit(match_id, guard.version, &state_json, working.stage, &moves)
            .await;
        metrics::histogram!("match_commit_seconds").record(started.elapsed().as_secs_f64());

        let version = match committed {
            Ok(version) => version,
            Err(e) => {
                let err = MatchError::from_store(match_id, e);
                if let MatchError::Concurrency {
                    expected, actual, ..
                } = &err
                {
                    log::warn!(
                        "Match {match_id} moved on elsewhere (expected version {expected}, found {actual}); reloading"
                    );
                    drop(guard);
                    self.evict(match_id).await;
                } else {
                    log::error!("Failed to commit {label} for match {match_id}: {err}");
                }
                return Err(self.rejected(err));
            }
        };

        let live = &mut guard.guard;
        live.state = working;
        live.version = version;
        let publication = Publication::capture(match_id, live, events);
        let finished = live.state.stage == Stage::Finished;
        log::debug!(
            "Match {match_id}: seat {seat} {label}, now {} at version {version}",
            live.state.stage
        );
        drop(guard);

        // Finished matches only serve reads; those reload from the store.
        if finished {
            log::info!("Match {match_id} finished at version {version}, releasing it");
            self.evict(match_id).await;
        }

        metrics::counter!("match_moves_applied_total", "move" => label).increment(1);
        let snapshot = publication
            .private
            .iter()
            .find(|(player, _)| *player == player_id)
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or(FatalError::Internal("mover missing from published snapshots"))?;
        self.publish(publication);
        Ok(snapshot)
    }

    fn rejected(&self, err: MatchError) -> MatchError {
        metrics::counter!("match_moves_rejected_total", "kind" => err.kind().as_str()).increment(1);
        err
    }

    fn publish(&self, publication: Publication) {
        let Publication {
            match_id,
            public,
            private,
            events,
        } = publication;

        let send = |channel: String, snapshot: &MatchSnapshot| {
            let update = MatchUpdate {
                snapshot,
                events: &events,
            };
            match serde_json::to_value(&update) {
                Ok(payload) => self.broadcaster.broadcast(&channel, "match_updated", payload),
                Err(e) => log::error!("Failed to encode update for {channel}: {e}"),
            }
        };

        send(match_channel(match_id), &public);
        for (player, snapshot) in &private {
            send(player_channel(match_id, *player), snapshot);
        }
    }

    /// Records a player's count claim next to the engine's count.
    ///
    /// A wrong claim is stored as-is; the score on the board always comes
    /// from the engine.
    pub async fn submit_count(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        request: CountRequest,
    ) -> MatchResult<CountRecord> {
        let claimed = validate_claim(request.claim).map_err(|e| self.rejected(e.into()))?;
        let guard = self.get_locked(match_id).await.map_err(|e| self.rejected(e))?;
        let seat = guard
            .state
            .seat_of(player_id)
            .ok_or_else(|| self.rejected(AuthorizationError::NotSeated.into()))?;
        let verified = guard
            .state
            .verified_score(seat, request.kind)
            .map_err(|e| self.rejected(e.into()))?;

        let mut mv = NewMove::new(MoveType::Count, Some(player_id), Some(seat));
        mv.claim_kind = Some(request.kind);
        mv.claimed_score = Some(claimed);
        mv.verified_score = Some(verified);
        mv.finalized = request.finalized;

        let recorded = self.record(match_id, mv).await?;
        drop(guard);

        if claimed != verified {
            log::info!(
                "Match {match_id}: seat {seat} claimed {claimed} for its {}, engine counted {verified}",
                request.kind.as_str()
            );
        }
        self.publish_count(match_id, &recorded)
    }

    /// Supersedes an earlier claim with a new one.
    ///
    /// Open claims can only be corrected by whoever made them; finalized
    /// claims only by the match arbiter.
    pub async fn correct_count(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        request: CorrectionRequest,
    ) -> MatchResult<CountRecord> {
        let claimed = validate_claim(request.new_claim).map_err(|e| self.rejected(e.into()))?;
        let guard = self.get_locked(match_id).await.map_err(|e| self.rejected(e))?;
        let seat = guard.state.seat_of(player_id);

        let original = self
            .store
            .find_move(match_id, request.move_id)
            .await
            .map_err(|e| MatchError::from_store(match_id, e))?
            .filter(|mv| matches!(mv.move_type, MoveType::Count | MoveType::Correction))
            .filter(|mv| mv.verified_score.is_some())
            .ok_or_else(|| {
                self.rejected(ValidationError::MoveNotCorrectable(request.move_id).into())
            })?;

        if original.finalized {
            if guard.state.settings.arbiter != Some(player_id) {
                return Err(self.rejected(AuthorizationError::NotArbiter.into()));
            }
        } else if original.player_id != Some(player_id) {
            return Err(self.rejected(AuthorizationError::NotSubmitter.into()));
        }

        let mut mv = NewMove::new(MoveType::Correction, Some(player_id), seat);
        mv.claim_kind = original.claim_kind;
        mv.claimed_score = Some(claimed);
        mv.verified_score = original.verified_score;
        mv.finalized = original.finalized;
        mv.corrected = true;
        mv.supersedes = Some(original.id);

        let recorded = self.record(match_id, mv).await?;
        drop(guard);

        log::info!(
            "Match {match_id}: move {} corrected to {claimed} by player {player_id}",
            original.id
        );
        self.publish_count(match_id, &recorded)
    }

    async fn record(&self, match_id: MatchId, mv: NewMove) -> MatchResult<MatchMove> {
        self.store.record_move(match_id, mv).await.map_err(|e| {
            let err = MatchError::from_store(match_id, e);
            log::error!("Failed to record count for match {match_id}: {err}");
            err
        })
    }

    fn publish_count(&self, match_id: MatchId, recorded: &MatchMove) -> MatchResult<CountRecord> {
        let record = CountRecord::from_move(recorded)
            .ok_or(FatalError::Internal("count row lost its claim"))?;
        metrics::counter!("match_counts_recorded_total", "kind" => record.kind.as_str())
            .increment(1);
        match serde_json::to_value(&record) {
            Ok(payload) => {
                self.broadcaster
                    .broadcast(&match_channel(match_id), "count_recorded", payload);
            }
            Err(e) => log::error!("Failed to encode count record for match {match_id}: {e}"),
        }
        Ok(record)
    }

    /// The view of a match for one player, or for a spectator with `None`.
    pub async fn snapshot_for_viewer(
        &self,
        match_id: MatchId,
        viewer: Option<PlayerId>,
    ) -> MatchResult<MatchSnapshot> {
        let guard = self.get_locked(match_id).await?;
        Ok(MatchSnapshot::for_viewer(
            match_id,
            guard.version,
            &guard.state,
            viewer,
        ))
    }

    /// The audit trail of a match, oldest first.
    pub async fn moves(&self, match_id: MatchId) -> MatchResult<Vec<MatchMove>> {
        self.slot(match_id).await?;
        self.store
            .list_moves(match_id)
            .await
            .map_err(|e| MatchError::from_store(match_id, e))
    }

    /// The audit trail as `viewer` may see it: other players' discards stay
    /// face down until the match is over.
    pub async fn moves_for_viewer(
        &self,
        match_id: MatchId,
        viewer: Option<PlayerId>,
    ) -> MatchResult<Vec<MatchMove>> {
        let finished = self.get_locked(match_id).await?.state.stage == Stage::Finished;
        let mut moves = self.moves(match_id).await?;
        if !finished {
            for mv in &mut moves {
                if mv.move_type == MoveType::Discard && mv.player_id != viewer {
                    mv.cards.clear();
                }
            }
        }
        Ok(moves)
    }
}
