//! In-memory `MatchStore` with the same compare-and-swap semantics as the
//! Postgres store. Used by tests and by the server's `--memory` mode.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::repository::{
    MatchId, MatchMove, MatchStore, NewMove, PersistedMatch, StoreError, StoreResult,
};
use crate::game::Stage;

struct StoredMatch {
    state_json: Value,
    state_version: i64,
    stage: Stage,
}

#[derive(Default)]
struct Inner {
    matches: HashMap<MatchId, StoredMatch>,
    moves: Vec<MatchMove>,
    next_move_id: i64,
}

impl Inner {
    fn append(&mut self, match_id: MatchId, mv: NewMove) -> MatchMove {
        self.next_move_id += 1;
        let record = mv.into_record(self.next_move_id, match_id, Utc::now());
        self.moves.push(record.clone());
        record
    }
}

#[derive(Default)]
pub struct MemoryMatchStore {
    inner: Mutex<Inner>,
}

impl MemoryMatchStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The critical sections never panic halfway, so a poisoned lock
        // still guards consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage of a stored match.
    pub fn stage_of(&self, match_id: MatchId) -> Option<Stage> {
        self.lock().matches.get(&match_id).map(|m| m.stage)
    }
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn insert_match(
        &self,
        match_id: MatchId,
        state_json: &Value,
        stage: Stage,
        moves: &[NewMove],
    ) -> StoreResult<i64> {
        let mut inner = self.lock();
        if inner.matches.contains_key(&match_id) {
            return Err(StoreError::AlreadyExists(match_id));
        }
        inner.matches.insert(
            match_id,
            StoredMatch {
                state_json: state_json.clone(),
                state_version: 1,
                stage,
            },
        );
        for mv in moves {
            inner.append(match_id, mv.clone());
        }
        Ok(1)
    }

    async fn load_match(&self, match_id: MatchId) -> StoreResult<Option<PersistedMatch>> {
        Ok(self.lock().matches.get(&match_id).map(|m| PersistedMatch {
            state_json: m.state_json.clone(),
            state_version: m.state_version,
        }))
    }

    async fn commit(
        &self,
        match_id: MatchId,
        expected_version: i64,
        state_json: &Value,
        stage: Stage,
        moves: &[NewMove],
    ) -> StoreResult<i64> {
        let mut inner = self.lock();
        let stored = inner
            .matches
            .get_mut(&match_id)
            .ok_or(StoreError::NotFound(match_id))?;
        if stored.state_version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: stored.state_version,
            });
        }
        stored.state_json = state_json.clone();
        stored.state_version += 1;
        stored.stage = stage;
        let version = stored.state_version;
        for mv in moves {
            inner.append(match_id, mv.clone());
        }
        Ok(version)
    }

    async fn record_move(&self, match_id: MatchId, mv: NewMove) -> StoreResult<MatchMove> {
        let mut inner = self.lock();
        if !inner.matches.contains_key(&match_id) {
            return Err(StoreError::NotFound(match_id));
        }
        Ok(inner.append(match_id, mv))
    }

    async fn find_move(&self, match_id: MatchId, move_id: i64) -> StoreResult<Option<MatchMove>> {
        Ok(self
            .lock()
            .moves
            .iter()
            .find(|m| m.id == move_id && m.match_id == match_id)
            .cloned())
    }

    async fn list_moves(&self, match_id: MatchId) -> StoreResult<Vec<MatchMove>> {
        Ok(self
            .lock()
            .moves
            .iter()
            .filter(|m| m.match_id == match_id)
            .cloned()
            .collect())
    }

    async fn count_matches(&self) -> StoreResult<i64> {
        Ok(self.lock().matches.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::MoveType;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = MemoryMatchStore::new();
        let id = Uuid::new_v4();
        let version = store
            .insert_match(id, &json!({"a": 1}), Stage::Discard, &[NewMove::new(MoveType::Deal, None, None)])
            .await
            .unwrap();
        assert_eq!(version, 1);

        let loaded = store.load_match(id).await.unwrap().unwrap();
        assert_eq!(loaded.state_json, json!({"a": 1}));
        assert_eq!(loaded.state_version, 1);
        assert_eq!(store.list_moves(id).await.unwrap().len(), 1);

        assert!(matches!(
            store.insert_match(id, &json!({}), Stage::Discard, &[]).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(store.load_match(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_compare_and_swap() {
        let store = MemoryMatchStore::new();
        let id = Uuid::new_v4();
        store.insert_match(id, &json!(1), Stage::Discard, &[]).await.unwrap();

        let mv = NewMove::new(MoveType::Go, Some(5), Some(0));
        assert_eq!(store.commit(id, 1, &json!(2), Stage::Pegging, &[mv.clone()]).await.unwrap(), 2);
        assert_eq!(store.stage_of(id), Some(Stage::Pegging));

        // A stale writer loses and nothing is appended.
        let err = store.commit(id, 1, &json!(3), Stage::Pegging, &[mv]).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2 }));
        assert_eq!(store.load_match(id).await.unwrap().unwrap().state_json, json!(2));
        assert_eq!(store.list_moves(id).await.unwrap().len(), 1);

        assert!(matches!(
            store.commit(Uuid::new_v4(), 1, &json!(0), Stage::Pegging, &[]).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_moves_are_scoped_to_their_match() {
        let store = MemoryMatchStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.insert_match(a, &json!(0), Stage::Discard, &[]).await.unwrap();
        store.insert_match(b, &json!(0), Stage::Discard, &[]).await.unwrap();

        let first = store.record_move(a, NewMove::new(MoveType::Count, Some(1), Some(0))).await.unwrap();
        let second = store.record_move(b, NewMove::new(MoveType::Count, Some(2), Some(1))).await.unwrap();
        assert!(second.id > first.id);

        assert!(store.find_move(a, first.id).await.unwrap().is_some());
        assert!(store.find_move(b, first.id).await.unwrap().is_none());
        assert_eq!(store.list_moves(a).await.unwrap(), vec![first]);
        assert_eq!(store.count_matches().await.unwrap(), 2);
    }
}
