//! Per-viewer views of a match.
//!
//! A snapshot is what leaves the server. Other seats' cards are reduced to
//! counts, kept hands and the crib stay hidden until the show, and the deck
//! is never included.

use serde::{Deserialize, Serialize};

use super::MatchId;
use crate::game::{
    HandRecord, MatchSettings, MatchState, PlayerId, Seat, SeatScore, Stage,
    constants::Points,
    entities::Card,
};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PeggingView {
    pub total: Points,
    pub sequence: Vec<Card>,
    pub passed: Vec<bool>,
    pub last_player: Option<Seat>,
    pub points: Vec<Points>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StateView {
    pub stage: Stage,
    pub hand_number: u32,
    pub dealer_index: Seat,
    pub current_index: Seat,
    pub cut: Option<Card>,
    pub crib_count: usize,
    /// Only revealed at the show.
    pub crib: Option<Vec<Card>>,
    pub pegging: PeggingView,
    pub scores: Vec<Points>,
    pub heels: Points,
    pub hand_scores: Vec<SeatScore>,
    pub crib_score: Option<SeatScore>,
    pub winner: Option<Seat>,
    pub settings: MatchSettings,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PlayerView {
    pub seat: Seat,
    pub player_id: PlayerId,
    pub score: Points,
    pub hand_count: usize,
    /// The viewer's own cards; `None` for everyone else.
    pub hand: Option<Vec<Card>>,
    /// Kept cards, visible to their owner and to everyone once counted.
    pub kept: Option<Vec<Card>>,
    pub discarded: bool,
    pub is_dealer: bool,
    pub is_current: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MatchSnapshot {
    pub match_id: MatchId,
    pub version: i64,
    pub state: StateView,
    pub players: Vec<PlayerView>,
    pub history: Vec<HandRecord>,
}

fn shown(stage: Stage) -> bool {
    matches!(stage, Stage::Counting | Stage::Finished)
}

impl MatchSnapshot {
    /// Builds the view of `state` for `viewer`. `None` is a spectator.
    #[must_use]
    pub fn for_viewer(
        match_id: MatchId,
        version: i64,
        state: &MatchState,
        viewer: Option<PlayerId>,
    ) -> Self {
        let viewer_seat = viewer.and_then(|id| state.seat_of(id));
        let show = shown(state.stage);

        let players = state
            .players
            .iter()
            .enumerate()
            .map(|(seat, &player_id)| {
                let own = viewer_seat == Some(seat);
                let kept = &state.kept[seat];
                PlayerView {
                    seat,
                    player_id,
                    score: state.scores[seat],
                    hand_count: state.hands[seat].len(),
                    hand: own.then(|| state.hands[seat].clone()),
                    kept: ((own || show) && !kept.is_empty()).then(|| kept.clone()),
                    discarded: state.discard_completed[seat],
                    is_dealer: state.dealer_index == seat,
                    is_current: state.stage == Stage::Pegging && state.current_index == seat,
                }
            })
            .collect();

        let pegging = &state.pegging;
        Self {
            match_id,
            version,
            state: StateView {
                stage: state.stage,
                hand_number: state.hand_number,
                dealer_index: state.dealer_index,
                current_index: state.current_index,
                cut: state.cut,
                crib_count: state.crib.len(),
                crib: show.then(|| state.crib.clone()),
                pegging: PeggingView {
                    total: pegging.total,
                    sequence: pegging.sequence.clone(),
                    passed: pegging.passed.clone(),
                    last_player: pegging.last_player,
                    points: pegging.points.clone(),
                },
                scores: state.scores.clone(),
                heels: state.heels,
                hand_scores: state.hand_scores.clone(),
                crib_score: state.crib_score.clone(),
                winner: state.winner,
                settings: state.settings.clone(),
            },
            players,
            history: state.history.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn dealt() -> MatchState {
        let mut state = MatchState::new(vec![10, 20], MatchSettings::default()).unwrap();
        state.deal().unwrap();
        state
    }

    #[test]
    fn test_viewer_sees_only_own_hand() {
        let state = dealt();
        let snapshot = MatchSnapshot::for_viewer(Uuid::new_v4(), 1, &state, Some(20));

        assert_eq!(snapshot.players[1].hand.as_ref(), Some(&state.hands[1]));
        assert!(snapshot.players[0].hand.is_none());
        assert_eq!(snapshot.players[0].hand_count, 6);
        assert!(snapshot.state.crib.is_none());
    }

    #[test]
    fn test_spectator_sees_no_hands() {
        let state = dealt();
        let snapshot = MatchSnapshot::for_viewer(Uuid::new_v4(), 1, &state, None);
        assert!(snapshot.players.iter().all(|p| p.hand.is_none() && p.kept.is_none()));

        // Unknown players are treated as spectators.
        let snapshot = MatchSnapshot::for_viewer(Uuid::new_v4(), 1, &state, Some(99));
        assert!(snapshot.players.iter().all(|p| p.hand.is_none()));
    }

    #[test]
    fn test_serialized_snapshot_leaks_no_concealed_cards() {
        let mut state = dealt();
        for seat in 0..2 {
            let cards = state.hands[seat][..2].to_vec();
            state.discard(seat, &cards).unwrap();
        }
        let json = serde_json::to_string(&MatchSnapshot::for_viewer(
            Uuid::new_v4(),
            2,
            &state,
            Some(10),
        ))
        .unwrap();

        assert!(!json.contains("deck"));
        for card in state.kept[1].iter().chain(state.crib.iter()) {
            assert!(
                !json.contains(&format!("\"{}\"", card.code())),
                "{card} leaked"
            );
        }
    }

    #[test]
    fn test_show_reveals_kept_hands_and_crib() {
        let mut state = dealt();
        state.kept = vec![state.hands[0][..4].to_vec(), state.hands[1][..4].to_vec()];
        state.crib = state.hands[0][4..].iter().chain(&state.hands[1][4..]).copied().collect();
        state.stage = Stage::Counting;

        let snapshot = MatchSnapshot::for_viewer(Uuid::new_v4(), 5, &state, None);
        assert!(snapshot.players.iter().all(|p| p.kept.as_ref().is_some_and(|k| k.len() == 4)));
        assert_eq!(snapshot.state.crib.as_ref().map(Vec::len), Some(4));
    }
}
