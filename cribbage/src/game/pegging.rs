//! The play: legality of pegging cards and points for each play.

use serde::{Deserialize, Serialize};

use super::{
    constants::{FIFTEEN, PEGGING_LIMIT, Points},
    entities::Card,
    state_machine::Seat,
};

/// Cards in `hand` that keep the running count at or under 31.
#[must_use]
pub fn legal_plays(hand: &[Card], total: Points) -> Vec<Card> {
    hand.iter()
        .copied()
        .filter(|card| total + card.value15() <= PEGGING_LIMIT)
        .collect()
}

#[must_use]
pub fn can_play(hand: &[Card], total: Points) -> bool {
    hand.iter()
        .any(|card| total + card.value15() <= PEGGING_LIMIT)
}

/// Points earned by the card just played.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PeggingScore {
    pub fifteen: Points,
    pub thirty_one: Points,
    pub pairs: Points,
    pub run: Points,
    pub total: Points,
}

/// Scores the last card of `sequence`, where `total` is the count after it.
#[must_use]
pub fn score_play(sequence: &[Card], total: Points) -> PeggingScore {
    let fifteen = if total == FIFTEEN { 2 } else { 0 };
    let thirty_one = if total == PEGGING_LIMIT { 2 } else { 0 };
    let pairs = trailing_pairs(sequence);
    let run = trailing_run(sequence);
    PeggingScore {
        fifteen,
        thirty_one,
        pairs,
        run,
        total: fifteen + thirty_one + pairs + run,
    }
}

/// `k * (k - 1)` for the `k` trailing cards of equal rank.
fn trailing_pairs(sequence: &[Card]) -> Points {
    let Some(last) = sequence.last() else {
        return 0;
    };
    let k = sequence
        .iter()
        .rev()
        .take_while(|card| card.rank() == last.rank())
        .count() as Points;
    k * k.saturating_sub(1)
}

/// Length of the longest tail (three or more cards) whose ranks are
/// consecutive when sorted.
fn trailing_run(sequence: &[Card]) -> Points {
    for length in (3..=sequence.len()).rev() {
        let mut ranks: Vec<_> = sequence[sequence.len() - length..]
            .iter()
            .map(|card| card.rank())
            .collect();
        ranks.sort_unstable();
        if ranks.windows(2).all(|pair| pair[1] == pair[0] + 1) {
            return length as Points;
        }
    }
    0
}

/// The running count of one pegging round and who has passed.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PeggingRound {
    pub total: Points,
    /// Cards played since the last reset.
    pub sequence: Vec<Card>,
    pub passed: Vec<bool>,
    pub last_player: Option<Seat>,
    /// Points pegged by each seat this hand.
    pub points: Vec<Points>,
}

impl PeggingRound {
    #[must_use]
    pub fn new(seats: usize) -> Self {
        Self {
            passed: vec![false; seats],
            points: vec![0; seats],
            ..Default::default()
        }
    }

    /// Adds `card` to the count and scores it. The caller checks legality.
    pub fn play(&mut self, seat: Seat, card: Card) -> PeggingScore {
        self.total += card.value15();
        self.sequence.push(card);
        self.last_player = Some(seat);
        score_play(&self.sequence, self.total)
    }

    /// Back to zero for the next count.
    pub fn reset(&mut self) {
        self.total = 0;
        self.sequence.clear();
        self.passed.fill(false);
    }
}
