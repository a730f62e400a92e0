//! The show: scoring a four-card hand (or the crib) with the starter.
//!
//! Every function here is pure and deterministic, so it can be called from
//! any thread without coordination.

use serde::{Deserialize, Serialize};

use super::{
    constants::{FIFTEEN, HAND_SIZE, MAX_HAND_SCORE, Points, UNREACHABLE_HAND_SCORES},
    entities::{Card, JACK, KING},
};

/// Hand plus starter.
pub type FiveCards = [Card; HAND_SIZE + 1];

/// Number of non-empty subsets of five cards.
const SUBSETS: u8 = (1 << (HAND_SIZE + 1)) - 1;

/// Breakdown of a counted hand.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct HandScore {
    pub fifteens: Points,
    pub pairs: Points,
    pub runs: Points,
    pub flush: Points,
    pub nobs: Points,
    pub total: Points,
    /// Each card subset that sums to fifteen.
    pub fifteen_sets: Vec<Vec<Card>>,
    /// Each scoring run, ordered by rank.
    pub run_sets: Vec<Vec<Card>>,
}

/// Scores a hand against the starter.
///
/// # Arguments
///
/// * `hand` - The four cards kept by a seat (or the crib)
/// * `starter` - The cut card
/// * `is_crib` - Whether `hand` is the crib; the crib only scores a five-card flush
///
/// # Returns
///
/// * `HandScore` - Points per category and the combinations that scored
#[must_use]
pub fn score_hand(hand: &[Card; HAND_SIZE], starter: Card, is_crib: bool) -> HandScore {
    let cards = with_starter(hand, starter);
    let fifteen_sets = fifteen_combinations(&cards);
    let run_sets = run_combinations(&cards);

    let fifteens = 2 * fifteen_sets.len() as Points;
    let pairs = count_pairs(&cards);
    let runs = run_sets.iter().map(|run| run.len() as Points).sum();
    let flush = flush_points(hand, starter, is_crib);
    let nobs = nobs_points(hand, starter);

    HandScore {
        fifteens,
        pairs,
        runs,
        flush,
        nobs,
        total: fifteens + pairs + runs + flush + nobs,
        fifteen_sets,
        run_sets,
    }
}

#[must_use]
pub fn with_starter(hand: &[Card; HAND_SIZE], starter: Card) -> FiveCards {
    [hand[0], hand[1], hand[2], hand[3], starter]
}

fn subset(cards: &FiveCards, mask: u8) -> impl Iterator<Item = Card> + '_ {
    cards
        .iter()
        .enumerate()
        .filter(move |(i, _)| mask & (1 << i) != 0)
        .map(|(_, card)| *card)
}

/// Points for fifteens: 2 per subset summing to 15.
#[must_use]
pub fn count_fifteens(cards: &FiveCards) -> Points {
    let hits = (1..=SUBSETS)
        .filter(|&mask| subset(cards, mask).map(Card::value15).sum::<Points>() == FIFTEEN)
        .count();
    2 * hits as Points
}

#[must_use]
pub fn fifteen_combinations(cards: &FiveCards) -> Vec<Vec<Card>> {
    (1..=SUBSETS)
        .filter_map(|mask| {
            let set: Vec<Card> = subset(cards, mask).collect();
            (set.iter().map(|c| c.value15()).sum::<Points>() == FIFTEEN).then_some(set)
        })
        .collect()
}

/// Points for pairs: a group of `k` equal ranks is worth `k * (k - 1)`.
#[must_use]
pub fn count_pairs(cards: &FiveCards) -> Points {
    let mut points = 0;
    for (i, a) in cards.iter().enumerate() {
        for b in &cards[i + 1..] {
            if a.rank() == b.rank() {
                points += 2;
            }
        }
    }
    points
}

/// Points for runs, counted from rank multiplicities.
///
/// With five cards there is at most one maximal segment of three or more
/// consecutive ranks; it scores its length once per way of picking one card
/// of each rank.
#[must_use]
pub fn count_runs(cards: &FiveCards) -> Points {
    let mut counts = [0 as Points; KING as usize + 2];
    for card in cards {
        counts[card.rank() as usize] += 1;
    }

    let mut rank = 1;
    while rank <= KING as usize {
        if counts[rank] == 0 {
            rank += 1;
            continue;
        }
        let start = rank;
        let mut ways = 1;
        while counts[rank] > 0 {
            ways *= counts[rank];
            rank += 1;
        }
        let length = (rank - start) as Points;
        if length >= 3 {
            return length * ways;
        }
    }
    0
}

/// The distinct runs of the longest scoring length, each ordered by rank.
#[must_use]
pub fn run_combinations(cards: &FiveCards) -> Vec<Vec<Card>> {
    for length in (3..=cards.len() as u32).rev() {
        let runs: Vec<Vec<Card>> = (1..=SUBSETS)
            .filter(|mask| mask.count_ones() == length)
            .filter_map(|mask| {
                let mut set: Vec<Card> = subset(cards, mask).collect();
                set.sort_by_key(|c| c.rank());
                is_run(&set).then_some(set)
            })
            .collect();
        if !runs.is_empty() {
            return runs;
        }
    }
    Vec::new()
}

/// Ranks ascending by exactly one, given cards sorted by rank.
fn is_run(sorted: &[Card]) -> bool {
    sorted
        .windows(2)
        .all(|pair| pair[1].rank() == pair[0].rank() + 1)
}

#[must_use]
pub fn flush_points(hand: &[Card; HAND_SIZE], starter: Card, is_crib: bool) -> Points {
    let suit = hand[0].suit();
    if !hand.iter().all(|c| c.suit() == suit) {
        return 0;
    }
    match (starter.suit() == suit, is_crib) {
        (true, _) => 5,
        (false, false) => 4,
        (false, true) => 0,
    }
}

/// One for the Jack of the starter's suit.
#[must_use]
pub fn nobs_points(hand: &[Card; HAND_SIZE], starter: Card) -> Points {
    let nobs = Card(JACK, starter.suit());
    Points::from(hand.contains(&nobs))
}

/// Whether some four cards plus starter can total `score`.
#[must_use]
pub fn is_valid_hand_score(score: Points) -> bool {
    score <= MAX_HAND_SCORE && !UNREACHABLE_HAND_SCORES.contains(&score)
}
