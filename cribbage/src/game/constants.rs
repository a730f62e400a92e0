//! Fixed numbers of the game.

/// Points are small, but intermediate sums (score + award) must not overflow.
pub type Points = u16;

/// First seat to reach this many points wins; scores are clamped here.
pub const WINNING_SCORE: Points = 121;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;

/// Cards each seat keeps for the show.
pub const HAND_SIZE: usize = 4;

/// Running-count ceiling during pegging.
pub const PEGGING_LIMIT: Points = 31;

pub const FIFTEEN: Points = 15;

/// Awarded to the dealer when the starter is a Jack.
pub const HIS_HEELS_POINTS: Points = 2;

pub const MAX_HAND_SCORE: Points = 29;

/// Totals no four-card hand plus starter can ever produce.
pub const UNREACHABLE_HAND_SCORES: [Points; 4] = [19, 25, 26, 27];

/// Cards dealt to each seat for a given number of players.
#[must_use]
pub const fn cards_per_seat(players: usize) -> usize {
    if players == 2 { 6 } else { 5 }
}

/// Cards each seat must put in the crib for a given number of players.
#[must_use]
pub const fn discards_per_seat(players: usize) -> usize {
    if players == 2 { 2 } else { 1 }
}
