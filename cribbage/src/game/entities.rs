use rand::{SeedableRng, TryRngCore, rngs::OsRng, seq::SliceRandom};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::{
    constants::Points,
    errors::{FatalError, ValidationError},
};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Suit {
    Club,
    Diamond,
    Heart,
    Spade,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Club, Suit::Diamond, Suit::Heart, Suit::Spade];

    /// Single-letter code used on the wire.
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Club => 'C',
            Self::Diamond => 'D',
            Self::Heart => 'H',
            Self::Spade => 'S',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'C' => Some(Self::Club),
            'D' => Some(Self::Diamond),
            'H' => Some(Self::Heart),
            'S' => Some(Self::Spade),
            _ => None,
        }
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let repr = match self {
            Self::Club => "♣",
            Self::Spade => "♠",
            Self::Diamond => "♦",
            Self::Heart => "♥",
        };
        write!(f, "{repr}")
    }
}

/// Card rank, ace low (1) through king (13).
pub type Rank = u8;

pub const ACE: Rank = 1;
pub const JACK: Rank = 11;
pub const KING: Rank = 13;

/// A playing card: rank and suit.
///
/// Cards cross the wire and the persisted blob as their short code
/// (`"5H"`, `"10S"`, `"JD"`), so every deserialized card is valid.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Card(pub Rank, pub Suit);

impl Card {
    pub fn new(rank: Rank, suit: Suit) -> Result<Self, ValidationError> {
        if (ACE..=KING).contains(&rank) {
            Ok(Self(rank, suit))
        } else {
            Err(ValidationError::InvalidCard(format!("{rank}{}", suit.letter())))
        }
    }

    #[must_use]
    pub const fn rank(self) -> Rank {
        self.0
    }

    #[must_use]
    pub const fn suit(self) -> Suit {
        self.1
    }

    /// Pip value for fifteens and the pegging count: face cards are 10.
    #[must_use]
    pub fn value15(self) -> Points {
        Points::from(self.0.min(10))
    }

    fn rank_label(self) -> String {
        match self.0 {
            ACE => "A".to_string(),
            JACK => "J".to_string(),
            12 => "Q".to_string(),
            KING => "K".to_string(),
            v => v.to_string(),
        }
    }

    /// Canonical wire code, e.g. `"10S"`.
    #[must_use]
    pub fn code(self) -> String {
        format!("{}{}", self.rank_label(), self.1.letter())
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.rank_label(), self.1)
    }
}

impl FromStr for Card {
    type Err = ValidationError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidCard(code.to_string());
        let code_trimmed = code.trim();
        if !(2..=3).contains(&code_trimmed.len()) || !code_trimmed.is_ascii() {
            return Err(invalid());
        }

        let (rank_part, suit_part) = code_trimmed.split_at(code_trimmed.len() - 1);
        let suit = suit_part
            .chars()
            .next()
            .and_then(Suit::from_letter)
            .ok_or_else(invalid)?;
        let rank = match rank_part.to_ascii_uppercase().as_str() {
            "A" | "1" => ACE,
            "T" | "10" => 10,
            "J" => JACK,
            "Q" => 12,
            "K" => KING,
            digit if digit.len() == 1 => match digit.parse::<Rank>() {
                Ok(v @ 2..=9) => v,
                _ => return Err(invalid()),
            },
            _ => return Err(invalid()),
        };
        Ok(Self(rank, suit))
    }
}

impl TryFrom<String> for Card {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Card> for String {
    fn from(card: Card) -> Self {
        card.code()
    }
}

/// Parse a list of card codes, failing on the first malformed one.
pub fn parse_cards<S: AsRef<str>>(codes: &[S]) -> Result<Vec<Card>, ValidationError> {
    codes.iter().map(|code| code.as_ref().parse()).collect()
}

/// A 52-card deck dealt from the top.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Deck {
    cards: Vec<Card>,
    pub deck_idx: usize,
}

impl Deck {
    /// A freshly shuffled deck.
    ///
    /// The permutation comes from a ChaCha20 generator seeded with OS
    /// entropy. If the OS can't provide entropy the deal is aborted; there is
    /// no fallback generator.
    pub fn shuffled() -> Result<Self, FatalError> {
        let mut seed = <ChaCha20Rng as SeedableRng>::Seed::default();
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| FatalError::Entropy(e.to_string()))?;
        let mut rng = ChaCha20Rng::from_seed(seed);

        let mut deck = Self::default();
        deck.cards.shuffle(&mut rng);
        Ok(deck)
    }

    pub fn deal_card(&mut self) -> Result<Card, FatalError> {
        let card = *self
            .cards
            .get(self.deck_idx)
            .ok_or(FatalError::DeckExhausted)?;
        self.deck_idx += 1;
        Ok(card)
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.cards.len().saturating_sub(self.deck_idx)
    }
}

impl Default for Deck {
    /// Unshuffled, ordered by rank then suit.
    fn default() -> Self {
        let mut cards = Vec::with_capacity(52);
        for rank in ACE..=KING {
            for suit in Suit::ALL {
                cards.push(Card(rank, suit));
            }
        }
        Self { cards, deck_idx: 0 }
    }
}
