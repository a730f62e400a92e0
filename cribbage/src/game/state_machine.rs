//! Cribbage match state machine.
//!
//! A match moves through `dealing -> discard -> pegging -> counting` once per
//! hand and ends in `finished` as soon as a seat reaches 121. Every public
//! operation validates the request completely before touching any state.

use log::debug;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt};

use super::{
    constants::{
        HAND_SIZE, HIS_HEELS_POINTS, MAX_PLAYERS, MIN_PLAYERS, PEGGING_LIMIT, Points,
        WINNING_SCORE, cards_per_seat, discards_per_seat,
    },
    entities::{Card, Deck, JACK},
    errors::{AuthorizationError, FatalError, GameResult, ValidationError},
    pegging::{PeggingRound, can_play},
    scoring::{HandScore, score_hand},
};

/// Index into a match's seat list.
pub type Seat = usize;

/// Identifier of a player, assigned by the account system.
pub type PlayerId = i64;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dealing,
    Discard,
    Pegging,
    Counting,
    Finished,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::Dealing => "dealing",
            Self::Discard => "discard",
            Self::Pegging => "pegging",
            Self::Counting => "counting",
            Self::Finished => "finished",
        };
        write!(f, "{repr}")
    }
}

/// Which cards a count claim is about.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    Hand,
    Crib,
}

impl ClaimKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hand => "hand",
            Self::Crib => "crib",
        }
    }
}

/// Per-match rule options, fixed when the match is created.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct MatchSettings {
    /// Award the dealer 2 when the starter is a Jack.
    pub his_heels: bool,
    /// Player allowed to correct finalized count claims (the lobby host).
    pub arbiter: Option<PlayerId>,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            his_heels: true,
            arbiter: None,
        }
    }
}

/// A player's move during a hand.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Move {
    Discard { cards: Vec<Card> },
    PlayCard { card: Card },
    Go,
}

impl Move {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Discard { .. } => "discard",
            Self::PlayCard { .. } => "play_card",
            Self::Go => "go",
        }
    }
}

/// Things that happened while applying a move. Concealed cards never appear
/// here; played cards and the starter are public.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    Dealt { hand_number: u32, dealer: Seat },
    Discarded { seat: Seat },
    StarterCut { card: Card },
    HisHeels { dealer: Seat },
    Played { seat: Seat, card: Card, total: Points },
    Pegged { seat: Seat, points: Points },
    Go { seat: Seat },
    GoPoint { seat: Seat },
    LastCard { seat: Seat },
    CountReset,
    Counted { seat: Seat, points: Points, crib: bool },
    Won { seat: Seat },
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::Dealt {
                hand_number,
                dealer,
            } => format!("hand {hand_number} dealt by seat {dealer}"),
            Self::Discarded { seat } => format!("seat {seat} discarded to the crib"),
            Self::StarterCut { card } => format!("starter is {card}"),
            Self::HisHeels { dealer } => format!("his heels: seat {dealer} pegs 2"),
            Self::Played { seat, card, total } => format!("seat {seat} played {card} for {total}"),
            Self::Pegged { seat, points } => format!("seat {seat} pegged {points}"),
            Self::Go { seat } => format!("seat {seat} says go"),
            Self::GoPoint { seat } => format!("seat {seat} pegs 1 for the go"),
            Self::LastCard { seat } => format!("seat {seat} pegs 1 for last card"),
            Self::CountReset => "count reset to 0".to_string(),
            Self::Counted {
                seat,
                points,
                crib: false,
            } => format!("seat {seat} counted {points}"),
            Self::Counted {
                seat,
                points,
                crib: true,
            } => format!("seat {seat} counted {points} in the crib"),
            Self::Won { seat } => format!("seat {seat} wins"),
        };
        write!(f, "{repr}")
    }
}

/// A counted hand (or crib) and whether its points reached the board.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SeatScore {
    pub seat: Seat,
    pub cards: Vec<Card>,
    pub score: HandScore,
    /// False when the match was won before this count was pegged.
    pub applied: bool,
}

/// Summary of one finished hand, appended to the match history.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HandRecord {
    pub hand_number: u32,
    pub dealer: Seat,
    pub cut: Option<Card>,
    pub heels: Points,
    /// Points pegged by each seat during the play.
    pub pegging: Vec<Points>,
    pub hands: Vec<SeatScore>,
    pub crib: Option<SeatScore>,
    pub scores_before: Vec<Points>,
    pub scores_after: Vec<Points>,
}

/// The whole state of one match. This is what gets persisted, so every
/// field except the event queue is serialized.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MatchState {
    pub players: Vec<PlayerId>,
    pub stage: Stage,
    pub dealer_index: Seat,
    pub current_index: Seat,
    /// 1-based; 0 until the first deal.
    pub hand_number: u32,
    /// Cards each seat is still holding.
    pub hands: Vec<Vec<Card>>,
    /// The four cards each seat kept after discarding.
    pub kept: Vec<Vec<Card>>,
    pub crib: Vec<Card>,
    pub cut: Option<Card>,
    pub deck: Deck,
    pub pegging: PeggingRound,
    pub discard_completed: Vec<bool>,
    pub scores: Vec<Points>,
    pub heels: Points,
    /// Counts of the current hand, in counting order.
    pub hand_scores: Vec<SeatScore>,
    pub crib_score: Option<SeatScore>,
    hand_start_scores: Vec<Points>,
    pub history: Vec<HandRecord>,
    pub winner: Option<Seat>,
    pub settings: MatchSettings,
    #[serde(skip)]
    events: VecDeque<GameEvent>,
}

impl MatchState {
    /// A new match waiting for its first deal. Seat order follows `players`.
    pub fn new(players: Vec<PlayerId>, settings: MatchSettings) -> Result<Self, ValidationError> {
        let seats = players.len();
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&seats) {
            return Err(ValidationError::InvalidPlayerCount(seats));
        }
        for (i, player) in players.iter().enumerate() {
            if players[i + 1..].contains(player) {
                return Err(ValidationError::DuplicatePlayer);
            }
        }

        Ok(Self {
            players,
            stage: Stage::Dealing,
            dealer_index: 0,
            current_index: 0,
            hand_number: 0,
            hands: vec![Vec::new(); seats],
            kept: vec![Vec::new(); seats],
            crib: Vec::with_capacity(HAND_SIZE),
            cut: None,
            deck: Deck::default(),
            pegging: PeggingRound::new(seats),
            discard_completed: vec![false; seats],
            scores: vec![0; seats],
            heels: 0,
            hand_scores: Vec::with_capacity(seats),
            crib_score: None,
            hand_start_scores: vec![0; seats],
            history: Vec::new(),
            winner: None,
            settings,
            events: VecDeque::new(),
        })
    }

    #[must_use]
    pub fn seat_of(&self, player: PlayerId) -> Option<Seat> {
        self.players.iter().position(|&p| p == player)
    }

    #[must_use]
    pub fn num_seats(&self) -> usize {
        self.players.len()
    }

    pub fn drain_events(&mut self) -> VecDeque<GameEvent> {
        self.events.drain(..).collect()
    }

    /// The record of the hand in progress, once it has one.
    #[must_use]
    pub fn current_record(&self) -> Option<&HandRecord> {
        self.history
            .last()
            .filter(|record| record.hand_number == self.hand_number)
    }

    fn next_seat(&self, seat: Seat) -> Seat {
        (seat + 1) % self.num_seats()
    }

    fn expect_stage(&self, stage: Stage) -> Result<(), ValidationError> {
        if self.stage == stage {
            Ok(())
        } else {
            Err(ValidationError::WrongStage { actual: self.stage })
        }
    }

    fn expect_seated(&self, seat: Seat) -> Result<(), AuthorizationError> {
        if seat < self.num_seats() {
            Ok(())
        } else {
            Err(AuthorizationError::NotSeated)
        }
    }

    /// Shuffles and deals a hand.
    ///
    /// The deal starts left of the dealer, one card at a time. With three
    /// seats the crib starts with one card from the deck.
    pub fn deal(&mut self) -> GameResult<()> {
        self.expect_stage(Stage::Dealing)?;

        let seats = self.num_seats();
        let dealer = if self.hand_number == 0 {
            self.dealer_index
        } else {
            self.next_seat(self.dealer_index)
        };

        let mut deck = Deck::shuffled()?;
        let per_seat = cards_per_seat(seats);
        let mut hands = vec![Vec::with_capacity(per_seat); seats];
        for _ in 0..per_seat {
            for offset in 1..=seats {
                hands[(dealer + offset) % seats].push(deck.deal_card()?);
            }
        }
        let mut crib = Vec::with_capacity(HAND_SIZE);
        if seats == 3 {
            crib.push(deck.deal_card()?);
        }

        self.hand_number += 1;
        self.dealer_index = dealer;
        self.current_index = self.next_seat(dealer);
        self.hands = hands;
        self.kept = vec![Vec::new(); seats];
        self.crib = crib;
        self.cut = None;
        self.deck = deck;
        self.pegging = PeggingRound::new(seats);
        self.discard_completed = vec![false; seats];
        self.heels = 0;
        self.hand_scores.clear();
        self.crib_score = None;
        self.hand_start_scores = self.scores.clone();
        self.stage = Stage::Discard;

        debug!(
            "Dealt hand {} with seat {} dealing to {} seats",
            self.hand_number, dealer, seats
        );
        self.events.push_back(GameEvent::Dealt {
            hand_number: self.hand_number,
            dealer,
        });
        Ok(())
    }

    /// Moves from counting to the deal of the next hand.
    pub fn next_hand(&mut self) -> GameResult<()> {
        self.expect_stage(Stage::Counting)?;
        let mut next = self.clone();
        next.stage = Stage::Dealing;
        next.deal()?;
        *self = next;
        Ok(())
    }

    /// Puts `cards` from a seat's hand into the crib. Once every seat has
    /// discarded the starter is cut and pegging begins.
    pub fn discard(&mut self, seat: Seat, cards: &[Card]) -> GameResult<()> {
        self.expect_stage(Stage::Discard)?;
        self.expect_seated(seat)?;
        if self.discard_completed[seat] {
            return Err(ValidationError::AlreadyDiscarded.into());
        }
        let expected = discards_per_seat(self.num_seats());
        if cards.len() != expected {
            return Err(ValidationError::WrongDiscardCount {
                expected,
                got: cards.len(),
            }
            .into());
        }
        for (i, card) in cards.iter().enumerate() {
            if cards[i + 1..].contains(card) {
                return Err(ValidationError::DuplicateCard.into());
            }
            if !self.hands[seat].contains(card) {
                return Err(ValidationError::CardNotInHand(*card).into());
            }
        }

        self.hands[seat].retain(|card| !cards.contains(card));
        self.crib.extend_from_slice(cards);
        self.discard_completed[seat] = true;
        self.events.push_back(GameEvent::Discarded { seat });

        if self.discard_completed.iter().all(|&done| done) {
            self.cut_starter()?;
        }
        Ok(())
    }

    fn cut_starter(&mut self) -> Result<(), FatalError> {
        if self.crib.len() != HAND_SIZE {
            return Err(FatalError::Internal("crib is short after discards"));
        }
        self.kept = self.hands.clone();
        let starter = self.deck.deal_card()?;
        self.cut = Some(starter);
        self.stage = Stage::Pegging;
        self.current_index = self.next_seat(self.dealer_index);
        self.events.push_back(GameEvent::StarterCut { card: starter });

        if self.settings.his_heels && starter.rank() == JACK {
            self.heels = HIS_HEELS_POINTS;
            self.events.push_back(GameEvent::HisHeels {
                dealer: self.dealer_index,
            });
            self.award(self.dealer_index, HIS_HEELS_POINTS);
        }
        Ok(())
    }

    /// Plays a card to the running count.
    pub fn play_card(&mut self, seat: Seat, card: Card) -> GameResult<()> {
        self.expect_stage(Stage::Pegging)?;
        self.expect_seated(seat)?;
        if self.current_index != seat {
            return Err(ValidationError::OutOfTurn.into());
        }
        if !self.hands[seat].contains(&card) {
            return Err(ValidationError::CardNotInHand(card).into());
        }
        let total = self.pegging.total;
        if total + card.value15() > PEGGING_LIMIT {
            return Err(ValidationError::ExceedsThirtyOne { card, total }.into());
        }

        self.hands[seat].retain(|held| *held != card);
        let score = self.pegging.play(seat, card);
        self.events.push_back(GameEvent::Played {
            seat,
            card,
            total: self.pegging.total,
        });
        if score.total > 0 && self.peg(seat, score.total) {
            return Ok(());
        }
        if self.pegging.total == PEGGING_LIMIT {
            self.pegging.reset();
            self.events.push_back(GameEvent::CountReset);
        }
        self.advance_pegging(seat)
    }

    /// Declares that the seat has no legal play.
    pub fn go(&mut self, seat: Seat) -> GameResult<()> {
        self.expect_stage(Stage::Pegging)?;
        self.expect_seated(seat)?;
        if self.current_index != seat {
            return Err(ValidationError::OutOfTurn.into());
        }
        if can_play(&self.hands[seat], self.pegging.total) {
            return Err(ValidationError::GoWithLegalPlay.into());
        }

        self.pegging.passed[seat] = true;
        self.events.push_back(GameEvent::Go { seat });
        self.advance_pegging(seat)
    }

    /// Hands the turn on after a play or a go.
    ///
    /// Ends the play when every hand is empty, and closes the count with a go
    /// point when no one left in it can play.
    fn advance_pegging(&mut self, from: Seat) -> GameResult<()> {
        let seats = self.num_seats();

        if self.hands.iter().all(Vec::is_empty) {
            if self.pegging.total > 0 {
                if let Some(last) = self.pegging.last_player {
                    self.events.push_back(GameEvent::LastCard { seat: last });
                    if self.peg(last, 1) {
                        return Ok(());
                    }
                }
            }
            return self.count_hands();
        }

        let total = self.pegging.total;
        let live = |seat: Seat| !self.pegging.passed[seat] && !self.hands[seat].is_empty();
        let someone_can_play =
            (0..seats).any(|seat| live(seat) && can_play(&self.hands[seat], total));

        if !someone_can_play {
            let last = self
                .pegging
                .last_player
                .ok_or(FatalError::Internal("count closed before any card was played"))?;
            self.events.push_back(GameEvent::GoPoint { seat: last });
            if self.peg(last, 1) {
                return Ok(());
            }
            self.pegging.reset();
            self.events.push_back(GameEvent::CountReset);
            self.current_index = (1..=seats)
                .map(|offset| (last + offset) % seats)
                .find(|&seat| !self.hands[seat].is_empty())
                .ok_or(FatalError::Internal("no seat holds cards"))?;
            return Ok(());
        }

        self.current_index = (1..=seats)
            .map(|offset| (from + offset) % seats)
            .find(|&seat| live(seat))
            .ok_or(FatalError::Internal("no seat left in the count"))?;
        Ok(())
    }

    /// Pegs points earned during the play. Returns whether the match is over.
    fn peg(&mut self, seat: Seat, points: Points) -> bool {
        self.pegging.points[seat] += points;
        self.events.push_back(GameEvent::Pegged { seat, points });
        self.award(seat, points)
    }

    /// Adds points to a seat, clamped at 121. Reaching 121 ends the match.
    fn award(&mut self, seat: Seat, points: Points) -> bool {
        if points == 0 {
            return false;
        }
        self.scores[seat] = (self.scores[seat] + points).min(WINNING_SCORE);
        if self.scores[seat] >= WINNING_SCORE {
            self.finish(seat);
            return true;
        }
        false
    }

    fn finish(&mut self, seat: Seat) {
        self.winner = Some(seat);
        self.stage = Stage::Finished;
        self.record_hand();
        debug!(
            "Seat {} won in hand {} with {:?}",
            seat, self.hand_number, self.scores
        );
        self.events.push_back(GameEvent::Won { seat });
    }

    fn record_hand(&mut self) {
        self.history.push(HandRecord {
            hand_number: self.hand_number,
            dealer: self.dealer_index,
            cut: self.cut,
            heels: self.heels,
            pegging: self.pegging.points.clone(),
            hands: self.hand_scores.clone(),
            crib: self.crib_score.clone(),
            scores_before: self.hand_start_scores.clone(),
            scores_after: self.scores.clone(),
        });
    }

    /// The show: scores every kept hand from the seat left of the dealer
    /// around to the dealer, then the crib, pegging each in that order.
    fn count_hands(&mut self) -> GameResult<()> {
        self.stage = Stage::Counting;
        let starter = self
            .cut
            .ok_or(FatalError::Internal("counting without a starter"))?;
        let seats = self.num_seats();

        let mut hand_scores = Vec::with_capacity(seats);
        for offset in 1..=seats {
            let seat = (self.dealer_index + offset) % seats;
            let cards = four_cards(&self.kept[seat])?;
            hand_scores.push(SeatScore {
                seat,
                cards: cards.to_vec(),
                score: score_hand(&cards, starter, false),
                applied: false,
            });
        }
        let crib = four_cards(&self.crib)?;
        self.hand_scores = hand_scores;
        self.crib_score = Some(SeatScore {
            seat: self.dealer_index,
            cards: crib.to_vec(),
            score: score_hand(&crib, starter, true),
            applied: false,
        });

        for i in 0..self.hand_scores.len() {
            let entry = &mut self.hand_scores[i];
            entry.applied = true;
            let (seat, points) = (entry.seat, entry.score.total);
            self.events.push_back(GameEvent::Counted {
                seat,
                points,
                crib: false,
            });
            if self.award(seat, points) {
                return Ok(());
            }
        }
        if let Some(entry) = self.crib_score.as_mut() {
            entry.applied = true;
            let (seat, points) = (entry.seat, entry.score.total);
            self.events.push_back(GameEvent::Counted {
                seat,
                points,
                crib: true,
            });
            if self.award(seat, points) {
                return Ok(());
            }
        }

        self.record_hand();
        Ok(())
    }

    /// The engine's count for a seat's hand, or for the crib when the seat
    /// is the dealer.
    pub fn verified_score(&self, seat: Seat, kind: ClaimKind) -> GameResult<Points> {
        if !matches!(self.stage, Stage::Counting | Stage::Finished) {
            return Err(ValidationError::WrongStage { actual: self.stage }.into());
        }
        self.expect_seated(seat)?;
        let record = self
            .current_record()
            .ok_or(ValidationError::NoScoredHand)?;
        let scored = match kind {
            ClaimKind::Hand => record.hands.iter().find(|entry| entry.seat == seat),
            ClaimKind::Crib => {
                if seat != record.dealer {
                    return Err(AuthorizationError::NotDealer.into());
                }
                record.crib.as_ref()
            }
        };
        scored
            .map(|entry| entry.score.total)
            .ok_or_else(|| ValidationError::NoScoredHand.into())
    }

    /// Dispatches a player's move.
    pub fn apply(&mut self, seat: Seat, mv: &Move) -> GameResult<()> {
        match mv {
            Move::Discard { cards } => self.discard(seat, cards),
            Move::PlayCard { card } => self.play_card(seat, *card),
            Move::Go => self.go(seat),
        }
    }
}

fn four_cards(cards: &[Card]) -> Result<[Card; HAND_SIZE], FatalError> {
    <[Card; HAND_SIZE]>::try_from(cards)
        .map_err(|_| FatalError::Internal("counted hand is not four cards"))
}
