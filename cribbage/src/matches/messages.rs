//! Request and response shapes exchanged with clients.

use serde::{Deserialize, Serialize};

use crate::{
    db::{MatchMove, MoveType},
    game::{
        ClaimKind, Move, ValidationError,
        constants::Points,
        entities::{Card, parse_cards},
        scoring::is_valid_hand_score,
    },
};

/// A move as submitted over the wire: `{type, cards?, card?}` with card codes.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MoveRequest {
    #[serde(rename = "type")]
    pub move_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cards: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<String>,
}

impl MoveRequest {
    /// Validates the wire form into a typed move.
    pub fn parse(&self) -> Result<Move, ValidationError> {
        match self.move_type.as_str() {
            "discard" => {
                let codes = self.cards.as_deref().ok_or_else(|| {
                    ValidationError::MalformedMove("discard needs `cards`".to_string())
                })?;
                Ok(Move::Discard {
                    cards: parse_cards(codes)?,
                })
            }
            "play_card" => {
                let code = self.card.as_deref().ok_or_else(|| {
                    ValidationError::MalformedMove("play_card needs `card`".to_string())
                })?;
                Ok(Move::PlayCard {
                    card: code.parse()?,
                })
            }
            "go" => Ok(Move::Go),
            other => Err(ValidationError::MalformedMove(format!(
                "unknown move type {other:?}"
            ))),
        }
    }
}

impl From<&Move> for MoveRequest {
    fn from(mv: &Move) -> Self {
        let mut request = Self {
            move_type: mv.name().to_string(),
            ..Default::default()
        };
        match mv {
            Move::Discard { cards } => {
                request.cards = Some(cards.iter().map(|card| card.code()).collect());
            }
            Move::PlayCard { card } => request.card = Some(card.code()),
            Move::Go => {}
        }
        request
    }
}

/// Cards a move puts on the record. Discards stay concealed in the crib, so
/// they are recorded but never broadcast.
#[must_use]
pub fn move_cards(mv: &Move) -> Vec<Card> {
    match mv {
        Move::Discard { cards } => cards.clone(),
        Move::PlayCard { card } => vec![*card],
        Move::Go => Vec::new(),
    }
}

#[must_use]
pub fn move_type_of(mv: &Move) -> MoveType {
    match mv {
        Move::Discard { .. } => MoveType::Discard,
        Move::PlayCard { .. } => MoveType::PlayCard,
        Move::Go => MoveType::Go,
    }
}

/// A player's claimed count for their hand or crib.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CountRequest {
    pub kind: ClaimKind,
    pub claim: i64,
    /// Finalized claims can only be corrected by the arbiter.
    #[serde(rename = "final", default)]
    pub finalized: bool,
}

/// Amends an earlier count claim.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CorrectionRequest {
    pub move_id: i64,
    pub new_claim: i64,
}

/// Checks a claimed count is a score some hand could actually make.
pub fn validate_claim(claim: i64) -> Result<Points, ValidationError> {
    Points::try_from(claim)
        .ok()
        .filter(|&score| is_valid_hand_score(score))
        .ok_or(ValidationError::ImpossibleScore(claim))
}

/// Outcome of a count claim or correction.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CountRecord {
    pub move_id: i64,
    pub kind: ClaimKind,
    pub claimed: Points,
    pub verified: Points,
    /// Whether the claim agrees with the engine's count.
    pub matches: bool,
    pub finalized: bool,
    pub supersedes: Option<i64>,
}

impl CountRecord {
    /// Reads a count or correction row back as a record.
    pub fn from_move(mv: &MatchMove) -> Option<Self> {
        if !matches!(mv.move_type, MoveType::Count | MoveType::Correction) {
            return None;
        }
        let claimed = mv.claimed_score?;
        let verified = mv.verified_score?;
        Some(Self {
            move_id: mv.id,
            kind: mv.claim_kind?,
            claimed,
            verified,
            matches: claimed == verified,
            finalized: mv.finalized,
            supersedes: mv.supersedes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entities::Suit;

    #[test]
    fn test_parse_moves() {
        let request: MoveRequest =
            serde_json::from_str(r#"{"type":"discard","cards":["5H","10S"]}"#).unwrap();
        assert_eq!(
            request.parse().unwrap(),
            Move::Discard {
                cards: vec![Card(5, Suit::Heart), Card(10, Suit::Spade)]
            }
        );

        let request: MoveRequest = serde_json::from_str(r#"{"type":"play_card","card":"jd"}"#).unwrap();
        assert_eq!(
            request.parse().unwrap(),
            Move::PlayCard {
                card: Card(11, Suit::Diamond)
            }
        );

        let request: MoveRequest = serde_json::from_str(r#"{"type":"go"}"#).unwrap();
        assert_eq!(request.parse().unwrap(), Move::Go);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let missing = MoveRequest {
            move_type: "play_card".to_string(),
            ..Default::default()
        };
        assert!(matches!(missing.parse(), Err(ValidationError::MalformedMove(_))));

        let unknown = MoveRequest {
            move_type: "shuffle".to_string(),
            ..Default::default()
        };
        assert!(matches!(unknown.parse(), Err(ValidationError::MalformedMove(_))));

        let bad_card = MoveRequest {
            move_type: "discard".to_string(),
            cards: Some(vec!["5H".to_string(), "ZZ".to_string()]),
            card: None,
        };
        assert_eq!(
            bad_card.parse(),
            Err(ValidationError::InvalidCard("ZZ".to_string()))
        );
    }

    #[test]
    fn test_move_request_from_move() {
        let mv = Move::PlayCard {
            card: Card(10, Suit::Club),
        };
        let request = MoveRequest::from(&mv);
        assert_eq!(request.move_type, "play_card");
        assert_eq!(request.card.as_deref(), Some("10C"));
        assert_eq!(request.parse().unwrap(), mv);
    }

    #[test]
    fn test_count_request_wire_names() {
        let request: CountRequest =
            serde_json::from_str(r#"{"kind":"crib","claim":12,"final":true}"#).unwrap();
        assert_eq!(request.kind, ClaimKind::Crib);
        assert!(request.finalized);

        let request: CountRequest = serde_json::from_str(r#"{"kind":"hand","claim":4}"#).unwrap();
        assert!(!request.finalized);
    }

    #[test]
    fn test_validate_claim() {
        assert_eq!(validate_claim(29), Ok(29));
        assert_eq!(validate_claim(0), Ok(0));
        assert_eq!(validate_claim(19), Err(ValidationError::ImpossibleScore(19)));
        assert_eq!(validate_claim(-2), Err(ValidationError::ImpossibleScore(-2)));
        assert_eq!(validate_claim(30), Err(ValidationError::ImpossibleScore(30)));
    }
}
