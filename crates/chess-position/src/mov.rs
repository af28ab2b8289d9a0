//! Move representation.

use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Role, Square};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when a move string is not valid coordinate notation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoveParseError {
    #[error("invalid move: empty string")]
    Empty,

    #[error("invalid move '{0}': expected 4 or 5 characters")]
    InvalidLength(String),

    #[error("invalid move '{0}': bad square")]
    InvalidSquare(String),

    #[error("invalid promotion piece '{0}'")]
    InvalidPromotion(char),
}

/// A chess move in coordinate form.
///
/// A move is just an origin, a destination and an optional promotion piece.
/// Castling is the king's two-square move (`e1g1`) and en passant is the
/// pawn's diagonal step; the position resolves both when the move is checked.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    from: Square,
    to: Square,
    promotion: Option<Role>,
}

impl Move {
    /// Creates a move without promotion.
    #[inline]
    pub const fn new(from: Square, to: Square) -> Self {
        Move {
            from,
            to,
            promotion: None,
        }
    }

    /// Creates a promotion move.
    #[inline]
    pub const fn with_promotion(from: Square, to: Square, promotion: Role) -> Self {
        Move {
            from,
            to,
            promotion: Some(promotion),
        }
    }

    /// Returns the origin square.
    #[inline]
    pub const fn from(self) -> Square {
        self.from
    }

    /// Returns the destination square.
    #[inline]
    pub const fn to(self) -> Square {
        self.to
    }

    /// Returns the promotion piece, if any.
    #[inline]
    pub const fn promotion(self) -> Option<Role> {
        self.promotion
    }

    /// Returns the UCI notation for this move (e.g., "e2e4", "e7e8q").
    pub fn to_uci(self) -> String {
        match self.promotion {
            Some(role) => format!("{}{}{}", self.from, self.to, role.char()),
            None => format!("{}{}", self.from, self.to),
        }
    }

    /// Parses a move from UCI notation.
    ///
    /// Promotion letters are accepted in either case. Surrounding whitespace
    /// is ignored since engines terminate their lines inconsistently.
    pub fn from_uci(s: &str) -> Result<Self, MoveParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MoveParseError::Empty);
        }
        if !s.is_ascii() || s.len() < 4 || s.len() > 5 {
            return Err(MoveParseError::InvalidLength(s.to_string()));
        }
        let from: Square = s[0..2]
            .parse()
            .map_err(|_| MoveParseError::InvalidSquare(s.to_string()))?;
        let to: Square = s[2..4]
            .parse()
            .map_err(|_| MoveParseError::InvalidSquare(s.to_string()))?;
        let promotion = match s[4..].chars().next() {
            None => None,
            Some(c) => Some(match c.to_ascii_lowercase() {
                'n' => Role::Knight,
                'b' => Role::Bishop,
                'r' => Role::Rook,
                'q' => Role::Queen,
                _ => return Err(MoveParseError::InvalidPromotion(c)),
            }),
        };
        Ok(Move {
            from,
            to,
            promotion,
        })
    }

    pub(crate) fn to_uci_move(self) -> UciMove {
        UciMove::Normal {
            from: self.from,
            to: self.to,
            promotion: self.promotion,
        }
    }

    pub(crate) fn from_shakmaty(m: &shakmaty::Move) -> Option<Self> {
        match m.to_uci(CastlingMode::Standard) {
            UciMove::Normal {
                from,
                to,
                promotion,
            } => Some(Move {
                from,
                to,
                promotion,
            }),
            _ => None,
        }
    }
}

impl FromStr for Move {
    type Err = MoveParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Move::from_uci(s)
    }
}

impl fmt::Debug for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Move({})", self.to_uci())
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uci())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn move_uci() {
        let m = Move::new(Square::E2, Square::E4);
        assert_eq!(m.to_uci(), "e2e4");

        let promo = Move::with_promotion(Square::E7, Square::E8, Role::Queen);
        assert_eq!(promo.to_uci(), "e7e8q");
    }

    #[test]
    fn move_from_uci() {
        let m = Move::from_uci("e2e4").unwrap();
        assert_eq!(m.from(), Square::E2);
        assert_eq!(m.to(), Square::E4);
        assert_eq!(m.promotion(), None);

        let promo = Move::from_uci("a2a1N").unwrap();
        assert_eq!(promo.promotion(), Some(Role::Knight));
    }

    #[test]
    fn move_from_uci_trims_line_endings() {
        let m = Move::from_uci("g1f3\r\n").unwrap();
        assert_eq!(m, Move::new(Square::G1, Square::F3));
    }

    #[test]
    fn move_from_uci_errors() {
        assert_eq!(Move::from_uci(""), Err(MoveParseError::Empty));
        assert_eq!(Move::from_uci("   "), Err(MoveParseError::Empty));
        assert!(matches!(
            Move::from_uci("e2"),
            Err(MoveParseError::InvalidLength(_))
        ));
        assert!(matches!(
            Move::from_uci("e2e4qq"),
            Err(MoveParseError::InvalidLength(_))
        ));
        assert!(matches!(
            Move::from_uci("e2e9"),
            Err(MoveParseError::InvalidSquare(_))
        ));
        assert!(matches!(
            Move::from_uci("Unknown Message"),
            Err(MoveParseError::InvalidLength(_))
        ));
        assert_eq!(
            Move::from_uci("e7e8k"),
            Err(MoveParseError::InvalidPromotion('k'))
        );
    }

    proptest! {
        #[test]
        fn from_uci_never_panics(s in "\\PC{0,8}") {
            let _ = Move::from_uci(&s);
        }

        #[test]
        fn parsed_moves_print_lowercase(s in "[a-h][1-8][a-h][1-8][nbrqNBRQ]?") {
            let m = Move::from_uci(&s).unwrap();
            prop_assert_eq!(m.to_uci(), s.to_ascii_lowercase());
        }
    }

    #[test]
    fn move_debug_display() {
        let m = Move::new(Square::E2, Square::E4);
        assert_eq!(format!("{:?}", m), "Move(e2e4)");
        assert_eq!(format!("{}", m), "e2e4");
    }
}
