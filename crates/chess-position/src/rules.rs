//! Legality queries.
//!
//! The orchestrator never decides legality on its own; it asks a
//! [`LegalityOracle`]. All queries take a snapshot and have no side effects.

use crate::{Move, Position};
use shakmaty::Position as _;
use std::fmt;

/// Terminal status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameStatus {
    /// The side to move has at least one legal move.
    Ongoing,
    /// The side to move is in check and has no legal move.
    Checkmate,
    /// The side to move is not in check and has no legal move.
    Stalemate,
}

impl GameStatus {
    /// Returns true for checkmate and stalemate.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, GameStatus::Ongoing)
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameStatus::Ongoing => write!(f, "ongoing"),
            GameStatus::Checkmate => write!(f, "checkmate"),
            GameStatus::Stalemate => write!(f, "stalemate"),
        }
    }
}

/// Rules interface consumed by the orchestrator.
pub trait LegalityOracle {
    /// Returns true if `m` is legal for the side to move in `position`.
    fn is_legal(&self, position: &Position, m: Move) -> bool;

    /// Returns every legal move in `position`.
    fn legal_moves(&self, position: &Position) -> Vec<Move>;

    /// Returns the terminal status of `position`.
    fn status(&self, position: &Position) -> GameStatus;
}

/// Standard chess rules backed by `shakmaty`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl LegalityOracle for StandardRules {
    fn is_legal(&self, position: &Position, m: Move) -> bool {
        position.resolve(m).is_some()
    }

    fn legal_moves(&self, position: &Position) -> Vec<Move> {
        position
            .inner()
            .legal_moves()
            .iter()
            .filter_map(Move::from_shakmaty)
            .collect()
    }

    fn status(&self, position: &Position) -> GameStatus {
        let inner = position.inner();
        if inner.is_checkmate() {
            GameStatus::Checkmate
        } else if inner.is_stalemate() {
            GameStatus::Stalemate
        } else {
            GameStatus::Ongoing
        }
    }
}
