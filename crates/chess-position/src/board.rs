//! The authoritative mutable board.
//!
//! [`Board`] holds the one canonical [`Position`] of a game together with the
//! moves that led to it. Every mutation goes through [`Board::apply`],
//! [`Board::reset`] or [`Board::undo`].

use crate::rules::{GameStatus, LegalityOracle, StandardRules};
use crate::{Move, Position};
use shakmaty::{Color, Square};
use thiserror::Error;

/// Errors returned by board mutations. None of them change the board.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// The FEN string could not be turned into a position.
    #[error("invalid FEN: {0}")]
    Parse(String),

    /// The move is not legal in the current position.
    #[error("illegal move: {0}")]
    IllegalMove(Move),

    /// The origin square of the move is empty.
    #[error("no piece on {0}")]
    NoPiece(Square),
}

/// What callers get from [`Board::current`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// FEN of the position.
    pub fen: String,
    /// Side to move.
    pub turn: Color,
    /// Terminal status, as judged by the oracle that last refreshed the
    /// board (standard rules unless [`Board::refresh_status`] was called).
    pub status: GameStatus,
}

/// A played move together with the position it was played from.
#[derive(Debug, Clone)]
struct HistoryEntry {
    before: Position,
    mov: Move,
}

/// The single mutable position of a game, with history.
#[derive(Debug, Clone)]
pub struct Board {
    position: Position,
    status: GameStatus,
    history: Vec<HistoryEntry>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// Creates a board in the standard starting position.
    pub fn new() -> Self {
        Self::from_position(Position::new())
    }

    /// Creates a board from a FEN string.
    pub fn from_fen(fen: &str) -> Result<Self, BoardError> {
        Ok(Self::from_position(Position::from_fen(fen)?))
    }

    fn from_position(position: Position) -> Self {
        let status = StandardRules.status(&position);
        Board {
            position,
            status,
            history: Vec::new(),
        }
    }

    /// Returns the current position, FEN, side to move and status.
    pub fn current(&self) -> Snapshot {
        Snapshot {
            fen: self.position.fen(),
            turn: self.position.turn(),
            status: self.status,
        }
    }

    /// Returns the current position.
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Returns the FEN of the current position.
    pub fn fen(&self) -> String {
        self.position.fen()
    }

    /// Returns the side to move.
    pub fn turn(&self) -> Color {
        self.position.turn()
    }

    /// Returns the cached terminal status of the current position.
    pub fn status(&self) -> GameStatus {
        self.status
    }

    /// Recomputes the cached status with `oracle` and returns it.
    ///
    /// Mutations refresh the cache with [`StandardRules`]; owners that judge
    /// positions with another oracle call this after every mutation.
    pub fn refresh_status<O: LegalityOracle + ?Sized>(&mut self, oracle: &O) -> GameStatus {
        self.status = oracle.status(&self.position);
        self.status
    }

    /// Returns the moves played since the last reset, oldest first.
    pub fn history(&self) -> Vec<Move> {
        self.history.iter().map(|entry| entry.mov).collect()
    }

    /// Returns the number of plies played since the last reset.
    pub fn ply_count(&self) -> usize {
        self.history.len()
    }

    /// Commits a move.
    ///
    /// Callers are expected to have asked the oracle first; the check here
    /// only guards against a bypassed validation.
    ///
    /// # Errors
    ///
    /// - [`BoardError::NoPiece`] if the origin square is empty
    /// - [`BoardError::IllegalMove`] if the move is not legal here
    pub fn apply(&mut self, m: Move) -> Result<(), BoardError> {
        if self.position.piece_at(m.from()).is_none() {
            return Err(BoardError::NoPiece(m.from()));
        }
        let resolved = self
            .position
            .resolve(m)
            .ok_or(BoardError::IllegalMove(m))?;

        let next = self.position.after(&resolved);
        let before = std::mem::replace(&mut self.position, next);
        self.history.push(HistoryEntry { before, mov: m });
        self.status = StandardRules.status(&self.position);
        Ok(())
    }

    /// Replaces the whole position from a FEN string and clears history.
    ///
    /// On error the board is left exactly as it was.
    pub fn reset(&mut self, fen: &str) -> Result<(), BoardError> {
        let position = Position::from_fen(fen)?;
        *self = Self::from_position(position);
        Ok(())
    }

    /// Takes back the last move, returning it.
    pub fn undo(&mut self) -> Option<Move> {
        let entry = self.history.pop()?;
        self.position = entry.before;
        self.status = StandardRules.status(&self.position);
        Some(entry.mov)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shakmaty::Role;

    #[test]
    fn apply_flips_turn_and_records_history() {
        let mut board = Board::new();
        board.apply(Move::new(Square::E2, Square::E4)).unwrap();
        assert_eq!(board.turn(), Color::Black);
        assert_eq!(board.history(), vec![Move::new(Square::E2, Square::E4)]);
        assert_eq!(board.ply_count(), 1);
        assert_eq!(
            board.fen(),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );
    }

    #[test]
    fn apply_rejects_empty_origin() {
        let mut board = Board::new();
        let before = board.current();
        assert_eq!(
            board.apply(Move::new(Square::E4, Square::E5)),
            Err(BoardError::NoPiece(Square::E4))
        );
        assert_eq!(board.current(), before);
    }

    #[test]
    fn apply_rejects_illegal_move() {
        let mut board = Board::new();
        let before = board.current();
        let m = Move::new(Square::E2, Square::E5);
        assert_eq!(board.apply(m), Err(BoardError::IllegalMove(m)));
        // Opponent's piece.
        let m = Move::new(Square::E7, Square::E5);
        assert_eq!(board.apply(m), Err(BoardError::IllegalMove(m)));
        assert_eq!(board.current(), before);
        assert!(board.history().is_empty());
    }

    #[test]
    fn status_recomputed_after_mate() {
        let mut board = Board::new();
        for uci in ["f2f3", "e7e5", "g2g4", "d8h4"] {
            assert_eq!(board.status(), GameStatus::Ongoing);
            board.apply(uci.parse().unwrap()).unwrap();
        }
        assert_eq!(board.status(), GameStatus::Checkmate);
        assert_eq!(board.current().status, GameStatus::Checkmate);
    }

    #[test]
    fn reset_replaces_position_and_clears_history() {
        let mut board = Board::new();
        board.apply(Move::new(Square::D2, Square::D4)).unwrap();
        board.reset("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert!(board.history().is_empty());
        assert_eq!(board.turn(), Color::Black);
        assert_eq!(board.status(), GameStatus::Stalemate);
    }

    #[test]
    fn reset_with_bad_fen_keeps_state() {
        let mut board = Board::new();
        board.apply(Move::new(Square::D2, Square::D4)).unwrap();
        let before = board.current();
        assert!(matches!(board.reset("garbage"), Err(BoardError::Parse(_))));
        assert_eq!(board.current(), before);
        assert_eq!(board.ply_count(), 1);
    }

    #[test]
    fn undo_restores_previous_position() {
        let mut board = Board::new();
        assert_eq!(board.undo(), None);
        board.apply(Move::new(Square::G1, Square::F3)).unwrap();
        board.apply(Move::new(Square::G8, Square::F6)).unwrap();
        assert_eq!(board.undo(), Some(Move::new(Square::G8, Square::F6)));
        assert_eq!(board.turn(), Color::Black);
        assert_eq!(board.undo(), Some(Move::new(Square::G1, Square::F3)));
        assert_eq!(board.position(), &Position::new());
    }

    #[test]
    fn promotion_applies_chosen_piece() {
        let mut board = Board::from_fen("8/4P3/8/8/8/8/k7/4K3 w - - 0 1").unwrap();
        board
            .apply(Move::with_promotion(Square::E7, Square::E8, Role::Knight))
            .unwrap();
        let piece = board.position().piece_at(Square::E8).unwrap();
        assert_eq!(piece.role, Role::Knight);
    }

    #[test]
    fn refresh_status_uses_the_given_oracle() {
        struct NeverOver;
        impl LegalityOracle for NeverOver {
            fn is_legal(&self, position: &Position, m: Move) -> bool {
                StandardRules.is_legal(position, m)
            }
            fn legal_moves(&self, position: &Position) -> Vec<Move> {
                StandardRules.legal_moves(position)
            }
            fn status(&self, _: &Position) -> GameStatus {
                GameStatus::Ongoing
            }
        }

        let mut board = Board::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(board.status(), GameStatus::Stalemate);
        assert_eq!(board.refresh_status(&NeverOver), GameStatus::Ongoing);
        assert_eq!(board.current().status, GameStatus::Ongoing);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        // Random games: every ply flips the side to move, the cached status
        // agrees with the oracle, and the FEN reloads to the same position.
        #[test]
        fn random_playouts_keep_board_consistent(
            choices in prop::collection::vec(any::<prop::sample::Index>(), 0..120)
        ) {
            let mut board = Board::new();
            for choice in &choices {
                let moves = StandardRules.legal_moves(board.position());
                if moves.is_empty() {
                    prop_assert!(board.status().is_terminal());
                    break;
                }
                let m = *choice.get(&moves);
                let turn = board.turn();
                board.apply(m).unwrap();

                prop_assert_eq!(board.turn(), turn.other());
                let status = StandardRules.status(board.position());
                prop_assert_eq!(board.status(), status);
                prop_assert_eq!(StandardRules.status(board.position()), status);
                prop_assert_eq!(board.current().status, status);

                let mut reloaded = Board::new();
                reloaded.reset(&board.fen()).unwrap();
                prop_assert_eq!(reloaded.position(), board.position());
                prop_assert_eq!(reloaded.status(), status);
            }

            while board.undo().is_some() {}
            prop_assert_eq!(board.position(), &Position::new());
        }
    }

    #[test]
    fn fen_round_trip_over_a_game() {
        let mut board = Board::new();
        for uci in ["e2e4", "c7c5", "g1f3", "d7d6", "f1b5", "c8d7", "e1g1"] {
            board.apply(uci.parse().unwrap()).unwrap();
            let reparsed = Position::from_fen(&board.fen()).unwrap();
            assert_eq!(&reparsed, board.position());
        }
    }
}
