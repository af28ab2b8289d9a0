//! Read-only position snapshots and FEN serialization.

use crate::{BoardError, Move};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Piece, Position as _, Square};
use std::fmt;

/// A single chess position.
///
/// `Position` is a value: cloning it yields an independent snapshot, which
/// is what engines and the legality oracle are handed. Only [`crate::Board`]
/// advances positions.
#[derive(Clone, Debug, Default)]
pub struct Position {
    inner: Chess,
}

impl Position {
    /// The standard starting position FEN.
    pub const STARTPOS: &'static str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    /// Creates the standard starting position.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a position from FEN.
    ///
    /// Trailing fields may be omitted (`<board> <turn> <castling> <ep>` is
    /// accepted), which is how the bot reports positions. Positions that
    /// parse but cannot occur in a game (missing kings, side not to move in
    /// check) are rejected as well.
    pub fn from_fen(fen: &str) -> Result<Self, BoardError> {
        let fen = fen.trim();
        let parsed =
            Fen::from_ascii(fen.as_bytes()).map_err(|e| BoardError::Parse(format!("{fen}: {e}")))?;
        let inner: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| BoardError::Parse(format!("{fen}: {e}")))?;
        Ok(Position { inner })
    }

    /// Serializes this position as a full six-field FEN string.
    pub fn fen(&self) -> String {
        Fen::from_position(self.inner.clone(), EnPassantMode::Legal).to_string()
    }

    /// Returns the side to move.
    pub fn turn(&self) -> Color {
        self.inner.turn()
    }

    /// Returns the piece on `square`, if any.
    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.inner.board().piece_at(square)
    }

    /// Returns the full move number.
    pub fn fullmoves(&self) -> u32 {
        self.inner.fullmoves().get()
    }

    pub(crate) fn inner(&self) -> &Chess {
        &self.inner
    }

    /// Resolves a coordinate move against this position.
    ///
    /// Returns `None` unless the move is legal here.
    pub(crate) fn resolve(&self, m: Move) -> Option<shakmaty::Move> {
        m.to_uci_move().to_move(&self.inner).ok()
    }

    /// Returns the position after playing an already resolved legal move.
    pub(crate) fn after(&self, m: &shakmaty::Move) -> Position {
        let mut inner = self.inner.clone();
        inner.play_unchecked(m);
        Position { inner }
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.fen() == other.fen()
    }
}

impl Eq for Position {}

/// Renders the board as eight text rows, rank 8 first.
impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rank in (0..8u32).rev() {
            write!(f, "{} ", rank + 1)?;
            for file in 0..8u32 {
                let c = self
                    .piece_at(Square::new(rank * 8 + file))
                    .map_or('.', Piece::char);
                write!(f, " {}", c)?;
            }
            writeln!(f)?;
        }
        write!(f, "   a b c d e f g h")
    }
}
