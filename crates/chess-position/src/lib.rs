//! Board state for chess-duel.
//!
//! This crate owns everything the orchestrator needs to know about the board
//! without implementing chess rules itself. Rules come from `shakmaty`.
//!
//! - [`Move`] - coordinate move (origin, destination, optional promotion)
//! - [`Position`] - a read-only snapshot with FEN serialization
//! - [`Board`] - the single mutable position with move history
//! - [`LegalityOracle`] and [`StandardRules`] - legality queries on snapshots
//! - [`BoardGeometry`] - pixel to square mapping for the presentation layer

mod board;
pub mod geometry;
mod mov;
mod position;
mod rules;

pub use board::{Board, BoardError, Snapshot};
pub use geometry::{BoardGeometry, Orientation};
pub use mov::{Move, MoveParseError};
pub use position::Position;
pub use rules::{GameStatus, LegalityOracle, StandardRules};

pub use shakmaty::{Color, Role, Square};
