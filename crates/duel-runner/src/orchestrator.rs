//! The turn-taking state machine.
//!
//! An [`Orchestrator`] owns the one [`Board`] of a game and the two engine
//! clients. For every ply it decides who moves (a human clicking squares,
//! the tunable engine, or the bot), validates the candidate move with the
//! legality oracle, and only then commits it. Engine failures stop the
//! current ply and leave the board untouched.

use chess_position::{
    Board, BoardError, BoardGeometry, Color, GameStatus, LegalityOracle, Move, Role, Square,
    StandardRules,
};
use engine_link::{EngineError, MoveSource};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default ply count after which a game is stopped.
pub const DEFAULT_MAX_PLIES: usize = 500;

/// One of the two external movers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// The strength-tunable UCI engine.
    Tunable,
    /// The custom bot process.
    Bot,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Tunable => write!(f, "tunable engine"),
            EngineKind::Bot => write!(f, "bot"),
        }
    }
}

/// Who controls a color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Seat {
    Human,
    Tunable,
    Bot,
}

impl Seat {
    /// Returns the engine behind this seat, if any.
    pub fn engine(self) -> Option<EngineKind> {
        match self {
            Seat::Human => None,
            Seat::Tunable => Some(EngineKind::Tunable),
            Seat::Bot => Some(EngineKind::Bot),
        }
    }
}

impl From<EngineKind> for Seat {
    fn from(kind: EngineKind) -> Self {
        match kind {
            EngineKind::Tunable => Seat::Tunable,
            EngineKind::Bot => Seat::Bot,
        }
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seat::Human => write!(f, "human"),
            Seat::Tunable => write!(f, "tunable"),
            Seat::Bot => write!(f, "bot"),
        }
    }
}

impl FromStr for Seat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" => Ok(Seat::Human),
            "tunable" | "engine" | "stockfish" => Ok(Seat::Tunable),
            "bot" => Ok(Seat::Bot),
            other => Err(format!(
                "unknown seat {:?} (expected human, tunable or bot)",
                other
            )),
        }
    }
}

/// Seat assignment for both colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seats {
    pub white: Seat,
    pub black: Seat,
}

impl Seats {
    /// Both sides played by the human.
    pub const HUMAN: Seats = Seats {
        white: Seat::Human,
        black: Seat::Human,
    };

    /// Tunable engine as White, bot as Black.
    pub const ENGINE_VS_BOT: Seats = Seats {
        white: Seat::Tunable,
        black: Seat::Bot,
    };

    pub fn for_color(&self, color: Color) -> Seat {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }
}

impl Default for Seats {
    fn default() -> Self {
        Seats::HUMAN
    }
}

/// How a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Checkmate { winner: Color },
    Stalemate,
    /// The configured ply limit was reached.
    PlyLimit,
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameResult::Checkmate { winner } => {
                write!(f, "checkmate, {} wins", color_name(*winner))
            }
            GameResult::Stalemate => write!(f, "stalemate"),
            GameResult::PlyLimit => write!(f, "ply limit reached"),
        }
    }
}

/// Where the orchestrator is in the current ply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the human to pick a piece.
    AwaitingHumanSelection,
    /// A piece is selected; the next click picks the destination.
    AwaitingHumanDestination { from: Square },
    /// An engine is to move.
    AwaitingEngineMove(EngineKind),
    /// A move was just committed. Never observed between calls.
    MoveApplied,
    /// The last engine request failed. Idle until the next click or request.
    EngineFailed { mover: EngineKind },
    GameOver(GameResult),
}

impl Phase {
    fn is_idle(self) -> bool {
        matches!(
            self,
            Phase::AwaitingHumanSelection
                | Phase::AwaitingHumanDestination { .. }
                | Phase::EngineFailed { .. }
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::AwaitingHumanSelection => write!(f, "select a piece"),
            Phase::AwaitingHumanDestination { from } => write!(f, "{} selected, pick a square", from),
            Phase::AwaitingEngineMove(kind) => write!(f, "waiting for the {}", kind),
            Phase::MoveApplied => write!(f, "move applied"),
            Phase::EngineFailed { mover } => write!(f, "the {} failed", mover),
            Phase::GameOver(result) => write!(f, "game over: {}", result),
        }
    }
}

/// One committed ply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlyRecord {
    /// 1-based ply number since the last reset.
    pub ply: usize,
    pub mover: Seat,
    #[serde(serialize_with = "serialize_color")]
    pub color: Color,
    /// The move in UCI notation.
    #[serde(rename = "move")]
    pub uci: String,
    pub fen_after: String,
}

impl fmt::Display for PlyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}. {} ({}) plays {}",
            self.ply,
            color_name(self.color),
            self.mover,
            self.uci
        )
    }
}

fn serialize_color<S: Serializer>(color: &Color, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(color_name(*color))
}

pub(crate) fn color_name(color: Color) -> &'static str {
    match color {
        Color::White => "white",
        Color::Black => "black",
    }
}

/// What a click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Nothing happened.
    Ignored,
    /// A piece of the side to move was selected.
    Selected(Square),
    /// The selected piece moved.
    Moved(PlyRecord),
    /// The destination was illegal; the selection was dropped.
    Rejected(Move),
}

/// Errors from engine turns and board commands.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The engine failed to produce a move.
    #[error("{mover} failed: {source}")]
    Engine {
        mover: EngineKind,
        #[source]
        source: EngineError,
    },
    /// The engine produced a move the oracle rejected.
    #[error("{mover} played illegal move {mov}")]
    IllegalMove { mover: EngineKind, mov: Move },
    /// No client was configured for this mover.
    #[error("no {0} configured")]
    NoEngine(EngineKind),
    /// An engine request is still outstanding.
    #[error("an engine request is already in flight")]
    Busy,
    #[error("game over: {0}")]
    GameOver(GameResult),
    #[error(transparent)]
    Board(#[from] BoardError),
}

impl OrchestratorError {
    /// Returns the engine whose turn failed.
    pub fn mover(&self) -> Option<EngineKind> {
        match self {
            OrchestratorError::Engine { mover, .. }
            | OrchestratorError::IllegalMove { mover, .. } => Some(*mover),
            OrchestratorError::NoEngine(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Owns the board and the engine clients and alternates turns between them.
pub struct Orchestrator<O = StandardRules> {
    rules: O,
    board: Board,
    phase: Phase,
    seats: Seats,
    tunable: Option<Box<dyn MoveSource>>,
    bot: Option<Box<dyn MoveSource>>,
    max_plies: usize,
    /// Set while an engine request is awaited; stays set if that future is
    /// dropped before completing.
    in_flight: bool,
}

impl<O: LegalityOracle> Orchestrator<O> {
    /// Creates an orchestrator on the starting position.
    pub fn new(
        rules: O,
        seats: Seats,
        tunable: Option<Box<dyn MoveSource>>,
        bot: Option<Box<dyn MoveSource>>,
    ) -> Self {
        let mut orchestrator = Orchestrator {
            rules,
            board: Board::new(),
            phase: Phase::AwaitingHumanSelection,
            seats,
            tunable,
            bot,
            max_plies: DEFAULT_MAX_PLIES,
            in_flight: false,
        };
        orchestrator.settle();
        orchestrator
    }

    /// Sets the ply count at which the game is stopped.
    pub fn with_max_plies(mut self, max_plies: usize) -> Self {
        self.max_plies = max_plies;
        self.settle();
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn seats(&self) -> Seats {
        self.seats
    }

    pub fn max_plies(&self) -> usize {
        self.max_plies
    }

    /// Returns the armed square, if any.
    pub fn selection(&self) -> Option<Square> {
        match self.phase {
            Phase::AwaitingHumanDestination { from } => Some(from),
            _ => None,
        }
    }

    /// Returns the name a configured engine reports.
    pub fn engine_name(&self, kind: EngineKind) -> Option<&str> {
        self.client(kind).map(|c| c.name())
    }

    /// Reassigns the seats and recomputes whose turn it is.
    pub fn set_seats(&mut self, seats: Seats) {
        self.seats = seats;
        self.settle();
    }

    /// Handles a click on a pixel of a drawn board.
    pub fn click_pixel(&mut self, geometry: &BoardGeometry, x: f64, y: f64) -> ClickOutcome {
        match geometry.square_at(x, y) {
            Some(square) => self.click(square),
            None => ClickOutcome::Ignored,
        }
    }

    /// Handles a click on `square`.
    ///
    /// Clicking a piece of the side to move selects it, also when another
    /// piece is already selected. With a piece selected, clicking any other
    /// square tries the move; pawns reaching the last rank promote to a
    /// queen. Clicks are ignored while an engine is to move and after the
    /// game has ended.
    pub fn click(&mut self, square: Square) -> ClickOutcome {
        if !self.phase.is_idle() {
            debug!(%square, phase = %self.phase, "click ignored");
            return ClickOutcome::Ignored;
        }

        let turn = self.board.turn();
        let own_piece = self
            .board
            .position()
            .piece_at(square)
            .is_some_and(|piece| piece.color == turn);
        if own_piece {
            self.phase = Phase::AwaitingHumanDestination { from: square };
            return ClickOutcome::Selected(square);
        }

        let Phase::AwaitingHumanDestination { from } = self.phase else {
            return ClickOutcome::Ignored;
        };
        let candidate = self.with_auto_promotion(Move::new(from, square));
        self.phase = Phase::AwaitingHumanSelection;
        if !self.rules.is_legal(self.board.position(), candidate) {
            debug!(mov = %candidate, "illegal move from click");
            return ClickOutcome::Rejected(candidate);
        }
        match self.commit(Seat::Human, candidate) {
            Ok(record) => ClickOutcome::Moved(record),
            Err(e) => {
                warn!(error = %e, "board refused a validated move");
                ClickOutcome::Rejected(candidate)
            }
        }
    }

    fn with_auto_promotion(&self, m: Move) -> Move {
        let Some(piece) = self.board.position().piece_at(m.from()) else {
            return m;
        };
        let last_rank = match piece.color {
            Color::White => 7,
            Color::Black => 0,
        };
        if piece.role == Role::Pawn && (m.to() as u32) / 8 == last_rank {
            Move::with_promotion(m.from(), m.to(), Role::Queen)
        } else {
            m
        }
    }

    /// Asks `mover` for a move in the current position and commits it.
    ///
    /// Works whoever's seat it is, like the "get bot move" button. The
    /// board is only changed when the returned move is legal; any failure
    /// leaves the orchestrator in [`Phase::EngineFailed`].
    pub async fn request_engine_move(
        &mut self,
        mover: EngineKind,
    ) -> Result<PlyRecord, OrchestratorError> {
        if let Phase::GameOver(result) = self.phase {
            return Err(OrchestratorError::GameOver(result));
        }
        if self.in_flight {
            return Err(OrchestratorError::Busy);
        }
        if self.client(mover).is_none() {
            return Err(OrchestratorError::NoEngine(mover));
        }

        self.phase = Phase::AwaitingEngineMove(mover);
        let snapshot = self.board.position().clone();
        self.in_flight = true;
        let reply = match self.client_mut(mover) {
            Some(client) => client.request_move(&snapshot).await,
            None => Err(EngineError::ChannelClosed),
        };
        self.in_flight = false;

        let mov = match reply {
            Ok(mov) => mov,
            Err(source) => {
                warn!(%mover, error = %source, "engine request failed");
                self.phase = Phase::EngineFailed { mover };
                return Err(OrchestratorError::Engine { mover, source });
            }
        };
        if !self.rules.is_legal(self.board.position(), mov) {
            warn!(%mover, %mov, fen = %self.board.fen(), "engine move rejected");
            self.phase = Phase::EngineFailed { mover };
            return Err(OrchestratorError::IllegalMove { mover, mov });
        }
        self.commit(Seat::from(mover), mov).map_err(|e| {
            self.phase = Phase::EngineFailed { mover };
            OrchestratorError::from(e)
        })
    }

    /// Plays one automated ply if an engine is to move.
    ///
    /// Returns `Ok(None)` when the side to move is waiting for a human or
    /// the previous engine request failed.
    pub async fn step(&mut self) -> Result<Option<PlyRecord>, OrchestratorError> {
        match self.phase {
            Phase::AwaitingEngineMove(mover) => self.request_engine_move(mover).await.map(Some),
            Phase::GameOver(result) => Err(OrchestratorError::GameOver(result)),
            _ => Ok(None),
        }
    }

    /// Replaces the position from a FEN string. Clears the selection.
    pub fn reset(&mut self, fen: &str) -> Result<(), OrchestratorError> {
        self.board.reset(fen)?;
        info!(%fen, "position loaded");
        self.settle();
        Ok(())
    }

    /// Returns to the starting position.
    pub fn new_game(&mut self) {
        self.board = Board::new();
        self.settle();
    }

    /// Takes back the last ply.
    pub fn undo(&mut self) -> Option<Move> {
        let undone = self.board.undo()?;
        self.settle();
        Some(undone)
    }

    /// Sets the strength of the tunable engine.
    pub async fn set_skill(&mut self, level: u8) -> Result<(), OrchestratorError> {
        let mover = EngineKind::Tunable;
        let client = self
            .client_mut(mover)
            .ok_or(OrchestratorError::NoEngine(mover))?;
        client
            .set_skill(level)
            .await
            .map_err(|source| OrchestratorError::Engine { mover, source })
    }

    /// Restarts a dead engine process.
    pub async fn restart_engine(&mut self, mover: EngineKind) -> Result<(), OrchestratorError> {
        let client = self
            .client_mut(mover)
            .ok_or(OrchestratorError::NoEngine(mover))?;
        client
            .restart()
            .await
            .map_err(|source| OrchestratorError::Engine { mover, source })?;
        self.in_flight = false;
        if matches!(self.phase, Phase::EngineFailed { mover: m } if m == mover) {
            self.settle();
        }
        Ok(())
    }

    /// Shuts both engines down. Every engine is asked even if one fails.
    pub async fn shutdown(&mut self) -> Result<(), OrchestratorError> {
        let mut first_error = None;
        for mover in [EngineKind::Tunable, EngineKind::Bot] {
            if let Some(client) = self.client_mut(mover) {
                if let Err(source) = client.shutdown().await {
                    warn!(%mover, error = %source, "shutdown failed");
                    first_error.get_or_insert(OrchestratorError::Engine { mover, source });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn client(&self, kind: EngineKind) -> Option<&dyn MoveSource> {
        match kind {
            EngineKind::Tunable => self.tunable.as_deref(),
            EngineKind::Bot => self.bot.as_deref(),
        }
    }

    fn client_mut(&mut self, kind: EngineKind) -> Option<&mut (dyn MoveSource + 'static)> {
        match kind {
            EngineKind::Tunable => self.tunable.as_deref_mut(),
            EngineKind::Bot => self.bot.as_deref_mut(),
        }
    }

    fn commit(&mut self, mover: Seat, mov: Move) -> Result<PlyRecord, BoardError> {
        let color = self.board.turn();
        self.board.apply(mov)?;
        self.phase = Phase::MoveApplied;
        let record = PlyRecord {
            ply: self.board.ply_count(),
            mover,
            color,
            uci: mov.to_uci(),
            fen_after: self.board.fen(),
        };
        info!(ply = record.ply, %mover, color = color_name(color), mov = %record.uci, "move applied");
        self.settle();
        Ok(record)
    }

    /// Recomputes the phase from the board and the seats.
    fn settle(&mut self) {
        let status = self.board.refresh_status(&self.rules);
        let turn = self.board.turn();
        self.phase = match status {
            GameStatus::Checkmate => Phase::GameOver(GameResult::Checkmate {
                winner: turn.other(),
            }),
            GameStatus::Stalemate => Phase::GameOver(GameResult::Stalemate),
            GameStatus::Ongoing if self.board.ply_count() >= self.max_plies => {
                Phase::GameOver(GameResult::PlyLimit)
            }
            GameStatus::Ongoing => match self.seats.for_color(turn).engine() {
                Some(kind) => Phase::AwaitingEngineMove(kind),
                None => Phase::AwaitingHumanSelection,
            },
        };
        if let Phase::GameOver(result) = self.phase {
            info!(%result, "game over");
        }
    }
}
