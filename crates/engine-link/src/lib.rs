//! Engine processes and the move clients that talk to them.
//!
//! Two external movers are supported, each over its own child process:
//!
//! # Bot protocol
//!
//! - `GET PLAY <fen>` - request a move; the bot answers with one line on
//!   **stderr** holding a coordinate move (`e2e4`, `e7e8q`) or an empty line
//! - `GET TEST <fen>` - diagnostic run; output goes to the bot's stdout
//! - `EXIT` - leave the receive loop
//!
//! # UCI (strength-tunable engine)
//!
//! - `uci` / `uciok`, `isready` / `readyok` - handshake
//! - `setoption name Skill Level value <n>` - strength
//! - `position fen <fen>` then `go depth <d>` - search, answered by
//!   `bestmove <move>` on stdout
//! - `quit` - exit
//!
//! Both protocols are strictly request/response with no request ids, so a
//! client never has more than one request in flight. Every read is bounded
//! by a timeout.

mod bot;
mod channel;
mod tunable;

pub use bot::BotClient;
pub use channel::{
    EngineChannel, LaunchSpec, LineTransport, ResponseStream, SessionState, DEFAULT_CLOSE_GRACE,
};
pub use tunable::{EngineOptions, SearchLimit, TunableEngine, MAX_SKILL_LEVEL};

use async_trait::async_trait;
use chess_position::{Move, Position};
use std::time::Duration;
use thiserror::Error;

/// Errors from engine processes and their protocols.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The executable could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The process has exited or its pipes are gone.
    #[error("engine channel closed")]
    ChannelClosed,
    /// No line arrived within the bound.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// The engine answered with something that is not a usable reply.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A setting was out of range.
    #[error("invalid engine setting: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Returns true if the session is unusable until it is restarted.
    ///
    /// A timed-out request counts: its reply may still show up later.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::ChannelClosed | EngineError::Spawn { .. } | EngineError::Timeout(_)
        )
    }
}

/// Anything that can be asked for a move in a position.
///
/// Returned moves are not checked for legality; the caller validates every
/// mover the same way.
#[async_trait]
pub trait MoveSource: Send {
    /// Short name used in logs and status lines.
    fn name(&self) -> &str;

    /// Asks for one move in `position`.
    async fn request_move(&mut self, position: &Position) -> Result<Move, EngineError>;

    /// Sets playing strength. Movers without a strength setting refuse.
    async fn set_skill(&mut self, level: u8) -> Result<(), EngineError> {
        Err(EngineError::Config(format!(
            "{} has no skill setting (asked for {})",
            self.name(),
            level
        )))
    }

    /// Replaces a dead session with a fresh one.
    async fn restart(&mut self) -> Result<(), EngineError>;

    /// Ends the session. Calling it twice is harmless.
    async fn shutdown(&mut self) -> Result<(), EngineError>;
}
