//! Chess duel - game orchestration between a human, a strength-tunable UCI
//! engine and a custom bot process.
//!
//! # Modules
//!
//! - [`orchestrator`] - the turn-taking state machine that owns the board
//! - [`autoplay`] - the cooperative engine-versus-bot game loop
//! - [`config`] - `duel.toml` loading and launch parameters
//! - [`session`] - line commands of the interactive terminal front end

pub mod autoplay;
pub mod config;
pub mod orchestrator;
pub mod session;

pub use autoplay::{run_until_done, start_game, CancelToken, LoopOutcome};
pub use config::{ConfigError, DuelConfig};
pub use orchestrator::{
    ClickOutcome, EngineKind, GameResult, Orchestrator, OrchestratorError, Phase, PlyRecord,
    Seat, Seats,
};
