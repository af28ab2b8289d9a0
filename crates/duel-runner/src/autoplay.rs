//! The automated engine-versus-bot game loop.

use crate::orchestrator::{GameResult, Orchestrator, OrchestratorError, Phase, PlyRecord, Seats};
use chess_position::{Board, LegalityOracle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Cooperative cancellation flag, checked between plies.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears a previous cancellation so the token can be reused.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Why [`run_until_done`] returned.
#[derive(Debug)]
pub enum LoopOutcome {
    /// Checkmate, stalemate or the ply limit.
    Finished(GameResult),
    /// The token was cancelled before the next ply.
    Cancelled,
    /// An engine turn failed. The board holds the last good position.
    Halted(OrchestratorError),
    /// No engine can move: a human seat is to move, or an earlier engine
    /// failure has not been dealt with.
    AwaitingHuman,
}

/// Resets to the starting position and seats the tunable engine (White)
/// against the bot (Black) at skill `level`.
///
/// The level is applied first, so an out-of-range level leaves the current
/// game alone.
pub async fn start_game<O: LegalityOracle>(
    orchestrator: &mut Orchestrator<O>,
    level: u8,
) -> Result<(), OrchestratorError> {
    orchestrator.set_skill(level).await?;
    orchestrator.new_game();
    orchestrator.set_seats(Seats::ENGINE_VS_BOT);
    info!(level, "game started");
    Ok(())
}

/// Plays engine plies until the game ends, a turn fails, a human is to
/// move, or `cancel` is set.
///
/// `on_ply` runs after every committed ply with the new board. Control is
/// handed back to the runtime after each ply. An engine request that is
/// already running is not interrupted by cancellation.
pub async fn run_until_done<O, F>(
    orchestrator: &mut Orchestrator<O>,
    cancel: &CancelToken,
    mut on_ply: F,
) -> LoopOutcome
where
    O: LegalityOracle,
    F: FnMut(&PlyRecord, &Board),
{
    loop {
        if cancel.is_cancelled() {
            info!(ply = orchestrator.board().ply_count(), "game loop cancelled");
            return LoopOutcome::Cancelled;
        }
        match orchestrator.phase() {
            Phase::GameOver(result) => return LoopOutcome::Finished(result),
            Phase::AwaitingEngineMove(_) => {}
            _ => return LoopOutcome::AwaitingHuman,
        }
        match orchestrator.step().await {
            Ok(Some(record)) => on_ply(&record, orchestrator.board()),
            Ok(None) => return LoopOutcome::AwaitingHuman,
            Err(e) => return LoopOutcome::Halted(e),
        }
        tokio::task::yield_now().await;
    }
}
