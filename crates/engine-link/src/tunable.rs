//! UCI client for the strength-tunable reference engine.
//!
//! The engine is started once, taken through the `uci` / `isready`
//! handshake, and then asked for one `bestmove` per request. Every read is
//! bounded by [`EngineOptions::timeout`], and the number of lines read while
//! waiting for an answer is capped at [`MAX_UCI_LINES`].

use crate::channel::{EngineChannel, LaunchSpec, LineTransport, ResponseStream, SessionState};
use crate::{EngineError, MoveSource};
use async_trait::async_trait;
use chess_position::{Move, Position};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Highest value accepted for the `Skill Level` option.
pub const MAX_SKILL_LEVEL: u8 = 20;

/// Maximum lines to read while waiting for a single UCI response.
pub const MAX_UCI_LINES: usize = 1000;

/// How long the engine may think about one move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchLimit {
    /// `go depth <plies>`
    Depth(u32),
    /// `go movetime <milliseconds>`
    MoveTime(u64),
}

impl SearchLimit {
    fn go_command(self) -> String {
        match self {
            SearchLimit::Depth(depth) => format!("go depth {}", depth),
            SearchLimit::MoveTime(ms) => format!("go movetime {}", ms),
        }
    }
}

/// Process options and search settings for the tunable engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// `Threads` option.
    pub threads: u32,
    /// `Hash` option in megabytes.
    pub hash_mb: u32,
    /// `Skill Level`, `0..=MAX_SKILL_LEVEL`.
    pub skill_level: u8,
    pub limit: SearchLimit,
    /// Bound on the handshake and on each search.
    pub timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            threads: 2,
            hash_mb: 512,
            skill_level: 2,
            limit: SearchLimit::Depth(15),
            timeout: Duration::from_secs(30),
        }
    }
}

fn check_skill(level: u8) -> Result<(), EngineError> {
    if level > MAX_SKILL_LEVEL {
        return Err(EngineError::Config(format!(
            "skill level {} is outside 0..={}",
            level, MAX_SKILL_LEVEL
        )));
    }
    Ok(())
}

/// A UCI engine whose playing strength can be set.
///
/// # Lifecycle
///
/// 1. [`TunableEngine::spawn`] starts the process and runs [`init`](Self::init)
/// 2. [`set_skill`](Self::set_skill) changes strength at any time between requests
/// 3. [`request_move`](Self::request_move) answers one position
/// 4. [`shutdown`](Self::shutdown) sends `quit` and closes the process
pub struct TunableEngine<T = EngineChannel> {
    transport: T,
    options: EngineOptions,
    /// Name reported in `id name`, or the executable name before the handshake.
    name: String,
    /// Skill level last acknowledged by a successful `setoption`.
    skill: Option<u8>,
}

impl TunableEngine<EngineChannel> {
    /// Starts the engine and completes the UCI handshake.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::Spawn`] if the executable cannot be run,
    /// with [`EngineError::Config`] if the configured skill level is out of
    /// range, and with [`EngineError::Timeout`] if the engine never reports
    /// `uciok` / `readyok`.
    pub async fn spawn(launch: LaunchSpec, options: EngineOptions) -> Result<Self, EngineError> {
        check_skill(options.skill_level)?;
        let fallback = launch
            .program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "engine".to_string());
        let channel = EngineChannel::start(launch.responses_on(ResponseStream::Stdout))?;
        let mut engine = TunableEngine::new(channel, options);
        engine.name = fallback;
        engine.init().await?;
        Ok(engine)
    }
}

impl<T: LineTransport> TunableEngine<T> {
    /// Wraps a transport without talking to it. Call [`init`](Self::init)
    /// before the first request.
    pub fn new(transport: T, options: EngineOptions) -> Self {
        TunableEngine {
            transport,
            options,
            name: "engine".to_string(),
            skill: None,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Returns the skill level last sent to the engine.
    pub fn skill(&self) -> Option<u8> {
        self.skill
    }

    pub fn state(&self) -> SessionState {
        self.transport.state()
    }

    /// Runs the UCI handshake and applies the configured options.
    pub async fn init(&mut self) -> Result<(), EngineError> {
        let deadline = Instant::now() + self.options.timeout;
        self.transport.send_line("uci").await?;
        let mut lines_read = 0;
        loop {
            let line = self.next_line(deadline, &mut lines_read).await?;
            if let Some(name) = line.strip_prefix("id name ") {
                self.name = name.to_string();
            }
            if line == "uciok" {
                break;
            }
        }

        self.transport
            .send_line(&format!("setoption name Threads value {}", self.options.threads))
            .await?;
        self.transport
            .send_line(&format!("setoption name Hash value {}", self.options.hash_mb))
            .await?;
        self.set_skill(self.options.skill_level).await?;
        self.sync(deadline).await?;
        info!(engine = %self.name, skill = self.options.skill_level, "engine ready");
        Ok(())
    }

    /// Sets the engine's playing strength.
    ///
    /// Out-of-range levels fail with [`EngineError::Config`] without
    /// sending anything.
    pub async fn set_skill(&mut self, level: u8) -> Result<(), EngineError> {
        check_skill(level)?;
        self.transport
            .send_line(&format!("setoption name Skill Level value {}", level))
            .await?;
        self.options.skill_level = level;
        self.skill = Some(level);
        debug!(engine = %self.name, level, "skill level set");
        Ok(())
    }

    /// Asks for the best move in `position`.
    ///
    /// `info` lines are skipped. The move is returned unvalidated.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Timeout`] if `bestmove` does not arrive in time
    /// - [`EngineError::Protocol`] for `bestmove (none)`, `bestmove 0000`,
    ///   an unparseable move, or too many lines without `bestmove`
    pub async fn request_move(&mut self, position: &Position) -> Result<Move, EngineError> {
        let deadline = Instant::now() + self.options.timeout;
        self.transport
            .send_line(&format!("position fen {}", position.fen()))
            .await?;
        self.transport
            .send_line(&self.options.limit.go_command())
            .await?;

        let mut lines_read = 0;
        loop {
            let line = self.next_line(deadline, &mut lines_read).await?;
            if let Some(rest) = line.strip_prefix("bestmove") {
                return parse_bestmove(rest);
            }
        }
    }

    /// Sends `quit` and closes the process.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.transport.state() == SessionState::Running {
            // The engine may already be gone.
            let _ = self.transport.send_line("quit").await;
        }
        self.transport.close().await
    }

    async fn sync(&mut self, deadline: Instant) -> Result<(), EngineError> {
        self.transport.send_line("isready").await?;
        let mut lines_read = 0;
        loop {
            if self.next_line(deadline, &mut lines_read).await? == "readyok" {
                return Ok(());
            }
        }
    }

    async fn next_line(
        &mut self,
        deadline: Instant,
        lines_read: &mut usize,
    ) -> Result<String, EngineError> {
        if *lines_read >= MAX_UCI_LINES {
            warn!(engine = %self.name, "engine output never reached the expected reply");
            self.transport.abandon();
            return Err(EngineError::Protocol(format!(
                "no reply within {} lines",
                MAX_UCI_LINES
            )));
        }
        *lines_read += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.transport
            .recv_line(remaining)
            .await
            .map_err(|e| match e {
                EngineError::Timeout(_) => EngineError::Timeout(self.options.timeout),
                other => other,
            })
    }
}

fn parse_bestmove(rest: &str) -> Result<Move, EngineError> {
    let token = rest.split_whitespace().next().unwrap_or("");
    match token {
        "" | "(none)" | "0000" => Err(EngineError::Protocol(format!(
            "engine has no move: bestmove {}",
            token
        ))),
        uci => Move::from_uci(uci)
            .map_err(|e| EngineError::Protocol(format!("bad bestmove {:?}: {}", uci, e))),
    }
}

#[async_trait]
impl<T: LineTransport> MoveSource for TunableEngine<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request_move(&mut self, position: &Position) -> Result<Move, EngineError> {
        TunableEngine::request_move(self, position).await
    }

    async fn set_skill(&mut self, level: u8) -> Result<(), EngineError> {
        TunableEngine::set_skill(self, level).await
    }

    async fn restart(&mut self) -> Result<(), EngineError> {
        info!(engine = %self.name, "restarting engine");
        self.transport.restart().await?;
        self.skill = None;
        self.init().await
    }

    async fn shutdown(&mut self) -> Result<(), EngineError> {
        TunableEngine::shutdown(self).await
    }
}
