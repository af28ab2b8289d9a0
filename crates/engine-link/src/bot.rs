//! Client for the custom bot process.

use crate::channel::{EngineChannel, LaunchSpec, LineTransport, ResponseStream, SessionState};
use crate::{EngineError, MoveSource};
use async_trait::async_trait;
use chess_position::{Move, Position};
use std::time::Duration;
use tracing::{debug, info};

/// What the bot prints for a command it does not recognise.
const UNKNOWN_MESSAGE: &str = "Unknown Message";

/// Talks to the bot over `GET PLAY <fen>` requests.
///
/// Replies are read from the bot's stderr, one line per request.
pub struct BotClient<T = EngineChannel> {
    transport: T,
    timeout: Duration,
    name: String,
}

impl BotClient<EngineChannel> {
    /// Starts the bot process.
    ///
    /// Replies are always taken from stderr, whatever `launch` says.
    pub fn spawn(launch: LaunchSpec, timeout: Duration) -> Result<Self, EngineError> {
        let name = launch
            .program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bot".to_string());
        let channel = EngineChannel::start(launch.responses_on(ResponseStream::Stderr))?;
        Ok(BotClient {
            transport: channel,
            timeout,
            name,
        })
    }
}

impl<T: LineTransport> BotClient<T> {
    /// Wraps an already running transport.
    pub fn new(transport: T, timeout: Duration) -> Self {
        BotClient {
            transport,
            timeout,
            name: "bot".to_string(),
        }
    }

    /// Returns the reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the liveness of the bot process.
    pub fn state(&self) -> SessionState {
        self.transport.state()
    }

    /// Asks the bot for a move in `position`.
    ///
    /// The request is sent exactly once and never retried. The reply is
    /// parsed but not checked for legality.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Timeout`] if no line arrives in time
    /// - [`EngineError::ChannelClosed`] if the bot has exited
    /// - [`EngineError::Protocol`] if the reply is empty or not a move
    pub async fn request_move(&mut self, position: &Position) -> Result<Move, EngineError> {
        let request = format!("GET PLAY {}", position.fen());
        self.transport.send_line(&request).await?;
        let reply = self.transport.recv_line(self.timeout).await?;
        debug!(bot = %self.name, %reply, "bot replied");

        if reply.is_empty() {
            return Err(EngineError::Protocol("bot returned no move".to_string()));
        }
        if reply == UNKNOWN_MESSAGE {
            return Err(EngineError::Protocol(
                "bot did not recognise the request".to_string(),
            ));
        }
        Move::from_uci(&reply)
            .map_err(|e| EngineError::Protocol(format!("unparseable bot reply {:?}: {}", reply, e)))
    }

    /// Runs the bot's diagnostic on `position`.
    ///
    /// The bot prints its findings to stdout and sends no reply, so this
    /// only writes the command.
    pub async fn self_test(&mut self, position: &Position) -> Result<(), EngineError> {
        self.transport
            .send_line(&format!("GET TEST {}", position.fen()))
            .await
    }

    /// Asks the bot to exit and closes the session.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.transport.state() == SessionState::Running {
            // A bot that already died cannot be told to exit.
            let _ = self.transport.send_line("EXIT").await;
        }
        self.transport.close().await
    }
}

#[async_trait]
impl<T: LineTransport> MoveSource for BotClient<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request_move(&mut self, position: &Position) -> Result<Move, EngineError> {
        BotClient::request_move(self, position).await
    }

    async fn restart(&mut self) -> Result<(), EngineError> {
        info!(bot = %self.name, "restarting bot");
        self.transport.restart().await
    }

    async fn shutdown(&mut self) -> Result<(), EngineError> {
        BotClient::shutdown(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedTransport};
    use chess_position::{Board, Square};

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn play_request_returns_parsed_move() {
        let mut bot = BotClient::new(ScriptedTransport::with_lines(&["e2e4"]), WAIT);
        let m = bot.request_move(&Position::new()).await.unwrap();
        assert_eq!(m.from(), Square::E2);
        assert_eq!(m.to(), Square::E4);
        assert_eq!(m.promotion(), None);
    }

    #[tokio::test]
    async fn request_is_sent_exactly_once() {
        let mut bot = BotClient::new(ScriptedTransport::with_lines(&["e7e5"]), WAIT);
        let mut board = Board::new();
        board.apply("e2e4".parse().unwrap()).unwrap();
        bot.request_move(board.position()).await.unwrap();
        assert_eq!(
            bot.transport.sent,
            vec!["GET PLAY rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_reply_is_a_protocol_error() {
        let board = Board::new();
        let before = board.current();
        let mut bot = BotClient::new(ScriptedTransport::with_lines(&[""]), WAIT);
        let result = bot.request_move(board.position()).await;
        assert!(matches!(result, Err(EngineError::Protocol(_))));
        assert_eq!(board.current(), before);
    }

    #[tokio::test]
    async fn garbage_reply_is_a_protocol_error() {
        let mut bot = BotClient::new(
            ScriptedTransport::with_lines(&["Unknown Message", "zz99"]),
            WAIT,
        );
        assert!(matches!(
            bot.request_move(&Position::new()).await,
            Err(EngineError::Protocol(_))
        ));
        assert!(matches!(
            bot.request_move(&Position::new()).await,
            Err(EngineError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn silent_bot_times_out_within_bound() {
        let mut transport = ScriptedTransport::default();
        transport.push(Reply::Silence);
        let mut bot = BotClient::new(transport, WAIT);
        let started = std::time::Instant::now();
        let result = bot.request_move(&Position::new()).await;
        assert!(matches!(result, Err(EngineError::Timeout(d)) if d == WAIT));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_for_the_next_position() {
        let mut transport = ScriptedTransport::default();
        transport.push(Reply::Silence);
        // What the bot eventually says about the first position.
        transport.push(Reply::Line("e2e4"));
        let mut bot = BotClient::new(transport, WAIT);

        let err = bot.request_move(&Position::new()).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(bot.state(), SessionState::Failed);

        let mut board = Board::new();
        board.apply("g1f3".parse().unwrap()).unwrap();
        board.apply("g8f6".parse().unwrap()).unwrap();
        assert!(matches!(
            bot.request_move(board.position()).await,
            Err(EngineError::ChannelClosed)
        ));
        assert_eq!(bot.transport.sent.len(), 1);

        MoveSource::restart(&mut bot).await.unwrap();
        bot.transport.replies.clear();
        bot.transport.push(Reply::Line("b1c3"));
        assert_eq!(bot.request_move(board.position()).await.unwrap().to_uci(), "b1c3");
    }

    #[tokio::test]
    async fn dead_bot_stays_dead_until_restart() {
        let mut transport = ScriptedTransport::default();
        transport.push(Reply::Closed);
        let mut bot = BotClient::new(transport, WAIT);

        let err = bot.request_move(&Position::new()).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            bot.request_move(&Position::new()).await,
            Err(EngineError::ChannelClosed)
        ));

        MoveSource::restart(&mut bot).await.unwrap();
        bot.transport.push(Reply::Line("d2d4"));
        let m = bot.request_move(&Position::new()).await.unwrap();
        assert_eq!(m.to_uci(), "d2d4");
        assert_eq!(bot.transport.restarts, 1);
    }

    #[tokio::test]
    async fn shutdown_sends_exit_once() {
        let mut bot = BotClient::new(ScriptedTransport::default(), WAIT);
        bot.shutdown().await.unwrap();
        bot.shutdown().await.unwrap();
        assert_eq!(bot.transport.sent, vec!["EXIT".to_string()]);
        assert_eq!(bot.state(), SessionState::Exited);
    }

    #[tokio::test]
    async fn self_test_writes_test_command() {
        let mut bot = BotClient::new(ScriptedTransport::default(), WAIT);
        bot.self_test(&Position::new()).await.unwrap();
        assert!(bot.transport.sent[0].starts_with("GET TEST rnbqkbnr/"));
    }
}
