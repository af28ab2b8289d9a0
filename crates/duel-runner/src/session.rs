//! Line commands of the interactive terminal session.
//!
//! Each command stands in for one control of the board window: pixel clicks,
//! the "Print FEN", "Input FEN", "Start Game" and "Get Bot Move" buttons,
//! plus a few conveniences. Output goes to any [`Write`] so sessions can be
//! scripted in tests.

use crate::autoplay::{run_until_done, start_game, CancelToken, LoopOutcome};
use crate::orchestrator::{ClickOutcome, EngineKind, Orchestrator, Seat, Seats};
use chess_position::{BoardGeometry, LegalityOracle, Square};
use std::io::{self, Write};
use std::str::FromStr;

/// Help text printed by `help`.
pub const HELP: &str = "\
commands:
  click <x> <y>        click a pixel on a 400px board (white at the bottom)
  sel <square>         click a square, e.g. `sel e2`
  bot                  ask the bot for a move
  engine               ask the tunable engine for a move
  step                 let the engine whose seat is to move play one ply
  auto                 play engine plies until the game ends (Ctrl-C stops)
  start [level]        new engine-vs-bot game at skill level 0-20
  seats <white> <black>  human, tunable or bot for each color
  fen                  print the position
  load <fen>           set up a position
  undo                 take back one ply
  new                  starting position
  restart <bot|engine> restart a dead engine process
  board                show the board
  quit                 leave";

/// A parsed session command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Click { x: f64, y: f64 },
    Select(Square),
    Request(EngineKind),
    Step,
    Auto,
    Start(Option<u8>),
    Seats(Seats),
    Fen,
    Load(String),
    Undo,
    New,
    Restart(EngineKind),
    Board,
    Help,
    Quit,
}

fn parse_engine(word: Option<&str>) -> Result<EngineKind, String> {
    match word {
        Some("bot") => Ok(EngineKind::Bot),
        Some("engine") | Some("tunable") => Ok(EngineKind::Tunable),
        _ => Err("expected `bot` or `engine`".to_string()),
    }
}

fn parse_number<T: FromStr>(word: Option<&str>, what: &str) -> Result<T, String> {
    word.ok_or_else(|| format!("missing {}", what))?
        .parse()
        .map_err(|_| format!("bad {}", what))
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let mut args = rest.split_whitespace();
        let command = match word.to_ascii_lowercase().as_str() {
            "click" => Command::Click {
                x: parse_number(args.next(), "x coordinate")?,
                y: parse_number(args.next(), "y coordinate")?,
            },
            "sel" | "select" => {
                let square = args.next().ok_or("missing square")?;
                Command::Select(
                    square
                        .parse()
                        .map_err(|_| format!("bad square {:?}", square))?,
                )
            }
            "bot" => Command::Request(EngineKind::Bot),
            "engine" => Command::Request(EngineKind::Tunable),
            "step" => Command::Step,
            "auto" => Command::Auto,
            "start" => match args.next() {
                Some(level) => Command::Start(Some(parse_number(Some(level), "level")?)),
                None => Command::Start(None),
            },
            "seats" => {
                let white: Seat = args.next().ok_or("missing white seat")?.parse()?;
                let black: Seat = args.next().ok_or("missing black seat")?.parse()?;
                Command::Seats(Seats { white, black })
            }
            "fen" => Command::Fen,
            "load" if !rest.is_empty() => Command::Load(rest.to_string()),
            "load" => return Err("missing FEN".to_string()),
            "undo" => Command::Undo,
            "new" => Command::New,
            "restart" => Command::Restart(parse_engine(args.next())?),
            "board" | "show" => Command::Board,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "" => return Err("empty command".to_string()),
            other => return Err(format!("unknown command {:?}, try `help`", other)),
        };
        Ok(command)
    }
}

/// Whether the session continues after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// State of one terminal session around an orchestrator.
pub struct Session<W> {
    out: W,
    geometry: BoardGeometry,
    default_level: u8,
    cancel: CancelToken,
}

impl<W: Write> Session<W> {
    pub fn new(out: W, default_level: u8, cancel: CancelToken) -> Self {
        Session {
            out,
            geometry: BoardGeometry::new(400.0),
            default_level,
            cancel,
        }
    }

    pub fn with_geometry(mut self, geometry: BoardGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Parses and runs one input line.
    pub async fn handle_line<O: LegalityOracle>(
        &mut self,
        orchestrator: &mut Orchestrator<O>,
        line: &str,
    ) -> io::Result<Flow> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }
        match line.parse::<Command>() {
            Ok(command) => self.execute(orchestrator, command).await,
            Err(message) => {
                writeln!(self.out, "error: {}", message)?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Runs one command. Failures are reported as status lines.
    pub async fn execute<O: LegalityOracle>(
        &mut self,
        orchestrator: &mut Orchestrator<O>,
        command: Command,
    ) -> io::Result<Flow> {
        match command {
            Command::Click { x, y } => {
                let outcome = orchestrator.click_pixel(&self.geometry, x, y);
                self.report_click(orchestrator, outcome)?;
            }
            Command::Select(square) => {
                let outcome = orchestrator.click(square);
                self.report_click(orchestrator, outcome)?;
            }
            Command::Request(mover) => match orchestrator.request_engine_move(mover).await {
                Ok(record) => {
                    writeln!(self.out, "{}", record)?;
                    self.show(orchestrator)?;
                }
                Err(e) => writeln!(self.out, "error: {}", e)?,
            },
            Command::Step => match orchestrator.step().await {
                Ok(Some(record)) => {
                    writeln!(self.out, "{}", record)?;
                    self.show(orchestrator)?;
                }
                Ok(None) => writeln!(self.out, "{}", orchestrator.phase())?,
                Err(e) => writeln!(self.out, "error: {}", e)?,
            },
            Command::Auto => self.auto(orchestrator).await?,
            Command::Start(level) => {
                let level = level.unwrap_or(self.default_level);
                match start_game(orchestrator, level).await {
                    Ok(()) => {
                        writeln!(self.out, "game started at level {}", level)?;
                        self.auto(orchestrator).await?;
                    }
                    Err(e) => writeln!(self.out, "error: {}", e)?,
                }
            }
            Command::Seats(seats) => {
                orchestrator.set_seats(seats);
                writeln!(
                    self.out,
                    "white: {}, black: {} - {}",
                    seats.white,
                    seats.black,
                    orchestrator.phase()
                )?;
            }
            Command::Fen => writeln!(self.out, "{}", orchestrator.board().fen())?,
            Command::Load(fen) => match orchestrator.reset(&fen) {
                Ok(()) => self.show(orchestrator)?,
                Err(e) => writeln!(self.out, "error: {}", e)?,
            },
            Command::Undo => match orchestrator.undo() {
                Some(m) => {
                    writeln!(self.out, "took back {}", m)?;
                    self.show(orchestrator)?;
                }
                None => writeln!(self.out, "nothing to undo")?,
            },
            Command::New => {
                orchestrator.new_game();
                self.show(orchestrator)?;
            }
            Command::Restart(mover) => match orchestrator.restart_engine(mover).await {
                Ok(()) => writeln!(self.out, "{} restarted", mover)?,
                Err(e) => writeln!(self.out, "error: {}", e)?,
            },
            Command::Board => self.show(orchestrator)?,
            Command::Help => writeln!(self.out, "{}", HELP)?,
            Command::Quit => return Ok(Flow::Quit),
        }
        self.out.flush()?;
        Ok(Flow::Continue)
    }

    async fn auto<O: LegalityOracle>(&mut self, orchestrator: &mut Orchestrator<O>) -> io::Result<()> {
        self.cancel.reset();
        let out = &mut self.out;
        let mut write_error = None;
        let outcome = run_until_done(orchestrator, &self.cancel, |record, board| {
            let written = writeln!(out, "{}", record).and_then(|()| writeln!(out, "{}", board.position()));
            if let Err(e) = written {
                write_error.get_or_insert(e);
            }
        })
        .await;
        if let Some(e) = write_error {
            return Err(e);
        }
        match outcome {
            LoopOutcome::Finished(result) => writeln!(self.out, "game over: {}", result),
            LoopOutcome::Cancelled => writeln!(self.out, "stopped"),
            LoopOutcome::Halted(e) => writeln!(self.out, "error: {}", e),
            LoopOutcome::AwaitingHuman => writeln!(self.out, "{}", orchestrator.phase()),
        }
    }

    fn report_click<O: LegalityOracle>(
        &mut self,
        orchestrator: &Orchestrator<O>,
        outcome: ClickOutcome,
    ) -> io::Result<()> {
        match outcome {
            ClickOutcome::Ignored => writeln!(self.out, "{}", orchestrator.phase()),
            ClickOutcome::Selected(square) => writeln!(self.out, "selected {}", square),
            ClickOutcome::Rejected(m) => writeln!(self.out, "illegal move {}", m),
            ClickOutcome::Moved(record) => {
                writeln!(self.out, "{}", record)?;
                self.show(orchestrator)
            }
        }
    }

    fn show<O: LegalityOracle>(&mut self, orchestrator: &Orchestrator<O>) -> io::Result<()> {
        writeln!(self.out, "{}", orchestrator.board().position())?;
        writeln!(self.out, "{}", orchestrator.phase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedMover;
    use chess_position::StandardRules;

    fn session() -> Session<Vec<u8>> {
        Session::new(Vec::new(), 2, CancelToken::new())
    }

    fn output(session: Session<Vec<u8>>) -> String {
        String::from_utf8(session.into_inner()).unwrap()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            "click 280 400".parse::<Command>(),
            Ok(Command::Click { x: 280.0, y: 400.0 })
        );
        assert_eq!("sel e2".parse(), Ok(Command::Select(Square::E2)));
        assert_eq!("BOT".parse(), Ok(Command::Request(EngineKind::Bot)));
        assert_eq!("start".parse(), Ok(Command::Start(None)));
        assert_eq!("start 5".parse(), Ok(Command::Start(Some(5))));
        assert_eq!(
            "seats human bot".parse(),
            Ok(Command::Seats(Seats {
                white: Seat::Human,
                black: Seat::Bot
            }))
        );
        assert_eq!(
            "load 8/8/8/8/8/8/8/K6k w - - 0 1".parse(),
            Ok(Command::Load("8/8/8/8/8/8/8/K6k w - - 0 1".to_string()))
        );
        assert_eq!(
            "restart engine".parse(),
            Ok(Command::Restart(EngineKind::Tunable))
        );
    }

    #[test]
    fn rejects_bad_commands() {
        assert!("click 10".parse::<Command>().is_err());
        assert!("sel z9".parse::<Command>().is_err());
        assert!("start high".parse::<Command>().is_err());
        assert!("load".parse::<Command>().is_err());
        assert!("restart".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }

    #[tokio::test]
    async fn click_session_plays_a_move() {
        let mut orch = Orchestrator::new(StandardRules, Seats::HUMAN, None, None);
        let mut session = session();
        for line in ["click 230 330", "click 230 230", "fen"] {
            assert_eq!(
                session.handle_line(&mut orch, line).await.unwrap(),
                Flow::Continue
            );
        }
        let text = output(session);
        assert!(text.contains("selected e2"));
        assert!(text.contains("1. white (human) plays e2e4"));
        assert!(text.contains("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"));
    }

    #[tokio::test]
    async fn errors_are_reported_and_session_continues() {
        let mut orch = Orchestrator::new(StandardRules, Seats::HUMAN, None, None);
        let mut session = session();
        for line in ["bot", "load nonsense", "undo", "jump"] {
            assert_eq!(
                session.handle_line(&mut orch, line).await.unwrap(),
                Flow::Continue
            );
        }
        assert_eq!(session.handle_line(&mut orch, "quit").await.unwrap(), Flow::Quit);
        let text = output(session);
        assert!(text.contains("error: no bot configured"));
        assert!(text.contains("error: invalid FEN"));
        assert!(text.contains("nothing to undo"));
        assert!(text.contains("unknown command"));
    }

    #[tokio::test]
    async fn start_runs_the_scripted_game() {
        let mut orch = Orchestrator::new(
            StandardRules,
            Seats::HUMAN,
            ScriptedMover::new("fish", &["f2f3", "g2g4"]).boxed(),
            ScriptedMover::new("bot", &["e7e5", "d8h4"]).boxed(),
        );
        let mut session = session();
        session.handle_line(&mut orch, "start 3").await.unwrap();
        let text = output(session);
        assert!(text.contains("game started at level 3"));
        assert!(text.contains("4. black (bot) plays d8h4"));
        assert!(text.contains("game over: checkmate, black wins"));
    }
}
