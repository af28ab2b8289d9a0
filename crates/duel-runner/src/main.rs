use chess_position::{Position, StandardRules};
use clap::{Parser, Subcommand};
use duel_runner::autoplay::{run_until_done, start_game, CancelToken, LoopOutcome};
use duel_runner::config::DuelConfig;
use duel_runner::orchestrator::{EngineKind, Orchestrator, Seat, Seats};
use duel_runner::session::{Flow, Session, HELP};
use engine_link::{BotClient, MoveSource, TunableEngine};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Chess duel - a UCI engine against a custom bot, with a human at the board.
#[derive(Parser)]
#[command(name = "duel")]
#[command(about = "Play chess between a human, a UCI engine and a custom bot")]
struct Cli {
    /// Configuration file [default: duel.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session driven by line commands
    Play {
        /// Starting position
        #[arg(long)]
        fen: Option<String>,
        /// Who plays White: human, tunable or bot
        #[arg(long)]
        white: Option<Seat>,
        /// Who plays Black: human, tunable or bot
        #[arg(long)]
        black: Option<Seat>,
    },
    /// Engine (White) against bot (Black) until the game ends
    Auto {
        /// Engine skill level, 0-20
        #[arg(short, long)]
        level: Option<u8>,
        /// Print one JSON object per ply instead of boards
        #[arg(long)]
        json: bool,
    },
    /// Ask the bot for one move and check it
    BotMove {
        /// Position to ask about [default: starting position]
        #[arg(long)]
        fen: Option<String>,
    },
    /// Run the bot's self test on a position
    BotTest {
        #[arg(long)]
        fen: Option<String>,
    },
    /// Print the starting position
    Fen,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DuelConfig::load_from(path)?,
        None => DuelConfig::load()?,
    };
    let base = std::env::current_dir()?;

    match cli.command {
        Commands::Fen => println!("{}", Position::new().fen()),
        Commands::Play { fen, white, black } => {
            let seats = Seats {
                white: white.unwrap_or(config.game.white),
                black: black.unwrap_or(config.game.black),
            };
            play(&config, &base, seats, fen.as_deref()).await?;
        }
        Commands::Auto { level, json } => {
            let level = level.unwrap_or(config.engine.skill_level);
            auto(&config, &base, level, json).await?;
        }
        Commands::BotMove { fen } => bot_move(&config, &base, fen.as_deref()).await?,
        Commands::BotTest { fen } => bot_test(&config, &base, fen.as_deref()).await?,
    }
    Ok(())
}

/// Starts the engines. A failed start is logged and leaves that seat empty.
async fn connect(
    config: &DuelConfig,
    base: &Path,
    tunable: bool,
    bot: bool,
) -> (Option<Box<dyn MoveSource>>, Option<Box<dyn MoveSource>>) {
    let tunable = if tunable {
        match TunableEngine::spawn(config.engine.launch_spec(base), config.engine.options()).await {
            Ok(engine) => Some(Box::new(engine) as Box<dyn MoveSource>),
            Err(e) => {
                tracing::error!("Failed to start engine: {}", e);
                None
            }
        }
    } else {
        None
    };
    let bot = if bot {
        match BotClient::spawn(config.bot.launch_spec(base), config.bot.timeout()) {
            Ok(client) => Some(Box::new(client) as Box<dyn MoveSource>),
            Err(e) => {
                tracing::error!("Failed to start bot: {}", e);
                None
            }
        }
    } else {
        None
    };
    (tunable, bot)
}

/// Spawns a task that cancels `token` on every Ctrl-C.
fn cancel_on_interrupt(token: CancelToken) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current ply");
            token.cancel();
        }
    });
}

async fn play(
    config: &DuelConfig,
    base: &Path,
    seats: Seats,
    fen: Option<&str>,
) -> anyhow::Result<()> {
    let (tunable, bot) = connect(config, base, true, true).await;
    let mut orchestrator = Orchestrator::new(StandardRules, seats, tunable, bot)
        .with_max_plies(config.game.max_plies);
    if let Some(fen) = fen {
        orchestrator.reset(fen)?;
    }

    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone());
    let mut session = Session::new(std::io::stdout(), config.engine.skill_level, cancel);
    println!("{}\n", HELP);
    session.handle_line(&mut orchestrator, "board").await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if session.handle_line(&mut orchestrator, &line).await? == Flow::Quit {
            break;
        }
    }
    orchestrator.shutdown().await?;
    Ok(())
}

async fn auto(config: &DuelConfig, base: &Path, level: u8, json: bool) -> anyhow::Result<()> {
    let (tunable, bot) = connect(config, base, true, true).await;
    let mut orchestrator = Orchestrator::new(StandardRules, Seats::HUMAN, tunable, bot)
        .with_max_plies(config.game.max_plies);
    start_game(&mut orchestrator, level).await?;

    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone());
    let outcome = run_until_done(&mut orchestrator, &cancel, |record, board| {
        if json {
            match serde_json::to_string(record) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!("Failed to encode ply: {}", e),
            }
        } else {
            println!("{}\n{}\n", record, board.position());
        }
    })
    .await;

    let shutdown = orchestrator.shutdown().await;
    match outcome {
        LoopOutcome::Finished(result) => eprintln!("Game over: {}", result),
        LoopOutcome::Cancelled => eprintln!("Stopped after {} plies", orchestrator.board().ply_count()),
        LoopOutcome::AwaitingHuman => eprintln!("{}", orchestrator.phase()),
        LoopOutcome::Halted(e) => {
            eprintln!("Final position: {}", orchestrator.board().fen());
            return Err(e.into());
        }
    }
    shutdown?;
    Ok(())
}

async fn bot_move(config: &DuelConfig, base: &Path, fen: Option<&str>) -> anyhow::Result<()> {
    let (_, bot) = connect(config, base, false, true).await;
    let mut orchestrator = Orchestrator::new(StandardRules, Seats::HUMAN, None, bot);
    if let Some(fen) = fen {
        orchestrator.reset(fen)?;
    }
    let result = orchestrator.request_engine_move(EngineKind::Bot).await;
    orchestrator.shutdown().await?;
    let record = result?;
    println!("{}", record);
    println!("{}", record.fen_after);
    Ok(())
}

async fn bot_test(config: &DuelConfig, base: &Path, fen: Option<&str>) -> anyhow::Result<()> {
    let position = match fen {
        Some(fen) => Position::from_fen(fen)?,
        None => Position::new(),
    };
    // The diagnostic prints to the bot's stdout, so pass it through and give
    // the bot its full reply timeout to finish before it is killed.
    let launch = config
        .bot
        .launch_spec(base)
        .show_other_output(true)
        .close_grace(config.bot.timeout());
    let mut bot = BotClient::spawn(launch, config.bot.timeout())?;
    bot.self_test(&position).await?;
    bot.shutdown().await?;
    Ok(())
}
