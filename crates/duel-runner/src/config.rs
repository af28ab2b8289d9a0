//! Configuration file loading.
//!
//! Settings come from `duel.toml` in the current directory. Every section
//! and key is optional; a missing file means all defaults.

use crate::orchestrator::{Seat, Seats, DEFAULT_MAX_PLIES};
use engine_link::{EngineOptions, LaunchSpec, ResponseStream, SearchLimit, MAX_SKILL_LEVEL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML or has fields of the wrong type.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// The `[bot]` section: the custom bot process.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    /// Path to the bot executable.
    pub path: PathBuf,
    pub args: Vec<String>,
    /// Working directory of the bot process.
    pub working_dir: Option<PathBuf>,
    /// How long to wait for a reply line.
    pub timeout_ms: u64,
    /// Pass the bot's stdout through to the terminal.
    pub show_output: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            path: PathBuf::from("src/chess_release"),
            args: Vec::new(),
            working_dir: Some(PathBuf::from("src")),
            timeout_ms: 10_000,
            show_output: false,
        }
    }
}

impl BotConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Builds the launch parameters, resolving relative paths against `base`.
    pub fn launch_spec(&self, base: &Path) -> LaunchSpec {
        let mut spec = LaunchSpec::new(resolve_program(&self.path, base))
            .responses_on(ResponseStream::Stderr)
            .show_other_output(self.show_output);
        for arg in &self.args {
            spec = spec.arg(arg.clone());
        }
        if let Some(dir) = &self.working_dir {
            spec = spec.working_dir(base.join(dir));
        }
        spec
    }
}

/// The `[engine]` section: the strength-tunable UCI engine.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the engine executable. Looked up on `PATH` when bare.
    pub path: PathBuf,
    pub args: Vec<String>,
    pub skill_level: u8,
    pub threads: u32,
    pub hash_mb: u32,
    /// Search depth. Ignored when `movetime_ms` is set.
    pub depth: u32,
    pub movetime_ms: Option<u64>,
    /// Bound on the handshake and on each search.
    pub timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            path: PathBuf::from("stockfish"),
            args: Vec::new(),
            skill_level: 2,
            threads: 2,
            hash_mb: 512,
            depth: 15,
            movetime_ms: None,
            timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn launch_spec(&self, base: &Path) -> LaunchSpec {
        self.args.iter().fold(
            LaunchSpec::new(resolve_program(&self.path, base)),
            |spec, arg| spec.arg(arg.clone()),
        )
    }

    pub fn options(&self) -> EngineOptions {
        let limit = match self.movetime_ms {
            Some(ms) => SearchLimit::MoveTime(ms),
            None => SearchLimit::Depth(self.depth),
        };
        EngineOptions {
            threads: self.threads,
            hash_mb: self.hash_mb,
            skill_level: self.skill_level,
            limit,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

/// The `[game]` section.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    pub white: Seat,
    pub black: Seat,
    pub max_plies: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            white: Seat::Tunable,
            black: Seat::Bot,
            max_plies: DEFAULT_MAX_PLIES,
        }
    }
}

impl GameConfig {
    pub fn seats(&self) -> Seats {
        Seats {
            white: self.white,
            black: self.black,
        }
    }
}

/// Everything in `duel.toml`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct DuelConfig {
    pub bot: BotConfig,
    pub engine: EngineConfig,
    pub game: GameConfig,
}

impl DuelConfig {
    /// Loads `duel.toml` from the current directory, or defaults if absent.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads and validates a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: DuelConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the default configuration file path.
    pub fn config_path() -> PathBuf {
        PathBuf::from("duel.toml")
    }

    /// Checks value ranges that the TOML types cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.skill_level > MAX_SKILL_LEVEL {
            return Err(ConfigError::Invalid(format!(
                "engine.skill_level must be 0..={}, got {}",
                MAX_SKILL_LEVEL, self.engine.skill_level
            )));
        }
        for (key, value) in [
            ("bot.timeout_ms", self.bot.timeout_ms),
            ("engine.timeout_ms", self.engine.timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", key)));
            }
        }
        if self.engine.threads == 0 {
            return Err(ConfigError::Invalid("engine.threads must be positive".into()));
        }
        if self.engine.movetime_ms.is_none() && self.engine.depth == 0 {
            return Err(ConfigError::Invalid("engine.depth must be positive".into()));
        }
        if self.game.max_plies == 0 {
            return Err(ConfigError::Invalid("game.max_plies must be positive".into()));
        }
        Ok(())
    }
}

/// Makes a relative program path with a directory part absolute against
/// `base`. Bare names are left for `PATH` lookup.
fn resolve_program(program: &Path, base: &Path) -> PathBuf {
    if program.is_relative() && program.components().count() > 1 {
        base.join(program)
    } else {
        program.to_path_buf()
    }
}
