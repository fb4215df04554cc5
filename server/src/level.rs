//! Level layouts and where they come from.
//!
//! A level file is a short header followed by the grid:
//!
//! ```text
//! # first level
//! tempo 150
//! player 0
//! agent 1 D D A A C S
//! grid
//! WWWWWWW
//! WP...MW
//! W  @  W
//! WWWWWWW
//! ```
//!
//! Grid bytes are `W` wall, `.` collectible, `@` portal, `P` player start,
//! `M` agent start and space for an empty cell. `agent` lines are matched to
//! `M` cells in row-major order; shorter rows are padded with empty cells.

use crate::actor::{Command, Position};
use log::debug;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LEVEL_EXTENSION: &str = "lvl";
pub const DEFAULT_TEMPO_MS: u32 = 200;

#[derive(Debug, Error)]
pub enum LevelError {
    #[error("cannot read level {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("level has no grid section")]
    MissingGrid,
    #[error("level grid is empty")]
    EmptyGrid,
    #[error("level must have exactly one player start, found {0}")]
    PlayerCount(usize),
    #[error("{scripts} agent scripts for {agents} agent starts")]
    TooManyScripts { scripts: usize, agents: usize },
    #[error("unknown level {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Empty,
    Wall,
    Collectible,
    Portal,
}

#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub position: Position,
    pub period: u32,
    pub script: Vec<Command>,
}

/// Parsed, validated layout of one level.
#[derive(Debug, Clone)]
pub struct Level {
    pub name: String,
    pub width: usize,
    pub height: usize,
    pub tempo: u32,
    pub tiles: Vec<Tile>,
    pub player: Position,
    pub player_period: u32,
    pub agents: Vec<AgentSpec>,
}

impl Level {
    pub fn collectible_count(&self) -> usize {
        self.tiles
            .iter()
            .filter(|tile| **tile == Tile::Collectible)
            .count()
    }

    pub fn parse(name: &str, source: &str) -> Result<Self, LevelError> {
        let mut tempo = DEFAULT_TEMPO_MS;
        let mut player_period = 0;
        let mut scripts: Vec<(u32, Vec<Command>)> = Vec::new();
        let mut lines = source.lines().enumerate();
        let mut found_grid = false;

        for (index, raw) in lines.by_ref() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut words = line.split_whitespace();
            let key = words.next().unwrap_or_default().to_ascii_lowercase();
            match key.as_str() {
                "grid" => {
                    found_grid = true;
                    break;
                }
                "tempo" => tempo = parse_number(words.next(), line_no, "tempo")?,
                "player" => player_period = parse_number(words.next(), line_no, "player period")?,
                "agent" => {
                    let period = parse_number(words.next(), line_no, "agent period")?;
                    let script = words
                        .map(|token| {
                            Command::parse_token(token).ok_or_else(|| LevelError::Parse {
                                line: line_no,
                                message: format!("bad agent command {token:?}"),
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    scripts.push((period, script));
                }
                other => {
                    return Err(LevelError::Parse {
                        line: line_no,
                        message: format!("unknown key {other:?}"),
                    })
                }
            }
        }

        if !found_grid {
            return Err(LevelError::MissingGrid);
        }

        let mut rows: Vec<(usize, &[u8])> = lines
            .map(|(index, raw)| (index + 1, raw.trim_end_matches('\r').as_bytes()))
            .collect();
        while rows.last().is_some_and(|(_, row)| row.iter().all(|b| b.is_ascii_whitespace())) {
            rows.pop();
        }

        let height = rows.len();
        let width = rows.iter().map(|(_, row)| row.len()).max().unwrap_or(0);
        if height == 0 || width == 0 {
            return Err(LevelError::EmptyGrid);
        }

        let mut tiles = vec![Tile::Empty; width * height];
        let mut players = Vec::new();
        let mut agent_starts = Vec::new();

        for (y, (line_no, row)) in rows.iter().enumerate() {
            for (x, byte) in row.iter().enumerate() {
                let tile = match byte {
                    b' ' => Tile::Empty,
                    b'W' => Tile::Wall,
                    b'.' => Tile::Collectible,
                    b'@' => Tile::Portal,
                    b'P' => {
                        players.push(Position::new(x, y));
                        Tile::Empty
                    }
                    b'M' => {
                        agent_starts.push(Position::new(x, y));
                        Tile::Empty
                    }
                    other => {
                        return Err(LevelError::Parse {
                            line: *line_no,
                            message: format!("unknown tile {:?}", *other as char),
                        })
                    }
                };
                tiles[y * width + x] = tile;
            }
        }

        if players.len() != 1 {
            return Err(LevelError::PlayerCount(players.len()));
        }
        if scripts.len() > agent_starts.len() {
            return Err(LevelError::TooManyScripts {
                scripts: scripts.len(),
                agents: agent_starts.len(),
            });
        }

        let mut scripts = scripts.into_iter();
        let agents = agent_starts
            .into_iter()
            .map(|position| {
                let (period, script) = scripts.next().unwrap_or_default();
                AgentSpec {
                    position,
                    period,
                    script,
                }
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            width,
            height,
            tempo,
            tiles,
            player: players[0],
            player_period,
            agents,
        })
    }
}

fn parse_number(word: Option<&str>, line: usize, what: &str) -> Result<u32, LevelError> {
    word.and_then(|w| w.parse().ok())
        .ok_or_else(|| LevelError::Parse {
            line,
            message: format!("expected a number for {what}"),
        })
}

/// Supplies the ordered list of levels a session plays through.
pub trait LevelSource: Send + Sync {
    fn level_names(&self) -> Vec<String>;

    fn load(&self, name: &str) -> Result<Level, LevelError>;
}

/// Levels read from `*.lvl` files in a directory, played in file-name order.
#[derive(Debug, Clone)]
pub struct DirectoryLevels {
    dir: PathBuf,
}

impl DirectoryLevels {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl LevelSource for DirectoryLevels {
    fn level_names(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list levels in {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .filter(|name| {
                Path::new(name).extension().and_then(|ext| ext.to_str()) == Some(LEVEL_EXTENSION)
            })
            .collect();
        names.sort();
        names
    }

    fn load(&self, name: &str) -> Result<Level, LevelError> {
        let source =
            std::fs::read_to_string(self.dir.join(name)).map_err(|source| LevelError::Io {
                name: name.to_string(),
                source,
            })?;
        Level::parse(name, &source)
    }
}

/// In-memory levels, played in insertion order.
#[derive(Debug, Clone, Default)]
pub struct StaticLevels {
    levels: Vec<(String, String)>,
}

impl StaticLevels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, name: &str, source: &str) -> Self {
        self.levels.push((name.to_string(), source.to_string()));
        self
    }
}

impl LevelSource for StaticLevels {
    fn level_names(&self) -> Vec<String> {
        self.levels.iter().map(|(name, _)| name.clone()).collect()
    }

    fn load(&self, name: &str) -> Result<Level, LevelError> {
        let (_, source) = self
            .levels
            .iter()
            .find(|(candidate, _)| candidate == name)
            .ok_or_else(|| LevelError::Unknown(name.to_string()))?;
        Level::parse(name, source)
    }
}
