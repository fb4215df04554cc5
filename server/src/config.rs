//! Server settings and the errors that can stop the server from starting.

use crate::admission::DEFAULT_QUEUE_CAPACITY;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LEADERBOARD_PATH: &str = "top5_clients.log";
pub const DEFAULT_SLOT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_INPUT_POLL_TIMEOUT: Duration = Duration::from_millis(10);
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("registration channel {path}: {source}")]
    Registration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Everything the server needs to run.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding the `*.lvl` files each session plays through
    pub levels_dir: PathBuf,
    /// Concurrent sessions, and the number of workers
    pub max_games: usize,
    pub register_pipe: PathBuf,
    pub queue_capacity: usize,
    /// Delay between session table scans while every slot is taken
    pub slot_poll_interval: Duration,
    /// How long the player task waits for a command before rechecking shutdown
    pub input_poll_timeout: Duration,
    pub leaderboard_path: PathBuf,
    /// How long to wait for a client to open its end of the outbound channel
    pub open_timeout: Duration,
}

impl ServerConfig {
    pub fn new(
        levels_dir: impl Into<PathBuf>,
        max_games: usize,
        register_pipe: impl Into<PathBuf>,
    ) -> Self {
        Self {
            levels_dir: levels_dir.into(),
            max_games,
            register_pipe: register_pipe.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            slot_poll_interval: DEFAULT_SLOT_POLL_INTERVAL,
            input_poll_timeout: DEFAULT_INPUT_POLL_TIMEOUT,
            leaderboard_path: PathBuf::from(DEFAULT_LEADERBOARD_PATH),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_games == 0 {
            return Err(ServerError::Config(
                "max games must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ServerError::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.slot_poll_interval.is_zero() || self.input_poll_timeout.is_zero() {
            return Err(ServerError::Config(
                "poll intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
