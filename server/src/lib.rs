//! # Grid Game Server Library
//!
//! This library hosts many independent grid-game sessions at once. Clients
//! register over a well-known channel, get a slot when one is free, and then
//! play through a sequence of levels over their own pair of byte channels.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! Connection requests are parsed by a single listener and pushed into a
//! bounded FIFO queue. A full queue blocks the listener, which in turn makes
//! new clients wait before they are even queued.
//!
//! ### Session Capacity
//! A fixed pool of workers takes requests off the queue, reserves a slot in
//! the session table, opens the client's channels and acknowledges the
//! registration. The table never holds more sessions than its capacity.
//!
//! ### Gameplay
//! Each session runs its levels one round at a time. During a round the
//! player, every agent and the snapshot notifier are separate tasks moving
//! on one shared board.
//!
//! ## Module Organization
//!
//! ### Admission (`admission`, `worker`, `network`)
//! - `admission`: the bounded request queue
//! - `worker`: slot reservation, channel opening, session start
//! - `network`: the `Server` type, the registration listener and
//!   leaderboard dumps
//!
//! ### Sessions (`session`, `game`, `notify`)
//! - `session`: the fixed-capacity session table and leaderboard ranking
//! - `game`: round control, the per-session level loop, player and agent tasks
//! - `notify`: snapshot pushing and win/loss detection
//!
//! ### Board (`board`, `actor`, `level`)
//! - `board`: the grid, its per-cell locks and all movement rules
//! - `actor`: positions, commands, cooldowns, player and agent state
//! - `level`: level file parsing and level sources
//!
//! ## Locking
//!
//! Cells carry their own mutex. Any move that touches several cells locks them
//! in ascending grid index, which is the only deadlock-avoidance mechanism on
//! the board. A board-wide reader/writer lock is held in read mode by every
//! task of a round while it moves or snapshots.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::channel::{open_registration, FifoChannelOpener};
//! use server::config::ServerConfig;
//! use server::level::DirectoryLevels;
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new("levels", 4, "/tmp/register");
//!     let levels = Arc::new(DirectoryLevels::new(&config.levels_dir));
//!     let opener = Arc::new(FifoChannelOpener::new(config.open_timeout));
//!     let registration = open_registration(&config.register_pipe)?;
//!
//!     let server = Server::new(config, levels, opener)?;
//!     server.run(registration).await?;
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod admission;
pub mod board;
pub mod channel;
pub mod config;
pub mod game;
pub mod level;
pub mod network;
pub mod notify;
pub mod session;
pub mod utils;
pub mod worker;
