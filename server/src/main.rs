use clap::Parser;
use log::{error, info, warn};
use server::channel::{create_fifo, open_registration, FifoChannelOpener};
use server::config::{
    ServerConfig, ServerError, DEFAULT_LEADERBOARD_PATH, DEFAULT_OPEN_TIMEOUT,
};
use server::level::DirectoryLevels;
use server::network::Server;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Directory containing the *.lvl level files
    levels_dir: PathBuf,
    /// Maximum number of games running at once
    max_games: usize,
    /// Path of the registration FIFO to create
    register_pipe: PathBuf,
    /// Connection requests that may wait for a worker
    #[clap(long, default_value = "10")]
    queue_capacity: usize,
    /// Delay between session slot scans, in milliseconds
    #[clap(long, default_value = "50")]
    slot_poll_ms: u64,
    /// Command read timeout of the player task, in milliseconds
    #[clap(long, default_value = "10")]
    input_poll_ms: u64,
    /// File rewritten on every SIGUSR1
    #[clap(long, default_value = DEFAULT_LEADERBOARD_PATH)]
    leaderboard: PathBuf,
    /// How long to wait for a client to open its notification FIFO
    #[clap(long, default_value_t = DEFAULT_OPEN_TIMEOUT.as_millis() as u64)]
    open_timeout_ms: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::new(self.levels_dir, self.max_games, self.register_pipe);
        config.queue_capacity = self.queue_capacity;
        config.slot_poll_interval = Duration::from_millis(self.slot_poll_ms);
        config.input_poll_timeout = Duration::from_millis(self.input_poll_ms);
        config.leaderboard_path = self.leaderboard;
        config.open_timeout = Duration::from_millis(self.open_timeout_ms);
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Args::parse().into_config();
    config.validate()?;

    let register_pipe = config.register_pipe.clone();
    create_fifo(&register_pipe).map_err(|source| ServerError::Registration {
        path: register_pipe.clone(),
        source,
    })?;
    let registration = open_registration(&register_pipe).map_err(|source| {
        ServerError::Registration {
            path: register_pipe.clone(),
            source,
        }
    })?;

    let levels = Arc::new(DirectoryLevels::new(&config.levels_dir));
    let opener = Arc::new(FifoChannelOpener::new(config.open_timeout));
    info!(
        "Serving levels from {} on {} (max {} games)",
        config.levels_dir.display(),
        register_pipe.display(),
        config.max_games
    );
    let server = Server::new(config, levels, opener)?;

    // Leaderboard dumps on SIGUSR1
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let trigger = server.leaderboard_trigger();
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            trigger.request();
        }
    });

    tokio::select! {
        result = server.run(registration) => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
            server.join_sessions().await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    if let Err(e) = std::fs::remove_file(&register_pipe) {
        warn!("Failed to remove {}: {}", register_pipe.display(), e);
    }
    Ok(())
}
