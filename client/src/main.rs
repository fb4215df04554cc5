use clap::Parser;
use client::network::DEFAULT_CONNECT_TIMEOUT;
use client::{Client, MoveScript};
use log::info;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Identifier used to name this client's FIFOs
    client_id: i32,

    /// Registration FIFO created by the server
    register_pipe: PathBuf,

    /// Command letters to play in a loop (W/A/S/D move, C charge, T wait, Q quit)
    #[arg(short = 'm', long, default_value = "")]
    moves: String,

    /// Play the moves once and then quit
    #[arg(long)]
    once: bool,

    /// Delay between two commands in milliseconds
    #[arg(short = 's', long, default_value = "200")]
    step_ms: u64,

    /// Directory in which the client FIFOs are created
    #[arg(long, default_value = "/tmp")]
    fifo_dir: PathBuf,

    /// How long to wait for the server to accept, in milliseconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64)]
    connect_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client {}...", args.client_id);
    info!("Registering through: {}", args.register_pipe.display());

    let mut script = MoveScript::new(&args.moves);
    if args.once {
        script = script.once();
    }

    let client = Client::connect_with_timeout(
        args.client_id,
        &args.register_pipe,
        &args.fifo_dir,
        Duration::from_millis(args.connect_timeout_ms),
    )
    .await?;
    client
        .run(script, Duration::from_millis(args.step_ms))
        .await?;

    info!("Session finished");
    Ok(())
}
