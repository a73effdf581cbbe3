use clap::Parser;
use log::info;
use server::config::GameConfig;
use server::game::Game;
use server::network::Server;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Simulation rate in ticks per second; overrides the config file
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// JSON game configuration; built-in defaults when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of connected players
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// Seed for dungeon generation and combat rolls
    #[arg(short, long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            GameConfig::from_file(path)?
        }
        None => GameConfig::default(),
    };
    if let Some(tick_rate) = args.tick_rate {
        config.global.tick_rate = tick_rate;
        config.validate()?;
    }
    let tick_rate = config.global.tick_rate as f64;

    let mut game = Game::new(Arc::new(config), args.seed);
    game.start_game();

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, game, tick_rate, args.max_clients).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            let _ = shutdown.send(server::network::ServerMessage::Shutdown);
        }
    });

    server.run().await?;
    Ok(())
}
