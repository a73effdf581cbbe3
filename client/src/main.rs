use clap::Parser;
use client::network::Client;
use client::profile::ProfileStore;
use log::{error, info};
use shared::PlayerClass;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Character name; stored in the profile
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Character class: fighter, rogue or barbarian
    #[arg(short = 'c', long, default_value = "fighter")]
    class: PlayerClass,

    /// Profile file holding name, gold and extractions
    #[arg(short = 'p', long, default_value = "profile.json")]
    profile: PathBuf,

    /// Wander randomly instead of idling
    #[arg(short = 'w', long)]
    wander: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut profile = ProfileStore::open(&args.profile);
    if let Some(name) = &args.name {
        if let Err(e) = profile.set_name(name) {
            error!("Could not save profile: {}", e);
        }
    }

    info!(
        "Joining {} as {} the {:?}",
        args.server,
        profile.profile().name,
        args.class
    );

    let mut client = Client::new(&args.server, args.class, profile, args.wander).await?;
    client.run().await?;

    Ok(())
}
