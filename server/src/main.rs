use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use shared::TerrainParams;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of players
    #[arg(short, long, default_value = "8")]
    max_players: usize,

    /// Player-state broadcast interval in milliseconds
    #[arg(short, long, default_value = "50")]
    broadcast_ms: u64,

    /// Worker threads for map generation (0 = one per core)
    #[arg(short, long, default_value = "0")]
    workers: usize,

    /// Map width in samples
    #[arg(long, default_value = "256")]
    map_width: usize,

    /// Map height in samples
    #[arg(long, default_value = "256")]
    map_height: usize,

    /// World seed (omit for a random one)
    #[arg(long)]
    seed: Option<u32>,

    /// Fractal octave count
    #[arg(long, default_value = "4")]
    octaves: u32,

    /// Base noise frequency
    #[arg(long, default_value = "0.015")]
    frequency: f64,

    /// Frequency multiplier per octave
    #[arg(long, default_value = "2.0")]
    lacunarity: f64,

    /// Amplitude multiplier per octave
    #[arg(long, default_value = "0.5")]
    persistence: f64,

    /// Base noise amplitude
    #[arg(long, default_value = "10.0")]
    amplitude: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_players: args.max_players,
        broadcast_interval: Duration::from_millis(args.broadcast_ms),
        workers: args.workers,
        terrain: TerrainParams {
            width: args.map_width,
            height: args.map_height,
            seed: args.seed,
            octaves: args.octaves,
            frequency: args.frequency,
            lacunarity: args.lacunarity,
            persistence: args.persistence,
            amplitude: args.amplitude,
        },
        ..ServerConfig::default()
    };

    info!(
        "Starting server on {}:{} (max {} players, {}x{} map)",
        config.host, config.port, config.max_players, config.terrain.width, config.terrain.height
    );

    let server = Server::bind(config).await?;
    let handle = server.spawn();

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    handle.shutdown().await;

    Ok(())
}
