use clap::Parser;
use client::network::Client;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Nickname to join with
    #[arg(short, long, default_value = "player")]
    nickname: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut client = Client::connect(&args.server, &args.nickname).await?;
    client.request_map_data().await?;

    // Report reassembly progress until the full map is local.
    let total = client.map_size().sample_count();
    while !client.map_complete().await {
        info!(
            "Map transfer: {}/{} samples",
            client.map_samples_filled().await,
            total
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    info!("Map transfer complete ({} samples)", total);

    // Idle: the listener keeps folding in player-state broadcasts
    // until the user quits.
    let status_interval = Duration::from_secs(5);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(status_interval) => {
                if !client.is_connected() {
                    info!("Connection lost, exiting");
                    return Ok(());
                }
                info!("{} player(s) known", client.players().await.len());
            }
        }
    }

    info!("Disconnecting...");
    client.disconnect().await;
    Ok(())
}
