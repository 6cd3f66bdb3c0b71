use clap::Parser;
use client::ClientChannel;
use log::{info, warn};
use rand::Rng;
use shared::gameplay::{self, ChatMessage, PositionUpdate};
use shared::{ClientConfig, EventPacket, PacketEvent, PacketRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    /// Player identity announced to the server
    #[arg(short = 'p', long, default_value = "player")]
    player: String,

    /// Number of position updates to send before disconnecting
    #[arg(short = 'u', long, default_value = "100")]
    updates: u32,

    /// Milliseconds between position updates
    #[arg(short = 'i', long, default_value = "50")]
    interval_ms: u64,

    /// Seconds to wait for the handshake
    #[arg(long, default_value = "5")]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let registry = Arc::new(PacketRegistry::new());
    gameplay::register_packets(&registry)?;

    let client = ClientChannel::bind(args.server, ClientConfig::new(&args.player), registry).await?;
    client
        .interceptor()
        .set_handler(|event: &PacketEvent<EventPacket>| {
            if let Some(chat) = event.packet.payload::<ChatMessage>() {
                info!("[{}] {}", event.packet.player_id, chat.text);
            }
        });

    info!("Connecting to: {}", args.server);
    timeout(Duration::from_secs(args.connect_timeout), client.connect()).await??;

    client
        .send_event(ChatMessage {
            text: format!("{} joined", args.player),
        })
        .await?;

    let mut ticker = interval(Duration::from_millis(args.interval_ms.max(1)));
    let (mut x, mut z) = (0.0f32, 0.0f32);

    for _ in 0..args.updates {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        // Random walk on the ground plane
        {
            let mut rng = rand::thread_rng();
            x += rng.gen_range(-1.0..=1.0);
            z += rng.gen_range(-1.0..=1.0);
        }

        if let Err(e) = client.send_event(PositionUpdate { x, y: 0.0, z }).await {
            warn!("Position update failed: {}", e);
            break;
        }
    }

    client.disconnect().await?;
    Ok(())
}
