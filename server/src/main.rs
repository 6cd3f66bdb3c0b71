use clap::Parser;
use log::{error, info, warn};
use server::ServerChannel;
use shared::gameplay::{self, ChatMessage, PositionUpdate};
use shared::{EventPacket, Packet, PacketEvent, PacketRegistry, ServerConfig};
use std::sync::Arc;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (ticks per second)
    #[clap(short, long, default_value = "60")]
    tick_rate: u32,
    /// Queue depth that triggers a backpressure warning
    #[clap(short, long, default_value = "1000")]
    max_queue: usize,
    /// Seconds of silence before a session is dropped
    #[clap(short, long, default_value = "5")]
    session_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig::default()
        .with_tick_rate(args.tick_rate)
        .with_max_process_threshold(args.max_queue)
        .with_session_timeout(Duration::from_secs(args.session_timeout));

    let registry = Arc::new(PacketRegistry::new());
    gameplay::register_packets(&registry)?;

    let address = format!("{}:{}", args.host, args.port);
    let server = ServerChannel::bind(address.as_str(), config, registry).await?;

    server.interceptor().on_connect(|event| {
        info!("Player {} joined from {}", event.packet.player_id, event.sender);
    });
    server.interceptor().on_reconnect(|event| {
        info!("Player {} reconnected from {}", event.packet.player_id, event.sender);
    });
    server.interceptor().on_disconnect(|event| {
        info!("{} left", event.sender);
    });

    // Echo chat to everyone through the flush loop
    let relay = server.clone();
    server
        .interceptor()
        .set_handler(move |event: &PacketEvent<EventPacket>| {
            if let Some(position) = event.packet.payload::<PositionUpdate>() {
                info!(
                    "{} at ({:.2}, {:.2}, {:.2})",
                    event.packet.player_id, position.x, position.y, position.z
                );
            } else if event.packet.is::<ChatMessage>() {
                for session in relay.sessions().get_all() {
                    relay.post(session, Packet::Event(event.packet.clone()));
                }
            }
        });

    server.clock().on_tick_missed(|missed| {
        warn!("Tick {} overran by {:?}", missed.number, missed.elapsed);
    });

    server.start().await?;
    info!("Press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }

    info!("Shutting down gracefully...");
    server.stop().await?;
    Ok(())
}
