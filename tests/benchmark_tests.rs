//! Performance benchmarks for the protocol hot paths

use shared::gameplay::{self, ChatMessage, PositionUpdate};
use shared::{
    Datagram, EncryptionContext, HeartbeatPacket, Packet, PacketInterceptor, PacketRegistry,
    PacketSerializer, SessionHandler,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn serializer() -> PacketSerializer {
    let registry = PacketRegistry::new();
    gameplay::register_packets(&registry).unwrap();
    PacketSerializer::new(Arc::new(registry))
}

/// Benchmarks sealed encode/decode of game packets
#[test]
fn benchmark_sealed_serialization() {
    let serializer = serializer();
    let context = EncryptionContext::with_key([7u8; 32]);
    let packet = Packet::event(
        "player-1",
        PositionUpdate {
            x: 10.0,
            y: 2.5,
            z: -4.0,
        },
    );

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let data = serializer.write(&packet, &context).unwrap();
        let _decoded = serializer.read(&data, &context).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Sealed serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks payload resolution through the type registry
#[test]
fn benchmark_registry_lookup() {
    let registry = PacketRegistry::new();
    gameplay::register_packets(&registry).unwrap();
    let body = bincode::serialize(&ChatMessage {
        text: "gg".into(),
    })
    .unwrap();

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = registry.decode("game", 101, &body).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Registry decode: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Stress tests session resolution for many endpoints
#[test]
fn stress_test_many_sessions() {
    let sessions = SessionHandler::new();
    let endpoints: Vec<SocketAddr> = (0..5_000u16)
        .map(|port| SocketAddr::from(([10, 0, 0, 1], 1024 + port)))
        .collect();

    let start = Instant::now();

    for endpoint in &endpoints {
        sessions.find_or_register(*endpoint).unwrap();
    }
    for endpoint in &endpoints {
        assert!(sessions.find_by_endpoint(*endpoint).is_some());
    }

    let duration = start.elapsed();
    println!(
        "Session resolution: {} endpoints in {:?}",
        endpoints.len(),
        duration
    );

    assert_eq!(sessions.len(), endpoints.len());
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks decode-and-dispatch through the interceptor
#[test]
fn benchmark_interceptor_dispatch() {
    let serializer = serializer();
    let interceptor = PacketInterceptor::new(serializer.clone());
    let context = EncryptionContext::with_key([3u8; 32]);
    let sender: SocketAddr = "127.0.0.1:9000".parse().unwrap();

    let heartbeats = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&heartbeats);
    interceptor.on_heartbeat(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    let data = serializer
        .write(&Packet::Heartbeat(HeartbeatPacket { timestamp: 1 }), &context)
        .unwrap();

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        interceptor
            .accept(Datagram::new(sender, data.clone()), &context)
            .unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Interceptor dispatch: {} datagrams in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(heartbeats.load(Ordering::Relaxed), iterations);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}
