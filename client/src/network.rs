//! Client channel: handshake-gated connection to a single server
//!
//! The client owns one session, the one for the server endpoint. `connect`
//! runs the key exchange and only returns once the session key is in place,
//! so every later packet travels sealed. Datagrams from any other endpoint
//! are ignored.

use log::{debug, info, warn};
use shared::config::{ClientConfig, DEFAULT_MAX_PROCESS_THRESHOLD};
use shared::{
    timestamp_millis, Channel, ConnectPacket, Datagram, DisconnectPacket, HeartbeatPacket,
    KeyExchange, NetError, Packet, PacketInterceptor, PacketRegistry, PacketSerializer, Payload,
    ReconnectPacket, Result, Session, UdpTransport,
};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Key exchange in flight and a counter of completed exchanges
///
/// `in_flight` is held for a whole round-trip so concurrent `connect` and
/// `reconnect` calls never complete a reply against another call's secret.
struct HandshakeState {
    in_flight: AsyncMutex<()>,
    pending: Mutex<Option<KeyExchange>>,
    completed: watch::Sender<u64>,
}

struct ClientInner {
    channel: Arc<Channel>,
    server_addr: SocketAddr,
    config: ClientConfig,
    session: Arc<Session>,
    serializer: PacketSerializer,
    interceptor: Arc<PacketInterceptor>,
    handshake: Arc<HandshakeState>,
    loops_started: AtomicBool,
    heartbeat_started: AtomicBool,
}

#[derive(Clone)]
pub struct ClientChannel {
    inner: Arc<ClientInner>,
}

impl ClientChannel {
    /// Binds a local endpoint for talking to `server_addr`.
    ///
    /// Nothing is sent until `connect` is called.
    pub async fn bind(
        server_addr: SocketAddr,
        config: ClientConfig,
        registry: Arc<PacketRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        let local: SocketAddr = match server_addr {
            SocketAddr::V4(addr) if addr.ip().is_loopback() => (*addr.ip(), 0).into(),
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(addr) if addr.ip().is_loopback() => (*addr.ip(), 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let transport = UdpTransport::bind(local).await?;
        let channel = Arc::new(Channel::new(transport, DEFAULT_MAX_PROCESS_THRESHOLD));

        let session = Arc::new(Session::standalone(server_addr));
        let serializer = PacketSerializer::new(registry);
        let interceptor = Arc::new(PacketInterceptor::new(serializer.clone()));
        let (completed, _) = watch::channel(0);

        let client = ClientChannel {
            inner: Arc::new(ClientInner {
                channel,
                server_addr,
                config,
                session,
                serializer,
                interceptor,
                handshake: Arc::new(HandshakeState {
                    in_flight: AsyncMutex::new(()),
                    pending: Mutex::new(None),
                    completed,
                }),
                loops_started: AtomicBool::new(false),
                heartbeat_started: AtomicBool::new(false),
            }),
        };

        client.install_protocol_listeners();
        debug!(
            "Client bound to {} for server {}",
            client.local_addr(),
            server_addr
        );
        Ok(client)
    }

    fn install_protocol_listeners(&self) {
        let session = Arc::clone(&self.inner.session);
        let handshake = Arc::clone(&self.inner.handshake);
        self.inner.interceptor.on_handshake(move |event| {
            let exchange = handshake
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            let Some(exchange) = exchange else {
                debug!("Ignoring unsolicited handshake from {}", event.sender);
                return;
            };

            match exchange.complete(&event.packet) {
                Ok(key) => {
                    session.encryption().establish(key);
                    session.set_healthy(true);
                    handshake.completed.send_modify(|count| *count += 1);
                    info!("Secured session with {}", event.sender);
                }
                Err(e) => warn!("Handshake with {} failed: {}", event.sender, e),
            }
        });

        let session = Arc::clone(&self.inner.session);
        self.inner.interceptor.on_disconnect(move |event| {
            session.set_healthy(false);
            session.encryption().reset();
            info!(
                "Server closed the session: {}",
                event.packet.reason.as_deref().unwrap_or("no reason given")
            );
        });
    }

    fn start_loops(&self) {
        if self.inner.loops_started.swap(true, Ordering::AcqRel) {
            return;
        }

        let channel = &self.inner.channel;

        let listener = Arc::clone(channel);
        channel.spawn("listen", async move { listener.listen().await });

        let processor = Arc::clone(channel);
        let session = Arc::clone(&self.inner.session);
        let interceptor = Arc::clone(&self.inner.interceptor);
        let server_addr = self.inner.server_addr;
        channel.spawn("process", async move {
            processor
                .process(move |datagram: Datagram| {
                    if datagram.sender != server_addr {
                        debug!("Ignoring datagram from {}", datagram.sender);
                        return;
                    }
                    session.touch();
                    if let Err(e) = interceptor.accept(datagram, session.encryption()) {
                        warn!("Dropped datagram from server: {}", e);
                    }
                })
                .await
        });
    }

    fn start_heartbeat(&self) {
        if self.inner.heartbeat_started.swap(true, Ordering::AcqRel) {
            return;
        }

        let client = self.clone();
        let signal = self.inner.channel.signal().clone();
        let period = self.inner.config.heartbeat_interval;
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.inner.channel.spawn("heartbeat", async move {
            client.heartbeat_loop(&mut timer, &signal).await
        });
    }

    /// Sends a heartbeat on every timer tick while connected
    async fn heartbeat_loop(&self, timer: &mut Interval, signal: &CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = signal.cancelled() => return Err(NetError::Cancelled),
                _ = timer.tick() => {}
            }

            if !self.is_connected() {
                continue;
            }
            let heartbeat = Packet::Heartbeat(HeartbeatPacket {
                timestamp: timestamp_millis(),
            });
            if let Err(e) = self.send(&heartbeat).await {
                warn!("Failed to send heartbeat: {}", e);
            }
        }
    }

    /// Sends a fresh public key and waits for the server's reply
    async fn handshake(&self) -> Result<()> {
        let _in_flight = self.inner.handshake.in_flight.lock().await;
        let mut completed = self.inner.handshake.completed.subscribe();

        let exchange = KeyExchange::new();
        let hello = Packet::Handshake(exchange.packet());
        *self
            .inner
            .handshake
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(exchange);

        self.send(&hello).await?;

        tokio::select! {
            _ = self.inner.channel.signal().cancelled() => Err(NetError::Cancelled),
            changed = completed.changed() => changed.map_err(|_| NetError::Cancelled),
        }
    }

    /// Connects to the server.
    ///
    /// Returns once the handshake round-trip has completed and the Connect
    /// packet is sent. Waits indefinitely for the server; wrap the call in
    /// `tokio::time::timeout` to bound it.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.channel.is_shutting_down() {
            return Err(NetError::InvalidState(
                "client channel has been disconnected".into(),
            ));
        }

        info!("Connecting to {}...", self.inner.server_addr);
        self.start_loops();
        self.handshake().await?;

        self.send(&Packet::Connect(ConnectPacket {
            player_id: self.inner.config.player_id.clone(),
        }))
        .await?;
        self.start_heartbeat();

        info!(
            "Connected to {} as {}",
            self.inner.server_addr, self.inner.config.player_id
        );
        Ok(())
    }

    /// Re-runs the key exchange and announces the returning player
    pub async fn reconnect(&self) -> Result<()> {
        if !self.inner.loops_started.load(Ordering::Acquire) {
            return self.connect().await;
        }
        if self.inner.channel.is_shutting_down() {
            return Err(NetError::InvalidState(
                "client channel has been disconnected".into(),
            ));
        }

        info!("Reconnecting to {}...", self.inner.server_addr);
        self.handshake().await?;

        self.send(&Packet::Reconnect(ReconnectPacket {
            player_id: self.inner.config.player_id.clone(),
        }))
        .await?;
        self.start_heartbeat();
        Ok(())
    }

    /// Tells the server goodbye and tears the channel down.
    ///
    /// The channel cannot be connected again afterwards.
    pub async fn disconnect(&self) -> Result<()> {
        if self.inner.channel.is_shutting_down() {
            return Ok(());
        }

        if self.is_connected() {
            let goodbye = Packet::Disconnect(DisconnectPacket { reason: None });
            if let Err(e) = self.send(&goodbye).await {
                warn!("Failed to notify server of disconnect: {}", e);
            }
        }

        let session = &self.inner.session;
        session.set_healthy(false);
        session.encryption().reset();
        self.inner
            .handshake
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.inner.channel.shutdown().await;
        info!("Disconnected from {}", self.inner.server_addr);
        Ok(())
    }

    /// Sends `packet` to the server.
    ///
    /// Only handshakes may be sent before the session is secured.
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let session = &self.inner.session;
        if !session.is_healthy() && !packet.is_handshake() {
            return Err(NetError::NotConnected);
        }

        let data = self.inner.serializer.write(packet, session.encryption())?;
        self.inner
            .channel
            .transport()
            .send(&data, self.inner.server_addr)
            .await?;

        debug!("Sent {} to {}", packet, self.inner.server_addr);
        Ok(())
    }

    /// Sends a game payload stamped with this client's player id
    pub async fn send_event<P: Payload>(&self, payload: P) -> Result<()> {
        let packet = Packet::event(self.inner.config.player_id.clone(), payload);
        self.send(&packet).await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.session.is_healthy()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.channel.local_addr()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.inner.server_addr
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub fn interceptor(&self) -> &Arc<PacketInterceptor> {
        &self.inner.interceptor
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.channel.queue_depth()
    }

    pub fn pressure_warnings(&self) -> u64 {
        self.inner.channel.pressure_warnings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use shared::{EncryptionContext, PacketFamily};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    struct TestPackets;
    impl PacketFamily for TestPackets {
        const NAME: &'static str = "test";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    fn registry() -> Arc<PacketRegistry> {
        let registry = PacketRegistry::new();
        registry.register::<TestPackets, Ping>().unwrap();
        Arc::new(registry)
    }

    /// Minimal server built from the raw pieces
    struct FakeServer {
        transport: UdpTransport,
        serializer: PacketSerializer,
        context: EncryptionContext,
    }

    impl FakeServer {
        async fn new() -> Self {
            Self {
                transport: UdpTransport::bind("127.0.0.1:0").await.unwrap(),
                serializer: PacketSerializer::new(registry()),
                context: EncryptionContext::new(),
            }
        }

        fn addr(&self) -> SocketAddr {
            self.transport.local_addr()
        }

        async fn receive(&self) -> (Packet, SocketAddr) {
            let datagram = timeout(Duration::from_secs(1), self.transport.receive())
                .await
                .expect("nothing received")
                .unwrap();
            let packet = self.serializer.read(&datagram.data, &self.context).unwrap();
            (packet, datagram.sender)
        }

        async fn accept_handshake(&self) -> SocketAddr {
            let (packet, from) = self.receive().await;
            let Packet::Handshake(hello) = packet else {
                panic!("expected a handshake, got {}", packet);
            };

            let exchange = KeyExchange::new();
            let reply = self
                .serializer
                .write(&Packet::Handshake(exchange.packet()), &self.context)
                .unwrap();
            self.context.establish(exchange.complete(&hello).unwrap());
            self.transport.send(&reply, from).await.unwrap();
            from
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new("tester").with_heartbeat_interval(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_send_before_connect_is_rejected() {
        let server = FakeServer::new().await;
        let client = ClientChannel::bind(server.addr(), config(), registry())
            .await
            .unwrap();

        assert!(!client.is_connected());
        let result = client.send_event(Ping { seq: 1 }).await;
        assert!(matches!(result, Err(NetError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_completes_after_handshake() {
        let server = FakeServer::new().await;
        let client = ClientChannel::bind(server.addr(), config(), registry())
            .await
            .unwrap();

        let (connected, from) = tokio::join!(client.connect(), server.accept_handshake());
        assert_ok!(connected);
        assert_eq!(from, client.local_addr());
        assert!(client.is_connected());

        let (packet, _) = server.receive().await;
        assert_eq!(
            packet,
            Packet::Connect(ConnectPacket {
                player_id: "tester".into()
            })
        );

        assert_ok!(client.send_event(Ping { seq: 9 }).await);
        let (packet, _) = server.receive().await;
        assert_eq!(packet, Packet::event("tester", Ping { seq: 9 }));

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_connects_agree_on_key() {
        let server = FakeServer::new().await;
        let client = ClientChannel::bind(server.addr(), config(), registry())
            .await
            .unwrap();

        // Answers every hello with a fresh key until two were handled
        let serve = async {
            let mut hellos = 0;
            while hellos < 2 {
                let datagram = server.transport.receive().await.unwrap();
                let Ok(Packet::Handshake(hello)) =
                    server.serializer.read(&datagram.data, &server.context)
                else {
                    continue;
                };

                let exchange = KeyExchange::new();
                let reply = server
                    .serializer
                    .write(&Packet::Handshake(exchange.packet()), &server.context)
                    .unwrap();
                server.context.establish(exchange.complete(&hello).unwrap());
                server.transport.send(&reply, datagram.sender).await.unwrap();
                hellos += 1;
            }
        };

        let ((first, second), ()) = timeout(Duration::from_secs(2), async {
            tokio::join!(async { tokio::join!(client.connect(), client.connect()) }, serve)
        })
        .await
        .expect("handshakes never completed");
        assert_ok!(first);
        assert_ok!(second);

        assert_ok!(client.send_event(Ping { seq: 3 }).await);
        let event = timeout(Duration::from_secs(1), async {
            loop {
                let datagram = server.transport.receive().await.unwrap();
                if let Ok(packet @ Packet::Event(_)) =
                    server.serializer.read(&datagram.data, &server.context)
                {
                    return packet;
                }
            }
        })
        .await
        .expect("server could not read the event");
        assert_eq!(event, Packet::event("tester", Ping { seq: 3 }));

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeats_follow_connect() {
        let server = FakeServer::new().await;
        let config = ClientConfig::new("tester").with_heartbeat_interval(Duration::from_millis(20));
        let client = ClientChannel::bind(server.addr(), config, registry())
            .await
            .unwrap();

        let (connected, _) = tokio::join!(client.connect(), server.accept_handshake());
        connected.unwrap();
        let _connect = server.receive().await;

        let (packet, _) = server.receive().await;
        assert!(matches!(packet, Packet::Heartbeat(_)));

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_notifies_server_and_tears_down() {
        let server = FakeServer::new().await;
        let client = ClientChannel::bind(server.addr(), config(), registry())
            .await
            .unwrap();

        let (connected, _) = tokio::join!(client.connect(), server.accept_handshake());
        connected.unwrap();
        let _connect = server.receive().await;

        assert_ok!(client.disconnect().await);
        let (packet, _) = server.receive().await;
        assert_eq!(packet, Packet::Disconnect(DisconnectPacket { reason: None }));

        assert!(!client.is_connected());
        assert!(!client.session().encryption().is_established());
        assert!(matches!(
            assert_err!(client.send_event(Ping { seq: 2 }).await),
            NetError::NotConnected
        ));
        assert!(matches!(
            assert_err!(client.connect().await),
            NetError::InvalidState(_)
        ));
        assert_ok!(client.disconnect().await);
    }

    #[tokio::test]
    async fn test_datagrams_from_other_endpoints_are_ignored() {
        let server = FakeServer::new().await;
        let client = ClientChannel::bind(server.addr(), config(), registry())
            .await
            .unwrap();

        let (connected, _) = tokio::join!(client.connect(), server.accept_handshake());
        connected.unwrap();

        let stranger = FakeServer::new().await;
        let kick = stranger
            .serializer
            .write(
                &Packet::Disconnect(DisconnectPacket { reason: None }),
                &stranger.context,
            )
            .unwrap();
        stranger
            .transport
            .send(&kick, client.local_addr())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.is_connected());

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_disconnect_marks_session_unhealthy() {
        let server = FakeServer::new().await;
        let client = ClientChannel::bind(server.addr(), config(), registry())
            .await
            .unwrap();

        let (connected, from) = tokio::join!(client.connect(), server.accept_handshake());
        connected.unwrap();

        let kick = server
            .serializer
            .write(
                &Packet::Disconnect(DisconnectPacket {
                    reason: Some("maintenance".into()),
                }),
                &server.context,
            )
            .unwrap();
        server.transport.send(&kick, from).await.unwrap();

        timeout(Duration::from_secs(1), async {
            while client.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client stayed connected");

        client.disconnect().await.unwrap();
    }
}
