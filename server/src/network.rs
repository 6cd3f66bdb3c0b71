//! Server channel: session-aware receive pipeline, tick loop and outbound traffic
//!
//! The server binds one UDP endpoint and treats every remote endpoint as a
//! session. Handshakes are completed automatically (the reply carries the
//! server's public key and the session becomes healthy), disconnects remove
//! the session, and idle sessions are swept after the configured timeout.
//!
//! Background work runs as tracked tasks on the underlying `Channel`:
//! - **listen**: receive datagrams into the queue
//! - **process**: resolve the session of each datagram and dispatch it
//! - **clock**: fire ticks at the configured interval
//! - **flush**: send packets queued from synchronous listeners
//! - **sweep**: expire idle sessions

use log::{debug, error, info, warn};
use shared::config::ServerConfig;
use shared::{
    Channel, Datagram, DisconnectPacket, HandshakePacket, KeyExchange, NetError, Packet,
    PacketInterceptor, PacketRegistry, PacketSerializer, Result, Session, SessionHandler,
    TickingClock, UdpTransport,
};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::ToSocketAddrs;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Lifecycle of the server channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Unknown,
    Starting,
    Online,
    Stopping,
    Offline,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerStatus::Unknown => "unknown",
            ServerStatus::Starting => "starting",
            ServerStatus::Online => "online",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Capacity state reported to outside observers; not driven by the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unknown,
    Available,
    Saturated,
}

/// A packet waiting for the flush loop
struct Outgoing {
    session: Arc<Session>,
    packet: Packet,
}

struct ServerInner {
    channel: RwLock<Option<Arc<Channel>>>,
    local_addr: SocketAddr,
    config: ServerConfig,
    sessions: Arc<SessionHandler>,
    serializer: PacketSerializer,
    interceptor: Arc<PacketInterceptor>,
    clock: Arc<TickingClock>,
    status: RwLock<ServerStatus>,
    state: RwLock<ServerState>,
    outbox: mpsc::UnboundedSender<Outgoing>,
    outbox_rx: Mutex<mpsc::UnboundedReceiver<Outgoing>>,
    lifecycle: Mutex<()>,
}

/// Authoritative end of the protocol
///
/// Cloning is cheap and every clone drives the same server.
#[derive(Clone)]
pub struct ServerChannel {
    inner: Arc<ServerInner>,
}

impl ServerChannel {
    /// Binds the server endpoint without starting any loop.
    ///
    /// `registry` must already hold every game packet type the server will
    /// exchange.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        config: ServerConfig,
        registry: Arc<PacketRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        let transport = UdpTransport::bind(addr).await?;
        let local_addr = transport.local_addr();
        let channel = Channel::new(transport, config.max_process_threshold);

        let serializer = PacketSerializer::new(registry);
        let interceptor = Arc::new(PacketInterceptor::new(serializer.clone()));
        let sessions = Arc::new(SessionHandler::new());
        let (outbox, outbox_rx) = mpsc::unbounded_channel();

        let server = ServerChannel {
            inner: Arc::new(ServerInner {
                channel: RwLock::new(Some(Arc::new(channel))),
                local_addr,
                clock: Arc::new(TickingClock::new(config.tick_interval)),
                config,
                sessions,
                serializer,
                interceptor,
                status: RwLock::new(ServerStatus::Unknown),
                state: RwLock::new(ServerState::Unknown),
                outbox,
                outbox_rx: Mutex::new(outbox_rx),
                lifecycle: Mutex::new(()),
            }),
        };

        server.install_protocol_listeners();
        info!("Server bound to {}", local_addr);
        Ok(server)
    }

    /// Built-in listeners run before any registered by the application
    fn install_protocol_listeners(&self) {
        let sessions = Arc::clone(&self.inner.sessions);
        let outbox = self.inner.outbox.clone();
        self.inner.interceptor.on_handshake(move |event| {
            let Some(session) = sessions.find_by_endpoint(event.sender) else {
                warn!("Handshake from {} without a session", event.sender);
                return;
            };

            let peer_key = event.packet.public_key;
            if let Some(reply) = session.answered_handshake(&peer_key) {
                debug!("Repeated handshake from {}, resending reply", event.sender);
                queue_reply(&outbox, session, reply);
                return;
            }

            let exchange = KeyExchange::new();
            let reply = exchange.packet();
            match exchange.complete(&event.packet) {
                Ok(key) => {
                    session.encryption().establish(key);
                    session.set_healthy(true);
                    session.record_handshake(peer_key, reply.clone());
                    info!("Session {} secured for {}", session.id(), event.sender);
                    queue_reply(&outbox, session, reply);
                }
                Err(e) => warn!("Rejected handshake from {}: {}", event.sender, e),
            }
        });

        let sessions = Arc::clone(&self.inner.sessions);
        self.inner.interceptor.on_disconnect(move |event| {
            if let Some(session) = sessions.remove(event.sender) {
                session.set_healthy(false);
                info!(
                    "Session {} disconnected: {}",
                    session.id(),
                    event.packet.reason.as_deref().unwrap_or("no reason given")
                );
            }
        });
    }

    /// Starts the receive, process, clock, flush and sweep loops.
    ///
    /// Valid from `Unknown` or `Offline`; a stopped server rebinds its
    /// previous address. Returns once the loops are launched.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let status = self.status();
        if !matches!(status, ServerStatus::Unknown | ServerStatus::Offline) {
            return Err(NetError::InvalidState(format!("cannot start while {}", status)));
        }
        self.set_status(ServerStatus::Starting);

        let channel = match self.channel() {
            Some(channel) => channel,
            None => match Channel::bind(self.inner.local_addr, self.inner.config.max_process_threshold).await {
                Ok(channel) => {
                    let channel = Arc::new(channel);
                    *self.inner.channel.write().unwrap_or_else(PoisonError::into_inner) =
                        Some(Arc::clone(&channel));
                    channel
                }
                Err(e) => {
                    self.set_status(ServerStatus::Offline);
                    return Err(e);
                }
            },
        };

        self.spawn_loops(&channel);
        self.set_status(ServerStatus::Online);
        info!(
            "Server online at {} ({:?} ticks)",
            self.inner.local_addr, self.inner.config.tick_interval
        );
        Ok(())
    }

    fn spawn_loops(&self, channel: &Arc<Channel>) {
        let listener = Arc::clone(channel);
        channel.spawn("listen", async move { listener.listen().await });

        let processor = Arc::clone(channel);
        let sessions = Arc::clone(&self.inner.sessions);
        let interceptor = Arc::clone(&self.inner.interceptor);
        channel.spawn("process", async move {
            processor
                .process(move |datagram| dispatch(&sessions, &interceptor, datagram))
                .await
        });

        let clock = Arc::clone(&self.inner.clock);
        let signal = channel.signal().clone();
        channel.spawn("clock", async move { clock.tick(&signal).await });

        let server = self.clone();
        let signal = channel.signal().clone();
        channel.spawn("flush", async move { server.flush_outbox(&signal).await });

        let sessions = Arc::clone(&self.inner.sessions);
        let config = self.inner.config.clone();
        let signal = channel.signal().clone();
        channel.spawn("sweep", async move {
            sweep_sessions(&sessions, &config, &signal).await
        });
    }

    /// Sends packets queued by `post` and the built-in listeners
    async fn flush_outbox(&self, signal: &CancellationToken) -> Result<()> {
        let mut outbox = self.inner.outbox_rx.lock().await;
        loop {
            let next = tokio::select! {
                _ = signal.cancelled() => return Err(NetError::Cancelled),
                next = outbox.recv() => next,
            };

            match next {
                Some(Outgoing { session, packet }) => self.send(&session, &packet).await,
                None => return Ok(()),
            }
        }
    }

    /// Stops every loop and waits for them to finish
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let status = self.status();
        if status != ServerStatus::Online {
            return Err(NetError::InvalidState(format!("cannot stop while {}", status)));
        }
        self.set_status(ServerStatus::Stopping);

        let channel = self
            .inner
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(channel) = channel {
            channel.shutdown().await;
        }

        self.set_status(ServerStatus::Offline);
        info!("Server on {} offline", self.inner.local_addr);
        Ok(())
    }

    /// Sends `packet` to one session.
    ///
    /// Unhealthy sessions only accept handshakes; anything else is dropped
    /// with a warning. Encoding and transport failures are logged.
    pub async fn send(&self, session: &Session, packet: &Packet) {
        if !session.is_healthy() && !packet.is_handshake() {
            warn!(
                "Dropping {} for unhealthy session {} ({})",
                packet,
                session.id(),
                session.endpoint()
            );
            return;
        }

        let Some(channel) = self.channel() else {
            warn!("Dropping {} for {}: server is offline", packet, session.endpoint());
            return;
        };

        let data = match self.inner.serializer.write(packet, session.encryption()) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode {} for {}: {}", packet, session.endpoint(), e);
                return;
            }
        };

        match channel.transport().send(&data, session.endpoint()).await {
            Ok(_) => debug!("Sent {} to {}", packet, session.endpoint()),
            Err(e) => error!("Failed to send {} to {}: {}", packet, session.endpoint(), e),
        }
    }

    /// Sends `packet` to every session of the current snapshot, in turn.
    ///
    /// Returns the number of sessions in the snapshot.
    pub async fn broadcast(&self, packet: &Packet) -> usize {
        let sessions = self.inner.sessions.get_all();
        for session in &sessions {
            self.send(session, packet).await;
        }
        sessions.len()
    }

    /// Queues `packet` for the flush loop; usable from synchronous listeners
    pub fn post(&self, session: Arc<Session>, packet: Packet) {
        if self.inner.outbox.send(Outgoing { session, packet }).is_err() {
            error!("Outbox closed, packet dropped");
        }
    }

    /// Tells a peer it is being disconnected and forgets its session
    pub async fn disconnect_session(&self, endpoint: SocketAddr, reason: Option<String>) -> Result<()> {
        let session = self.inner.sessions.get(endpoint)?;

        self.send(&session, &Packet::Disconnect(DisconnectPacket { reason }))
            .await;
        self.inner.sessions.remove(endpoint);
        session.set_healthy(false);
        Ok(())
    }

    fn channel(&self) -> Option<Arc<Channel>> {
        self.inner
            .channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_status(&self, status: ServerStatus) {
        *self.inner.status.write().unwrap_or_else(PoisonError::into_inner) = status;
        debug!("Server status: {}", status);
    }

    pub fn status(&self) -> ServerStatus {
        *self.inner.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn sessions(&self) -> &Arc<SessionHandler> {
        &self.inner.sessions
    }

    pub fn interceptor(&self) -> &Arc<PacketInterceptor> {
        &self.inner.interceptor
    }

    pub fn clock(&self) -> &Arc<TickingClock> {
        &self.inner.clock
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        self.inner.serializer.registry()
    }

    /// Datagrams received but not yet processed
    pub fn queue_depth(&self) -> usize {
        self.channel().map_or(0, |channel| channel.queue_depth())
    }

    /// Backpressure warnings emitted since the last start
    pub fn pressure_warnings(&self) -> u64 {
        self.channel().map_or(0, |channel| channel.pressure_warnings())
    }
}

/// Hands a handshake reply to the flush loop
fn queue_reply(
    outbox: &mpsc::UnboundedSender<Outgoing>,
    session: Arc<Session>,
    reply: HandshakePacket,
) {
    let endpoint = session.endpoint();
    let outgoing = Outgoing {
        session,
        packet: Packet::Handshake(reply),
    };
    if outbox.send(outgoing).is_err() {
        error!("Outbox closed, handshake reply to {} lost", endpoint);
    }
}

/// Resolves the sender's session and hands the datagram to the interceptor
fn dispatch(sessions: &SessionHandler, interceptor: &PacketInterceptor, datagram: Datagram) {
    let sender = datagram.sender;

    let session = match sessions.find_or_register(sender) {
        Ok(session) => session,
        Err(e) => {
            error!("No session for {}: {}", sender, e);
            return;
        }
    };
    session.touch();

    if let Err(e) = interceptor.accept(datagram, session.encryption()) {
        warn!("Dropped datagram from {}: {}", sender, e);
    }
}

/// Expires idle sessions every `sweep_interval` until cancelled
async fn sweep_sessions(
    sessions: &SessionHandler,
    config: &ServerConfig,
    signal: &CancellationToken,
) -> Result<()> {
    let mut sweep = interval(config.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = signal.cancelled() => return Err(NetError::Cancelled),
            _ = sweep.tick() => {}
        }

        for session in sessions.expire_idle(config.session_timeout) {
            info!(
                "Session {} for {} timed out",
                session.id(),
                session.endpoint()
            );
        }
    }
}
