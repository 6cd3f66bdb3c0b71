//! Session registry keyed by remote endpoint
//!
//! A session is created the first time an endpoint is observed and looked up
//! by that endpoint afterwards. Each session owns its own encryption context,
//! a health flag that gates outbound traffic, and a last-activity timestamp
//! used to expire idle peers.
//!
//! The handler is safe for concurrent use; callers receive `Arc<Session>`
//! handles that stay valid after the session is removed.

use crate::encryption::EncryptionContext;
use crate::error::{NetError, Result};
use crate::packet::HandshakePacket;
use log::{debug, info};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Opaque session identifier, unique within one handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Peer public key of the last completed handshake and the reply sent back
#[derive(Debug, Clone)]
struct AnsweredHandshake {
    peer_key: [u8; 32],
    reply: HandshakePacket,
}

/// A remote peer as seen by the local channel
///
/// Sessions start unhealthy. They become healthy once the handshake has
/// established their encryption context, and only healthy sessions accept
/// outbound traffic other than handshakes.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    endpoint: SocketAddr,
    encryption: EncryptionContext,
    healthy: AtomicBool,
    last_activity: Mutex<Instant>,
    handshake: Mutex<Option<AnsweredHandshake>>,
}

impl Session {
    pub fn new(id: SessionId, endpoint: SocketAddr) -> Self {
        Self {
            id,
            endpoint,
            encryption: EncryptionContext::new(),
            healthy: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            handshake: Mutex::new(None),
        }
    }

    /// A session outside any handler, as used by a client for its server
    pub fn standalone(endpoint: SocketAddr) -> Self {
        Self::new(SessionId(0), endpoint)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn encryption(&self) -> &EncryptionContext {
        &self.encryption
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    /// The reply already sent for a handshake carrying `peer_key`, if any.
    ///
    /// A repeated hello must get the same reply, otherwise the peer and the
    /// session end up with different keys.
    pub fn answered_handshake(&self, peer_key: &[u8; 32]) -> Option<HandshakePacket> {
        self.handshake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|answered| answered.peer_key == *peer_key)
            .map(|answered| answered.reply.clone())
    }

    /// Remembers the reply sent for the handshake carrying `peer_key`
    pub fn record_handshake(&self, peer_key: [u8; 32], reply: HandshakePacket) {
        *self.handshake.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(AnsweredHandshake { peer_key, reply });
    }

    /// Records activity from the peer
    pub fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the peer was last heard from
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

/// Registry of all sessions known to a channel
#[derive(Debug)]
pub struct SessionHandler {
    sessions: RwLock<HashMap<SocketAddr, Arc<Session>>>,
    next_id: AtomicU64,
}

impl Default for SessionHandler {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl SessionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the session for `endpoint` without creating one
    pub fn find_by_endpoint(&self, endpoint: SocketAddr) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&endpoint)
            .cloned()
    }

    /// Creates a session with a fresh encryption context for `endpoint`.
    ///
    /// Fails with `SessionCreation` if the endpoint already has a session,
    /// which happens when two tasks race to register the same peer.
    pub fn register(&self, endpoint: SocketAddr) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        match sessions.entry(endpoint) {
            Entry::Occupied(_) => Err(NetError::SessionCreation(endpoint)),
            Entry::Vacant(slot) => {
                let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
                let session = Arc::new(Session::new(id, endpoint));
                slot.insert(Arc::clone(&session));

                info!("Session {} registered for {}", id, endpoint);
                Ok(session)
            }
        }
    }

    /// Returns the session for `endpoint`, registering it on first sight
    pub fn find_or_register(&self, endpoint: SocketAddr) -> Result<Arc<Session>> {
        if let Some(session) = self.find_by_endpoint(endpoint) {
            return Ok(session);
        }

        match self.register(endpoint) {
            Ok(session) => Ok(session),
            // Lost a registration race: the winner's session is the one to use
            Err(NetError::SessionCreation(_)) => self.get(endpoint),
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, endpoint: SocketAddr) -> Result<Arc<Session>> {
        self.find_by_endpoint(endpoint)
            .ok_or(NetError::SessionNotFound)
    }

    /// Point-in-time snapshot of every session
    pub fn get_all(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn remove(&self, endpoint: SocketAddr) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&endpoint);

        if let Some(session) = &removed {
            info!("Session {} removed for {}", session.id(), endpoint);
        }
        removed
    }

    /// Removes every session idle for longer than `timeout`
    ///
    /// Returns the removed sessions, already marked unhealthy.
    pub fn expire_idle(&self, timeout: Duration) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        let expired: Vec<SocketAddr> = sessions
            .iter()
            .filter(|(_, session)| session.idle_for() > timeout)
            .map(|(endpoint, _)| *endpoint)
            .collect();

        expired
            .into_iter()
            .filter_map(|endpoint| sessions.remove(&endpoint))
            .inspect(|session| {
                session.set_healthy(false);
                debug!("Session {} expired after {:?}", session.id(), timeout);
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tokio_test::{assert_err, assert_ok};

    fn endpoint(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_find_has_no_side_effects() {
        let handler = SessionHandler::new();

        assert!(handler.find_by_endpoint(endpoint(5000)).is_none());
        assert!(handler.is_empty());
    }

    #[test]
    fn test_register_and_lookup() {
        let handler = SessionHandler::new();
        let session = assert_ok!(handler.register(endpoint(5000)));

        assert_eq!(session.endpoint(), endpoint(5000));
        assert!(!session.is_healthy());
        assert!(!session.encryption().is_established());

        let found = handler.find_by_endpoint(endpoint(5000)).unwrap();
        assert_eq!(found.id(), session.id());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let handler = SessionHandler::new();
        assert_ok!(handler.register(endpoint(5000)));

        let result = handler.register(endpoint(5000));
        assert!(matches!(result, Err(NetError::SessionCreation(addr)) if addr == endpoint(5000)));
        assert_eq!(handler.len(), 1);
    }

    #[test]
    fn test_get_missing_session() {
        let handler = SessionHandler::new();
        let result = assert_err!(handler.get(endpoint(6000)));
        assert!(matches!(result, NetError::SessionNotFound));
    }

    #[test]
    fn test_sessions_have_distinct_ids_and_contexts() {
        let handler = SessionHandler::new();
        let a = handler.register(endpoint(1)).unwrap();
        let b = handler.register(endpoint(2)).unwrap();

        assert_ne!(a.id(), b.id());
        a.encryption().establish([1u8; 32]);
        assert!(!b.encryption().is_established());
    }

    #[test]
    fn test_standalone_session_starts_unsecured() {
        let session = Session::standalone(endpoint(9000));

        assert_eq!(session.endpoint(), endpoint(9000));
        assert!(!session.is_healthy());
        assert!(!session.encryption().is_established());
    }

    #[test]
    fn test_answered_handshake_matches_peer_key() {
        let session = Session::standalone(endpoint(9000));
        let reply = HandshakePacket { public_key: [9u8; 32] };
        assert!(session.answered_handshake(&[1u8; 32]).is_none());

        session.record_handshake([1u8; 32], reply.clone());
        assert_eq!(session.answered_handshake(&[1u8; 32]), Some(reply));
        assert!(session.answered_handshake(&[2u8; 32]).is_none());

        session.record_handshake([2u8; 32], HandshakePacket { public_key: [8u8; 32] });
        assert!(session.answered_handshake(&[1u8; 32]).is_none());
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let handler = SessionHandler::new();
        handler.register(endpoint(1)).unwrap();
        handler.register(endpoint(2)).unwrap();

        let snapshot = handler.get_all();
        handler.register(endpoint(3)).unwrap();
        handler.remove(endpoint(1));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(handler.len(), 2);
    }

    #[test]
    fn test_concurrent_find_or_register_yields_one_session() {
        let handler = Arc::new(SessionHandler::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let handler = Arc::clone(&handler);
                thread::spawn(move || handler.find_or_register(endpoint(7777)).unwrap().id())
            })
            .collect();

        let ids: Vec<SessionId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(handler.len(), 1);
    }

    #[test]
    fn test_expire_idle_sessions() {
        let handler = SessionHandler::new();
        let stale = handler.register(endpoint(1)).unwrap();
        stale.set_healthy(true);

        thread::sleep(Duration::from_millis(30));
        let fresh = handler.register(endpoint(2)).unwrap();
        fresh.touch();

        let expired = handler.expire_idle(Duration::from_millis(20));

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].endpoint(), endpoint(1));
        assert!(!stale.is_healthy());
        assert!(handler.find_by_endpoint(endpoint(2)).is_some());
    }
}
