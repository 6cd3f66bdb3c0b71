//! UDP transport boundary
//!
//! Wraps a tokio `UdpSocket` with a close signal so a pending receive can be
//! unblocked during shutdown. A closed transport reports cancellation rather
//! than an I/O error.

use crate::error::{NetError, Result};
use std::net::SocketAddr;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio_util::sync::CancellationToken;

/// Largest datagram the engine reads or writes
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// A raw datagram together with the endpoint it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub sender: SocketAddr,
    pub data: Vec<u8>,
}

impl Datagram {
    pub fn new(sender: SocketAddr, data: Vec<u8>) -> Self {
        Self { sender, data }
    }
}

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    closed: CancellationToken,
}

impl UdpTransport {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            closed: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the next datagram, or for the transport to be closed
    pub async fn receive(&self) -> Result<Datagram> {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        tokio::select! {
            _ = self.closed.cancelled() => Err(NetError::Cancelled),
            result = self.socket.recv_from(&mut buffer) => {
                let (len, sender) = result?;
                Ok(Datagram::new(sender, buffer[..len].to_vec()))
            }
        }
    }

    pub async fn send(&self, data: &[u8], destination: SocketAddr) -> Result<usize> {
        if self.is_closed() {
            return Err(NetError::Cancelled);
        }
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(NetError::OversizedPacket(data.len()));
        }

        Ok(self.socket.send_to(data, destination).await?)
    }

    /// Closes the transport. Safe to call more than once.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
