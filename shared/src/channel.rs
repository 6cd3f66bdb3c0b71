//! Receive pipeline shared by the server and client channels
//!
//! A `Channel` owns the transport, an unbounded FIFO of received datagrams,
//! a gate admitting one draining pass at a time and the cancellation signal
//! shared by every background loop. The two core loops are:
//!
//! - `listen`: receive datagrams and enqueue them, warning when the queue
//!   backs up past the configured threshold
//! - `process`: drain the queue in arrival order and hand each datagram to
//!   the role-specific dispatcher
//!
//! Shutdown cancels the signal, closes the transport so a pending receive
//! returns, joins every worker and only then clears the queue and closes
//! the gate.

use crate::error::{NetError, Result};
use crate::transport::{Datagram, UdpTransport};
use log::{debug, error, warn};
use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Minimum wall-clock time between two backpressure warnings
pub const BACKPRESSURE_WARNING_INTERVAL: Duration = Duration::from_secs(30);

/// Rate limiter for queue-depth warnings
#[derive(Debug)]
pub struct PressureMonitor {
    threshold: usize,
    interval: Duration,
    last_warning: Option<Instant>,
}

impl PressureMonitor {
    pub fn new(threshold: usize, interval: Duration) -> Self {
        Self {
            threshold,
            interval,
            last_warning: None,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Returns true when a warning should be emitted for `depth` at `now`
    pub fn observe(&mut self, depth: usize, now: Instant) -> bool {
        if depth < self.threshold {
            return false;
        }

        let due = match self.last_warning {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_warning = Some(now);
        }
        due
    }
}

pub struct Channel {
    transport: Arc<UdpTransport>,
    queue: Mutex<VecDeque<Datagram>>,
    arrivals: Notify,
    gate: Semaphore,
    signal: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pressure: Mutex<PressureMonitor>,
    warnings: AtomicU64,
}

impl Channel {
    pub fn new(transport: UdpTransport, max_process_threshold: usize) -> Self {
        Self {
            transport: Arc::new(transport),
            queue: Mutex::new(VecDeque::new()),
            arrivals: Notify::new(),
            gate: Semaphore::new(1),
            signal: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            pressure: Mutex::new(PressureMonitor::new(
                max_process_threshold,
                BACKPRESSURE_WARNING_INTERVAL,
            )),
            warnings: AtomicU64::new(0),
        }
    }

    pub async fn bind(addr: SocketAddr, max_process_threshold: usize) -> Result<Self> {
        let transport = UdpTransport::bind(addr).await?;
        Ok(Self::new(transport, max_process_threshold))
    }

    pub fn transport(&self) -> &Arc<UdpTransport> {
        &self.transport
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Receives datagrams into the queue until the channel shuts down
    pub async fn listen(&self) -> Result<()> {
        loop {
            if self.signal.is_cancelled() {
                return Err(NetError::Cancelled);
            }

            self.check_pressure();

            let received = tokio::select! {
                _ = self.signal.cancelled() => return Err(NetError::Cancelled),
                received = self.transport.receive() => received,
            };

            match received {
                Ok(datagram) => self.enqueue(datagram),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => error!("Failed to receive datagram: {}", e),
            }

            tokio::task::yield_now().await;
        }
    }

    /// Drains the queue into `dispatch` until the channel shuts down
    pub async fn process<F>(&self, mut dispatch: F) -> Result<()>
    where
        F: FnMut(Datagram),
    {
        loop {
            if self.signal.is_cancelled() {
                return Err(NetError::Cancelled);
            }

            if self.queue_depth() == 0 {
                tokio::select! {
                    _ = self.signal.cancelled() => return Err(NetError::Cancelled),
                    _ = self.arrivals.notified() => {}
                }
            }

            self.drain(&mut dispatch).await?;
            tokio::task::yield_now().await;
        }
    }

    /// Runs one draining pass under the gate, in arrival order
    ///
    /// Returns the number of datagrams dispatched.
    pub async fn drain<F>(&self, dispatch: &mut F) -> Result<usize>
    where
        F: FnMut(Datagram),
    {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| NetError::Cancelled)?;

        let batch: Vec<Datagram> = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let count = batch.len();
        for datagram in batch {
            dispatch(datagram);
        }
        Ok(count)
    }

    pub fn enqueue(&self, datagram: Datagram) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(datagram);
        self.arrivals.notify_one();
    }

    pub fn queue_depth(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of backpressure warnings emitted so far
    pub fn pressure_warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }

    fn check_pressure(&self) {
        let depth = self.queue_depth();
        let mut monitor = self.pressure.lock().unwrap_or_else(PoisonError::into_inner);

        if monitor.observe(depth, Instant::now()) {
            self.warnings.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Receive queue holds {} datagrams (threshold {}), processing is falling behind",
                depth,
                monitor.threshold()
            );
        }
    }

    /// Spawns a background loop tracked by this channel
    ///
    /// Cancellation is treated as an orderly exit; any other error is logged.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            match task.await {
                Ok(()) => debug!("{} loop finished", name),
                Err(e) if e.is_cancelled() => debug!("{} loop cancelled", name),
                Err(e) => error!("{} loop failed: {}", name, e),
            }
        });

        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The signal shared by every loop of this channel
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    pub fn is_shutting_down(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Stops every loop and releases the channel's resources.
    ///
    /// Must not be awaited from inside one of the channel's own workers,
    /// since it joins them.
    pub async fn shutdown(&self) {
        self.signal.cancel();
        self.transport.close();

        let workers: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Channel worker panicked: {}", e);
            }
        }

        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.gate.close();

        debug!("Channel on {} shut down", self.local_addr());
    }
}
