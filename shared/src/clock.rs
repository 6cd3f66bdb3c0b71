//! Fixed-rate ticking clock
//!
//! The clock fires on every interval boundary, independent of network I/O.
//! Tick listeners run synchronously and their total cost is measured; when it
//! exceeds the interval a `TickMissed` event reports the elapsed time. A late
//! tick never triggers a burst of catch-up ticks: the next tick waits for the
//! next boundary.

use crate::error::{NetError, Result};
use crate::events::Listeners;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Idle,
    Running,
    Stopped,
}

/// A tick fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub number: u64,
}

/// Tick listeners took longer than one interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickMissed {
    pub number: u64,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct TickingClock {
    interval: Duration,
    state: Mutex<ClockState>,
    ticks: AtomicU64,
    on_tick: Listeners<Tick>,
    on_tick_missed: Listeners<TickMissed>,
}

impl TickingClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ClockState::Idle),
            ticks: AtomicU64::new(0),
            on_tick: Listeners::new(),
            on_tick_missed: Listeners::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> ClockState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total ticks fired since construction
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn on_tick<F>(&self, f: F)
    where
        F: Fn(&Tick) + Send + Sync + 'static,
    {
        self.on_tick.subscribe(f);
    }

    pub fn on_tick_missed<F>(&self, f: F)
    where
        F: Fn(&TickMissed) + Send + Sync + 'static,
    {
        self.on_tick_missed.subscribe(f);
    }

    fn set_state(&self, state: ClockState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Runs the clock until `signal` is cancelled
    pub async fn tick(&self, signal: &CancellationToken) -> Result<()> {
        if self.interval.is_zero() {
            return Err(NetError::Config("tick interval must be non-zero".into()));
        }

        let mut deadline = Instant::now() + self.interval;

        self.set_state(ClockState::Running);
        debug!("Clock running every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = signal.cancelled() => {
                    self.set_state(ClockState::Stopped);
                    debug!("Clock stopped after {} ticks", self.ticks());
                    return Err(NetError::Cancelled);
                }
                _ = sleep_until(deadline) => {}
            }

            let number = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
            let started = Instant::now();

            self.on_tick.emit(&Tick { number });

            let elapsed = started.elapsed();
            if elapsed > self.interval {
                warn!(
                    "Tick {} took {:?}, longer than the {:?} interval",
                    number, elapsed, self.interval
                );
                self.on_tick_missed.emit(&TickMissed { number, elapsed });
            }

            // Boundaries that passed while listeners ran are skipped, not replayed
            let now = Instant::now();
            deadline += self.interval;
            while deadline <= now {
                deadline += self.interval;
            }
        }
    }
}
