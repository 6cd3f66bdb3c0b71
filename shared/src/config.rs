//! Channel configuration for both protocol roles
//!
//! Configuration is fixed once a channel is constructed. The binaries map
//! their command line arguments onto these structs; library users build
//! them directly with the `with_*` helpers.

use crate::error::{NetError, Result};
use std::time::Duration;

/// Default tick interval, roughly 60Hz
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);
/// Queue depth above which the listen loop reports inbound pressure
pub const DEFAULT_MAX_PROCESS_THRESHOLD: usize = 1000;
/// Sessions silent for longer than this are expired by the server
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(5);
/// How often the server looks for expired sessions
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// How often a connected client sends a heartbeat
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Server channel configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Interval between ticks of the server clock
    pub tick_interval: Duration,
    /// Inbound queue depth that triggers the backpressure warning
    pub max_process_threshold: usize,
    /// Idle time after which a session is dropped
    pub session_timeout: Duration,
    /// Period of the idle-session sweep
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_process_threshold: DEFAULT_MAX_PROCESS_THRESHOLD,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl ServerConfig {
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Sets the tick interval from a rate in ticks per second
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_interval = if hz == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / hz as f64)
        };
        self
    }

    pub fn with_max_process_threshold(mut self, threshold: usize) -> Self {
        self.max_process_threshold = threshold;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Rejects values the channel loops cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(NetError::Config("tick interval must be non-zero".into()));
        }
        if self.max_process_threshold == 0 {
            return Err(NetError::Config(
                "max process threshold must be at least 1".into(),
            ));
        }
        if self.session_timeout.is_zero() {
            return Err(NetError::Config("session timeout must be non-zero".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(NetError::Config("sweep interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Client channel configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Identity stamped on connect, reconnect and game packets
    pub player_id: String,
    pub heartbeat_interval: Duration,
}

impl ClientConfig {
    pub fn new(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.player_id.trim().is_empty() {
            return Err(NetError::Config("player id must not be empty".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(NetError::Config(
                "heartbeat interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
