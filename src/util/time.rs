//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 60; // 60 simulation ticks per second
pub const PATCH_TPS: u32 = 40; // state patches pushed at most 40 times per second
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Ticks between snapshot broadcasts, rounded up so the patch rate is a bound
pub fn patch_interval_ticks() -> u32 {
    SIMULATION_TPS.div_ceil(PATCH_TPS).max(1)
}

/// Monotonic elapsed-time source for one session.
///
/// Round-start stamps and deferred-action deadlines are all expressed in
/// milliseconds on this clock, never in wall-clock time.
#[derive(Debug, Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the session was created
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::start()
    }
}
