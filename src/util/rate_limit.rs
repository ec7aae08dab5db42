//! Per-peer input throttling.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Ceiling for inbound game messages per peer. Clients send one paddle
/// delta per rendered frame, so this sits a little above 60 Hz.
pub const INPUT_RATE_LIMIT: u32 = 90;

pub fn create_limiter(per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Limiter state carried by each WebSocket connection.
#[derive(Clone)]
pub struct PeerRateLimiter {
    input_limiter: Arc<Limiter>,
}

impl PeerRateLimiter {
    pub fn new() -> Self {
        Self {
            input_limiter: create_limiter(INPUT_RATE_LIMIT),
        }
    }

    /// True when the message fits inside the quota.
    pub fn check_input(&self) -> bool {
        self.input_limiter.check().is_ok()
    }
}

impl Default for PeerRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exhausts_within_one_second() {
        let limiter = PeerRateLimiter::new();
        let allowed = (0..INPUT_RATE_LIMIT * 2)
            .filter(|_| limiter.check_input())
            .count();
        assert!(allowed >= INPUT_RATE_LIMIT as usize / 2);
        assert!(allowed < INPUT_RATE_LIMIT as usize * 2);
    }
}
