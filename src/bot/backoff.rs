// src/bot/backoff.rs

//! Random-increasing reconnect backoff.
//!
//! Doubles the delay on every failed attempt and adds random jitter so a
//! fleet of reconnecting clients does not storm the server in lockstep -
//! the server answers synchronized storms with IP bans.

use std::time::Duration;

/// Jitter factor: each delay stretches by up to this fraction
const JITTER_FACTOR: f32 = 0.5;

/// Exponent cap; keeps the doubling from overflowing long outages
const MAX_DOUBLINGS: u32 = 8;

#[derive(Debug)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Delay before the next attempt; grows with every call
    pub fn next_delay(&mut self) -> Duration {
        let doublings = self.attempt.min(MAX_DOUBLINGS);
        self.attempt = self.attempt.saturating_add(1);

        let exponential = self.base * 2u32.pow(doublings);
        let jitter = 1.0 + rand::random::<f32>() * JITTER_FACTOR;
        exponential.mul_f32(jitter).min(self.max)
    }

    /// Call after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(300))
    }
}
