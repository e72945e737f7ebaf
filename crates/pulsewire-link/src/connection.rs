//! Per-peer connection state.

use std::time::{Duration, Instant};

use pulsewire_core::{address::Address, config::Config, time::IntervalTimer};
use pulsewire_protocol::ReliabilityContext;

/// Everything one end tracks about an established peer.
///
/// Bundles the peer's address with its reliability context and keep-alive
/// scheduling. Both orchestrators use the same type; the client holds exactly
/// one, the server holds one per table slot.
#[derive(Debug)]
pub struct Connection {
    address: Address,
    /// Reliability, RTT and congestion state for this peer.
    pub reliability: ReliabilityContext,
    keep_alive: IntervalTimer,
    congested_keep_alive_divisor: u32,
    /// Counts keep-alive firings while congested. Owned per connection so one
    /// congested peer's pacing never skews another's.
    congested_fire_counter: u32,
}

impl Connection {
    /// Creates connection state for a freshly admitted peer.
    pub fn new(address: Address, config: &Config, now: Instant) -> Self {
        Self {
            address,
            reliability: ReliabilityContext::new(config, now),
            keep_alive: IntervalTimer::new(config.keep_alive_interval),
            congested_keep_alive_divisor: config.congested_keep_alive_divisor.max(1),
            congested_fire_counter: 0,
        }
    }

    /// The peer's remote address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Ages the connection by one tick and reports whether a keep-alive
    /// should go out now.
    ///
    /// The keep-alive timer fires at the configured interval; while the
    /// connection is congested only one firing in
    /// `congested_keep_alive_divisor` produces a packet, throttling traffic
    /// until the congestion flag clears.
    pub fn advance(&mut self, dt: Duration) -> bool {
        self.reliability.advance(dt);

        if !self.keep_alive.advance(dt) {
            return false;
        }
        if self.reliability.is_congested() {
            self.congested_fire_counter =
                (self.congested_fire_counter + 1) % self.congested_keep_alive_divisor;
            self.congested_fire_counter == 0
        } else {
            self.congested_fire_counter = 0;
            true
        }
    }

    /// True when the peer has been silent longer than `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.reliability.is_timed_out(timeout)
    }
}
