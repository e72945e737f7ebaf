//! Transport abstraction for pluggable I/O.

use std::io::Result;

use crate::address::Address;

/// Low-level datagram socket abstraction.
///
/// This trait allows various transports (UDP, in-memory test fakes, etc.) to
/// be plugged into the orchestrators without coupling to a concrete
/// implementation. Receives are non-blocking: "nothing pending" is a normal
/// `Ok(None)` outcome, never an error and never a wait.
pub trait Socket {
    /// Sends a single datagram to `addr`.
    fn send_packet(&mut self, addr: &Address, payload: &[u8]) -> Result<usize>;

    /// Receives a single pending datagram, or `None` when nothing is queued.
    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> Result<Option<(&'a [u8], Address)>>;

    /// Returns the local address this socket is bound to.
    fn local_addr(&self) -> Result<Address>;
}
