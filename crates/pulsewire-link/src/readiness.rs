//! Readiness polling for sockets.
//!
//! The worker loop needs to wait for work without holding any protocol
//! locks. A [`ReadinessSource`] is the waiting half of that arrangement: it
//! blocks, bounded by a timeout, and reports what became ready.

use std::{
    io,
    net::UdpSocket,
    thread,
    time::{Duration, Instant},
};

use crate::socket::UdpTransport;

/// What a readiness poll found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A datagram is waiting on the socket.
    SocketReadable,
    /// Console input is waiting.
    ///
    /// Reserved for input-driven sources; [`SocketReadiness`] never produces
    /// it. The bundled binary reads the console on its own thread and feeds
    /// the mailbox directly instead.
    InputAvailable,
}

/// A blocking source of readiness notifications.
pub trait ReadinessSource: Send + 'static {
    /// Waits up to the source's configured timeout; returns what became
    /// ready, or `None` when the wait simply timed out.
    fn poll(&mut self) -> io::Result<Option<Readiness>>;
}

/// Readiness source backed by a duplicate handle of the transport's socket.
///
/// Repeatedly peeks the shared receive queue until a datagram shows up or the
/// timeout elapses; peeking leaves the datagram queued for the transport to
/// consume. The short sleep between peeks bounds wake-up latency without
/// spinning.
#[derive(Debug)]
pub struct SocketReadiness {
    socket: UdpSocket,
    poll_timeout: Duration,
    peek_buffer: [u8; 1],
}

impl SocketReadiness {
    /// Creates a readiness source watching `transport`'s socket, waking at
    /// least every `poll_timeout`.
    pub fn new(transport: &UdpTransport, poll_timeout: Duration) -> io::Result<Self> {
        Ok(Self { socket: transport.clone_socket()?, poll_timeout, peek_buffer: [0; 1] })
    }
}

impl ReadinessSource for SocketReadiness {
    fn poll(&mut self) -> io::Result<Option<Readiness>> {
        let deadline = Instant::now() + self.poll_timeout;
        loop {
            match self.socket.peek_from(&mut self.peek_buffer) {
                Ok(_) => return Ok(Some(Readiness::SocketReadable)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    // Consumed by the transport's receive path; nothing to
                    // report here.
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
