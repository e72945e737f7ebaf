//! UDP transport implementation.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
};

use pulsewire_core::{address::Address, config::Config, transport::Socket};
use socket2::SockRef;
use tracing::trace;

/// Non-blocking UDP implementation of the [`Socket`] trait.
///
/// Binds a single socket, applies the configured buffer sizes and switches it
/// to non-blocking mode; an empty receive queue surfaces as `Ok(None)` from
/// `receive_packet`, never as a wait.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds a UDP socket on `addr`.
    ///
    /// Port zero asks the system for an ephemeral port; `local_addr` reports
    /// what was actually assigned.
    pub fn bind(addr: Address, config: &Config) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from(addr))?;
        let sock_ref = SockRef::from(&socket);
        if let Some(size) = config.socket_recv_buffer_size {
            sock_ref.set_recv_buffer_size(size)?;
        }
        if let Some(size) = config.socket_send_buffer_size {
            sock_ref.set_send_buffer_size(size)?;
        }
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    /// Duplicates the socket handle for readiness peeking.
    ///
    /// The clone shares the open file description, non-blocking mode
    /// included, so peeks on it never stall the transport.
    pub fn clone_socket(&self) -> io::Result<UdpSocket> {
        self.socket.try_clone()
    }
}

impl Socket for UdpTransport {
    fn send_packet(&mut self, addr: &Address, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, SocketAddr::from(*addr))
    }

    fn receive_packet<'a>(
        &mut self,
        buffer: &'a mut [u8],
    ) -> io::Result<Option<(&'a [u8], Address)>> {
        match self.socket.recv_from(buffer) {
            Ok((length, SocketAddr::V4(source))) => {
                Ok(Some((&buffer[..length], Address::from(source))))
            }
            Ok((_, SocketAddr::V6(source))) => {
                trace!(%source, "dropping datagram from non-IPv4 source");
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // A previous send hit a closed port; the ICMP error surfaces on
            // the next receive. Not fatal for a datagram protocol.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<Address> {
        match self.socket.local_addr()? {
            SocketAddr::V4(addr) => Ok(Address::from(addr)),
            SocketAddr::V6(addr) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("socket unexpectedly bound to IPv6 address {}", addr),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind_loopback() -> UdpTransport {
        UdpTransport::bind(Address::from_octets(127, 0, 0, 1, 0), &Config::default()).unwrap()
    }

    #[test]
    fn empty_queue_is_none_not_an_error() {
        let mut transport = bind_loopback();
        let mut buffer = [0u8; 256];
        assert!(transport.receive_packet(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn datagrams_round_trip_between_two_sockets() {
        let mut a = bind_loopback();
        let mut b = bind_loopback();
        let b_addr = b.local_addr().unwrap();
        let a_addr = a.local_addr().unwrap();

        a.send_packet(&b_addr, b"hello").unwrap();

        let mut buffer = [0u8; 256];
        let received = wait_for_packet(&mut b, &mut buffer);
        assert_eq!(received, (b"hello".to_vec(), a_addr));
    }

    #[test]
    fn bind_applies_configured_buffer_sizes() {
        let config =
            Config { socket_recv_buffer_size: Some(64 * 1024), ..Config::default() };
        // Success is the assertion; a bad option errors out of bind.
        UdpTransport::bind(Address::from_octets(127, 0, 0, 1, 0), &config).unwrap();
    }

    fn wait_for_packet(
        transport: &mut UdpTransport,
        buffer: &mut [u8; 256],
    ) -> (Vec<u8>, Address) {
        use std::time::{Duration, Instant};
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some((payload, from)) = transport.receive_packet(buffer).unwrap() {
                return (payload.to_vec(), from);
            }
            assert!(Instant::now() < deadline, "no datagram arrived in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
