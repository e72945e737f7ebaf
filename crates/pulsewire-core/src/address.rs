use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

/// IPv4 address and port, used both on the wire and as a map key.
///
/// Stored as a host-order `u32` plus port so it hashes and compares cheaply.
/// The default value is loopback with port zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    network_address: u32,
    port: u16,
}

impl Address {
    /// Creates an address from a raw 32-bit network address and port.
    pub fn new(network_address: u32, port: u16) -> Self {
        Self { network_address, port }
    }

    /// Creates an address from dotted-quad octets and a port.
    pub fn from_octets(a: u8, b: u8, c: u8, d: u8, port: u16) -> Self {
        Self { network_address: u32::from_be_bytes([a, b, c, d]), port }
    }

    /// Returns the raw 32-bit network address.
    pub fn network_address(&self) -> u32 {
        self.network_address
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns a copy of this address with a different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self { network_address: self.network_address, port }
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::from_octets(127, 0, 0, 1, 0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.network_address.to_be_bytes();
        write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port)
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Self {
        Self { network_address: u32::from(*addr.ip()), port: addr.port() }
    }
}

impl From<Address> for SocketAddrV4 {
    fn from(addr: Address) -> Self {
        SocketAddrV4::new(Ipv4Addr::from(addr.network_address), addr.port)
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> Self {
        SocketAddr::V4(addr.into())
    }
}
