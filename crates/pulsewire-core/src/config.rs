use std::{default::Default, time::Duration};

use crate::address::Address;

#[derive(Clone, Debug)]
/// Configuration options to tune protocol and runtime behavior.
pub struct Config {
    /// Application protocol identifier; packets with any other value are dropped unparsed.
    pub app_protocol_id: u16,
    /// Address of the server (the client connects here; the server binds to its port).
    pub server_address: Address,
    /// Max idle time before a connection is considered dead and evicted.
    pub connection_timeout: Duration,
    /// Interval between keep-alive packets on an established connection.
    pub keep_alive_interval: Duration,
    /// Interval between connection-request retries while connecting.
    pub connection_request_interval: Duration,
    /// Target interval of one network worker tick.
    pub network_tick_interval: Duration,
    /// Capacity of the server-side connection slot table.
    pub max_peers: u16,
    /// Smoothing factor (0..1) for the RTT moving average.
    pub rtt_smoothing_factor: f32,
    /// Average RTT above this value flags the connection as congested.
    pub congestion_rtt_threshold: Duration,
    /// Time the average RTT must stay below threshold before the congestion flag clears.
    pub congestion_recovery_duration: Duration,
    /// Under congestion, only one keep-alive tick in this many actually sends.
    pub congested_keep_alive_divisor: u32,
    /// Include the peer index field in packet headers (multi-peer routed profile).
    pub routed_headers: bool,
    /// Socket receive buffer size in bytes (None = system default).
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = system default).
    pub socket_send_buffer_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_protocol_id: 201,
            server_address: Address::from_octets(127, 0, 0, 1, 3000),
            connection_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_millis(50),
            connection_request_interval: Duration::from_secs(1),
            network_tick_interval: Duration::from_nanos(1_000_000_000 / 60),
            max_peers: 16,
            rtt_smoothing_factor: 0.10,
            congestion_rtt_threshold: Duration::from_millis(250),
            congestion_recovery_duration: Duration::from_secs(10),
            congested_keep_alive_divisor: 3,
            routed_headers: false,
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
        }
    }
}
