#![warn(missing_docs)]

//! pulsewire-core: foundational types shared across the workspace.
//!
//! This crate provides the minimal set of utilities every layer needs:
//! - Network addresses
//! - Configuration
//! - Error handling
//! - Protocol constants
//! - Transport abstraction for pluggable I/O
//! - Time abstraction and interval timers
//!
//! Protocol logic (header codec, reliability state machine) lives in
//! `pulsewire-protocol`; connection management and orchestration live in
//! `pulsewire-link`.

/// Protocol constants shared across layers.
pub mod constants {
    /// Size of the application protocol identifier on the wire.
    pub const APP_ID_SIZE: usize = 2;
    /// Size of the packet kind byte.
    pub const PACKET_KIND_SIZE: usize = 1;
    /// Size of the peer index field (routed header profile only).
    pub const PEER_INDEX_SIZE: usize = 2;
    /// Size of the reliability segment: sequence (u16) + ack (u16) + ack bitfield (u32).
    pub const RELIABILITY_SEGMENT_SIZE: usize = 8;
    /// Hard cap on total datagram size.
    pub const MAX_PACKET_SIZE: usize = 256;
    /// Header size for the direct (client/server pair) profile, reliability segment included.
    pub const DIRECT_HEADER_SIZE: usize = APP_ID_SIZE + PACKET_KIND_SIZE + RELIABILITY_SEGMENT_SIZE;
    /// Header size for the routed (multi-peer) profile, reliability segment included.
    pub const ROUTED_HEADER_SIZE: usize = DIRECT_HEADER_SIZE + PEER_INDEX_SIZE;
    /// Number of sequence numbers covered by an acknowledgment bitfield.
    pub const ACK_WINDOW_SIZE: u16 = 32;
}

/// Network address value type.
pub mod address;
/// Configuration options for protocol and runtime behavior.
pub mod config;
/// Error types and results.
pub mod error;
/// Time source abstraction and interval timers.
pub mod time;
/// Transport abstraction for pluggable I/O.
pub mod transport;
