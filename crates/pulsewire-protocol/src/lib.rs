#![warn(missing_docs)]

//! pulsewire-protocol: the wire format and the reliability engine.
//!
//! This crate owns everything that interprets or produces protocol bytes:
//! - the fixed-layout packet header codec ([`header`])
//! - wrapping sequence-number comparison ([`sequence`])
//! - the per-peer reliability and congestion state machine ([`reliability`])
//!
//! It is purely computational; no sockets or threads. I/O lives in
//! `pulsewire-link`.

/// Packet header serialization and deserialization.
pub mod header;
/// Per-peer reliability, RTT and congestion state.
pub mod reliability;
/// Wrapping sequence-number ordering.
pub mod sequence;

pub use header::{HeaderProfile, PacketHeader, PacketKind, ReliabilitySegment};
pub use reliability::ReliabilityContext;
pub use sequence::{sequence_greater_than, sequence_less_than};
