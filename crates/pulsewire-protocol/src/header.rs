//! Packet header serialization and deserialization.
//!
//! Fixed wire layout, big-endian throughout:
//!
//! `[app_id: u16][kind: u8][peer_index: u16?][reliability segment?][payload]`
//!
//! The peer index is present only in the routed (multi-peer) profile; the
//! reliability segment (`sequence: u16, ack: u16, ack_bitfield: u32`) is
//! present for every non-management kind. All fields go through explicit
//! bounds-checked reads and writes; byte ranges are never reinterpreted in
//! place.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use pulsewire_core::{
    constants::{MAX_PACKET_SIZE, RELIABILITY_SEGMENT_SIZE},
    error::{ErrorKind, Result},
};

/// The kind of a packet, one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Liveness refresh; no payload.
    KeepAlive = 0,
    /// Application message; NUL-terminated string payload.
    Message = 1,
    /// Client asks to join.
    ConnectionRequest = 2,
    /// Server accepted; routed profile carries the assigned peer index.
    ConnectionSuccess = 3,
    /// Server refused (table at capacity).
    ConnectionDenied = 4,
}

impl PacketKind {
    /// Maps a wire byte back to a kind.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PacketKind::KeepAlive),
            1 => Ok(PacketKind::Message),
            2 => Ok(PacketKind::ConnectionRequest),
            3 => Ok(PacketKind::ConnectionSuccess),
            4 => Ok(PacketKind::ConnectionDenied),
            other => Err(ErrorKind::UnknownPacketKind(other)),
        }
    }

    /// Connection-management kinds carry no reliability segment.
    pub fn is_management(self) -> bool {
        matches!(
            self,
            PacketKind::ConnectionRequest
                | PacketKind::ConnectionSuccess
                | PacketKind::ConnectionDenied
        )
    }
}

/// Whether headers carry the peer index field.
///
/// Both ends of a deployment must agree on the profile; it is fixed by
/// configuration, not negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    /// Single-peer client/server pair; no index field.
    Direct,
    /// Multi-peer server deployment; headers carry the table slot index.
    Routed,
}

/// Sequencing and acknowledgment data for one packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReliabilitySegment {
    /// Sender's sequence number for this packet.
    pub sequence: u16,
    /// Most recent sequence number the sender has seen from us.
    pub ack: u16,
    /// Receipt flags for the 32 packets preceding `ack`; bit 0 is `ack` itself.
    pub ack_bitfield: u32,
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Application protocol identifier.
    pub app_id: u16,
    /// Packet kind.
    pub kind: PacketKind,
    /// Table slot index; `Some` only under the routed profile.
    pub peer_index: Option<u16>,
    /// Reliability segment; `None` for management kinds.
    pub segment: Option<ReliabilitySegment>,
}

impl PacketHeader {
    /// Encoded size of this header in bytes.
    pub fn encoded_size(&self) -> usize {
        let mut size = 3; // app_id + kind
        if self.peer_index.is_some() {
            size += 2;
        }
        if self.segment.is_some() {
            size += RELIABILITY_SEGMENT_SIZE;
        }
        size
    }

    /// Largest payload that fits alongside this header in one packet.
    pub fn max_payload(&self) -> usize {
        MAX_PACKET_SIZE - self.encoded_size()
    }

    /// Appends the header bytes to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        // Writes to a Vec cannot fail; unwraps are on infallible io.
        buffer.write_u16::<BigEndian>(self.app_id).unwrap();
        buffer.write_u8(self.kind as u8).unwrap();
        if let Some(index) = self.peer_index {
            buffer.write_u16::<BigEndian>(index).unwrap();
        }
        if let Some(segment) = &self.segment {
            buffer.write_u16::<BigEndian>(segment.sequence).unwrap();
            buffer.write_u16::<BigEndian>(segment.ack).unwrap();
            buffer.write_u32::<BigEndian>(segment.ack_bitfield).unwrap();
        }
    }

    /// Decodes a header from the front of `datagram`.
    ///
    /// Returns the header and the offset at which the payload begins.
    /// A mismatched `expected_app_id` fails with `ProtocolMismatch` before any
    /// further parsing; short buffers fail with `MalformedPacket`.
    pub fn decode(
        datagram: &[u8],
        expected_app_id: u16,
        profile: HeaderProfile,
    ) -> Result<(Self, usize)> {
        let mut cursor = Cursor::new(datagram);

        let app_id = cursor.read_u16::<BigEndian>().map_err(|_| ErrorKind::MalformedPacket)?;
        if app_id != expected_app_id {
            return Err(ErrorKind::ProtocolMismatch);
        }

        let kind_byte = cursor.read_u8().map_err(|_| ErrorKind::MalformedPacket)?;
        let kind = PacketKind::from_u8(kind_byte)?;

        let peer_index = match profile {
            HeaderProfile::Routed => Some(
                cursor.read_u16::<BigEndian>().map_err(|_| ErrorKind::MalformedPacket)?,
            ),
            HeaderProfile::Direct => None,
        };

        let segment = if kind.is_management() {
            None
        } else {
            let sequence =
                cursor.read_u16::<BigEndian>().map_err(|_| ErrorKind::MalformedPacket)?;
            let ack = cursor.read_u16::<BigEndian>().map_err(|_| ErrorKind::MalformedPacket)?;
            let ack_bitfield =
                cursor.read_u32::<BigEndian>().map_err(|_| ErrorKind::MalformedPacket)?;
            Some(ReliabilitySegment { sequence, ack, ack_bitfield })
        };

        let offset = cursor.position() as usize;
        Ok((PacketHeader { app_id, kind, peer_index, segment }, offset))
    }
}

/// Validates a Message payload as a NUL-terminated string.
///
/// The terminator must fall exactly at the last received byte; a payload
/// without one, or with an interior NUL, is rejected rather than trusted as a
/// C-style string. Returns the string bytes without the terminator.
pub fn validate_message_payload(payload: &[u8]) -> Result<&[u8]> {
    match payload.split_last() {
        Some((&0, text)) if !text.contains(&0) => Ok(text),
        _ => Err(ErrorKind::MalformedPacket),
    }
}
