//! Server orchestrator.

use std::time::{Duration, Instant};

use pulsewire_core::{
    address::Address,
    config::Config,
    constants::MAX_PACKET_SIZE,
    error::{ErrorKind, Result},
    transport::Socket,
};
use pulsewire_protocol::{
    header::validate_message_payload, HeaderProfile, PacketHeader, PacketKind,
    ReliabilitySegment,
};
use tracing::{debug, trace, warn};

use crate::{connection::Connection, table::SlotTable};

/// Observable outcomes of a server tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A new peer was admitted into the table.
    PeerConnected {
        /// Slot index assigned to the peer.
        peer_index: u16,
        /// The peer's remote address.
        address: Address,
    },
    /// A peer went silent past the timeout and was evicted.
    PeerDisconnected {
        /// Slot index the peer held.
        peer_index: u16,
        /// The peer's remote address.
        address: Address,
    },
    /// A message arrived from an admitted peer.
    MessageReceived {
        /// Slot index of the sender.
        peer_index: u16,
        /// The message text.
        text: String,
    },
}

/// Server endpoint, generic over the transport.
///
/// Admits peers into a fixed-size slot table and replies to every connection
/// request: `ConnectionSuccess` carrying the slot index, or
/// `ConnectionDenied` when the table is full, so a rejected client learns its
/// fate instead of retrying into silence. Driven by explicit `tick(dt, now)`
/// calls like the client.
#[derive(Debug)]
pub struct Server<S: Socket> {
    socket: S,
    config: Config,
    profile: HeaderProfile,
    table: SlotTable,
    send_buffer: Vec<u8>,
}

impl<S: Socket> Server<S> {
    /// Creates a server over `socket` with `config.max_peers` slots.
    pub fn new(socket: S, config: Config) -> Self {
        let profile =
            if config.routed_headers { HeaderProfile::Routed } else { HeaderProfile::Direct };
        let table = SlotTable::new(config.max_peers);
        Self { socket, config, profile, table, send_buffer: Vec::with_capacity(MAX_PACKET_SIZE) }
    }

    /// Number of currently admitted peers.
    pub fn connection_count(&self) -> usize {
        self.table.active_count()
    }

    /// Advances the server by one tick.
    ///
    /// Drains every pending datagram, then ages all connections: silent peers
    /// are evicted, the rest get keep-alives on their own schedules.
    pub fn tick(&mut self, dt: Duration, now: Instant) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        self.pump_receives(now, &mut events);

        let timeout = self.config.connection_timeout;
        let mut keep_alive_due = Vec::new();
        let mut expired = Vec::new();
        for (index, connection) in self.table.iter_active_mut() {
            let due = connection.advance(dt);
            if connection.is_timed_out(timeout) {
                expired.push(index);
            } else if due {
                keep_alive_due.push(index);
            }
        }

        for index in expired {
            if let Some(connection) = self.table.remove(index) {
                warn!(peer_index = index, address = %connection.address(), "peer timed out");
                events.push(ServerEvent::PeerDisconnected {
                    peer_index: index,
                    address: connection.address(),
                });
            }
        }
        for index in keep_alive_due {
            if let Err(e) = self.send_keep_alive(index, now) {
                warn!(peer_index = index, error = %e, "keep-alive send failed");
            }
        }
        events
    }

    /// Sends one message to the peer in slot `index`.
    pub fn send_to(&mut self, index: u16, text: &str, now: Instant) -> Result<()> {
        if text.as_bytes().contains(&0) {
            return Err(ErrorKind::MalformedPacket);
        }
        let app_id = self.config.app_protocol_id;
        let peer_field = self.outbound_index(index);

        let header_size = PacketHeader {
            app_id,
            kind: PacketKind::Message,
            peer_index: peer_field,
            segment: Some(ReliabilitySegment::default()),
        }
        .encoded_size();
        // The cap is exclusive: a payload filling the packet exactly is
        // already too large.
        let payload_size = text.len() + 1;
        if header_size + payload_size >= MAX_PACKET_SIZE {
            return Err(ErrorKind::PayloadTooLarge(payload_size));
        }

        let connection = self.table.get_mut(index).ok_or(ErrorKind::NotConnected)?;
        let address = connection.address();
        let header = PacketHeader {
            app_id,
            kind: PacketKind::Message,
            peer_index: peer_field,
            segment: Some(connection.reliability.write_segment(now)),
        };
        self.send_buffer.clear();
        header.encode_into(&mut self.send_buffer);
        self.send_buffer.extend_from_slice(text.as_bytes());
        self.send_buffer.push(0);
        self.socket.send_packet(&address, &self.send_buffer)?;
        Ok(())
    }

    /// Sends one message to every admitted peer.
    ///
    /// Per-peer send failures are logged and skipped so one bad peer cannot
    /// block the rest of the fan-out.
    pub fn broadcast(&mut self, text: &str, now: Instant) -> Result<()> {
        if text.as_bytes().contains(&0) {
            return Err(ErrorKind::MalformedPacket);
        }
        let indices: Vec<u16> = self.table.iter_active_mut().map(|(index, _)| index).collect();
        for index in indices {
            if let Err(e) = self.send_to(index, text, now) {
                warn!(peer_index = index, error = %e, "broadcast send failed");
            }
        }
        Ok(())
    }

    fn pump_receives(&mut self, now: Instant, events: &mut Vec<ServerEvent>) {
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        loop {
            let (length, from) = match self.socket.receive_packet(&mut buffer) {
                Ok(Some((payload, from))) => (payload.len(), from),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "socket receive failed");
                    break;
                }
            };
            if let Err(e) = self.handle_datagram(&buffer[..length], from, now, events) {
                trace!(%from, error = %e, "dropping datagram");
            }
        }
    }

    fn handle_datagram(
        &mut self,
        datagram: &[u8],
        from: Address,
        now: Instant,
        events: &mut Vec<ServerEvent>,
    ) -> Result<()> {
        let (header, payload_offset) =
            PacketHeader::decode(datagram, self.config.app_protocol_id, self.profile)?;

        match header.kind {
            PacketKind::ConnectionRequest => {
                self.handle_connection_request(from, now, events)
            }
            PacketKind::KeepAlive | PacketKind::Message => {
                let index = match self.table.index_of(&from) {
                    Some(index) => index,
                    None => {
                        trace!(%from, "traffic from unadmitted address");
                        return Ok(());
                    }
                };
                // Under routed headers the claimed index must match the slot
                // the source address actually holds; indices get reused, so
                // the address is the authority.
                if self.profile == HeaderProfile::Routed && header.peer_index != Some(index) {
                    trace!(%from, claimed = ?header.peer_index, held = index, "peer index mismatch");
                    return Ok(());
                }
                let connection =
                    self.table.get_mut(index).ok_or(ErrorKind::NotConnected)?;
                let segment = header.segment.ok_or(ErrorKind::MalformedPacket)?;
                connection.reliability.process_segment(&segment, now)?;

                if header.kind == PacketKind::Message {
                    let text = validate_message_payload(&datagram[payload_offset..])?;
                    let text = String::from_utf8(text.to_vec())
                        .map_err(|_| ErrorKind::MalformedPacket)?;
                    events.push(ServerEvent::MessageReceived { peer_index: index, text });
                }
                Ok(())
            }
            PacketKind::ConnectionSuccess | PacketKind::ConnectionDenied => {
                // Client-bound kinds; a server never consumes them.
                Ok(())
            }
        }
    }

    fn handle_connection_request(
        &mut self,
        from: Address,
        now: Instant,
        events: &mut Vec<ServerEvent>,
    ) -> Result<()> {
        if let Some(index) = self.table.index_of(&from) {
            // Retry of a request we already accepted; the accept may have
            // been lost, so answer it again.
            if let Some(connection) = self.table.get_mut(index) {
                connection.reliability.refresh_liveness();
            }
            return self.send_management(PacketKind::ConnectionSuccess, from, index);
        }

        let connection = Connection::new(from, &self.config, now);
        match self.table.admit(connection) {
            Ok(index) => {
                debug!(peer_index = index, %from, "connection accepted");
                events.push(ServerEvent::PeerConnected { peer_index: index, address: from });
                self.send_management(PacketKind::ConnectionSuccess, from, index)
            }
            Err(ErrorKind::CapacityExceeded) => {
                warn!(%from, "connection denied, table full");
                self.send_management(PacketKind::ConnectionDenied, from, 0)
            }
            Err(e) => Err(e),
        }
    }

    fn send_keep_alive(&mut self, index: u16, now: Instant) -> Result<()> {
        let app_id = self.config.app_protocol_id;
        let peer_field = self.outbound_index(index);
        let connection = self.table.get_mut(index).ok_or(ErrorKind::NotConnected)?;
        let address = connection.address();
        let header = PacketHeader {
            app_id,
            kind: PacketKind::KeepAlive,
            peer_index: peer_field,
            segment: Some(connection.reliability.write_segment(now)),
        };
        self.send_buffer.clear();
        header.encode_into(&mut self.send_buffer);
        self.socket.send_packet(&address, &self.send_buffer)?;
        Ok(())
    }

    fn send_management(&mut self, kind: PacketKind, to: Address, index: u16) -> Result<()> {
        let header = PacketHeader {
            app_id: self.config.app_protocol_id,
            kind,
            peer_index: self.outbound_index(index),
            segment: None,
        };
        self.send_buffer.clear();
        header.encode_into(&mut self.send_buffer);
        self.socket.send_packet(&to, &self.send_buffer)?;
        Ok(())
    }

    fn outbound_index(&self, index: u16) -> Option<u16> {
        match self.profile {
            HeaderProfile::Routed => Some(index),
            HeaderProfile::Direct => None,
        }
    }
}
