//! Client orchestrator and its state machine.

use std::time::{Duration, Instant};

use pulsewire_core::{
    config::Config,
    constants::MAX_PACKET_SIZE,
    error::{ErrorKind, Result},
    time::IntervalTimer,
    transport::Socket,
};
use pulsewire_protocol::{
    header::validate_message_payload, HeaderProfile, PacketHeader, PacketKind,
};
use tracing::{debug, trace, warn};

use crate::{connection::Connection, table::AddressTable};

/// Connection lifecycle of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No connection and no attempt in flight.
    Disconnected,
    /// A connection request is outstanding.
    Connecting,
    /// Handshake completed; traffic flows.
    Connected,
}

/// Observable outcomes of a client tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server accepted the connection.
    Connected {
        /// Slot index the server assigned; present only under routed headers.
        peer_index: Option<u16>,
    },
    /// The server refused the connection (its table is full).
    Denied,
    /// The connection attempt expired without any reply.
    TimedOut,
    /// The established connection went silent past the timeout.
    Disconnected,
    /// A message arrived from the server.
    MessageReceived(String),
}

/// Client endpoint, generic over the transport.
///
/// Driven by explicit `tick(dt, now)` calls; each tick drains the socket,
/// runs retries, keep-alives and timeout checks, and returns whatever became
/// observable. Nothing in here blocks.
#[derive(Debug)]
pub struct Client<S: Socket> {
    socket: S,
    config: Config,
    profile: HeaderProfile,
    state: ClientState,
    /// Address-keyed table holding at most the server's connection.
    connections: AddressTable,
    peer_index: Option<u16>,
    request_timer: IntervalTimer,
    connecting_elapsed: Duration,
    send_buffer: Vec<u8>,
}

impl<S: Socket> Client<S> {
    /// Creates a client over `socket`, targeting `config.server_address`.
    pub fn new(socket: S, config: Config) -> Self {
        let profile =
            if config.routed_headers { HeaderProfile::Routed } else { HeaderProfile::Direct };
        let request_timer = IntervalTimer::new(config.connection_request_interval);
        Self {
            socket,
            config,
            profile,
            state: ClientState::Disconnected,
            connections: AddressTable::new(1),
            peer_index: None,
            request_timer,
            connecting_elapsed: Duration::ZERO,
            send_buffer: Vec::with_capacity(MAX_PACKET_SIZE),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Slot index assigned by the server, when known.
    pub fn peer_index(&self) -> Option<u16> {
        self.peer_index
    }

    /// Smoothed round-trip estimate of the current connection.
    pub fn average_rtt(&self) -> Option<Duration> {
        self.server_connection().map(|c| c.reliability.average_rtt())
    }

    /// Whether the current connection is flagged as congested.
    pub fn is_congested(&self) -> bool {
        self.server_connection().map_or(false, |c| c.reliability.is_congested())
    }

    fn server_connection(&self) -> Option<&Connection> {
        self.connections.get(&self.config.server_address)
    }

    /// Begins (or restarts) a connection attempt.
    ///
    /// Sends the first request immediately; `tick` keeps retrying at the
    /// configured interval until the server answers or the attempt times out.
    pub fn connect(&mut self) -> Result<()> {
        self.state = ClientState::Connecting;
        self.connections.remove(&self.config.server_address);
        self.peer_index = None;
        self.connecting_elapsed = Duration::ZERO;
        self.request_timer.reset();
        debug!(server = %self.config.server_address, "requesting connection");
        self.send_management(PacketKind::ConnectionRequest)
    }

    /// Drops the connection locally. No notification is sent; the server
    /// notices through its own idle timeout.
    pub fn disconnect(&mut self) {
        self.state = ClientState::Disconnected;
        self.connections.remove(&self.config.server_address);
        self.peer_index = None;
    }

    /// Sends one message to the server.
    ///
    /// The text is framed as a NUL-terminated payload, so it must carry no
    /// NUL of its own and must fit in a single packet next to the header.
    pub fn send_message(&mut self, text: &str, now: Instant) -> Result<()> {
        if self.state != ClientState::Connected {
            return Err(ErrorKind::NotConnected);
        }
        if text.as_bytes().contains(&0) {
            return Err(ErrorKind::MalformedPacket);
        }

        let app_id = self.config.app_protocol_id;
        let server = self.config.server_address;
        let peer_index = self.outbound_index();
        let connection = self.connections.get_mut(&server).ok_or(ErrorKind::NotConnected)?;

        let header_size = PacketHeader {
            app_id,
            kind: PacketKind::Message,
            peer_index,
            // Sizing only; the real segment is written after the size check.
            segment: Some(Default::default()),
        }
        .encoded_size();
        // The cap is exclusive: a payload filling the packet exactly is
        // already too large.
        let payload_size = text.len() + 1;
        if header_size + payload_size >= MAX_PACKET_SIZE {
            return Err(ErrorKind::PayloadTooLarge(payload_size));
        }

        let header = PacketHeader {
            app_id,
            kind: PacketKind::Message,
            peer_index,
            segment: Some(connection.reliability.write_segment(now)),
        };
        self.send_buffer.clear();
        header.encode_into(&mut self.send_buffer);
        self.send_buffer.extend_from_slice(text.as_bytes());
        self.send_buffer.push(0);
        self.socket.send_packet(&self.config.server_address, &self.send_buffer)?;
        Ok(())
    }

    /// Advances the client by one tick.
    ///
    /// Drains every pending datagram, then runs the state machine: request
    /// retries while connecting, keep-alive and timeout bookkeeping while
    /// connected.
    pub fn tick(&mut self, dt: Duration, now: Instant) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        self.pump_receives(now, &mut events);

        match self.state {
            ClientState::Disconnected => {}
            ClientState::Connecting => {
                self.connecting_elapsed += dt;
                if self.connecting_elapsed > self.config.connection_timeout {
                    warn!("connection attempt timed out");
                    self.state = ClientState::Disconnected;
                    events.push(ClientEvent::TimedOut);
                } else if self.request_timer.advance(dt) {
                    if let Err(e) = self.send_management(PacketKind::ConnectionRequest) {
                        warn!(error = %e, "connection request retry failed");
                    }
                }
            }
            ClientState::Connected => {
                let server = self.config.server_address;
                let keep_alive_due =
                    self.connections.get_mut(&server).map_or(false, |c| c.advance(dt));
                let timed_out = self
                    .server_connection()
                    .map_or(true, |c| c.is_timed_out(self.config.connection_timeout));
                if timed_out {
                    warn!("server went silent; dropping connection");
                    self.disconnect();
                    events.push(ClientEvent::Disconnected);
                } else if keep_alive_due {
                    if let Err(e) = self.send_keep_alive(now) {
                        warn!(error = %e, "keep-alive send failed");
                    }
                }
            }
        }
        events
    }

    fn pump_receives(&mut self, now: Instant, events: &mut Vec<ClientEvent>) {
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
            if from != self.config.server_address {
                trace!(%from, "ignoring datagram from unknown source");
                continue;
            }
            if let Err(e) = self.handle_datagram(&buffer[..length], now, events) {
                trace!(error = %e, "dropping datagram");
            }
        }
    }

    fn handle_datagram(
        &mut self,
        datagram: &[u8],
        now: Instant,
        events: &mut Vec<ClientEvent>,
    ) -> Result<()> {
        let (header, payload_offset) =
            PacketHeader::decode(datagram, self.config.app_protocol_id, self.profile)?;

        match header.kind {
            PacketKind::ConnectionSuccess => {
                let server = self.config.server_address;
                match self.state {
                    ClientState::Connecting => {
                        self.connections.admit(Connection::new(server, &self.config, now))?;
                        self.peer_index = header.peer_index;
                        self.state = ClientState::Connected;
                        debug!(peer_index = ?header.peer_index, "connection established");
                        events.push(ClientEvent::Connected { peer_index: header.peer_index });
                    }
                    ClientState::Connected => {
                        // Duplicate of an accept we already processed; still
                        // proof of life.
                        if let Some(connection) = self.connections.get_mut(&server) {
                            connection.reliability.refresh_liveness();
                        }
                    }
                    ClientState::Disconnected => {}
                }
                Ok(())
            }
            PacketKind::ConnectionDenied => {
                if self.state == ClientState::Connecting {
                    warn!("server denied the connection");
                    self.state = ClientState::Disconnected;
                    events.push(ClientEvent::Denied);
                }
                Ok(())
            }
            PacketKind::ConnectionRequest => {
                // Server-bound kind; nothing for a client to do with it.
                Ok(())
            }
            PacketKind::KeepAlive | PacketKind::Message => {
                if self.state != ClientState::Connected {
                    return Ok(());
                }
                let server = self.config.server_address;
                let connection =
                    self.connections.get_mut(&server).ok_or(ErrorKind::NotConnected)?;
                let segment = header.segment.ok_or(ErrorKind::MalformedPacket)?;
                connection.reliability.process_segment(&segment, now)?;

                if header.kind == PacketKind::Message {
                    let text = validate_message_payload(&datagram[payload_offset..])?;
                    let text = String::from_utf8(text.to_vec())
                        .map_err(|_| ErrorKind::MalformedPacket)?;
                    events.push(ClientEvent::MessageReceived(text));
                }
                Ok(())
            }
        }
    }

    fn send_keep_alive(&mut self, now: Instant) -> Result<()> {
        let app_id = self.config.app_protocol_id;
        let server = self.config.server_address;
        let peer_index = self.outbound_index();
        let connection = self.connections.get_mut(&server).ok_or(ErrorKind::NotConnected)?;
        let header = PacketHeader {
            app_id,
            kind: PacketKind::KeepAlive,
            peer_index,
            segment: Some(connection.reliability.write_segment(now)),
        };
        self.send_buffer.clear();
        header.encode_into(&mut self.send_buffer);
        self.socket.send_packet(&self.config.server_address, &self.send_buffer)?;
        Ok(())
    }

    fn send_management(&mut self, kind: PacketKind) -> Result<()> {
        let header = PacketHeader {
            app_id: self.config.app_protocol_id,
            kind,
            peer_index: self.outbound_index(),
            segment: None,
        };
        self.send_buffer.clear();
        header.encode_into(&mut self.send_buffer);
        self.socket.send_packet(&self.config.server_address, &self.send_buffer)?;
        Ok(())
    }

    /// Index field for outbound routed headers. Before the server has
    /// assigned one (during the handshake) the field carries zero and the
    /// server identifies the client by address.
    fn outbound_index(&self) -> Option<u16> {
        match self.profile {
            HeaderProfile::Routed => Some(self.peer_index.unwrap_or(0)),
            HeaderProfile::Direct => None,
        }
    }
}
