use std::{fmt, io};

/// Convenience alias for results produced by this stack.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Errors that can occur while processing packets or managing connections.
///
/// Protocol-level anomalies (mismatch, malformed, stale, invalid ack) are
/// recovered locally by dropping the offending packet; they never abort the
/// process. Only socket setup failures are fatal to a role's startup.
#[derive(Debug)]
pub enum ErrorKind {
    /// The packet carried a different application protocol identifier.
    ProtocolMismatch,
    /// The packet was too short for its declared kind, or its payload was not
    /// a properly terminated string.
    MalformedPacket,
    /// The packet kind byte did not map to a known kind.
    UnknownPacketKind(u8),
    /// The sequence number was a duplicate or fell outside the receive window.
    StaleOrDuplicateSequence,
    /// The acknowledgment referenced a sequence number we never sent, or one
    /// outside the ack window; possible corruption or adversarial traffic.
    InvalidAck,
    /// The connection table has no free slot for a new peer.
    CapacityExceeded,
    /// The peer has been silent longer than the connection timeout.
    ConnectionTimeout,
    /// The operation requires an established connection and there is none.
    NotConnected,
    /// The payload would not fit in a packet together with the header.
    PayloadTooLarge(usize),
    /// An I/O error from the underlying socket.
    IoError(io::Error),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ProtocolMismatch => {
                write!(f, "The packet protocol identifier did not match ours.")
            }
            ErrorKind::MalformedPacket => {
                write!(f, "The packet was too short or malformed for its declared kind.")
            }
            ErrorKind::UnknownPacketKind(kind) => {
                write!(f, "Unknown packet kind byte: {}.", kind)
            }
            ErrorKind::StaleOrDuplicateSequence => {
                write!(f, "The packet sequence number was stale or a duplicate.")
            }
            ErrorKind::InvalidAck => {
                write!(f, "The acknowledgment referenced an unsent or out-of-window sequence.")
            }
            ErrorKind::CapacityExceeded => {
                write!(f, "The connection table is at capacity.")
            }
            ErrorKind::ConnectionTimeout => {
                write!(f, "The connection exceeded its idle timeout.")
            }
            ErrorKind::NotConnected => {
                write!(f, "No established connection.")
            }
            ErrorKind::PayloadTooLarge(size) => {
                write!(f, "Payload of {} bytes exceeds the maximum packet size.", size)
            }
            ErrorKind::IoError(e) => write!(f, "An IO error occurred: {}.", e),
        }
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ErrorKind::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(inner: io::Error) -> Self {
        ErrorKind::IoError(inner)
    }
}
