#![warn(missing_docs)]

//! Pulsewire: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types for building reliable UDP messaging apps:
//!
//! - Client and server orchestrators and their events
//! - Core configuration and addressing (`Config`, `Address`)
//! - Runtime plumbing (`Worker`, `EventMailbox`, `SocketReadiness`)
//!
//! Example
//! ```no_run
//! use std::time::{Duration, Instant};
//! use pulsewire::{Client, Config, UdpTransport, Address};
//!
//! let config = Config::default();
//! let socket = UdpTransport::bind(Address::from_octets(0, 0, 0, 0, 0), &config).unwrap();
//! let mut client = Client::new(socket, config);
//! client.connect().unwrap();
//!
//! // Drive the state machine until something happens.
//! let dt = Duration::from_millis(16);
//! loop {
//!     let events = client.tick(dt, Instant::now());
//!     if !events.is_empty() {
//!         break;
//!     }
//!     std::thread::sleep(dt);
//! }
//! ```

// Core configuration, addressing and errors
pub use pulsewire_core::{
    address::Address,
    config::Config,
    error::{ErrorKind, Result},
    time::{Clock, IntervalTimer, SystemClock},
    transport::Socket,
};
// Orchestrators and runtime plumbing
pub use pulsewire_link::{
    AppEvent, Client, ClientEvent, ClientState, EventMailbox, MailboxHandle, Readiness,
    ReadinessSource, Server, ServerEvent, SocketReadiness, UdpTransport, Worker,
    WorkerController, WorkerSignals, WorkerState,
};
// Protocol: header codec and reliability primitives
pub use pulsewire_protocol::{
    HeaderProfile, PacketHeader, PacketKind, ReliabilityContext, ReliabilitySegment,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Address, AppEvent, Client, ClientEvent, ClientState, Config, ErrorKind, EventMailbox,
        Result, Server, ServerEvent, Socket, SocketReadiness, UdpTransport, Worker, WorkerState,
    };
}
