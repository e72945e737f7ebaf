#![warn(missing_docs)]

//! pulsewire-link: connection management and runtime plumbing.
//!
//! Everything above the wire codec lives here:
//! - per-peer connection state ([`connection`])
//! - fixed-capacity connection tables ([`table`])
//! - the controllable I/O worker thread ([`worker`])
//! - the cross-thread event mailbox ([`mailbox`])
//! - readiness polling for sockets ([`readiness`])
//! - the UDP transport ([`socket`])
//! - the client and server orchestrators ([`client`], [`server`])
//!
//! The orchestrators are generic over the [`pulsewire_core::transport::Socket`]
//! trait and are driven by explicit `tick(dt, now)` calls, so every test can
//! run them deterministically against an in-memory transport.

/// Client orchestrator and its state machine.
pub mod client;
/// Per-peer connection state.
pub mod connection;
/// Cross-thread event mailbox.
pub mod mailbox;
/// Readiness polling for sockets.
pub mod readiness;
/// Server orchestrator.
pub mod server;
/// UDP transport implementation.
pub mod socket;
/// Fixed-capacity connection tables.
pub mod table;
/// Controllable worker thread.
pub mod worker;

pub use client::{Client, ClientEvent, ClientState};
pub use connection::Connection;
pub use mailbox::{AppEvent, EventMailbox, MailboxHandle};
pub use readiness::{Readiness, ReadinessSource, SocketReadiness};
pub use server::{Server, ServerEvent};
pub use socket::UdpTransport;
pub use table::{AddressTable, SlotTable};
pub use worker::{Worker, WorkerController, WorkerSignals, WorkerState};
