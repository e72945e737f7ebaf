//! End-to-end client/server sessions over an in-memory transport.
//!
//! The fake network delivers datagrams instantly and loses nothing, so every
//! scenario is deterministic: time only moves when a test says so.

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use pulsewire_core::{address::Address, config::Config, transport::Socket};
use pulsewire_link::{Client, ClientEvent, ClientState, Server, ServerEvent};

const DT: Duration = Duration::from_millis(16);

#[derive(Clone, Default)]
struct Network {
    queues: Arc<Mutex<HashMap<Address, VecDeque<(Address, Vec<u8>)>>>>,
}

impl Network {
    fn endpoint(&self, addr: Address) -> FakeSocket {
        FakeSocket { network: self.clone(), addr }
    }

    fn deliver(&self, to: Address, from: Address, payload: Vec<u8>) {
        self.queues.lock().unwrap().entry(to).or_default().push_back((from, payload));
    }

    fn pending(&self, addr: Address) -> usize {
        self.queues.lock().unwrap().get(&addr).map_or(0, |queue| queue.len())
    }
}

struct FakeSocket {
    network: Network,
    addr: Address,
}

impl Socket for FakeSocket {
    fn send_packet(&mut self, addr: &Address, payload: &[u8]) -> io::Result<usize> {
        self.network.deliver(*addr, self.addr, payload.to_vec());
        Ok(payload.len())
    }

    fn receive_packet<'a>(
        &mut self,
        buffer: &'a mut [u8],
    ) -> io::Result<Option<(&'a [u8], Address)>> {
        let mut queues = self.network.queues.lock().unwrap();
        let queue = match queues.get_mut(&self.addr) {
            Some(queue) => queue,
            None => return Ok(None),
        };
        match queue.pop_front() {
            Some((from, payload)) => {
                let length = payload.len().min(buffer.len());
                buffer[..length].copy_from_slice(&payload[..length]);
                Ok(Some((&buffer[..length], from)))
            }
            None => Ok(None),
        }
    }

    fn local_addr(&self) -> io::Result<Address> {
        Ok(self.addr)
    }
}

fn server_addr() -> Address {
    Address::from_octets(127, 0, 0, 1, 3000)
}

fn client_addr(n: u16) -> Address {
    Address::from_octets(127, 0, 0, 1, 4000 + n)
}

fn routed_config() -> Config {
    Config { routed_headers: true, max_peers: 2, ..Config::default() }
}

fn connect_client(
    network: &Network,
    server: &mut Server<FakeSocket>,
    n: u16,
    config: &Config,
    now: &mut Instant,
) -> Client<FakeSocket> {
    let mut client = Client::new(network.endpoint(client_addr(n)), config.clone());
    client.connect().unwrap();
    *now += DT;
    server.tick(DT, *now);
    let events = client.tick(DT, *now);
    assert!(
        matches!(events.as_slice(), [ClientEvent::Connected { .. }]),
        "handshake failed for client {}: {:?}",
        n,
        events
    );

    // A few keep-alive rounds so both directions have live sequence state;
    // until each side has sent once, the other cannot ack it.
    let warm = Duration::from_millis(50);
    for _ in 0..3 {
        *now += warm;
        client.tick(warm, *now);
        server.tick(warm, *now);
    }
    client
}

#[test]
fn handshake_assigns_first_free_slot() {
    let network = Network::default();
    let config = routed_config();
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut client = Client::new(network.endpoint(client_addr(1)), config.clone());
    let mut now = Instant::now();

    client.connect().unwrap();
    now += DT;
    let server_events = server.tick(DT, now);
    assert_eq!(
        server_events,
        vec![ServerEvent::PeerConnected { peer_index: 0, address: client_addr(1) }]
    );

    let client_events = client.tick(DT, now);
    assert_eq!(client_events, vec![ClientEvent::Connected { peer_index: Some(0) }]);
    assert_eq!(client.state(), ClientState::Connected);
    assert_eq!(client.peer_index(), Some(0));
}

#[test]
fn direct_profile_connects_without_an_index() {
    let network = Network::default();
    let config = Config::default();
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut client = Client::new(network.endpoint(client_addr(1)), config.clone());
    let mut now = Instant::now();

    client.connect().unwrap();
    now += DT;
    server.tick(DT, now);
    let events = client.tick(DT, now);
    assert_eq!(events, vec![ClientEvent::Connected { peer_index: None }]);
}

#[test]
fn messages_flow_both_ways() {
    let network = Network::default();
    let config = routed_config();
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut now = Instant::now();
    let mut client = connect_client(&network, &mut server, 1, &config, &mut now);

    client.send_message("hello server", now).unwrap();
    now += DT;
    let server_events = server.tick(DT, now);
    assert_eq!(
        server_events,
        vec![ServerEvent::MessageReceived { peer_index: 0, text: "hello server".into() }]
    );

    server.broadcast("hello client", now).unwrap();
    now += DT;
    let client_events = client.tick(DT, now);
    assert!(client_events.contains(&ClientEvent::MessageReceived("hello client".into())));
}

#[test]
fn broadcast_reaches_every_peer() {
    let network = Network::default();
    let config = routed_config();
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut now = Instant::now();
    let mut first = connect_client(&network, &mut server, 1, &config, &mut now);
    let mut second = connect_client(&network, &mut server, 2, &config, &mut now);

    server.broadcast("all hands", now).unwrap();
    now += DT;
    for client in [&mut first, &mut second] {
        let events = client.tick(DT, now);
        assert!(events.contains(&ClientEvent::MessageReceived("all hands".into())));
    }
}

#[test]
fn full_table_denies_and_the_client_learns_it() {
    let network = Network::default();
    let config = routed_config(); // capacity 2
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut now = Instant::now();
    let _first = connect_client(&network, &mut server, 1, &config, &mut now);
    let _second = connect_client(&network, &mut server, 2, &config, &mut now);

    let mut third = Client::new(network.endpoint(client_addr(3)), config.clone());
    third.connect().unwrap();
    now += DT;
    let server_events = server.tick(DT, now);
    assert!(server_events.is_empty(), "denied peer must not raise events: {:?}", server_events);
    assert_eq!(server.connection_count(), 2);

    let events = third.tick(DT, now);
    assert_eq!(events, vec![ClientEvent::Denied]);
    assert_eq!(third.state(), ClientState::Disconnected);
}

#[test]
fn silent_peers_are_evicted_and_slots_reused() {
    let network = Network::default();
    let config = routed_config();
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut now = Instant::now();
    let _first = connect_client(&network, &mut server, 1, &config, &mut now);
    let _second = connect_client(&network, &mut server, 2, &config, &mut now);
    assert_eq!(server.connection_count(), 2);

    // Nobody talks for longer than the 10s timeout.
    now += Duration::from_secs(11);
    let events = server.tick(Duration::from_secs(11), now);
    assert_eq!(
        events,
        vec![
            ServerEvent::PeerDisconnected { peer_index: 0, address: client_addr(1) },
            ServerEvent::PeerDisconnected { peer_index: 1, address: client_addr(2) },
        ]
    );
    assert_eq!(server.connection_count(), 0);

    // A newcomer gets the lowest freed slot.
    let newcomer = connect_client(&network, &mut server, 3, &config, &mut now);
    assert_eq!(newcomer.peer_index(), Some(0));
}

#[test]
fn keep_alives_hold_an_idle_session_open() {
    let network = Network::default();
    let config = routed_config();
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut now = Instant::now();
    let mut client = connect_client(&network, &mut server, 1, &config, &mut now);

    // 12.5 simulated seconds, past the 10s timeout, with no messages at all.
    let step = Duration::from_millis(125);
    for _ in 0..100 {
        now += step;
        client.tick(step, now);
        server.tick(step, now);
    }
    assert_eq!(client.state(), ClientState::Connected);
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn client_evicts_a_silent_server() {
    let network = Network::default();
    let config = routed_config();
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut now = Instant::now();
    let mut client = connect_client(&network, &mut server, 1, &config, &mut now);

    // The server stops ticking; only the client keeps going.
    now += Duration::from_secs(11);
    let events = client.tick(Duration::from_secs(11), now);
    assert_eq!(events, vec![ClientEvent::Disconnected]);
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(client.send_message("anyone there", now).is_err());
    let _ = server;
}

#[test]
fn connection_requests_retry_once_a_second() {
    let network = Network::default();
    let config = routed_config();
    let mut client = Client::new(network.endpoint(client_addr(1)), config);
    let mut now = Instant::now();

    client.connect().unwrap();
    assert_eq!(network.pending(server_addr()), 1);

    for _ in 0..3 {
        now += Duration::from_secs(1);
        client.tick(Duration::from_secs(1), now);
    }
    assert_eq!(network.pending(server_addr()), 4);
}

#[test]
fn connection_attempt_gives_up_after_the_timeout() {
    let network = Network::default();
    let config = routed_config();
    let mut client = Client::new(network.endpoint(client_addr(1)), config);
    let mut now = Instant::now();

    client.connect().unwrap();
    now += Duration::from_secs(11);
    let events = client.tick(Duration::from_secs(11), now);
    assert_eq!(events, vec![ClientEvent::TimedOut]);
    assert_eq!(client.state(), ClientState::Disconnected);
}

#[test]
fn garbage_and_foreign_datagrams_are_dropped() {
    let network = Network::default();
    let config = routed_config();
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut now = Instant::now();
    let mut client = connect_client(&network, &mut server, 1, &config, &mut now);

    // Truncated junk, an unknown kind, and a wrong protocol identifier.
    network.deliver(server_addr(), client_addr(1), vec![0x07]);
    network.deliver(server_addr(), client_addr(1), vec![0x00, 0xC9, 0x09, 0x00, 0x00]);
    network.deliver(server_addr(), client_addr(1), vec![0x12, 0x34, 0x00, 0x00, 0x00]);
    now += DT;
    let events = server.tick(DT, now);
    assert!(events.is_empty());
    assert_eq!(server.connection_count(), 1);

    // A datagram from an address that never connected.
    let mut stranger = network.endpoint(client_addr(9));
    stranger.send_packet(&client_addr(1), b"psst").unwrap();
    now += DT;
    let events = client.tick(DT, now);
    assert!(events.is_empty());
    assert_eq!(client.state(), ClientState::Connected);
}

#[test]
fn replayed_message_is_delivered_once() {
    let network = Network::default();
    let config = routed_config();
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut now = Instant::now();
    let mut client = connect_client(&network, &mut server, 1, &config, &mut now);

    client.send_message("only once", now).unwrap();
    // Capture the exact datagram and replay it.
    let datagram = {
        let queues = network.queues.lock().unwrap();
        queues.get(&server_addr()).unwrap().back().unwrap().1.clone()
    };
    network.deliver(server_addr(), client_addr(1), datagram);

    now += DT;
    let events = server.tick(DT, now);
    assert_eq!(
        events,
        vec![ServerEvent::MessageReceived { peer_index: 0, text: "only once".into() }]
    );
}

#[test]
fn message_filling_the_packet_exactly_is_refused() {
    let network = Network::default();
    let config = routed_config();
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut now = Instant::now();
    let mut client = connect_client(&network, &mut server, 1, &config, &mut now);

    // The routed Message header is 13 bytes; with the NUL terminator a
    // 242-char text lands exactly on the 256-byte cap and must be refused.
    let boundary = "x".repeat(242);
    assert!(client.send_message(&boundary, now).is_err());
    assert_eq!(network.pending(server_addr()), 0);

    // One character shorter fits.
    let fits = "x".repeat(241);
    client.send_message(&fits, now).unwrap();
    now += DT;
    let events = server.tick(DT, now);
    assert_eq!(events, vec![ServerEvent::MessageReceived { peer_index: 0, text: fits }]);

    // The server-side gate draws the same line.
    assert!(server.send_to(0, &boundary, now).is_err());
}

#[test]
fn oversized_message_is_refused_locally() {
    let network = Network::default();
    let config = routed_config();
    let mut server = Server::new(network.endpoint(server_addr()), config.clone());
    let mut now = Instant::now();
    let mut client = connect_client(&network, &mut server, 1, &config, &mut now);

    let huge = "x".repeat(300);
    assert!(client.send_message(&huge, now).is_err());
    // Nothing went out.
    assert_eq!(network.pending(server_addr()), 0);
    let _ = server;
}
