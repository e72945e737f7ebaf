//! Console chat over the pulsewire protocol.
//!
//! One process runs as the server, any number of others as clients:
//!
//! ```text
//! pulsewire server
//! pulsewire client
//! ```
//!
//! Typed lines are sent on Enter (clients to the server, the server as a
//! broadcast); `/quit` exits. Each role runs a net worker driving the
//! protocol, a ticker feeding it time through the mailbox, and a readiness
//! worker that wakes it when datagrams arrive.

use std::{
    env,
    io::{self, BufRead},
    process::ExitCode,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use pulsewire::{
    Address, AppEvent, Client, ClientEvent, Clock, Config, EventMailbox, Readiness,
    ReadinessSource, Result, Server, ServerEvent, Socket, SocketReadiness, SystemClock,
    UdpTransport,
    Worker, WorkerState,
};
use tracing::{error, info, warn};

/// Cap on simulated time applied in one worker iteration. Ticks pile up in
/// the mailbox while the worker is parked, and park gaps are not peer idle
/// time.
const MAX_STEP: Duration = Duration::from_millis(250);

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).init();

    let role = env::args().nth(1).map(|arg| arg.to_ascii_lowercase());
    let result = match role.as_deref() {
        Some("server") => run_server(demo_config()),
        Some("client") => run_client(demo_config()),
        _ => {
            eprintln!("usage: pulsewire <server|client>");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = result {
        error!(error = %e, "exiting with failure");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn demo_config() -> Config {
    Config { routed_headers: true, ..Config::default() }
}

fn run_server(config: Config) -> Result<()> {
    let transport = UdpTransport::bind(config.server_address, &config)?;
    info!(address = %transport.local_addr()?, "server listening");
    let readiness = SocketReadiness::new(&transport, config.network_tick_interval)?;

    let mailbox = Arc::new(EventMailbox::new());
    let server = Arc::new(Mutex::new(Server::new(transport, config.clone())));

    let tick = config.network_tick_interval;
    let net_mailbox = Arc::clone(&mailbox);
    let net_server = Arc::clone(&server);
    let clock = SystemClock;
    let mut line = String::new();
    let mut net_worker = Worker::spawn("pulsewire-net", move |signals| {
        let mut batch = Vec::new();
        if let Some(event) = net_mailbox.recv_timeout(tick) {
            batch.push(event);
        }
        net_mailbox.drain(|event| batch.push(event));

        let mut elapsed = Duration::ZERO;
        let mut outgoing = Vec::new();
        for event in batch {
            match event {
                AppEvent::Tick { dt } => elapsed += dt,
                AppEvent::Input { ch: '\n' } => {
                    if !line.is_empty() {
                        outgoing.push(std::mem::take(&mut line));
                    }
                }
                AppEvent::Input { ch } => line.push(ch),
            }
        }

        let now = clock.now();
        let mut server = net_server.lock().unwrap();
        for text in outgoing {
            if let Err(e) = server.broadcast(&text, now) {
                warn!(error = %e, "broadcast failed");
            }
        }
        for event in server.tick(elapsed.min(MAX_STEP), now) {
            match event {
                ServerEvent::PeerConnected { peer_index, address } => {
                    info!(peer_index, %address, "peer connected");
                }
                ServerEvent::PeerDisconnected { peer_index, address } => {
                    info!(peer_index, %address, "peer disconnected");
                }
                ServerEvent::MessageReceived { peer_index, text } => {
                    println!("[peer {}]: {}", peer_index, text);
                }
            }
        }
        // Nothing to maintain with an empty table; the readiness worker
        // wakes us when the next connection request arrives.
        if server.connection_count() == 0 {
            signals.request_suspend();
        }
    })?;

    // Nothing drains the mailbox while the net worker is parked, so the
    // ticker withholds ticks for the duration instead of queueing them.
    let ticker_handle = mailbox.handle();
    let net_control = net_worker.controller();
    let mut ticker = Worker::spawn("pulsewire-ticker", move |_| {
        thread::sleep(tick);
        if net_control.state() != WorkerState::Suspended {
            ticker_handle.submit(AppEvent::Tick { dt: tick });
        }
    })?;

    let mut readiness_worker = spawn_readiness_worker(readiness, &net_worker)?;

    info!("type a line to broadcast it; /quit exits");
    let input_handle = mailbox.handle();
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim() == "/quit" {
            break;
        }
        for ch in line.chars() {
            input_handle.submit(AppEvent::Input { ch });
        }
        input_handle.submit(AppEvent::Input { ch: '\n' });
        net_worker.resume();
    }

    readiness_worker.stop();
    ticker.stop();
    net_worker.stop();
    Ok(())
}

fn run_client(config: Config) -> Result<()> {
    let transport = UdpTransport::bind(Address::from_octets(0, 0, 0, 0, 0), &config)?;
    let readiness = SocketReadiness::new(&transport, config.network_tick_interval)?;

    let mailbox = Arc::new(EventMailbox::new());
    let client = Arc::new(Mutex::new(Client::new(transport, config.clone())));

    info!(server = %config.server_address, "connecting");
    client.lock().unwrap().connect()?;

    let tick = config.network_tick_interval;
    let ticker_handle = mailbox.handle();
    let mut ticker = Worker::spawn("pulsewire-ticker", move |_| {
        thread::sleep(tick);
        ticker_handle.submit(AppEvent::Tick { dt: tick });
    })?;

    let net_mailbox = Arc::clone(&mailbox);
    let net_client = Arc::clone(&client);
    let clock = SystemClock;
    let mut net_worker = Worker::spawn("pulsewire-net", move |signals| {
        let mut elapsed = Duration::ZERO;
        if let Some(AppEvent::Tick { dt }) = net_mailbox.recv_timeout(tick) {
            elapsed += dt;
        }
        net_mailbox.drain(|event| {
            if let AppEvent::Tick { dt } = event {
                elapsed += dt;
            }
        });

        let now = clock.now();
        let mut client = net_client.lock().unwrap();
        for event in client.tick(elapsed.min(MAX_STEP), now) {
            match event {
                ClientEvent::Connected { peer_index } => {
                    info!(?peer_index, "connected; type a line to send it, /quit exits");
                }
                ClientEvent::Denied => {
                    warn!("server denied the connection");
                    signals.request_stop();
                }
                ClientEvent::TimedOut => {
                    warn!("connection attempt timed out");
                    signals.request_stop();
                }
                ClientEvent::Disconnected => {
                    warn!("connection closed");
                    signals.request_stop();
                }
                ClientEvent::MessageReceived(text) => println!("[server]: {}", text),
            }
        }
    })?;

    let mut readiness_worker = spawn_readiness_worker(readiness, &net_worker)?;

    // The console stays on the main thread; each send happens with the net
    // worker blocked so packet construction never interleaves with its own
    // keep-alive sends.
    for line in io::stdin().lock().lines() {
        let line = line?;
        if net_worker.state() == WorkerState::Stopped {
            break;
        }
        let text = line.trim_end();
        if text == "/quit" {
            break;
        }
        if text.is_empty() {
            continue;
        }
        net_worker.block();
        let result = client.lock().unwrap().send_message(text, SystemClock.now());
        net_worker.unblock();
        if let Err(e) = result {
            warn!(error = %e, "send failed");
        }
    }

    readiness_worker.stop();
    ticker.stop();
    net_worker.stop();
    Ok(())
}

fn spawn_readiness_worker(mut source: SocketReadiness, net_worker: &Worker) -> Result<Worker> {
    let controller = net_worker.controller();
    let worker = Worker::spawn("pulsewire-readiness", move |signals| {
        match source.poll() {
            Ok(Some(Readiness::SocketReadable)) => controller.resume(),
            Ok(Some(Readiness::InputAvailable)) | Ok(None) => {}
            Err(e) => {
                error!(error = %e, "readiness poll failed");
                signals.request_stop();
            }
        }
    })?;
    Ok(worker)
}
