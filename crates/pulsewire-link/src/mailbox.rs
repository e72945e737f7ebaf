//! Cross-thread event mailbox.
//!
//! Producer threads (tickers, input readers) post [`AppEvent`]s through cheap
//! cloneable [`MailboxHandle`]s; the consumer drains them in FIFO order on its
//! own schedule.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// An application-level event delivered through the mailbox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppEvent {
    /// A timing tick carrying the elapsed time since the previous one.
    Tick {
        /// Elapsed time since the previous tick.
        dt: Duration,
    },
    /// One character of console input.
    Input {
        /// The character read.
        ch: char,
    },
}

/// Sending side of a mailbox; clone one per producer thread.
#[derive(Debug, Clone)]
pub struct MailboxHandle {
    sender: Sender<AppEvent>,
}

impl MailboxHandle {
    /// Posts an event. Delivery is unbounded and never blocks; posting to a
    /// mailbox whose consumer is gone is silently dropped.
    pub fn submit(&self, event: AppEvent) {
        let _ = self.sender.send(event);
    }
}

/// FIFO queue of application events, consumed from a single thread.
#[derive(Debug)]
pub struct EventMailbox {
    sender: Sender<AppEvent>,
    receiver: Receiver<AppEvent>,
}

impl EventMailbox {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Returns a handle for producer threads.
    pub fn handle(&self) -> MailboxHandle {
        MailboxHandle { sender: self.sender.clone() }
    }

    /// Blocks up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<AppEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Hands every queued event to `handler`, oldest first, then returns.
    pub fn drain(&self, mut handler: impl FnMut(AppEvent)) {
        for event in self.receiver.try_iter() {
            handler(event);
        }
    }

    /// True when no events are queued.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for EventMailbox {
    fn default() -> Self {
        Self::new()
    }
}
