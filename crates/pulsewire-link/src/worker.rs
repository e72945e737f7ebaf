//! Controllable worker thread.
//!
//! A [`Worker`] runs a closure in a loop on a dedicated thread and can be
//! paused, blocked and stopped from outside, or stopped and suspended from
//! within the closure itself via [`WorkerSignals`]. The control mutex is held
//! for the whole of each iteration, so `block()` and `suspend()` only return
//! between iterations; once `block()` returns, the caller has exclusive
//! access to whatever state the closure touches until `unblock()`.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    thread::{self, JoinHandle},
};

use tracing::debug;

/// Lifecycle state of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Between iterations, or parked because of `block()`.
    Idle,
    /// Currently inside the work closure.
    Running,
    /// Parked by `suspend()` until `resume()`.
    Suspended,
    /// The loop has exited; the thread is done.
    Stopped,
}

/// Requests the work closure can raise against its own loop.
///
/// Applied by the loop after the closure returns, so the closure never has to
/// reach for the worker's own control structures (which would deadlock).
#[derive(Debug, Default)]
pub struct WorkerSignals {
    stop: bool,
    suspend: bool,
}

impl WorkerSignals {
    /// Ends the loop after this iteration; the thread exits.
    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    /// Parks the loop after this iteration until `resume()` is called.
    pub fn request_suspend(&mut self) {
        self.suspend = true;
    }
}

#[derive(Debug)]
struct Control {
    blocked: bool,
    suspended: bool,
    state: WorkerState,
}

#[derive(Debug)]
struct Shared {
    running: AtomicBool,
    control: Mutex<Control>,
    condvar: Condvar,
}

/// Handle to a looping worker thread.
#[derive(Debug)]
pub struct Worker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a named thread running `work` in a loop until stopped.
    pub fn spawn<F>(name: &str, work: F) -> io::Result<Self>
    where
        F: FnMut(&mut WorkerSignals) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            control: Mutex::new(Control {
                blocked: false,
                suspended: false,
                state: WorkerState::Idle,
            }),
            condvar: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || Self::run(thread_shared, work))?;
        Ok(Self { shared, handle: Some(handle) })
    }

    fn run<F>(shared: Arc<Shared>, mut work: F)
    where
        F: FnMut(&mut WorkerSignals),
    {
        let mut signals = WorkerSignals::default();
        loop {
            let mut control = shared.control.lock().unwrap();
            while shared.running.load(Ordering::SeqCst)
                && (control.blocked || control.suspended)
            {
                control.state =
                    if control.suspended { WorkerState::Suspended } else { WorkerState::Idle };
                shared.condvar.notify_all();
                control = shared.condvar.wait(control).unwrap();
            }
            if !shared.running.load(Ordering::SeqCst) {
                control.state = WorkerState::Stopped;
                shared.condvar.notify_all();
                return;
            }

            control.state = WorkerState::Running;
            // The control lock stays held across the closure so block() and
            // suspend() cannot return mid-iteration.
            work(&mut signals);

            if signals.stop {
                shared.running.store(false, Ordering::SeqCst);
                control.state = WorkerState::Stopped;
                shared.condvar.notify_all();
                debug!("worker stopped from within");
                return;
            }
            if signals.suspend {
                signals.suspend = false;
                control.suspended = true;
            }
            control.state = WorkerState::Idle;
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.controller().state()
    }

    /// Returns a cheap cloneable handle carrying the park controls, for
    /// threads that must wake or pause this worker without owning it.
    pub fn controller(&self) -> WorkerController {
        WorkerController { shared: Arc::clone(&self.shared) }
    }

    /// Parks the worker and takes exclusive access to its state.
    ///
    /// Waits for the iteration in flight to finish; after this returns the
    /// worker will not run again until [`Worker::unblock`].
    pub fn block(&self) {
        self.controller().block();
    }

    /// Releases a `block()` and wakes the worker.
    pub fn unblock(&self) {
        self.controller().unblock();
    }

    /// Parks the worker until [`Worker::resume`].
    pub fn suspend(&self) {
        self.controller().suspend();
    }

    /// Wakes a suspended worker.
    pub fn resume(&self) {
        self.controller().resume();
    }

    /// Ends the loop and joins the thread.
    ///
    /// Safe to call whether the worker is running, parked, or has already
    /// stopped itself from within.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        {
            let mut control = self.shared.control.lock().unwrap();
            control.blocked = false;
            control.suspended = false;
        }
        self.shared.condvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.shared.control.lock().unwrap().state = WorkerState::Stopped;
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Park controls of a [`Worker`], detached from its owning handle.
///
/// Carries everything except `stop()`; only the owning [`Worker`] can join
/// the thread.
#[derive(Debug, Clone)]
pub struct WorkerController {
    shared: Arc<Shared>,
}

impl WorkerController {
    /// Current lifecycle state of the worker.
    ///
    /// Lets a producer thread tell whether the worker is parked and thus not
    /// consuming whatever the producer feeds it.
    pub fn state(&self) -> WorkerState {
        self.shared.control.lock().unwrap().state
    }

    /// See [`Worker::block`].
    pub fn block(&self) {
        let mut control = self.shared.control.lock().unwrap();
        control.blocked = true;
    }

    /// See [`Worker::unblock`].
    pub fn unblock(&self) {
        let mut control = self.shared.control.lock().unwrap();
        control.blocked = false;
        self.shared.condvar.notify_all();
    }

    /// See [`Worker::suspend`].
    pub fn suspend(&self) {
        let mut control = self.shared.control.lock().unwrap();
        control.suspended = true;
    }

    /// See [`Worker::resume`].
    pub fn resume(&self) {
        let mut control = self.shared.control.lock().unwrap();
        control.suspended = false;
        self.shared.condvar.notify_all();
    }
}
