// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Resweep requests and the background worker that serves them.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fabric_track::{debug, error, info};
use parking_lot::{Condvar, Mutex};

use crate::engine::RoutingEngine;
use crate::types::RoutingError;

/// Delay before retrying after a sweep that failed as a whole.
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct SignalState {
    requested: bool,
    shutdown: bool,
}

/// A coalescing "please sweep again" flag.
///
/// Any number of requests made before the worker picks one up result in a
/// single sweep.
#[derive(Debug, Default)]
pub struct ResweepSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl ResweepSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let mut state = self.state.lock();
        if !state.requested {
            state.requested = true;
            self.cond.notify_one();
        }
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.state.lock().requested
    }

    /// Consume a pending request, if any.
    pub fn take(&self) -> bool {
        std::mem::take(&mut self.state.lock().requested)
    }

    /// Block until a request is pending and consume it.
    ///
    /// Returns `false` once the signal has been shut down.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return false;
            }
            if state.requested {
                state.requested = false;
                return true;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Sleep for `delay` unless shut down first. Pending requests are left
    /// in place.
    pub fn pause(&self, delay: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.shutdown {
            let _ = self.cond.wait_while_for(&mut state, |state| !state.shutdown, delay);
        }
        !state.shutdown
    }

    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.cond.notify_all();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}

/// Runs a sweep for every (coalesced) resweep request until stopped.
pub struct RoutingEventManager {
    engine: Arc<RoutingEngine>,
    handle: Option<JoinHandle<()>>,
}

impl RoutingEventManager {
    pub fn start(engine: &Arc<RoutingEngine>) -> Result<Self, RoutingError> {
        let worker = engine.clone();
        let handle = thread::Builder::new()
            .name("routing-events".to_string())
            .spawn(move || run(&worker))
            .map_err(|e| RoutingError(format!("unable to start routing event worker: {e}")))?;
        info!(engine.entity ; "routing event manager started");
        Ok(Self {
            engine: engine.clone(),
            handle: Some(handle),
        })
    }

    /// Stop the worker, waiting for any sweep in progress to finish.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.engine.resweep_signal().shutdown();
        if handle.join().is_err() {
            error!(self.engine.entity ; "routing event worker panicked");
        }
        info!(self.engine.entity ; "routing event manager stopped");
    }
}

impl Drop for RoutingEventManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(engine: &RoutingEngine) {
    let signal = engine.resweep_signal();
    while signal.wait() {
        debug!(engine.entity ; "resweep");
        if engine.sweep().is_err() && !signal.pause(RETRY_DELAY) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_coalesce() {
        let signal = ResweepSignal::new();
        signal.request();
        signal.request();
        signal.request();
        assert!(signal.wait());
        assert!(!signal.take());
    }

    #[test]
    fn shutdown_wakes_waiter() {
        let signal = Arc::new(ResweepSignal::new());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait())
        };
        signal.shutdown();
        assert!(!waiter.join().unwrap());
        assert!(!signal.pause(Duration::from_secs(10)));
    }
}
