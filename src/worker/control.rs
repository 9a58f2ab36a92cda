use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use log::debug;

/// Snapshot of the control flags as seen by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub running: bool,
    pub paused: bool,
}

/// Flags written by the controller and polled by the worker at pass boundaries.
///
/// Last writer wins; nothing is queued.
#[derive(Debug)]
pub struct ControlProtocol {
    state: Mutex<ControlState>,
    changed: Condvar,
}

impl Default for ControlProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlProtocol {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                running: true,
                paused: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn request_stop(&self) {
        self.lock().running = false;
        self.changed.notify_all();
    }

    /// Flips `paused` and returns the new value.
    pub fn toggle_pause(&self) -> bool {
        let paused = {
            let mut state = self.lock();
            state.paused = !state.paused;
            state.paused
        };
        self.changed.notify_all();
        paused
    }

    pub fn snapshot(&self) -> ControlState {
        *self.lock()
    }

    /// Blocks while paused and still running. Returns whether work should continue.
    pub fn wait_while_paused(&self) -> bool {
        let mut state = self.lock();
        if state.paused && state.running {
            debug!("Worker suspended.");
        }
        while state.paused && state.running {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.running
    }

    // A panicking writer can only leave two plain booleans behind.
    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
