//! Two-party initialization barrier for the draw and upload threads.
//!
//! Neither thread may issue GPU commands until both contexts exist, since
//! the upload context creates objects the draw context samples. Each thread
//! calls [`InitRendezvous::arrive`] once its context is current; the first
//! arrival blocks until the second.

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::context::ContextRole;

#[derive(Default)]
struct Arrivals {
    draw: bool,
    upload: bool,
    initialized: bool,
}

#[derive(Default)]
pub struct InitRendezvous {
    state: Mutex<Arrivals>,
    released: Condvar,
}

impl InitRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `role` has arrived and wait for the other role.
    ///
    /// Returns immediately once both roles have arrived, forever after. A
    /// second arrival from a role that already arrived does not count as the
    /// other party.
    pub fn arrive(&self, role: ContextRole) {
        let mut state = self.state.lock();
        if state.initialized {
            return;
        }

        match role {
            ContextRole::Draw => state.draw = true,
            ContextRole::Upload => state.upload = true,
        }

        if state.draw && state.upload {
            state.initialized = true;
            debug!("Context rendezvous complete ({role:?} arrived second)");
            self.released.notify_all();
            return;
        }

        debug!("{role:?} context waiting for its peer");
        while !state.initialized {
            self.released.wait(&mut state);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }
}
