//! In-process registry of callers waiting on an acquisition.
//!
//! One entry per date with a flight in progress. Registration and fan-out
//! each happen under a single lock acquisition, so a caller either joins the
//! running flight or becomes the leader of a new one; it can never register
//! on an entry that has already been drained.

use crate::error::{AcquireError, AcquireResult};
use almanac_core::ImageDate;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// What every waiter on one flight receives.
pub(crate) type Outcome = AcquireResult<String>;

/// How a caller joined the registry.
pub(crate) enum Registration {
    /// First caller for the date; must start the flight.
    Leader(oneshot::Receiver<Outcome>),
    /// A flight is already running; just wait.
    Follower(oneshot::Receiver<Outcome>),
}

#[derive(Default)]
pub(crate) struct WaiterRegistry {
    inflight: Mutex<HashMap<ImageDate, Vec<oneshot::Sender<Outcome>>>>,
}

impl WaiterRegistry {
    // Senders never panic while the lock is held, but a poisoned map is
    // still structurally valid.
    fn lock(&self) -> MutexGuard<'_, HashMap<ImageDate, Vec<oneshot::Sender<Outcome>>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, date: ImageDate) -> Registration {
        let (tx, rx) = oneshot::channel();
        match self.lock().entry(date) {
            Entry::Occupied(mut waiters) => {
                waiters.get_mut().push(tx);
                Registration::Follower(rx)
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![tx]);
                Registration::Leader(rx)
            }
        }
    }

    /// Remove the entry for `date` and hand `outcome` to every waiter.
    ///
    /// Returns how many waiters were still listening.
    pub(crate) fn release(&self, date: ImageDate, outcome: &Outcome) -> usize {
        let mut inflight = self.lock();
        let Some(waiters) = inflight.remove(&date) else {
            return 0;
        };
        waiters
            .into_iter()
            .filter_map(|tx| tx.send(outcome.clone()).ok())
            .count()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

/// Releases the flight's waiters with [`AcquireError::Abandoned`] if the
/// flight task ends (panic or runtime shutdown) without calling `finish`.
pub(crate) struct FlightGuard<'a> {
    registry: &'a WaiterRegistry,
    date: ImageDate,
    armed: bool,
}

impl<'a> FlightGuard<'a> {
    pub(crate) fn new(registry: &'a WaiterRegistry, date: ImageDate) -> Self {
        Self {
            registry,
            date,
            armed: true,
        }
    }

    pub(crate) fn finish(mut self, outcome: &Outcome) -> usize {
        self.armed = false;
        self.registry.release(self.date, outcome)
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::error!(date = %self.date, "acquisition flight ended without an outcome");
            self.registry
                .release(self.date, &Err(AcquireError::Abandoned { date: self.date }));
        }
    }
}
