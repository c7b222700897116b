//! Coalesces concurrent identical cold-cache questions into one computation.
//!
//! The first request for a normalized-question key becomes the leader and
//! computes the answer; followers block on a condvar until the leader
//! publishes a result or their deadline passes. A leader that fails
//! publishes `None` and followers fall back to computing independently, so
//! coalescing never turns one upstream failure into many.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::deadline::Deadline;
use crate::types::QueryResponse;

pub struct Flight {
    state: Mutex<FlightState>,
    cv: Condvar,
}

enum FlightState {
    Pending,
    Done(Option<QueryResponse>),
}

impl Flight {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            cv: Condvar::new(),
        }
    }

    /// Block until the leader publishes, or the deadline passes.
    pub fn wait(&self, deadline: Deadline) -> Option<QueryResponse> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                FlightState::Done(result) => return result.clone(),
                FlightState::Pending => {
                    if self.cv.wait_until(&mut state, deadline.instant()).timed_out() {
                        return None;
                    }
                }
            }
        }
    }
}

/// Leadership of one in-flight key; hand it back via
/// [`SingleFlight::complete`].
pub struct LeaderToken {
    key: u64,
    flight: Arc<Flight>,
}

pub enum Role {
    Leader(LeaderToken),
    Follower(Arc<Flight>),
}

#[derive(Default)]
pub struct SingleFlight {
    flights: Mutex<HashMap<u64, Arc<Flight>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, becoming the leader if none is active.
    pub fn begin(&self, key: u64) -> Role {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get(&key) {
            return Role::Follower(flight.clone());
        }
        let flight = Arc::new(Flight::new());
        flights.insert(key, flight.clone());
        Role::Leader(LeaderToken { key, flight })
    }

    /// Publish the leader's result (or `None` on failure) and wake all
    /// followers. The key is released before publication so a retry after
    /// failure starts a fresh flight.
    pub fn complete(&self, token: LeaderToken, result: Option<QueryResponse>) {
        self.flights.lock().remove(&token.key);
        let mut state = token.flight.state.lock();
        *state = FlightState::Done(result);
        token.flight.cv.notify_all();
    }

    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}
