//! Debounced, per-path event queue.
//!
//! Editors emit `created -> modified -> modified...` bursts within
//! milliseconds. The queue keeps a single slot per path (a new event
//! replaces any pending one) and releases an event only once it has
//! been quiet for the debounce window. Event kinds collapse on purpose:
//! downstream, every released event means "this path needs
//! re-registration".

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use casmir_core::types::PendingEvent;

pub struct EventQueue {
    debounce: Duration,
    events: Mutex<HashMap<PathBuf, PendingEvent>>,
}

impl EventQueue {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            events: Mutex::new(HashMap::new()),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Insert or replace the pending event for the event's path
    /// (last write wins).
    pub fn add(&self, event: PendingEvent) {
        let mut events = self.events.lock().unwrap();
        events.insert(event.path.clone(), event);
    }

    /// Remove and return every event that has outlived the debounce
    /// window.
    pub fn get_ready(&self) -> Vec<PendingEvent> {
        let mut events = self.events.lock().unwrap();
        let ready_paths: Vec<PathBuf> = events
            .iter()
            .filter(|(_, e)| e.timestamp.elapsed() >= self.debounce)
            .map(|(p, _)| p.clone())
            .collect();
        ready_paths
            .into_iter()
            .filter_map(|p| events.remove(&p))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}
