//! Logical clock and timers.
//!
//! The engine never sleeps. Time only moves when the host calls `Engine::advance`,
//! which pops due timers in deadline order. Debouncing is last-call-wins: scheduling
//! a key that is already pending pushes its deadline out.

use indexmap::IndexMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Debounced registry sweep after structural mutation.
    Sweep,
    /// Debounced outbound sync for one hook.
    Sync(String),
    /// Next poll for late `load` delegates.
    LoadPoll,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    now: Duration,
    timers: IndexMap<TimerKey, Duration>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since the engine was created.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// (Re)arm `key` to fire `delay` from now.
    pub fn debounce(&mut self, key: TimerKey, delay: Duration) {
        self.timers.insert(key, self.now + delay);
    }

    /// Arm `key` unless it is already pending.
    pub fn schedule(&mut self, key: TimerKey, delay: Duration) {
        let deadline = self.now + delay;
        self.timers.entry(key).or_insert(deadline);
    }

    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        self.timers.shift_remove(key).is_some()
    }

    pub fn is_pending(&self, key: &TimerKey) -> bool {
        self.timers.contains_key(key)
    }

    pub fn deadline(&self, key: &TimerKey) -> Option<Duration> {
        self.timers.get(key).copied()
    }

    /// Remove and return the earliest timer due at or before `until`, moving the
    /// clock to its deadline. Ties fire in arming order.
    pub fn pop_due(&mut self, until: Duration) -> Option<TimerKey> {
        let (index, deadline) = self
            .timers
            .values()
            .enumerate()
            .filter(|(_, deadline)| **deadline <= until)
            .min_by_key(|(i, deadline)| (**deadline, *i))
            .map(|(i, deadline)| (i, *deadline))?;
        let (key, _) = self.timers.shift_remove_index(index)?;
        self.now = self.now.max(deadline);
        Some(key)
    }

    pub fn set_now(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }
}
