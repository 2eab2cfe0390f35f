//! Debounce and ceiling timers deciding *when* an autosave fires.

use std::time::{Duration, Instant};

use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Trigger {
    Debounce,
    Ceiling,
}

/// Two deadlines per dirty episode.
///
/// The debounce deadline moves with every edit, the ceiling deadline is set by
/// the first edit of an episode and stays put, which caps how long a document
/// can stay unsaved while someone keeps typing.
#[derive(Debug, Clone)]
pub struct SaveScheduler {
    debounce: Duration,
    ceiling: Duration,
    debounce_at: Option<Instant>,
    ceiling_at: Option<Instant>,
}

impl SaveScheduler {
    pub fn new(debounce: Duration, ceiling: Duration) -> Self {
        Self {
            debounce,
            ceiling,
            debounce_at: None,
            ceiling_at: None,
        }
    }

    pub fn record_edit(&mut self, now: Instant) {
        self.debounce_at = Some(now + self.debounce);
        if self.ceiling_at.is_none() {
            self.ceiling_at = Some(now + self.ceiling);
        }
    }

    /// Opens a follow-up episode for edits that landed while a save was in flight.
    pub fn resume(&mut self, last_edit: Instant, now: Instant) {
        if self.is_armed() {
            return;
        }
        self.debounce_at = Some((last_edit + self.debounce).max(now));
        self.ceiling_at = Some(now + self.ceiling);
    }

    pub fn cancel(&mut self) {
        self.debounce_at = None;
        self.ceiling_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.debounce_at.is_some() || self.ceiling_at.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce_at, self.ceiling_at) {
            (Some(debounce), Some(ceiling)) => Some(debounce.min(ceiling)),
            (debounce, ceiling) => debounce.or(ceiling),
        }
    }

    /// Fires the earliest due timer, if any. Firing clears both timers.
    pub fn take_due(&mut self, now: Instant) -> Option<Trigger> {
        let debounce = self.debounce_at.filter(|at| *at <= now);
        let ceiling = self.ceiling_at.filter(|at| *at <= now);
        let trigger = match (debounce, ceiling) {
            (Some(debounce), Some(ceiling)) if debounce < ceiling => Trigger::Debounce,
            (_, Some(_)) => Trigger::Ceiling,
            (Some(_), None) => Trigger::Debounce,
            (None, None) => return None,
        };
        self.cancel();
        Some(trigger)
    }
}
