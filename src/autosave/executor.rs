//! One save attempt at a time, classified into saved, retry or terminal failure.

use std::time::{Duration, Instant};

use strum::Display;
use tracing::{info, warn};

use super::{
    dirty::EditGeneration,
    scheduler::Trigger,
    store::{DocVersion, StoreError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    /// `base_delay * 2^retry_count`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry_count))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptTicket(u64);

impl std::fmt::Display for AttemptTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOrigin {
    Autosave(Trigger),
    Retry,
    Manual,
}

impl std::fmt::Display for SaveOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveOrigin::Autosave(trigger) => write!(f, "autosave ({trigger})"),
            SaveOrigin::Retry => f.write_str("retry"),
            SaveOrigin::Manual => f.write_str("manual"),
        }
    }
}

/// An autosave cycle that may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveAttempt {
    pub retry_count: u32,
    pub started_at: Instant,
}

impl SaveAttempt {
    pub fn new(started_at: Instant) -> Self {
        Self {
            retry_count: 0,
            started_at,
        }
    }

    fn next(self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self
        }
    }
}

/// What the store should be asked to do. The caller attaches id and content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRequest {
    pub ticket: AttemptTicket,
    pub origin: SaveOrigin,
    pub expected_version: DocVersion,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FailureKind {
    Conflict,
    RetriesExhausted,
    Rejected,
    ManualSaveFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for SaveFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FailureKind::Conflict => write!(f, "conflict: {}", self.message),
            FailureKind::RetriesExhausted => {
                write!(f, "{} - save manually to try again", self.message)
            }
            FailureKind::Rejected | FailureKind::ManualSaveFailed => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryInfo {
    pub retry_count: u32,
    pub max_retries: u32,
    /// `None` while the retry itself is running
    pub fire_at: Option<Instant>,
}

/// How an attempt ended, as far as the rest of the engine is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Saved {
        generation: EditGeneration,
        version: DocVersion,
    },
    RetryScheduled {
        retry_count: u32,
        delay: Duration,
    },
    Failed(SaveFailure),
    /// A manual save is waiting behind this attempt and takes over.
    Superseded,
}

#[derive(Debug, Clone)]
struct InFlight {
    ticket: AttemptTicket,
    origin: SaveOrigin,
    generation: EditGeneration,
    attempt: Option<SaveAttempt>,
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Saving(InFlight),
    RetryScheduled { attempt: SaveAttempt, fire_at: Instant },
    Failed(SaveFailure),
}

#[derive(Debug, Clone)]
pub struct SaveExecutor {
    policy: RetryPolicy,
    phase: Phase,
    manual_requested: bool,
    last_ticket: u64,
}

impl SaveExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            phase: Phase::Idle,
            manual_requested: false,
            last_ticket: 0,
        }
    }

    pub fn start(
        &mut self,
        origin: SaveOrigin,
        generation: EditGeneration,
        expected_version: DocVersion,
        attempt: Option<SaveAttempt>,
    ) -> SaveRequest {
        debug_assert!(!self.is_in_flight(), "single-flight guard bypassed");
        self.last_ticket += 1;
        let ticket = AttemptTicket(self.last_ticket);
        self.phase = Phase::Saving(InFlight {
            ticket,
            origin,
            generation,
            attempt,
        });
        SaveRequest {
            ticket,
            origin,
            expected_version,
            retry_count: attempt.map_or(0, |it| it.retry_count),
        }
    }

    /// Applies the store's answer for `ticket`. Returns `None` for anything but
    /// the attempt currently in flight.
    pub fn settle(
        &mut self,
        ticket: AttemptTicket,
        result: &Result<DocVersion, StoreError>,
        now: Instant,
    ) -> Option<Settled> {
        let flight = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Saving(flight) if flight.ticket == ticket => flight,
            other => {
                self.phase = other;
                return None;
            }
        };

        let err = match result {
            Ok(version) => {
                return Some(Settled::Saved {
                    generation: flight.generation,
                    version: *version,
                });
            }
            Err(err) => err,
        };

        if flight.origin != SaveOrigin::Manual && self.manual_requested {
            info!(
                %ticket,
                retryable = err.is_retryable(),
                "Autosave failed with a manual save waiting: {err}"
            );
            return Some(Settled::Superseded);
        }

        let settled = match (err, flight.attempt) {
            (StoreError::Conflict { .. }, _) => self.fail(FailureKind::Conflict, err),
            (StoreError::Rejected(_), _) => self.fail(FailureKind::Rejected, err),
            (StoreError::Transient(_), None) => self.fail(FailureKind::ManualSaveFailed, err),
            (StoreError::Transient(_), Some(attempt))
                if attempt.retry_count < self.policy.max_retries =>
            {
                let delay = self.policy.delay_for(attempt.retry_count);
                let attempt = attempt.next();
                self.phase = Phase::RetryScheduled {
                    attempt,
                    fire_at: now + delay,
                };
                Settled::RetryScheduled {
                    retry_count: attempt.retry_count,
                    delay,
                }
            }
            (StoreError::Transient(_), Some(attempt)) => {
                warn!(
                    retries = attempt.retry_count,
                    since = ?now.saturating_duration_since(attempt.started_at),
                    "Giving up on autosave"
                );
                self.fail(FailureKind::RetriesExhausted, err)
            }
        };
        Some(settled)
    }

    fn fail(&mut self, kind: FailureKind, err: &StoreError) -> Settled {
        let failure = SaveFailure {
            kind,
            message: err.to_string(),
        };
        self.phase = Phase::Failed(failure.clone());
        Settled::Failed(failure)
    }

    pub fn take_due_retry(&mut self, now: Instant) -> Option<SaveAttempt> {
        match self.phase {
            Phase::RetryScheduled { attempt, fire_at } if fire_at <= now => {
                self.phase = Phase::Idle;
                Some(attempt)
            }
            _ => None,
        }
    }

    pub fn cancel_retry(&mut self) -> bool {
        if let Phase::RetryScheduled { .. } = self.phase {
            self.phase = Phase::Idle;
            return true;
        }
        false
    }

    /// Leaves a terminal failure behind once the user edits again.
    pub fn clear_failure(&mut self) {
        if let Phase::Failed(_) = self.phase {
            self.phase = Phase::Idle;
        }
    }

    pub fn request_manual(&mut self) {
        self.manual_requested = true;
    }

    pub fn take_manual_request(&mut self) -> bool {
        std::mem::take(&mut self.manual_requested)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.phase, Phase::Saving(_))
    }

    pub fn is_retry_pending(&self) -> bool {
        matches!(self.phase, Phase::RetryScheduled { .. })
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::RetryScheduled { fire_at, .. } => Some(fire_at),
            _ => None,
        }
    }

    pub fn retry_info(&self) -> Option<RetryInfo> {
        let (retry_count, fire_at) = match &self.phase {
            Phase::RetryScheduled { attempt, fire_at } => (attempt.retry_count, Some(*fire_at)),
            Phase::Saving(InFlight {
                attempt: Some(attempt),
                ..
            }) if attempt.retry_count > 0 => (attempt.retry_count, None),
            _ => return None,
        };
        Some(RetryInfo {
            retry_count,
            max_retries: self.policy.max_retries,
            fire_at,
        })
    }

    pub fn failure(&self) -> Option<&SaveFailure> {
        match &self.phase {
            Phase::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}
