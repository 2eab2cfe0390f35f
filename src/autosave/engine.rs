use std::time::Instant;

use strum::Display;
use tracing::{debug, info, warn};

use super::{
    dirty::DirtyTracker,
    executor::{AttemptTicket, SaveAttempt, SaveExecutor, SaveOrigin, SaveRequest, Settled},
    ledger::VersionLedger,
    scheduler::SaveScheduler,
    status::{self, SaveStatus, StatusView},
    store::{DocVersion, StoreError},
};
use crate::config::AutosaveConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ManualSave {
    /// Runs on the next poll.
    Requested,
    /// Runs as soon as the save already in flight settles.
    Queued,
    NothingToSave,
    Closed,
}

/// Autosave state machine for one open document.
///
/// Does no I/O and reads no clock: callers pass `now` into every operation,
/// ask [`SyncEngine::next_deadline`] when to come back, and run the
/// [`SaveRequest`]s that [`SyncEngine::poll`] hands out.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    dirty: DirtyTracker,
    ledger: VersionLedger,
    scheduler: SaveScheduler,
    executor: SaveExecutor,
    /// a queued manual save found everything already saved
    skipped_manual: bool,
    closed: bool,
}

impl SyncEngine {
    pub fn new(config: &AutosaveConfig, loaded: DocVersion) -> Self {
        Self {
            dirty: DirtyTracker::clean(),
            ledger: VersionLedger::new(loaded),
            scheduler: SaveScheduler::new(config.debounce, config.ceiling),
            executor: SaveExecutor::new(config.retry_policy()),
            skipped_manual: false,
            closed: false,
        }
    }

    pub fn on_edit(&mut self, now: Instant) {
        if self.closed {
            warn!("Edit after the session was closed, ignoring");
            return;
        }
        if self.dirty.mark_dirty(now) {
            debug!("Dirty episode started");
        }
        self.executor.clear_failure();
        // a pending retry will pick up this edit, its timer stays as it is
        if !self.executor.is_retry_pending() {
            self.scheduler.record_edit(now);
        }
    }

    pub fn save_now(&mut self) -> ManualSave {
        if self.closed {
            return ManualSave::Closed;
        }
        if !self.dirty.is_dirty() {
            return ManualSave::NothingToSave;
        }
        self.scheduler.cancel();
        if self.executor.cancel_retry() {
            info!("Manual save cancelled the pending autosave retry");
        }
        self.executor.request_manual();
        if self.executor.is_in_flight() {
            ManualSave::Queued
        } else {
            ManualSave::Requested
        }
    }

    /// Hands out the next save to run, if one is due and nothing is in flight.
    pub fn poll(&mut self, now: Instant) -> Option<SaveRequest> {
        if self.closed {
            return None;
        }
        if self.executor.is_in_flight() {
            if let Some(trigger) = self.scheduler.take_due(now) {
                debug!(%trigger, "Save already in flight, dropping trigger");
            }
            return None;
        }
        if self.executor.take_manual_request() {
            if self.dirty.is_dirty() {
                self.scheduler.cancel();
                self.executor.cancel_retry();
                return Some(self.start(SaveOrigin::Manual, None));
            }
            debug!("Queued manual save has nothing left to persist");
            self.skipped_manual = true;
        }
        if let Some(attempt) = self.executor.take_due_retry(now) {
            return Some(self.start(SaveOrigin::Retry, Some(attempt)));
        }
        let trigger = self.scheduler.take_due(now)?;
        if !self.dirty.is_dirty() {
            return None;
        }
        Some(self.start(SaveOrigin::Autosave(trigger), Some(SaveAttempt::new(now))))
    }

    fn start(&mut self, origin: SaveOrigin, attempt: Option<SaveAttempt>) -> SaveRequest {
        let generation = self.dirty.mark_sent();
        self.executor
            .start(origin, generation, self.ledger.current(), attempt)
    }

    /// Applies the store's answer to the attempt identified by `ticket`.
    pub fn complete(
        &mut self,
        ticket: AttemptTicket,
        result: Result<DocVersion, StoreError>,
        now: Instant,
    ) -> Option<Settled> {
        let Some(settled) = self.executor.settle(ticket, &result, now) else {
            warn!(%ticket, "Save result for an attempt that is no longer in flight");
            return None;
        };
        match &settled {
            Settled::Saved {
                generation,
                version,
            } => {
                self.ledger.observe(*version);
                if self.dirty.mark_clean(*generation, now) {
                    self.scheduler.cancel();
                } else if let Some(last_edit) = self.dirty.last_edit_at() {
                    debug!("Edits arrived during the save, scheduling a follow-up");
                    self.scheduler.resume(last_edit, now);
                }
            }
            Settled::RetryScheduled { retry_count, delay } => {
                info!(retry_count, ?delay, "Autosave failed, retrying later");
                self.dirty.mark_unsent();
                self.scheduler.cancel();
            }
            Settled::Failed(failure) => {
                warn!(kind = %failure.kind, "Save failed: {}", failure.message);
                self.dirty.mark_unsent();
                self.scheduler.cancel();
            }
            Settled::Superseded => {
                self.dirty.mark_unsent();
            }
        }
        Some(settled)
    }

    /// Ends the session. Returns whether unsaved changes are left behind.
    pub fn close(&mut self) -> bool {
        self.closed = true;
        self.scheduler.cancel();
        self.executor.cancel_retry();
        self.executor.take_manual_request();
        self.dirty.is_dirty()
    }

    /// Reports, once, that a queued manual save was dropped because the save
    /// ahead of it already persisted everything.
    pub fn take_skipped_manual(&mut self) -> bool {
        std::mem::take(&mut self.skipped_manual)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        if self.closed {
            return None;
        }
        match (self.scheduler.next_deadline(), self.executor.retry_deadline()) {
            (Some(timer), Some(retry)) => Some(timer.min(retry)),
            (timer, retry) => timer.or(retry),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.executor.is_in_flight()
    }

    pub fn status(&self) -> SaveStatus {
        status::project(&self.dirty, &self.executor)
    }

    pub fn view(&self) -> StatusView {
        status::view(&self.dirty, &self.executor, &self.ledger)
    }

    pub fn last_saved_at(&self) -> Option<Instant> {
        self.dirty.last_saved_at()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty.is_dirty()
    }

    pub fn current_version(&self) -> DocVersion {
        self.ledger.current()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::autosave::{
        executor::{FailureKind, SaveFailure},
        scheduler::Trigger,
    };

    fn engine(loaded: u64) -> SyncEngine {
        SyncEngine::new(&AutosaveConfig::default(), DocVersion::new(loaded))
    }

    fn ms(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    fn secs(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    fn transient() -> Result<DocVersion, StoreError> {
        Err(StoreError::Transient("503 Service Unavailable".into()))
    }

    #[test]
    fn debounce_fires_once_after_the_last_edit() {
        let base = Instant::now();
        let mut engine = engine(7);
        for second in [0, 1, 2] {
            engine.on_edit(secs(base, second));
            assert_eq!(engine.poll(secs(base, second)), None);
        }

        assert_eq!(engine.next_deadline(), Some(secs(base, 5)));
        assert_eq!(engine.poll(ms(base, 4_999)), None);
        let request = engine.poll(secs(base, 5)).expect("autosave at t=5s");
        assert_eq!(request.origin, SaveOrigin::Autosave(Trigger::Debounce));
        assert_eq!(request.expected_version, DocVersion::new(7));
        assert_eq!(engine.status(), SaveStatus::Saving);

        engine.complete(request.ticket, Ok(DocVersion::new(8)), secs(base, 5));

        assert_eq!(engine.status(), SaveStatus::Saved);
        assert_eq!(engine.last_saved_at(), Some(secs(base, 5)));
        assert_eq!(engine.current_version(), DocVersion::new(8));
        assert!(!engine.has_unsaved_changes());
        assert_eq!(engine.next_deadline(), None);
    }

    #[test]
    fn ceiling_fires_during_continuous_typing() {
        let base = Instant::now();
        let mut engine = engine(1);
        let mut fired = vec![];

        for tick in 0..=80 {
            let now = ms(base, tick * 500);
            if let Some(request) = engine.poll(now) {
                fired.push((now, request.origin));
                engine.complete(request.ticket, Ok(DocVersion::new(2)), now);
            }
            engine.on_edit(now);
        }

        assert_eq!(
            fired,
            vec![(secs(base, 30), SaveOrigin::Autosave(Trigger::Ceiling))]
        );
        assert!(engine.has_unsaved_changes());
    }

    #[test]
    fn triggers_while_in_flight_are_dropped() {
        let base = Instant::now();
        let mut engine = engine(1);
        engine.on_edit(base);
        let request = engine.poll(secs(base, 3)).expect("first autosave");

        engine.on_edit(secs(base, 4));
        assert_eq!(engine.poll(secs(base, 7)), None);
        assert_eq!(engine.poll(secs(base, 40)), None);
        assert!(engine.is_in_flight());

        engine.complete(request.ticket, Ok(DocVersion::new(2)), secs(base, 41));

        // the edit at t=4s was not part of the snapshot, so a follow-up is due right away
        assert_eq!(engine.status(), SaveStatus::Unsaved);
        assert_eq!(engine.last_saved_at(), None);
        let follow_up = engine.poll(secs(base, 41)).expect("follow-up autosave");
        assert_eq!(follow_up.expected_version, DocVersion::new(2));
    }

    #[test]
    fn retries_back_off_and_then_succeed() {
        let base = Instant::now();
        let mut engine = engine(4);
        engine.on_edit(base);

        let mut attempts = vec![];
        let mut now = secs(base, 3);
        for _ in 0..3 {
            let request = engine.poll(now).expect("attempt due");
            attempts.push((now, request.retry_count));
            engine.complete(request.ticket, transient(), now);
            assert_eq!(engine.status(), SaveStatus::Saving);
            now = engine.next_deadline().expect("retry scheduled");
        }
        let last = engine.poll(now).expect("fourth attempt");
        attempts.push((now, last.retry_count));
        engine.complete(last.ticket, Ok(DocVersion::new(5)), now);

        assert_eq!(
            attempts,
            vec![
                (secs(base, 3), 0),
                (secs(base, 6), 1),
                (secs(base, 12), 2),
                (secs(base, 24), 3),
            ]
        );
        assert_eq!(engine.status(), SaveStatus::Saved);
        assert_eq!(engine.view().retry, None);
    }

    #[test]
    fn retries_stop_after_the_bound() {
        let base = Instant::now();
        let mut engine = engine(4);
        engine.on_edit(base);

        let mut now = secs(base, 3);
        let mut calls = 0;
        while let Some(request) = engine.poll(now) {
            calls += 1;
            engine.complete(request.ticket, transient(), now);
            match engine.next_deadline() {
                Some(deadline) => now = deadline,
                None => break,
            }
        }

        assert_eq!(calls, 4);
        assert_eq!(engine.poll(secs(base, 600)), None);
        assert!(matches!(
            engine.status(),
            SaveStatus::Error(SaveFailure {
                kind: FailureKind::RetriesExhausted,
                ..
            })
        ));
        assert!(engine.has_unsaved_changes());
    }

    #[test]
    fn conflict_is_not_retried() {
        let base = Instant::now();
        let mut engine = engine(7);
        engine.on_edit(base);
        let request = engine.poll(secs(base, 3)).expect("autosave");

        engine.complete(
            request.ticket,
            Err(StoreError::Conflict {
                expected: DocVersion::new(7),
                actual: DocVersion::new(9),
            }),
            secs(base, 3),
        );

        assert_eq!(engine.next_deadline(), None);
        assert_eq!(engine.poll(secs(base, 100)), None);
        assert_eq!(
            engine.status(),
            SaveStatus::Error(SaveFailure {
                kind: FailureKind::Conflict,
                message: "document was changed elsewhere (expected v7, store has v9)".into(),
            })
        );
        assert_eq!(engine.current_version(), DocVersion::new(7));
    }

    #[test]
    fn clean_transition_happens_once() {
        let base = Instant::now();
        let mut engine = engine(1);
        engine.on_edit(base);
        let request = engine.poll(secs(base, 3)).expect("autosave");

        engine.complete(request.ticket, Ok(DocVersion::new(2)), secs(base, 3));
        assert_eq!(
            engine.complete(request.ticket, Ok(DocVersion::new(2)), secs(base, 4)),
            None
        );
        assert_eq!(engine.poll(secs(base, 30)), None);

        assert!(!engine.has_unsaved_changes());
        assert_eq!(engine.last_saved_at(), Some(secs(base, 3)));
        assert_eq!(engine.current_version(), DocVersion::new(2));
    }

    #[test]
    fn manual_save_cancels_pending_retry() {
        let base = Instant::now();
        let mut engine = engine(1);
        engine.on_edit(base);
        let request = engine.poll(secs(base, 3)).expect("autosave");
        engine.complete(request.ticket, transient(), secs(base, 3));
        assert_eq!(engine.next_deadline(), Some(secs(base, 6)));

        assert_eq!(engine.save_now(), ManualSave::Requested);
        assert_eq!(engine.next_deadline(), None);
        let manual = engine.poll(secs(base, 4)).expect("manual save");
        assert_eq!(manual.origin, SaveOrigin::Manual);

        engine.complete(manual.ticket, transient(), secs(base, 5));
        assert_eq!(engine.next_deadline(), None);
        assert!(matches!(
            engine.status(),
            SaveStatus::Error(SaveFailure {
                kind: FailureKind::ManualSaveFailed,
                ..
            })
        ));
    }

    #[test]
    fn manual_save_waits_for_the_autosave_in_flight() {
        let base = Instant::now();
        let mut engine = engine(1);
        engine.on_edit(base);
        let autosave = engine.poll(secs(base, 3)).expect("autosave");

        engine.on_edit(secs(base, 4));
        assert_eq!(engine.save_now(), ManualSave::Queued);
        assert_eq!(engine.poll(secs(base, 4)), None);

        engine.complete(autosave.ticket, Ok(DocVersion::new(2)), secs(base, 5));
        let manual = engine.poll(secs(base, 5)).expect("manual save after autosave");
        assert_eq!(manual.origin, SaveOrigin::Manual);
        assert_eq!(manual.expected_version, DocVersion::new(2));

        engine.complete(manual.ticket, Ok(DocVersion::new(3)), secs(base, 6));
        assert_eq!(engine.status(), SaveStatus::Saved);
        assert_eq!(engine.next_deadline(), None);
    }

    #[test]
    fn queued_manual_save_is_dropped_when_the_autosave_covered_it() {
        let base = Instant::now();
        let mut engine = engine(1);
        engine.on_edit(base);
        let autosave = engine.poll(secs(base, 3)).expect("autosave");

        assert_eq!(engine.save_now(), ManualSave::Queued);
        assert!(!engine.take_skipped_manual());
        engine.complete(autosave.ticket, Ok(DocVersion::new(2)), secs(base, 5));

        assert_eq!(engine.poll(secs(base, 5)), None);
        assert!(engine.take_skipped_manual());
        assert!(!engine.take_skipped_manual());
        assert_eq!(engine.status(), SaveStatus::Saved);
    }

    #[test]
    fn manual_save_from_fatal_state_runs_its_own_attempt() {
        let base = Instant::now();
        let mut engine = engine(1);
        engine.on_edit(base);
        let mut now = secs(base, 3);
        while let Some(request) = engine.poll(now) {
            engine.complete(request.ticket, transient(), now);
            match engine.next_deadline() {
                Some(deadline) => now = deadline,
                None => break,
            }
        }

        assert_eq!(engine.save_now(), ManualSave::Requested);
        let manual = engine.poll(now).expect("manual save");
        assert_eq!(engine.status(), SaveStatus::Saving);
        engine.complete(manual.ticket, Ok(DocVersion::new(2)), now);
        assert_eq!(engine.status(), SaveStatus::Saved);
    }

    #[test]
    fn manual_save_of_clean_document_does_nothing() {
        let mut engine = engine(3);
        let now = Instant::now();
        assert_eq!(engine.save_now(), ManualSave::NothingToSave);
        assert_eq!(engine.poll(now), None);
    }

    #[test]
    fn edit_after_error_goes_back_to_unsaved() {
        let base = Instant::now();
        let mut engine = engine(1);
        engine.on_edit(base);
        let request = engine.poll(secs(base, 3)).expect("autosave");
        engine.complete(
            request.ticket,
            Err(StoreError::Rejected("content contains a NUL byte".into())),
            secs(base, 3),
        );
        assert!(matches!(engine.status(), SaveStatus::Error(_)));

        engine.on_edit(secs(base, 10));

        assert_eq!(engine.status(), SaveStatus::Unsaved);
        assert_eq!(engine.next_deadline(), Some(secs(base, 13)));
    }

    #[test]
    fn edits_during_pending_retry_keep_the_retry_timer() {
        let base = Instant::now();
        let mut engine = engine(1);
        engine.on_edit(base);
        let request = engine.poll(secs(base, 3)).expect("autosave");
        engine.complete(request.ticket, transient(), secs(base, 3));

        engine.on_edit(secs(base, 4));
        engine.on_edit(secs(base, 5));

        assert_eq!(engine.next_deadline(), Some(secs(base, 6)));
        let retry = engine.poll(secs(base, 6)).expect("retry");
        assert_eq!(retry.origin, SaveOrigin::Retry);
        assert_eq!(retry.retry_count, 1);
    }

    #[test]
    fn close_cancels_timers_and_reports_dirty_state() {
        let base = Instant::now();
        let mut engine = engine(1);
        engine.on_edit(base);

        assert!(engine.close());
        assert_eq!(engine.next_deadline(), None);
        assert_eq!(engine.poll(secs(base, 60)), None);
        assert_eq!(engine.save_now(), ManualSave::Closed);
    }
}
