use std::time::Instant;

use strum::Display;

use super::{
    dirty::DirtyTracker,
    executor::{RetryInfo, SaveExecutor, SaveFailure},
    ledger::VersionLedger,
    store::DocVersion,
};

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum SaveStatus {
    Saved,
    Unsaved,
    Saving,
    Error(SaveFailure),
}

/// Everything the save indicator needs, derived from the engine's parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub status: SaveStatus,
    pub last_saved_at: Option<Instant>,
    pub has_unsaved_changes: bool,
    pub version: DocVersion,
    pub retry: Option<RetryInfo>,
}

pub fn project(dirty: &DirtyTracker, executor: &SaveExecutor) -> SaveStatus {
    if executor.is_in_flight() || executor.is_retry_pending() {
        SaveStatus::Saving
    } else if let Some(failure) = executor.failure() {
        SaveStatus::Error(failure.clone())
    } else if dirty.is_dirty() {
        SaveStatus::Unsaved
    } else {
        SaveStatus::Saved
    }
}

pub fn view(dirty: &DirtyTracker, executor: &SaveExecutor, ledger: &VersionLedger) -> StatusView {
    StatusView {
        status: project(dirty, executor),
        last_saved_at: dirty.last_saved_at(),
        has_unsaved_changes: dirty.is_dirty(),
        version: ledger.current(),
        retry: executor.retry_info(),
    }
}
