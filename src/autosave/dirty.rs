use std::time::Instant;

use tracing::warn;

/// Counter bumped for edits made after the last snapshot left for the store.
pub type EditGeneration = u64;

/// Local bookkeeping of which edits the store has confirmed.
///
/// Edits are grouped into generations: edits that happen before a snapshot is
/// sent are folded into one generation, edits after that open the next one. A
/// response for an older generation therefore never clears edits that were made
/// while it was in flight.
///
/// **Important:** This is NOT the store's optimistic locking version (see
/// [`super::ledger::VersionLedger`]), it only tells us *which* of our changes
/// have been saved.
#[derive(Debug, Clone)]
pub struct DirtyTracker {
    /// generation of the in-memory copy
    local: EditGeneration,
    /// generation of the last copy the store confirmed
    saved: EditGeneration,
    /// generation that is currently on its way to the store
    sent: Option<EditGeneration>,

    last_edit_at: Option<Instant>,
    last_saved_at: Option<Instant>,
}

impl DirtyTracker {
    pub fn clean() -> Self {
        Self {
            local: 0,
            saved: 0,
            sent: None,
            last_edit_at: None,
            last_saved_at: None,
        }
    }

    /// Records a mutation. Returns `true` if this edit opened a dirty episode.
    pub fn mark_dirty(&mut self, now: Instant) -> bool {
        let was_dirty = self.is_dirty();
        // an unsent generation absorbs further edits
        if !was_dirty || self.sent == Some(self.local) {
            self.local += 1;
        }
        self.last_edit_at = Some(now);
        !was_dirty
    }

    pub fn mark_sent(&mut self) -> EditGeneration {
        // already guaranteed to be (non-strictly) monotonically increasing because `local` is
        self.sent = Some(self.local);
        self.local
    }

    /// The snapshot in flight did not make it, the next attempt sends a fresh one.
    pub fn mark_unsent(&mut self) {
        self.sent = None;
    }

    /// Records a confirmed write of `generation`.
    ///
    /// Returns `true` only when this turns the tracker clean, which is also the
    /// only moment `last_saved_at` moves.
    pub fn mark_clean(&mut self, generation: EditGeneration, now: Instant) -> bool {
        if generation <= self.saved {
            warn!(
                generation,
                saved = self.saved,
                "Out-of-order save confirmation - This shouldn't happen"
            );
            return false;
        }
        self.saved = generation;
        if self.sent == Some(generation) {
            self.sent = None;
        }
        if self.is_dirty() {
            return false;
        }
        self.last_saved_at = Some(now);
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.saved != self.local
    }

    pub fn last_edit_at(&self) -> Option<Instant> {
        self.last_edit_at
    }

    pub fn last_saved_at(&self) -> Option<Instant> {
        self.last_saved_at
    }
}
