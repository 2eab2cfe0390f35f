//! Autosave for the open document.
//!
//! [`engine::SyncEngine`] decides when to save and what the outcome means, the
//! [`worker`] runs it against a [`DocumentStore`] on its own thread, and the UI
//! talks to that thread through an [`AutosaveHandle`].

use std::time::Instant;

use color_eyre::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::SendError};

mod dirty;
pub mod engine;
pub mod executor;
mod ledger;
mod scheduler;
pub mod status;
mod store;
mod worker;

pub use engine::ManualSave;
pub use executor::{FailureKind, RetryPolicy};
pub use status::{SaveStatus, StatusView};
pub use store::{DocVersion, Document, DocumentId, DocumentStore, StoreError};
pub use worker::start_async;

#[derive(Debug, Clone)]
pub enum Command {
    /// The editing surface changed the document, carrying its new content.
    Edit(String),
    SaveNow,
    Close,
}

#[derive(Debug, Clone)]
pub enum Event {
    Opened(Document),
    /// `edits_applied` counts the `Edit` commands the worker had taken in when
    /// it computed `view`.
    Status {
        view: StatusView,
        edits_applied: u64,
    },
    ManualSave(ManualSave),
    Closed {
        has_unsaved_changes: bool,
    },
    Failure(String),
}

/// UI-side end of the autosave worker.
///
/// Mirrors the engine's contract: edits and manual saves go out as commands,
/// status comes back as events and is cached here for reading. Edits the
/// worker has not acknowledged yet count as unsaved.
pub struct AutosaveHandle {
    cmd_tx: UnboundedSender<Command>,
    evt_rx: UnboundedReceiver<Event>,
    view: Option<StatusView>,
    edits_sent: u64,
    edits_applied: u64,
    closed: bool,
}

impl AutosaveHandle {
    pub fn new(cmd_tx: UnboundedSender<Command>, evt_rx: UnboundedReceiver<Event>) -> Self {
        Self {
            cmd_tx,
            evt_rx,
            view: None,
            edits_sent: 0,
            edits_applied: 0,
            closed: false,
        }
    }

    pub fn on_edit(&mut self, content: String) -> Result<(), SendError<Command>> {
        self.cmd_tx.send(Command::Edit(content))?;
        self.edits_sent += 1;
        Ok(())
    }

    pub fn save_now(&self) -> Result<(), SendError<Command>> {
        self.cmd_tx.send(Command::SaveNow)
    }

    pub fn close(&self) -> Result<(), SendError<Command>> {
        self.cmd_tx.send(Command::Close)
    }

    /// Takes the next event from the worker, caching status along the way.
    pub fn try_next_event(&mut self) -> Option<Event> {
        let event = self.evt_rx.try_recv().ok()?;
        self.observe(&event);
        Some(event)
    }

    pub async fn next_event(&mut self) -> Option<Event> {
        let event = self.evt_rx.recv().await?;
        self.observe(&event);
        Some(event)
    }

    fn observe(&mut self, event: &Event) {
        match event {
            Event::Status {
                view,
                edits_applied,
            } => {
                self.view = Some(view.clone());
                self.edits_applied = *edits_applied;
            }
            Event::Closed {
                has_unsaved_changes,
            } => {
                // commands are handled in order, so every edit was seen before the close
                self.closed = true;
                self.edits_applied = self.edits_sent;
                if let Some(view) = self.view.as_mut() {
                    view.has_unsaved_changes = *has_unsaved_changes;
                }
            }
            _ => {}
        }
    }

    pub fn status(&self) -> Option<&SaveStatus> {
        self.view.as_ref().map(|view| &view.status)
    }

    pub fn last_saved_at(&self) -> Option<Instant> {
        self.view.as_ref().and_then(|view| view.last_saved_at)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.edits_sent > self.edits_applied
            || self
                .view
                .as_ref()
                .is_some_and(|view| view.has_unsaved_changes)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    fn view(status: SaveStatus, has_unsaved_changes: bool) -> StatusView {
        StatusView {
            status,
            last_saved_at: None,
            has_unsaved_changes,
            version: DocVersion::new(3),
            retry: None,
        }
    }

    fn status(view: StatusView, edits_applied: u64) -> Event {
        Event::Status {
            view,
            edits_applied,
        }
    }

    #[test]
    fn handle_forwards_commands_in_order() {
        let (cmd_tx, mut cmd_rx) = unbounded_channel();
        let (_evt_tx, evt_rx) = unbounded_channel();
        let mut handle = AutosaveHandle::new(cmd_tx, evt_rx);

        handle.on_edit("draft".into()).expect("edit");
        handle.save_now().expect("save");
        handle.close().expect("close");

        assert!(matches!(cmd_rx.try_recv(), Ok(Command::Edit(content)) if content == "draft"));
        assert!(matches!(cmd_rx.try_recv(), Ok(Command::SaveNow)));
        assert!(matches!(cmd_rx.try_recv(), Ok(Command::Close)));
    }

    #[test]
    fn handle_caches_the_latest_status() {
        let (cmd_tx, _cmd_rx) = unbounded_channel();
        let (evt_tx, evt_rx) = unbounded_channel();
        let mut handle = AutosaveHandle::new(cmd_tx, evt_rx);
        assert_eq!(handle.status(), None);

        let saved_at = Instant::now();
        let saved = StatusView {
            last_saved_at: Some(saved_at),
            ..view(SaveStatus::Saved, false)
        };
        evt_tx.send(status(saved, 0)).expect("send");
        while handle.try_next_event().is_some() {}

        assert_eq!(handle.status(), Some(&SaveStatus::Saved));
        assert_eq!(handle.last_saved_at(), Some(saved_at));
        assert!(!handle.has_unsaved_changes());

        evt_tx
            .send(status(view(SaveStatus::Unsaved, true), 0))
            .expect("send");
        while handle.try_next_event().is_some() {}

        assert_eq!(handle.status(), Some(&SaveStatus::Unsaved));
        assert!(handle.has_unsaved_changes());
        assert!(!handle.is_closed());
    }

    #[test]
    fn edit_is_unsaved_before_the_worker_answers() {
        let (cmd_tx, _cmd_rx) = unbounded_channel();
        let (evt_tx, evt_rx) = unbounded_channel();
        let mut handle = AutosaveHandle::new(cmd_tx, evt_rx);
        evt_tx
            .send(status(view(SaveStatus::Saved, false), 0))
            .expect("send");
        while handle.try_next_event().is_some() {}

        handle.on_edit("typed".into()).expect("edit");
        assert!(handle.has_unsaved_changes());

        // published before the worker took the edit in
        evt_tx
            .send(status(view(SaveStatus::Saved, false), 0))
            .expect("send");
        while handle.try_next_event().is_some() {}
        assert!(handle.has_unsaved_changes());

        evt_tx
            .send(status(view(SaveStatus::Saved, false), 1))
            .expect("send");
        while handle.try_next_event().is_some() {}
        assert!(!handle.has_unsaved_changes());
    }

    #[test]
    fn closed_event_settles_unsaved_changes() {
        let (cmd_tx, _cmd_rx) = unbounded_channel();
        let (evt_tx, evt_rx) = unbounded_channel();
        let mut handle = AutosaveHandle::new(cmd_tx, evt_rx);

        handle.on_edit("last words".into()).expect("edit");
        evt_tx
            .send(status(view(SaveStatus::Saving, true), 1))
            .expect("send");
        evt_tx
            .send(Event::Closed {
                has_unsaved_changes: false,
            })
            .expect("send");
        while handle.try_next_event().is_some() {}

        assert!(handle.is_closed());
        assert!(!handle.has_unsaved_changes());
    }
}
