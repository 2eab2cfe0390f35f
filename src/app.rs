use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::prelude::Rect;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::{
    action::{Action, RelevantKey},
    autosave::{self, AutosaveHandle, FailureKind, SaveStatus},
    components::{
        Component,
        editor::Editor,
        statusbar::{StatusBar, default_keys},
    },
    tui::{Event, Tui},
};

pub struct App {
    tick_rate: f64,
    frame_rate: f64,
    components: Vec<Box<dyn Component>>,
    should_quit: bool,
    should_suspend: bool,
    /// Set by a first quit with unsaved changes; the next quit leaves anyway.
    quit_armed: bool,
    action_tx: UnboundedSender<Action>,
    action_rx: UnboundedReceiver<Action>,
    autosave: AutosaveHandle,
}

impl App {
    pub fn new(tick_rate: f64, frame_rate: f64, autosave: AutosaveHandle) -> Result<Self> {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        Ok(Self {
            tick_rate,
            frame_rate,
            components: vec![Box::new(Editor::default()), Box::new(StatusBar::default())],
            should_quit: false,
            should_suspend: false,
            quit_armed: false,
            action_tx,
            action_rx,
            autosave,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let mut tui = Tui::new()?
            .tick_rate(self.tick_rate)
            .frame_rate(self.frame_rate)
            .paste(true);
        tui.enter()?;

        let action_tx = self.action_tx.clone();
        loop {
            self.handle_events(&mut tui).await?;
            self.handle_autosave()?;
            self.handle_actions(&mut tui)?;
            if self.should_suspend {
                tui.suspend()?;
                action_tx.send(Action::Resume)?;
                action_tx.send(Action::ClearScreen)?;
                tui.enter()?;
            } else if self.should_quit {
                tui.stop()?;
                break;
            }
        }
        tui.exit()?;
        self.close().await
    }

    async fn handle_events(&mut self, tui: &mut Tui) -> Result<()> {
        let Some(event) = tui.next_event().await else {
            return Ok(());
        };
        let action_tx = self.action_tx.clone();
        match event {
            Event::Tick => action_tx.send(Action::Tick)?,
            Event::Render => action_tx.send(Action::Render)?,
            Event::Resize(x, y) => action_tx.send(Action::Resize(x, y))?,
            Event::Key(key) => self.handle_key_event(key)?,
            _ => {}
        }
        for component in self.components.iter_mut() {
            if let Some(action) = component.handle_events(Some(event.clone()))? {
                action_tx.send(action)?;
            }
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key: KeyEvent) -> Result<()> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let action = if ctrl && matches!(key.code, KeyCode::Char('c' | 'd' | 'q')) {
            Action::Quit
        } else if ctrl && key.code == KeyCode::Char('z') {
            Action::Suspend
        } else {
            if self.quit_armed {
                self.quit_armed = false;
                self.action_tx.send(Action::SetRelevantKeys(default_keys()))?;
            }
            return Ok(());
        };
        self.action_tx.send(action)?;
        Ok(())
    }

    fn handle_autosave(&mut self) -> Result<()> {
        while let Some(event) = self.autosave.try_next_event() {
            debug!("Autosave: {event:?}");
            if let autosave::Event::Status { view, .. } = &event {
                self.action_tx.send(Action::SaveStatus(view.clone()))?;
            }
            for component in self.components.iter_mut() {
                if let Some(action) = component.handle_autosave(&event)? {
                    self.action_tx.send(action)?;
                }
            }
        }
        Ok(())
    }

    fn handle_actions(&mut self, tui: &mut Tui) -> Result<()> {
        while let Ok(action) = self.action_rx.try_recv() {
            if !matches!(action, Action::Tick | Action::Render | Action::Edit(_)) {
                debug!("{action:?}");
            }
            match &action {
                Action::Edit(content) => self.autosave.on_edit(content.clone())?,
                Action::SaveNow => self.autosave.save_now()?,
                Action::Quit => self.request_quit()?,
                Action::Suspend => self.should_suspend = true,
                Action::Resume => self.should_suspend = false,
                Action::ClearScreen => tui.terminal.clear()?,
                Action::Resize(w, h) => self.handle_resize(tui, *w, *h)?,
                Action::Render => self.render(tui)?,
                _ => {}
            }
            for component in self.components.iter_mut() {
                if let Some(action) = component.update(action.clone())? {
                    self.action_tx.send(action)?
                };
            }
        }
        Ok(())
    }

    /// Leaving with unsaved changes needs a second quit.
    fn request_quit(&mut self) -> Result<()> {
        if let Some(warning) = unload_warning(&self.autosave).filter(|_| !self.quit_armed) {
            self.quit_armed = true;
            self.action_tx.send(Action::SetStatusLine(warning))?;
            self.action_tx.send(Action::SetRelevantKeys(vec![
                RelevantKey::new("^S", "Save now"),
                RelevantKey::new("^Q", "Quit anyway"),
            ]))?;
            return Ok(());
        }
        self.should_quit = true;
        Ok(())
    }

    /// Closes the autosave session and waits until the worker confirms.
    async fn close(mut self) -> Result<()> {
        if self.autosave.close().is_err() {
            warn!("Autosave worker already gone while closing");
            return Ok(());
        }
        while !self.autosave.is_closed() {
            if self.autosave.next_event().await.is_none() {
                break;
            }
        }
        let last_saved_at = self.autosave.last_saved_at();
        if self.autosave.has_unsaved_changes() {
            warn!(?last_saved_at, "Left the editor with unsaved changes");
            eprintln!("Warning: the last changes were not saved.");
        } else {
            info!(?last_saved_at, "Closed the editor with everything saved");
        }
        Ok(())
    }

    fn handle_resize(&mut self, tui: &mut Tui, w: u16, h: u16) -> Result<()> {
        tui.resize(Rect::new(0, 0, w, h))?;
        self.render(tui)?;
        Ok(())
    }

    fn render(&mut self, tui: &mut Tui) -> Result<()> {
        tui.draw(|frame| {
            for component in self.components.iter_mut() {
                if let Err(err) = component.draw(frame, frame.area()) {
                    let _ = self
                        .action_tx
                        .send(Action::Error(format!("Failed to draw: {err:?}")));
                }
            }
        })?;
        Ok(())
    }
}

/// What to tell someone leaving with unsaved changes, if anything.
fn unload_warning(autosave: &AutosaveHandle) -> Option<String> {
    if !autosave.has_unsaved_changes() {
        return None;
    }
    let warning = match autosave.status() {
        Some(SaveStatus::Saving) => "Still saving! Quit again to leave before it finishes",
        Some(SaveStatus::Error(failure)) if failure.kind == FailureKind::Conflict => {
            "Changed elsewhere, your edits are not saved! Quit again to leave anyway"
        }
        Some(SaveStatus::Error(_)) => "Last save failed! Quit again to leave without saving",
        _ => "Unsaved changes! Quit again to leave without saving",
    };
    Some(warning.to_string())
}
