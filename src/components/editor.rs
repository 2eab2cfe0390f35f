use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    Frame,
    layout::{Position, Rect},
    widgets::{Block, BorderType, Borders, Paragraph},
};
use tracing::debug;

use super::Component;
use crate::{
    action::Action,
    autosave::{self, DocumentId, ManualSave},
    layout::LayoutSlot,
};

mod buffer;

use buffer::{BufferChange, TextBuffer};

/// The editing surface. Every change to the text turns into an [`Action::Edit`].
#[derive(Default)]
pub struct Editor {
    buffer: TextBuffer,
    document: Option<DocumentId>,
    scroll: usize,
}

impl Editor {
    fn edited(&self, change: BufferChange) -> Option<Action> {
        (change == BufferChange::Edited).then(|| Action::Edit(self.buffer.content()))
    }

    /// Keeps the cursor row on screen.
    fn scroll_to_cursor(&mut self, height: usize) {
        let row = self.buffer.cursor().row;
        if row < self.scroll {
            self.scroll = row;
        } else if height > 0 && row >= self.scroll + height {
            self.scroll = row + 1 - height;
        }
    }
}

impl Component for Editor {
    fn handle_key_event(&mut self, key: KeyEvent) -> Result<Option<Action>> {
        if key.kind != KeyEventKind::Press || self.document.is_none() {
            return Ok(None);
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('s') {
            return Ok(Some(Action::SaveNow));
        }
        let change = self.buffer.handle_key_event(key);
        Ok(self.edited(change))
    }

    fn handle_paste(&mut self, text: String) -> Result<Option<Action>> {
        if self.document.is_none() {
            return Ok(None);
        }
        let change = self.buffer.insert_str(&text);
        Ok(self.edited(change))
    }

    fn handle_autosave(&mut self, event: &autosave::Event) -> Result<Option<Action>> {
        let action = match event {
            autosave::Event::Opened(document) => {
                debug!(id = %document.id, version = %document.version, "Editor loaded document");
                self.buffer = TextBuffer::new(&document.content);
                self.document = Some(document.id.clone());
                self.scroll = 0;
                Some(Action::SetStatusLine(format!(
                    "Opened {} {}",
                    document.id, document.version
                )))
            }
            autosave::Event::ManualSave(outcome) => match outcome {
                ManualSave::Requested => None,
                ManualSave::Queued => Some(Action::SetStatusLine(
                    "Saving once the current save finishes".into(),
                )),
                ManualSave::NothingToSave => Some(Action::SetStatusLine("Nothing to save".into())),
                ManualSave::Closed => Some(Action::SetStatusLine("Document is closing".into())),
            },
            autosave::Event::Failure(msg) => Some(Action::Error(msg.clone())),
            _ => None,
        };
        Ok(action)
    }

    fn draw(&mut self, frame: &mut Frame, area: Rect) -> Result<()> {
        let area = crate::layout::main_vert(LayoutSlot::Editor, area);

        let title = match &self.document {
            Some(id) => format!("📝 {id}"),
            None => "📝 Loading...".to_string(),
        };
        let block = Block::new()
            .borders(!Borders::BOTTOM)
            .border_type(BorderType::Rounded)
            .title(title);
        let inner = block.inner(area);
        frame.render_widget(&block, area);

        self.scroll_to_cursor(inner.height as usize);
        let text = self.buffer.lines()[self.scroll..].join("\n");
        frame.render_widget(Paragraph::new(text), inner);

        if self.document.is_some() {
            let cursor = self.buffer.cursor();
            let x = inner.x.saturating_add(cursor.col.min(u16::MAX as usize) as u16);
            let y = inner.y.saturating_add((cursor.row - self.scroll) as u16);
            if inner.contains(Position { x, y }) {
                frame.set_cursor_position(Position { x, y });
            }
        }
        Ok(())
    }
}
