use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use itertools::Itertools;

/// What a key did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferChange {
    /// The text changed and must be reported as an edit.
    Edited,
    Moved,
    Ignored,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub row: usize,
    /// in chars, not bytes
    pub col: usize,
}

/// Multi-line text with a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBuffer {
    lines: Vec<String>,
    cursor: Cursor,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self {
            lines: vec![String::new()],
            cursor: Cursor::default(),
        }
    }
}

impl TextBuffer {
    pub fn new<T: AsRef<str>>(content: T) -> Self {
        let lines = content.as_ref().split('\n').map(str::to_string).collect();
        Self {
            lines,
            cursor: Cursor::default(),
        }
    }

    pub fn content(&self) -> String {
        self.lines.iter().join("\n")
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn handle_key_event(&mut self, key: KeyEvent) -> BufferChange {
        if key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
        {
            return BufferChange::Ignored;
        }
        match key.code {
            KeyCode::Char(chr) => self.insert(chr),
            KeyCode::Enter => self.split_line(),
            KeyCode::Tab => {
                self.insert_str("    ");
            }
            KeyCode::Backspace => return self.backspace(),
            KeyCode::Delete => return self.delete(),
            KeyCode::Left => self.move_left(),
            KeyCode::Right => self.move_right(),
            KeyCode::Up => self.move_vertically(-1),
            KeyCode::Down => self.move_vertically(1),
            KeyCode::Home => self.cursor.col = 0,
            KeyCode::End => self.cursor.col = self.line_len(self.cursor.row),
            _ => return BufferChange::Ignored,
        }
        match key.code {
            KeyCode::Char(_) | KeyCode::Enter | KeyCode::Tab => BufferChange::Edited,
            _ => BufferChange::Moved,
        }
    }

    pub fn insert(&mut self, chr: char) {
        let at = self.byte_offset();
        self.lines[self.cursor.row].insert(at, chr);
        self.cursor.col += 1;
    }

    /// Inserts text at the cursor, line breaks included. `\r\n` counts as one break.
    pub fn insert_str(&mut self, text: &str) -> BufferChange {
        if text.is_empty() {
            return BufferChange::Ignored;
        }
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        for (idx, part) in normalized.split('\n').enumerate() {
            if idx > 0 {
                self.split_line();
            }
            let at = self.byte_offset();
            self.lines[self.cursor.row].insert_str(at, part);
            self.cursor.col += part.chars().count();
        }
        BufferChange::Edited
    }

    fn split_line(&mut self) {
        let at = self.byte_offset();
        let rest = self.lines[self.cursor.row].split_off(at);
        self.lines.insert(self.cursor.row + 1, rest);
        self.cursor = Cursor {
            row: self.cursor.row + 1,
            col: 0,
        };
    }

    fn backspace(&mut self) -> BufferChange {
        if self.cursor.col > 0 {
            self.cursor.col -= 1;
            let at = self.byte_offset();
            self.lines[self.cursor.row].remove(at);
            BufferChange::Edited
        } else if self.cursor.row > 0 {
            let line = self.lines.remove(self.cursor.row);
            self.cursor.row -= 1;
            self.cursor.col = self.line_len(self.cursor.row);
            self.lines[self.cursor.row].push_str(&line);
            BufferChange::Edited
        } else {
            BufferChange::Ignored
        }
    }

    fn delete(&mut self) -> BufferChange {
        if self.cursor.col < self.line_len(self.cursor.row) {
            let at = self.byte_offset();
            self.lines[self.cursor.row].remove(at);
            BufferChange::Edited
        } else if self.cursor.row + 1 < self.lines.len() {
            let next = self.lines.remove(self.cursor.row + 1);
            self.lines[self.cursor.row].push_str(&next);
            BufferChange::Edited
        } else {
            BufferChange::Ignored
        }
    }

    fn move_left(&mut self) {
        if self.cursor.col > 0 {
            self.cursor.col -= 1;
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
            self.cursor.col = self.line_len(self.cursor.row);
        }
    }

    fn move_right(&mut self) {
        if self.cursor.col < self.line_len(self.cursor.row) {
            self.cursor.col += 1;
        } else if self.cursor.row + 1 < self.lines.len() {
            self.cursor.row += 1;
            self.cursor.col = 0;
        }
    }

    fn move_vertically(&mut self, delta: isize) {
        let Some(row) = self.cursor.row.checked_add_signed(delta) else {
            return;
        };
        if row < self.lines.len() {
            self.cursor.row = row;
            self.cursor.col = self.cursor.col.min(self.line_len(row));
        }
    }

    fn line_len(&self, row: usize) -> usize {
        self.lines[row].chars().count()
    }

    fn byte_offset(&self) -> usize {
        let line = &self.lines[self.cursor.row];
        line.char_indices()
            .nth(self.cursor.col)
            .map_or(line.len(), |(idx, _)| idx)
    }
}
