use std::time::{Duration, Instant};

use color_eyre::Result;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::Stylize,
    text::{Line, Span, Text},
    widgets::{Block, BorderType, Borders, Padding},
};

use super::Component;

use crate::{
    action::{Action, RelevantKey},
    autosave::{SaveStatus, StatusView},
    layout::LayoutSlot,
};

#[derive(Debug, Clone, PartialEq)]
pub struct StatusBar {
    status_line: String,
    keys: Vec<RelevantKey>,
    save: Option<StatusView>,
}

impl Default for StatusBar {
    fn default() -> Self {
        Self {
            status_line: "Opening document...".to_owned(),
            keys: default_keys(),
            save: None,
        }
    }
}

pub fn default_keys() -> Vec<RelevantKey> {
    vec![
        RelevantKey::new("^S", "Save now"),
        RelevantKey::new("^Q", "Quit"),
    ]
}

/// One-line summary of the save state, e.g. `Saved v8 12s ago`.
pub fn describe(view: &StatusView, now: Instant) -> String {
    let ago = |at: Instant| {
        let elapsed = now.saturating_duration_since(at);
        if elapsed < Duration::from_secs(1) {
            "just now".to_string()
        } else {
            let whole = Duration::from_secs(elapsed.as_secs());
            format!("{} ago", humantime::format_duration(whole))
        }
    };
    match &view.status {
        SaveStatus::Saved => match view.last_saved_at {
            Some(at) => format!("✔ Saved {} {}", view.version, ago(at)),
            None => format!("✔ Saved {}", view.version),
        },
        SaveStatus::Unsaved => match view.last_saved_at {
            Some(at) => format!("● Unsaved changes (last saved {})", ago(at)),
            None => "● Unsaved changes".to_string(),
        },
        SaveStatus::Saving => match view.retry {
            Some(retry) => {
                let progress = format!("{}/{}", retry.retry_count, retry.max_retries);
                match retry.fire_at {
                    Some(fire_at) => {
                        let wait = fire_at.saturating_duration_since(now);
                        let wait = Duration::from_secs(wait.as_secs());
                        format!(
                            "⟳ Save failed, retry {progress} in {}",
                            humantime::format_duration(wait)
                        )
                    }
                    None => format!("⟳ Retrying {progress}..."),
                }
            }
            None => "⟳ Saving...".to_string(),
        },
        SaveStatus::Error(failure) => format!("✖ Not saved: {failure}"),
    }
}

impl Component for StatusBar {
    fn update(&mut self, action: Action) -> Result<Option<Action>> {
        match action {
            Action::SetStatusLine(msg) => self.status_line = msg,
            Action::Error(msg) => self.status_line = format!("⛔ {msg}"),
            Action::SetRelevantKeys(keys) => self.keys = keys,
            Action::SaveStatus(view) => self.save = Some(view),
            _ => {}
        };
        Ok(None)
    }

    fn draw(&mut self, frame: &mut Frame, area: Rect) -> Result<()> {
        let area = crate::layout::main_vert(LayoutSlot::StatusBar, area);

        let block = Block::new()
            .borders(!Borders::BOTTOM)
            .border_type(BorderType::Rounded)
            .padding(Padding::horizontal(2))
            .title(self.status_line.clone())
            .title_alignment(Alignment::Center);
        frame.render_widget(&block, area);

        let [keys_area, save_area] =
            Layout::horizontal([Constraint::Fill(1), Constraint::Fill(1)]).areas(block.inner(area));

        let mut keys_text = Text::default();
        let mut first = true;
        for key in self.keys.iter() {
            if !first {
                keys_text.push_span("  ");
            } else {
                first = false;
            }
            keys_text.push_span(format!("<{}> ", key.key).blue().bold());
            keys_text.push_span(Span::from(key.text.clone()));
        }
        frame.render_widget(keys_text, keys_area);

        if let Some(view) = &self.save {
            let summary = Span::from(describe(view, Instant::now()));
            let summary = match view.status {
                SaveStatus::Saved => summary.green(),
                SaveStatus::Unsaved | SaveStatus::Saving => summary.yellow(),
                SaveStatus::Error(_) => summary.red().bold(),
            };
            frame.render_widget(Line::from(summary).right_aligned(), save_area);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::autosave::{
        DocVersion, FailureKind,
        executor::{RetryInfo, SaveFailure},
    };

    fn view(status: SaveStatus) -> StatusView {
        StatusView {
            status,
            last_saved_at: None,
            has_unsaved_changes: false,
            version: DocVersion::new(8),
            retry: None,
        }
    }

    #[test]
    fn saved_shows_version_and_age() {
        let now = Instant::now();
        let view = StatusView {
            last_saved_at: Some(now),
            ..view(SaveStatus::Saved)
        };

        assert_eq!(describe(&view, now), "✔ Saved v8 just now");
        assert_eq!(
            describe(&view, now + Duration::from_millis(12_400)),
            "✔ Saved v8 12s ago"
        );
    }

    #[test]
    fn pending_retry_shows_progress_and_countdown() {
        let now = Instant::now();
        let view = StatusView {
            retry: Some(RetryInfo {
                retry_count: 2,
                max_retries: 3,
                fire_at: Some(now + Duration::from_secs(6)),
            }),
            ..view(SaveStatus::Saving)
        };

        assert_eq!(describe(&view, now), "⟳ Save failed, retry 2/3 in 6s");
    }

    #[test]
    fn errors_carry_the_failure_message() {
        let view = view(SaveStatus::Error(SaveFailure {
            kind: FailureKind::Conflict,
            message: "document is at v9, expected v8".into(),
        }));

        assert_eq!(
            describe(&view, Instant::now()),
            "✖ Not saved: conflict: document is at v9, expected v8"
        );
    }

    #[test]
    fn save_status_actions_are_kept_for_drawing() {
        let mut bar = StatusBar::default();
        let saved = view(SaveStatus::Unsaved);

        bar.update(Action::SaveStatus(saved.clone())).expect("update");

        assert_eq!(bar.save, Some(saved));
    }
}
