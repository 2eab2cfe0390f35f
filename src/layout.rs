use lazy_static::lazy_static;
use ratatui::layout::{Constraint, Layout, Rect};

lazy_static! {
    /// Editor on top, a two-row status bar below.
    static ref MAIN_LAYOUT: Layout = Layout::vertical([Constraint::Min(3), Constraint::Length(2)]);
}

#[derive(Debug, Clone, Copy)]
pub enum LayoutSlot {
    Editor = 0,
    StatusBar = 1,
}

pub fn main_vert(slot: LayoutSlot, area: Rect) -> Rect {
    MAIN_LAYOUT.areas::<2>(area)[slot as usize]
}
