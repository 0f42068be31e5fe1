use serde::Serialize;

use crate::timer::model::{Timer, TimerId};

/// Read-only projection of one timer for rendering.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct TimerView {
    pub id: TimerId,
    pub label: String,
    pub display_order: i64,
    pub hidden: bool,
    pub elapsed_seconds: u64,
    pub is_running: bool,
}

impl TimerView {
    pub fn of(timer: &Timer, is_running: bool) -> Self {
        Self {
            id: timer.id,
            label: timer.label.clone(),
            display_order: timer.display_order,
            hidden: timer.hidden,
            elapsed_seconds: timer.elapsed_seconds,
            is_running,
        }
    }
}

/// Stable sort on `display_order`; equal orders fall back to id.
pub fn sort_for_display(views: &mut [TimerView]) {
    views.sort_by(|a, b| {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// `MM:SS`, with minutes widening instead of rolling into hours.
pub fn format_elapsed(seconds: u64) -> String {
    let minutes = seconds / 60;
    let seconds = seconds % 60;
    format!("{minutes:02}:{seconds:02}")
}
