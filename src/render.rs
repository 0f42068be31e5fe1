use anyhow::Result;
use serde::Serialize;

use crate::timer::view::{TimerView, format_elapsed};

const RUNNING_MARK: char = '▶';
const STOPPED_MARK: char = '■';

/// The timer screen: one row per timer, then the total.
pub fn timer_list(views: &[TimerView], total_seconds: u64) -> String {
    let mut out = String::new();
    for view in views {
        let mark = if view.is_running {
            RUNNING_MARK
        } else {
            STOPPED_MARK
        };
        out.push_str(&format!(
            "{mark} {:>3}  {}  {}\n",
            view.id,
            format_elapsed(view.elapsed_seconds),
            display_label(&view.label)
        ));
    }
    out.push_str(&total_line(total_seconds));
    out.push('\n');
    out
}

/// The options screen: every timer, hidden ones included.
pub fn options_list(views: &[TimerView]) -> String {
    let mut out = String::from(" id  order  hidden  label\n");
    for view in views {
        out.push_str(&format!(
            "{:>3}  {:>5}  {:<6}  {}\n",
            view.id,
            view.display_order,
            if view.hidden { "yes" } else { "no" },
            display_label(&view.label)
        ));
    }
    out
}

pub fn total_line(total_seconds: u64) -> String {
    format!("total {}", format_elapsed(total_seconds))
}

#[derive(Serialize)]
struct TimerListJson<'a> {
    timers: &'a [TimerView],
    total_seconds: u64,
}

pub fn timer_list_json(views: &[TimerView], total_seconds: u64) -> Result<String> {
    Ok(serde_json::to_string_pretty(&TimerListJson {
        timers: views,
        total_seconds,
    })?)
}

fn display_label(label: &str) -> &str {
    if label.trim().is_empty() {
        "(unnamed)"
    } else {
        label
    }
}
