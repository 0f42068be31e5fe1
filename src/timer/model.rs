use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub type TimerId = u64;

pub const TIMER_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Timer {
    pub id: TimerId,
    pub label: String,
    pub display_order: i64,
    pub hidden: bool,
    pub elapsed_seconds: u64,
}

impl Timer {
    pub fn new(id: TimerId, display_order: i64) -> Self {
        Self {
            id,
            display_order,
            ..Self::default()
        }
    }
}

/// The saved form of a store: every timer plus the id counter.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TimerSnapshot {
    pub next_id: TimerId,
    pub timers: Vec<Timer>,
}

#[derive(Debug, Clone)]
pub struct TimerFile {
    pub version: u32,
    pub saved_at: Option<DateTime<Local>>,
    pub snapshot: TimerSnapshot,
}

/// Loads the timer file, or `None` when it does not exist yet.
pub fn load_timer_file(path: &Path) -> Result<Option<TimerFile>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("unable to read timer file {}", path.display()));
        }
    };
    parse_timer_file_text(&content).map(Some)
}

pub fn parse_timer_file_text(content: &str) -> Result<TimerFile> {
    let raw = serde_json::from_str::<TimerFileRaw>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != TIMER_FILE_VERSION {
        bail!(
            "unsupported timer file version {}; expected version {TIMER_FILE_VERSION}",
            raw.version
        );
    }

    let mut ids = HashSet::new();
    let mut timers = Vec::with_capacity(raw.timers.len());
    for timer in raw.timers {
        if timer.id >= TimerId::MAX - 1 {
            bail!("timer id {} is out of range", timer.id);
        }
        if !ids.insert(timer.id) {
            bail!("duplicate timer id found: {}", timer.id);
        }
        timers.push(Timer {
            id: timer.id,
            label: timer.label,
            display_order: timer.display_order,
            hidden: timer.hidden,
            elapsed_seconds: timer.elapsed_seconds,
        });
    }

    let next_free = timers.iter().map(|timer| timer.id + 1).max().unwrap_or(0);
    let next_id = raw.next_id.unwrap_or(next_free).max(next_free);
    if next_id == TimerId::MAX {
        bail!("next_id {next_id} leaves no room for new timers");
    }

    Ok(TimerFile {
        version: raw.version,
        saved_at: raw.saved_at,
        snapshot: TimerSnapshot { next_id, timers },
    })
}

pub fn save_timer_file(path: &Path, snapshot: &TimerSnapshot) -> Result<()> {
    let payload = TimerFileRaw {
        version: TIMER_FILE_VERSION,
        next_id: Some(snapshot.next_id),
        saved_at: Some(Local::now()),
        timers: snapshot
            .timers
            .iter()
            .map(|timer| TimerRaw {
                id: timer.id,
                label: timer.label.clone(),
                display_order: timer.display_order,
                hidden: timer.hidden,
                elapsed_seconds: timer.elapsed_seconds,
            })
            .collect(),
    };
    let text = serde_json::to_string_pretty(&payload)?;
    fs::write(path, format!("{text}\n"))
        .with_context(|| format!("unable to write timer file {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct TimerFileRaw {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_id: Option<TimerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Local>>,
    #[serde(default)]
    timers: Vec<TimerRaw>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TimerRaw {
    id: TimerId,
    #[serde(default)]
    label: String,
    #[serde(default)]
    display_order: i64,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    elapsed_seconds: u64,
}
