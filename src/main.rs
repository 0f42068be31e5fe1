use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::info;

use solotimer::clock::{IntervalClock, ManualClock, TickSource};
use solotimer::logging::{DEFAULT_LOG_LEVEL, init_logging};
use solotimer::render;
use solotimer::session::{SessionEvent, run_session, spawn_input_reader};
use solotimer::timer::model::{TimerId, load_timer_file, save_timer_file};
use solotimer::timer::store::TimerStore;

#[derive(Parser, Debug)]
#[command(
    name = "solotimer",
    version,
    about = "Track time across named timers, only one running at a time"
)]
struct Cli {
    #[arg(long, global = true, default_value = "timers.json")]
    timers: PathBuf,

    #[arg(long, global = true, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Interactive session reading commands from stdin.
    Run {
        #[arg(long, default_value_t = 1_000)]
        interval_ms: u64,

        /// Only advance timers on `tick` commands.
        #[arg(long)]
        manual_clock: bool,
    },
    #[command(flatten)]
    Once(OnceCommand),
}

#[derive(Subcommand, Debug)]
enum OnceCommand {
    /// Show the timer list and total.
    List {
        /// Include hidden timers.
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show id, display order and visibility of every timer.
    Options,
    /// Add a timer and print its id.
    Add {
        #[arg(long, default_value = "")]
        label: String,
    },
    Delete { id: TimerId },
    Label { id: TimerId, text: String },
    Order {
        id: TimerId,
        #[arg(allow_negative_numbers = true)]
        display_order: i64,
    },
    Hide { id: TimerId },
    Show { id: TimerId },
    /// Zero every timer.
    Reset,
    Total,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging(&cli.log_level)?;

    match cli.command {
        CliCommand::Run {
            interval_ms,
            manual_clock,
        } => {
            if interval_ms == 0 {
                bail!("--interval-ms must be greater than zero");
            }
            if manual_clock {
                run_manual(&cli.timers)
            } else {
                run_interval(&cli.timers, Duration::from_millis(interval_ms))
            }
        }
        CliCommand::Once(command) => run_once(&cli.timers, command),
    }
}

fn load_store<C: TickSource>(path: &Path, clock: C) -> Result<TimerStore<C>> {
    let loaded =
        load_timer_file(path).with_context(|| format!("failed to load {}", path.display()))?;
    Ok(match loaded {
        Some(file) => {
            info!(
                "event=timers_load path={} count={}",
                path.display(),
                file.snapshot.timers.len()
            );
            TimerStore::from_snapshot(file.snapshot, clock)
        }
        None => {
            info!("event=timers_new path={}", path.display());
            TimerStore::with_default_timer(clock)
        }
    })
}

fn save_store<C: TickSource>(path: &Path, store: &TimerStore<C>) -> Result<()> {
    save_timer_file(path, &store.snapshot())
        .with_context(|| format!("failed to save {}", path.display()))
}

fn run_once(path: &Path, command: OnceCommand) -> Result<()> {
    let mut store = load_store(path, ManualClock::new())?;
    let mut changed = true;
    match command {
        OnceCommand::List { all, json } => {
            changed = false;
            let views = if all {
                store.views()
            } else {
                store.visible_views()
            };
            if json {
                println!("{}", render::timer_list_json(&views, store.total_elapsed())?);
            } else {
                print!("{}", render::timer_list(&views, store.total_elapsed()));
            }
        }
        OnceCommand::Options => {
            changed = false;
            print!("{}", render::options_list(&store.views()));
        }
        OnceCommand::Total => {
            changed = false;
            println!("{}", render::total_line(store.total_elapsed()));
        }
        OnceCommand::Add { label } => {
            let id = store.add_labeled(label);
            println!("{id}");
        }
        OnceCommand::Delete { id } => changed = note_missing(store.delete(id).is_some(), id),
        OnceCommand::Label { id, text } => changed = note_missing(store.set_label(id, text), id),
        OnceCommand::Order { id, display_order } => {
            changed = note_missing(store.set_display_order(id, display_order), id)
        }
        OnceCommand::Hide { id } => changed = note_missing(store.set_hidden(id, true), id),
        OnceCommand::Show { id } => changed = note_missing(store.set_hidden(id, false), id),
        OnceCommand::Reset => store.reset_all(),
    }
    if changed {
        save_store(path, &store)?;
    }
    Ok(())
}

fn note_missing(found: bool, id: TimerId) -> bool {
    if !found {
        info!("event=timer_missing id={id}");
    }
    found
}

fn run_manual(path: &Path) -> Result<()> {
    let mut store = load_store(path, ManualClock::new())?;
    let (tx, rx) = mpsc::channel();
    spawn_input_reader(tx)?;
    run_session(&mut store, &rx, &mut io::stdout().lock())?;
    save_store(path, &store)
}

fn run_interval(path: &Path, interval: Duration) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let tick_tx = tx.clone();
    let clock = IntervalClock::start(interval, move |handle| {
        tick_tx.send(SessionEvent::Tick(handle)).is_ok()
    })?;
    let mut store = load_store(path, clock)?;
    spawn_input_reader(tx)?;
    run_session(&mut store, &rx, &mut io::stdout().lock())?;
    save_store(path, &store)
}
