use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::sync::mpsc::{Receiver, Sender};
use std::thread;

use anyhow::Result;
use log::{debug, warn};
use thiserror::Error;

use crate::clock::{IntervalClock, ManualClock, TickHandle, TickSource};
use crate::render;
use crate::timer::model::TimerId;
use crate::timer::store::TimerStore;

pub const HELP_TEXT: &str = "\
commands:
  resume ID        stop whatever runs and start ID
  start ID         start ID if nothing else runs
  stop ID          stop ID
  add [LABEL]      add a timer
  delete ID        delete a timer
  label ID TEXT    rename a timer
  order ID N       set display order
  hide ID | show ID
  reset            zero and stop every timer
  list | total
  tick [N]         deliver N ticks (manual clock only)
  help | quit
";

/// Everything the session loop reacts to, in arrival order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SessionEvent {
    Line(String),
    Tick(TickHandle),
    InputClosed,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Command {
    Resume(TimerId),
    Start(TimerId),
    Stop(TimerId),
    Add(Option<String>),
    Delete(TimerId),
    Label(TimerId, String),
    Order(TimerId, i64),
    Hide(TimerId),
    Show(TimerId),
    Reset,
    List,
    Total,
    Tick(u64),
    Help,
    Quit,
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`; type `help` for a list")]
    Unknown(String),
    #[error("`{command}` needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("invalid {argument} `{value}`")]
    InvalidNumber {
        argument: &'static str,
        value: String,
    },
    #[error("`tick` is only available with --manual-clock")]
    TickNeedsManualClock,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        match word.to_ascii_lowercase().as_str() {
            "" => Err(CommandError::Empty),
            "resume" => Ok(Command::Resume(parse_id("resume", rest)?)),
            "start" => Ok(Command::Start(parse_id("start", rest)?)),
            "stop" => Ok(Command::Stop(parse_id("stop", rest)?)),
            "add" => Ok(Command::Add((!rest.is_empty()).then(|| rest.to_string()))),
            "delete" => Ok(Command::Delete(parse_id("delete", rest)?)),
            "label" => {
                let (id, text) = split_first("label", rest)?;
                Ok(Command::Label(parse_id("label", id)?, text.to_string()))
            }
            "order" => {
                let (id, order) = split_first("order", rest)?;
                let id = parse_id("order", id)?;
                let order = order.parse::<i64>().map_err(|_| CommandError::InvalidNumber {
                    argument: "display order",
                    value: order.to_string(),
                })?;
                Ok(Command::Order(id, order))
            }
            "hide" => Ok(Command::Hide(parse_id("hide", rest)?)),
            "show" => Ok(Command::Show(parse_id("show", rest)?)),
            "reset" => Ok(Command::Reset),
            "list" => Ok(Command::List),
            "total" => Ok(Command::Total),
            "tick" => {
                if rest.is_empty() {
                    return Ok(Command::Tick(1));
                }
                rest.parse::<u64>()
                    .map(Command::Tick)
                    .map_err(|_| CommandError::InvalidNumber {
                        argument: "tick count",
                        value: rest.to_string(),
                    })
            }
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn parse_id(command: &'static str, text: &str) -> Result<TimerId, CommandError> {
    if text.is_empty() {
        return Err(CommandError::MissingArgument {
            command,
            argument: "a timer id",
        });
    }
    text.parse::<TimerId>()
        .map_err(|_| CommandError::InvalidNumber {
            argument: "timer id",
            value: text.to_string(),
        })
}

fn split_first<'a>(
    command: &'static str,
    text: &'a str,
) -> Result<(&'a str, &'a str), CommandError> {
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) if !rest.trim().is_empty() => Ok((first, rest.trim())),
        _ => Err(CommandError::MissingArgument {
            command,
            argument: "a timer id and a value",
        }),
    }
}

/// Clocks that may or may not accept ticks typed by the user.
pub trait InjectTicks: TickSource + Sized {
    fn inject(store: &mut TimerStore<Self>, ticks: u64) -> Result<(), CommandError>;
}

impl InjectTicks for ManualClock {
    fn inject(store: &mut TimerStore<Self>, ticks: u64) -> Result<(), CommandError> {
        store.advance(ticks);
        Ok(())
    }
}

impl InjectTicks for IntervalClock {
    fn inject(_store: &mut TimerStore<Self>, _ticks: u64) -> Result<(), CommandError> {
        Err(CommandError::TickNeedsManualClock)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Step {
    Reply(String),
    Quit,
}

pub fn execute<C: InjectTicks>(
    store: &mut TimerStore<C>,
    command: Command,
) -> Result<Step, CommandError> {
    let mut preface = String::new();
    match command {
        Command::Resume(id) => {
            store.resume(id);
        }
        Command::Start(id) => {
            store.start(id);
        }
        Command::Stop(id) => {
            store.stop(id);
        }
        Command::Add(label) => {
            let id = match label {
                Some(label) => store.add_labeled(label),
                None => store.add(),
            };
            preface = format!("added timer {id}\n");
        }
        Command::Delete(id) => {
            store.delete(id);
        }
        Command::Label(id, text) => {
            store.set_label(id, text);
        }
        Command::Order(id, order) => {
            store.set_display_order(id, order);
        }
        Command::Hide(id) => {
            store.set_hidden(id, true);
        }
        Command::Show(id) => {
            store.set_hidden(id, false);
        }
        Command::Reset => store.reset_all(),
        Command::List => {}
        Command::Total => {
            return Ok(Step::Reply(format!(
                "{}\n",
                render::total_line(store.total_elapsed())
            )));
        }
        Command::Tick(ticks) => C::inject(store, ticks)?,
        Command::Help => return Ok(Step::Reply(HELP_TEXT.to_string())),
        Command::Quit => return Ok(Step::Quit),
    }
    let listing = render::timer_list(&store.visible_views(), store.total_elapsed());
    Ok(Step::Reply(format!("{preface}{listing}")))
}

/// Runs the session until `quit` or end of input. Commands and ticks are
/// applied strictly one at a time, in the order they arrive.
pub fn run_session<C, W>(
    store: &mut TimerStore<C>,
    events: &Receiver<SessionEvent>,
    out: &mut W,
) -> Result<()>
where
    C: InjectTicks,
    W: Write,
{
    write!(
        out,
        "{}",
        render::timer_list(&store.visible_views(), store.total_elapsed())
    )?;
    out.flush()?;

    while let Ok(event) = events.recv() {
        match event {
            SessionEvent::Tick(handle) => {
                store.on_tick(handle);
            }
            SessionEvent::InputClosed => {
                debug!("event=session_end reason=input_closed");
                break;
            }
            SessionEvent::Line(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let outcome = line
                    .parse::<Command>()
                    .and_then(|command| execute(store, command));
                match outcome {
                    Ok(Step::Reply(text)) => write!(out, "{text}")?,
                    Ok(Step::Quit) => {
                        debug!("event=session_end reason=quit");
                        break;
                    }
                    Err(err) => writeln!(out, "error: {err}")?,
                }
                out.flush()?;
            }
        }
    }
    Ok(())
}

/// Forwards stdin lines onto the session channel from a background thread.
pub fn spawn_input_reader(events: Sender<SessionEvent>) -> Result<()> {
    thread::Builder::new()
        .name("solotimer-input".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if events.send(SessionEvent::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!("event=input_error error={err}");
                        break;
                    }
                }
            }
            let _ = events.send(SessionEvent::InputClosed);
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn run_lines(store: &mut TimerStore<ManualClock>, lines: &[&str]) -> String {
        let (tx, rx) = mpsc::channel();
        for line in lines {
            tx.send(SessionEvent::Line(line.to_string())).expect("send");
        }
        tx.send(SessionEvent::InputClosed).expect("send");
        let mut out = Vec::new();
        run_session(store, &rx, &mut out).expect("session");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn parses_commands() {
        assert_eq!("resume 3".parse::<Command>(), Ok(Command::Resume(3)));
        assert_eq!("  STOP   1 ".parse::<Command>(), Ok(Command::Stop(1)));
        assert_eq!("add".parse::<Command>(), Ok(Command::Add(None)));
        assert_eq!(
            "add deep work".parse::<Command>(),
            Ok(Command::Add(Some("deep work".to_string())))
        );
        assert_eq!(
            "label 2 code review".parse::<Command>(),
            Ok(Command::Label(2, "code review".to_string()))
        );
        assert_eq!("order 2 -4".parse::<Command>(), Ok(Command::Order(2, -4)));
        assert_eq!("tick".parse::<Command>(), Ok(Command::Tick(1)));
        assert_eq!("tick 30".parse::<Command>(), Ok(Command::Tick(30)));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert_eq!(
            "resume".parse::<Command>(),
            Err(CommandError::MissingArgument {
                command: "resume",
                argument: "a timer id",
            })
        );
        assert!(matches!(
            "stop x".parse::<Command>(),
            Err(CommandError::InvalidNumber { .. })
        ));
        assert!(matches!(
            "order 1".parse::<Command>(),
            Err(CommandError::MissingArgument { .. })
        ));
        assert_eq!(
            "dance".parse::<Command>(),
            Err(CommandError::Unknown("dance".to_string()))
        );
    }

    #[test]
    fn tick_is_refused_without_manual_clock() {
        let (tx, _rx) = mpsc::channel::<SessionEvent>();
        let clock = IntervalClock::start(std::time::Duration::from_secs(60), move |handle| {
            tx.send(SessionEvent::Tick(handle)).is_ok()
        })
        .expect("clock");
        let mut store = TimerStore::with_default_timer(clock);
        assert_eq!(
            execute(&mut store, Command::Tick(1)),
            Err(CommandError::TickNeedsManualClock)
        );
    }

    #[test]
    fn session_switches_timers_and_totals() {
        let mut store = TimerStore::with_default_timer(ManualClock::new());
        let out = run_lines(
            &mut store,
            &["add", "resume 0", "tick 5", "resume 1", "tick 3", "total"],
        );
        assert!(out.contains("added timer 1"));
        assert!(out.contains("total 00:08"));
        assert_eq!(store.get(0).map(|timer| timer.elapsed_seconds), Some(5));
        assert_eq!(store.get(1).map(|timer| timer.elapsed_seconds), Some(3));
        assert_eq!(store.running(), Some(1));
    }

    #[test]
    fn session_reports_errors_and_continues() {
        let mut store = TimerStore::with_default_timer(ManualClock::new());
        let out = run_lines(&mut store, &["bogus", "", "resume 0", "tick 2"]);
        assert!(out.contains("error: unknown command `bogus`"));
        assert_eq!(store.get(0).map(|timer| timer.elapsed_seconds), Some(2));
    }

    #[test]
    fn session_stops_at_quit() {
        let mut store = TimerStore::with_default_timer(ManualClock::new());
        run_lines(&mut store, &["resume 0", "quit", "tick 9"]);
        assert_eq!(store.get(0).map(|timer| timer.elapsed_seconds), Some(0));
    }

    #[test]
    fn stale_tick_events_are_ignored() {
        let mut store = TimerStore::with_default_timer(ManualClock::new());
        store.add();
        store.resume(0);
        let stale = store.clock().live_handles()[0];
        store.resume(1);

        let (tx, rx) = mpsc::channel();
        tx.send(SessionEvent::Tick(stale)).expect("send");
        tx.send(SessionEvent::InputClosed).expect("send");
        run_session(&mut store, &rx, &mut Vec::new()).expect("session");
        assert_eq!(store.total_elapsed(), 0);
    }
}
