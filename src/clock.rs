use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use log::{debug, warn};

/// Identifies one subscription to a tick source. Handles are never reused.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TickHandle(u64);

impl TickHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A periodic clock delivering one tick per interval to each live subscription.
pub trait TickSource {
    fn subscribe(&mut self) -> TickHandle;
    fn unsubscribe(&mut self, handle: TickHandle);
}

/// Tick source driven by the caller; nothing ticks until told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    next_handle: u64,
    live: BTreeSet<TickHandle>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles that would receive the next tick.
    pub fn live_handles(&self) -> Vec<TickHandle> {
        self.live.iter().copied().collect()
    }

    pub fn is_live(&self, handle: TickHandle) -> bool {
        self.live.contains(&handle)
    }
}

impl TickSource for ManualClock {
    fn subscribe(&mut self) -> TickHandle {
        let handle = TickHandle(self.next_handle);
        self.next_handle += 1;
        self.live.insert(handle);
        handle
    }

    fn unsubscribe(&mut self, handle: TickHandle) {
        self.live.remove(&handle);
    }
}

/// Wall-clock tick source. Each subscription gets its own deadline one
/// interval after `subscribe`; a background thread hands every due handle
/// to `deliver`.
pub struct IntervalClock {
    interval: Duration,
    next_handle: u64,
    live: Arc<Mutex<Deadlines>>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

type Deadlines = BTreeMap<TickHandle, Instant>;

impl IntervalClock {
    pub fn start<F>(interval: Duration, deliver: F) -> Result<Self>
    where
        F: Fn(TickHandle) -> bool + Send + 'static,
    {
        if interval.is_zero() {
            bail!("tick interval must be greater than zero");
        }
        let live = Arc::new(Mutex::new(Deadlines::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let live_for_thread = Arc::clone(&live);
        let stop_for_thread = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("solotimer-ticker".to_string())
            .spawn(move || run_ticker_loop(interval, live_for_thread, stop_for_thread, deliver))?;
        debug!("event=ticker_start interval_ms={}", interval.as_millis());
        Ok(Self {
            interval,
            next_handle: 0,
            live,
            stop,
            join: Some(join),
        })
    }

    fn with_live<R>(&self, f: impl FnOnce(&mut Deadlines) -> R) -> R {
        // Poisoning leaves the map itself intact.
        let mut guard = match self.live.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl TickSource for IntervalClock {
    fn subscribe(&mut self) -> TickHandle {
        let handle = TickHandle(self.next_handle);
        self.next_handle += 1;
        let first_tick = Instant::now() + self.interval;
        self.with_live(|live| live.insert(handle, first_tick));
        handle
    }

    fn unsubscribe(&mut self, handle: TickHandle) {
        self.with_live(|live| live.remove(&handle));
    }
}

impl Drop for IntervalClock {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

const STOP_POLL: Duration = Duration::from_millis(50);

/// Handles whose deadline has passed at `now`. Each due deadline moves one
/// interval forward, so a late wakeup still owes one tick per elapsed
/// interval and pays them on the following passes.
fn take_due(live: &mut Deadlines, now: Instant, interval: Duration) -> Vec<TickHandle> {
    let mut due = Vec::new();
    for (handle, deadline) in live.iter_mut() {
        if *deadline <= now {
            *deadline += interval;
            due.push(*handle);
        }
    }
    due
}

fn run_ticker_loop<F>(
    interval: Duration,
    live: Arc<Mutex<Deadlines>>,
    stop: Arc<AtomicBool>,
    deliver: F,
) where
    F: Fn(TickHandle) -> bool,
{
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        let (due, earliest) = {
            let mut guard = match live.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let due = take_due(&mut guard, now, interval);
            (due, guard.values().min().copied())
        };

        for handle in due {
            if !deliver(handle) {
                warn!("event=ticker_stop reason=receiver_gone");
                return;
            }
        }

        let wait = earliest
            .map_or(STOP_POLL, |deadline| deadline.saturating_duration_since(now))
            .min(STOP_POLL);
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn manual_clock_never_reuses_handles() {
        let mut clock = ManualClock::new();
        let first = clock.subscribe();
        clock.unsubscribe(first);
        let second = clock.subscribe();
        assert_ne!(first, second);
        assert!(!clock.is_live(first));
        assert_eq!(clock.live_handles(), vec![second]);
    }

    #[test]
    fn interval_clock_rejects_zero_interval() {
        let result = IntervalClock::start(Duration::ZERO, |_| true);
        assert!(result.is_err());
    }

    #[test]
    fn interval_clock_ticks_only_live_handles() {
        let (tx, rx) = mpsc::channel();
        let mut clock = IntervalClock::start(Duration::from_millis(100), move |handle| {
            tx.send(handle).is_ok()
        })
        .expect("ticker should start");

        let released = clock.subscribe();
        clock.unsubscribe(released);
        let kept = clock.subscribe();

        let first = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("live handle should tick");
        assert_eq!(first, kept);

        clock.unsubscribe(kept);
        drop(clock);
        let leftovers: Vec<TickHandle> = rx.try_iter().collect();
        assert!(leftovers.iter().all(|handle| *handle == kept));
    }

    #[test]
    fn mid_interval_subscription_waits_a_full_interval() {
        let interval = Duration::from_millis(300);
        let (tx, rx) = mpsc::channel();
        let mut clock =
            IntervalClock::start(interval, move |handle| tx.send(handle).is_ok())
                .expect("ticker should start");

        let early = clock.subscribe();
        thread::sleep(Duration::from_millis(200));
        let late = clock.subscribe();
        let subscribed_at = Instant::now();
        clock.unsubscribe(early);

        loop {
            let handle = rx
                .recv_timeout(Duration::from_secs(2))
                .expect("late handle should tick");
            if handle == late {
                break;
            }
        }
        assert!(subscribed_at.elapsed() >= interval);
    }

    #[test]
    fn due_handles_follow_their_own_deadlines() {
        let interval = Duration::from_millis(1_000);
        let start = Instant::now();
        let first = TickHandle(0);
        let second = TickHandle(1);
        let mut live = Deadlines::new();
        live.insert(first, start + interval);
        live.insert(second, start + interval + Duration::from_millis(900));

        assert!(take_due(&mut live, start + Duration::from_millis(999), interval).is_empty());
        assert_eq!(take_due(&mut live, start + interval, interval), vec![first]);
        assert!(take_due(&mut live, start + interval, interval).is_empty());
        assert_eq!(
            take_due(&mut live, start + Duration::from_millis(1_900), interval),
            vec![second]
        );
    }

    #[test]
    fn late_wakeup_pays_one_tick_per_missed_interval() {
        let interval = Duration::from_millis(1_000);
        let start = Instant::now();
        let handle = TickHandle(0);
        let mut live = Deadlines::new();
        live.insert(handle, start + interval);

        let late = start + Duration::from_millis(3_500);
        let mut ticks = 0;
        while !take_due(&mut live, late, interval).is_empty() {
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        assert_eq!(live.get(&handle), Some(&(start + Duration::from_millis(4_000))));
    }
}
