//! The timer state machine.
//!
//! Timers live in an id-keyed arena. Running state is not stored per timer:
//! the store holds at most one clock subscription and the timer it belongs
//! to is the running one. At most one timer runs, and a timer runs exactly
//! when it owns the subscription.

use std::collections::BTreeMap;

use log::{debug, info};
use thiserror::Error;

use crate::clock::{ManualClock, TickHandle, TickSource};
use crate::timer::model::{Timer, TimerId, TimerSnapshot};
use crate::timer::view::{TimerView, sort_for_display};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TimerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Subscription {
    timer: TimerId,
    handle: TickHandle,
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum InvariantViolation {
    #[error("more than one timer is running: {0:?}")]
    MultipleRunning(Vec<TimerId>),
    #[error("tick subscription is held by missing timer {0}")]
    OrphanSubscription(TimerId),
    #[error("next id {next_id} does not exceed existing timer id {max_id}")]
    IdCounterBehind { next_id: TimerId, max_id: TimerId },
}

pub struct TimerStore<C: TickSource> {
    timers: BTreeMap<TimerId, Timer>,
    next_id: TimerId,
    active: Option<Subscription>,
    clock: C,
}

impl<C: TickSource> TimerStore<C> {
    pub fn new(clock: C) -> Self {
        Self {
            timers: BTreeMap::new(),
            next_id: 0,
            active: None,
            clock,
        }
    }

    /// A store holding the single default timer a fresh session starts with.
    pub fn with_default_timer(clock: C) -> Self {
        let mut store = Self::new(clock);
        store.add();
        store
    }

    /// Restores a saved collection. Every restored timer starts stopped.
    pub fn from_snapshot(snapshot: TimerSnapshot, clock: C) -> Self {
        let mut timers = BTreeMap::new();
        for timer in snapshot.timers {
            timers.insert(timer.id, timer);
        }
        let next_free = timers
            .keys()
            .next_back()
            .map_or(0, |id| id.saturating_add(1));
        Self {
            next_id: snapshot.next_id.max(next_free),
            timers,
            active: None,
            clock,
        }
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            next_id: self.next_id,
            timers: self.timers.values().cloned().collect(),
        }
    }

    pub fn add(&mut self) -> TimerId {
        let id = self.next_id;
        // Loaded files keep the counter below `TimerId::MAX`.
        self.next_id = self.next_id.saturating_add(1);
        let display_order = i64::try_from(self.timers.len()).unwrap_or(i64::MAX);
        self.timers.insert(id, Timer::new(id, display_order));
        info!("event=timer_add id={id} display_order={display_order}");
        id
    }

    pub fn add_labeled(&mut self, label: impl Into<String>) -> TimerId {
        let id = self.add();
        self.set_label(id, label);
        id
    }

    /// Removes a timer, releasing its subscription first if it is running.
    pub fn delete(&mut self, id: TimerId) -> Option<Timer> {
        if !self.timers.contains_key(&id) {
            debug!("event=timer_missing op=delete id={id}");
            return None;
        }
        self.stop(id);
        let removed = self.timers.remove(&id);
        info!("event=timer_delete id={id}");
        removed
    }

    pub fn set_label(&mut self, id: TimerId, label: impl Into<String>) -> bool {
        self.edit(id, "set_label", |timer| timer.label = label.into())
    }

    pub fn set_display_order(&mut self, id: TimerId, display_order: i64) -> bool {
        self.edit(id, "set_display_order", |timer| {
            timer.display_order = display_order
        })
    }

    pub fn set_hidden(&mut self, id: TimerId, hidden: bool) -> bool {
        self.edit(id, "set_hidden", |timer| timer.hidden = hidden)
    }

    /// Starts `id` if nothing else is running. Use [`TimerStore::resume`] to
    /// switch from another running timer.
    pub fn start(&mut self, id: TimerId) -> bool {
        if !self.timers.contains_key(&id) {
            debug!("event=timer_missing op=start id={id}");
            return false;
        }
        match self.active {
            Some(active) if active.timer == id => false,
            Some(active) => {
                debug!(
                    "event=start_refused id={id} running={} reason=another_timer_running",
                    active.timer
                );
                false
            }
            None => {
                let handle = self.clock.subscribe();
                self.active = Some(Subscription { timer: id, handle });
                info!("event=timer_start id={id} handle={}", handle.raw());
                true
            }
        }
    }

    pub fn stop(&mut self, id: TimerId) -> bool {
        match self.active {
            Some(active) if active.timer == id => {
                self.active = None;
                self.clock.unsubscribe(active.handle);
                info!("event=timer_stop id={id} handle={}", active.handle.raw());
                true
            }
            _ => false,
        }
    }

    /// Stops every other running timer, then starts `id`.
    pub fn resume(&mut self, id: TimerId) -> bool {
        if !self.timers.contains_key(&id) {
            debug!("event=timer_missing op=resume id={id}");
            return false;
        }
        let displaced: Vec<TimerId> = self.running_ids().filter(|other| *other != id).collect();
        for other in displaced {
            self.stop(other);
        }
        let started = self.start(id);
        debug_assert_eq!(self.check_invariants(), Ok(()));
        started
    }

    /// Zeroes every counter and stops whatever is running.
    pub fn reset_all(&mut self) {
        let running: Vec<TimerId> = self.running_ids().collect();
        for id in running {
            self.stop(id);
        }
        for timer in self.timers.values_mut() {
            timer.elapsed_seconds = 0;
        }
        info!("event=timers_reset count={}", self.timers.len());
    }

    /// Delivers one tick. Only the timer owning `handle` advances; ticks for
    /// a released handle are dropped.
    pub fn on_tick(&mut self, handle: TickHandle) -> Option<TimerId> {
        let active = match self.active {
            Some(active) if active.handle == handle => active,
            _ => {
                debug!("event=tick_dropped handle={}", handle.raw());
                return None;
            }
        };
        let timer = self.timers.get_mut(&active.timer)?;
        timer.elapsed_seconds = timer.elapsed_seconds.saturating_add(1);
        Some(active.timer)
    }

    pub fn total_elapsed(&self) -> u64 {
        self.timers
            .values()
            .fold(0_u64, |total, timer| total.saturating_add(timer.elapsed_seconds))
    }

    pub fn get(&self, id: TimerId) -> Option<&Timer> {
        self.timers.get(&id)
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn running(&self) -> Option<TimerId> {
        self.active.map(|active| active.timer)
    }

    pub fn is_running(&self, id: TimerId) -> bool {
        self.running() == Some(id)
    }

    pub fn state(&self, id: TimerId) -> Option<TimerState> {
        self.timers.get(&id).map(|_| {
            if self.is_running(id) {
                TimerState::Running
            } else {
                TimerState::Stopped
            }
        })
    }

    /// Every timer, sorted for display.
    pub fn views(&self) -> Vec<TimerView> {
        let mut views: Vec<TimerView> = self
            .timers
            .values()
            .map(|timer| TimerView::of(timer, self.is_running(timer.id)))
            .collect();
        sort_for_display(&mut views);
        views
    }

    pub fn visible_views(&self) -> Vec<TimerView> {
        self.views().into_iter().filter(|view| !view.hidden).collect()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let running: Vec<TimerId> = self.running_ids().collect();
        if running.len() > 1 {
            return Err(InvariantViolation::MultipleRunning(running));
        }
        if let Some(active) = self.active
            && !self.timers.contains_key(&active.timer)
        {
            return Err(InvariantViolation::OrphanSubscription(active.timer));
        }
        if let Some(max_id) = self.timers.keys().next_back().copied()
            && self.next_id <= max_id
        {
            return Err(InvariantViolation::IdCounterBehind {
                next_id: self.next_id,
                max_id,
            });
        }
        Ok(())
    }

    fn running_ids(&self) -> impl Iterator<Item = TimerId> + '_ {
        self.active.iter().map(|active| active.timer)
    }

    fn edit(&mut self, id: TimerId, op: &str, apply: impl FnOnce(&mut Timer)) -> bool {
        match self.timers.get_mut(&id) {
            Some(timer) => {
                apply(timer);
                true
            }
            None => {
                debug!("event=timer_missing op={op} id={id}");
                false
            }
        }
    }
}

impl TimerStore<ManualClock> {
    /// Fires `ticks` manual ticks at every live subscription.
    pub fn advance(&mut self, ticks: u64) {
        for _ in 0..ticks {
            for handle in self.clock.live_handles() {
                self.on_tick(handle);
            }
        }
    }
}
