//! Host-side timers for guest code.
//!
//! The scheduler never invokes anything itself. The owner advances its time
//! base once per host tick, asks for the ids that are [`due`](Scheduler::due)
//! and [`take`](Scheduler::take)s their callbacks one at a time, so a callback
//! that cancels a later timer of the same tick is honored.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

pub type TimerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Timeout,
    Interval,
    Immediate,
    AnimationFrame,
}

impl TimerKind {
    const fn repeats(self) -> bool {
        matches!(self, Self::Interval | Self::AnimationFrame)
    }
}

#[derive(Debug)]
struct TimerEntry<C> {
    kind: TimerKind,
    due: Instant,
    period: Duration,
    callback: C,
}

#[derive(Debug)]
pub struct Scheduler<C> {
    next_id: TimerId,
    now: Instant,
    timers: BTreeMap<TimerId, TimerEntry<C>>,
}

impl<C: Clone> Scheduler<C> {
    pub fn new(now: Instant) -> Self {
        Self {
            next_id: 1,
            now,
            timers: BTreeMap::new(),
        }
    }

    fn insert(&mut self, kind: TimerKind, delay: Duration, callback: C) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.insert(
            id,
            TimerEntry {
                kind,
                due: self.now + delay,
                period: delay,
                callback,
            },
        );
        id
    }

    pub fn set_timeout(&mut self, callback: C, delay: Duration) -> TimerId {
        self.insert(TimerKind::Timeout, delay, callback)
    }

    pub fn set_interval(&mut self, callback: C, period: Duration) -> TimerId {
        self.insert(TimerKind::Interval, period, callback)
    }

    pub fn set_immediate(&mut self, callback: C) -> TimerId {
        self.insert(TimerKind::Immediate, Duration::ZERO, callback)
    }

    pub fn request_animation_frame(&mut self, callback: C) -> TimerId {
        self.insert(TimerKind::AnimationFrame, Duration::ZERO, callback)
    }

    fn remove_if(&mut self, id: TimerId, accept: impl Fn(TimerKind) -> bool) -> bool {
        match self.timers.get(&id) {
            Some(entry) if accept(entry.kind) => self.timers.remove(&id).is_some(),
            _ => false,
        }
    }

    /// Returns whether a timer was removed. Unknown ids are ignored.
    pub fn clear_timeout(&mut self, id: TimerId) -> bool {
        self.remove_if(id, |kind| {
            matches!(kind, TimerKind::Timeout | TimerKind::Interval)
        })
    }

    pub fn clear_interval(&mut self, id: TimerId) -> bool {
        self.clear_timeout(id)
    }

    pub fn clear_immediate(&mut self, id: TimerId) -> bool {
        self.remove_if(id, |kind| kind == TimerKind::Immediate)
    }

    pub fn cancel_animation_frame(&mut self, id: TimerId) -> bool {
        self.remove_if(id, |kind| kind == TimerKind::AnimationFrame)
    }

    pub fn clear_all(&mut self) {
        self.timers.clear();
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    /// Moves the time base forward. Going backwards is ignored.
    pub fn advance(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Ids due at the current time base, ordered by due time then id.
    pub fn due(&self) -> Vec<TimerId> {
        let mut due: Vec<(Instant, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, entry)| entry.due <= self.now)
            .map(|(id, entry)| (entry.due, *id))
            .collect();
        due.sort_unstable();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Hands out the callback of a due timer.
    ///
    /// One-shot timers leave the active set before their callback is
    /// returned; intervals are re-armed one period ahead.
    pub fn take(&mut self, id: TimerId) -> Option<C> {
        let entry = self.timers.get_mut(&id)?;
        if entry.due > self.now {
            return None;
        }
        if entry.kind.repeats() {
            entry.due = self.now + entry.period;
            return Some(entry.callback.clone());
        }
        self.timers.remove(&id).map(|entry| entry.callback)
    }
}
