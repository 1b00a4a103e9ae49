//! Cancellable Timers
//!
//! Fire-and-forget timers driven by the host tick. Time is passed in
//! explicitly as milliseconds so the queue never touches a clock.
//!
//! Cancelling invalidates the handle: a cancelled timer never fires, and a
//! second cancel of the same handle reports `false`.

use std::collections::BTreeMap;

/// Handle to a scheduled timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug)]
struct TimerEntry<T> {
    due_ms: u64,
    interval_ms: Option<u64>,
    payload: T,
}

/// Queue of pending timers keyed by handle.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    timers: BTreeMap<TimerHandle, TimerEntry<T>>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            timers: BTreeMap::new(),
        }
    }

    fn insert(&mut self, due_ms: u64, interval_ms: Option<u64>, payload: T) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.timers.insert(handle, TimerEntry { due_ms, interval_ms, payload });
        handle
    }

    /// Fire `payload` once, `delay_ms` after `now_ms`.
    pub fn schedule(&mut self, now_ms: u64, delay_ms: u64, payload: T) -> TimerHandle {
        self.insert(now_ms.saturating_add(delay_ms), None, payload)
    }

    /// Fire `payload` every `interval_ms`, first at `now_ms + interval_ms`.
    pub fn schedule_interval(&mut self, now_ms: u64, interval_ms: u64, payload: T) -> TimerHandle {
        let interval_ms = interval_ms.max(1);
        self.insert(now_ms.saturating_add(interval_ms), Some(interval_ms), payload)
    }

    /// Cancel a timer. Returns `true` only for the call that disarmed it.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.timers.remove(&handle).is_some()
    }

    /// Whether the handle still refers to an armed timer.
    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(&handle)
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// True when no timer is armed.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Disarm everything.
    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

impl<T: Clone> TimerQueue<T> {
    /// Pop the earliest timer due at `now_ms`.
    ///
    /// Timers are popped one at a time so a handler may cancel a timer that
    /// is due in the same tick before it fires. Interval timers are re-armed
    /// under the same handle.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<(TimerHandle, T)> {
        let handle = self
            .timers
            .iter()
            .filter(|(_, entry)| entry.due_ms <= now_ms)
            .min_by_key(|(handle, entry)| (entry.due_ms, **handle))
            .map(|(handle, _)| *handle)?;

        let entry = self.timers.remove(&handle)?;
        let payload = entry.payload.clone();

        if let Some(interval) = entry.interval_ms {
            let mut due_ms = entry.due_ms.saturating_add(interval);
            if due_ms <= now_ms {
                due_ms = now_ms.saturating_add(interval);
            }
            self.timers.insert(handle, TimerEntry { due_ms, interval_ms: Some(interval), payload: entry.payload });
        }

        Some((handle, payload))
    }
}
