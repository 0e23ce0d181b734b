//! Named-key façade over a [`TimerHub`], so callers can address a timer by an
//! application key (a connection id, say) instead of juggling a raw [`TimerHandle`].
//!
//! Based on `zest/net/timer_container.h`'s `TimerContainer<KeyType>`: `addTimer` is a
//! no-op if a live timer already exists for the key and self-erases its map entry when a
//! non-periodic timer fires; `resetTimer` cancels whatever is currently scheduled for the
//! key (optionally with a new interval) before scheduling again; `clearTimer` cancels
//! everything. Unlike the original, the key→handle map here is just behind a `Mutex`
//! rather than dispatched through the event loop's thread-affinity queue — `TimerHub`
//! already synchronizes its own heap internally, so there is no loop-owned state left
//! for `TimerContainer` to protect by running on the loop thread specifically.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::error::ReactorError;
use crate::reactor::EventLoop;
use crate::timer::TimerHandle;

struct Entry {
    handle: TimerHandle,
}

/// A map from application-chosen keys to timers, all scheduled against one
/// [`EventLoop`]'s timer hub.
pub struct TimerContainer<K> {
    event_loop: Arc<EventLoop>,
    timers: Arc<Mutex<HashMap<K, Entry>>>,
}

impl<K> std::fmt::Debug for TimerContainer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerContainer")
            .field("len", &self.timers.lock().expect("timer map poisoned").len())
            .finish()
    }
}

impl<K> TimerContainer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    #[must_use]
    pub fn new(event_loop: Arc<EventLoop>) -> Self {
        Self { event_loop, timers: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Schedules `callback` under `key` after `delay`, repeating every `period` if
    /// given. Does nothing if `key` already has a live timer — callers that want to
    /// change the schedule must go through [`reset_timer`](Self::reset_timer).
    pub fn add_timer(
        &self,
        key: K,
        delay: Duration,
        period: Option<Duration>,
        mut callback: impl FnMut() + Send + 'static,
    ) -> Result<(), ReactorError> {
        let mut timers = self.timers.lock().expect("timer map poisoned");
        if timers.contains_key(&key) {
            return Ok(());
        }
        let weak_map: Weak<Mutex<HashMap<K, Entry>>> = Arc::downgrade(&self.timers);
        let self_erasing_key = key.clone();
        let periodic = period.is_some();
        let handle = self.event_loop.schedule_timer(delay, period, move || {
            callback();
            if !periodic {
                if let Some(map) = weak_map.upgrade() {
                    map.lock().expect("timer map poisoned").remove(&self_erasing_key);
                }
            }
        })?;
        timers.insert(key, Entry { handle });
        Ok(())
    }

    /// Cancels whatever is scheduled under `key`, if anything, then schedules
    /// `callback` again after `delay` (or the original's current interval, if this
    /// entry wasn't found — callers needing an explicit interval should pass one).
    pub fn reset_timer(
        &self,
        key: K,
        delay: Duration,
        period: Option<Duration>,
        callback: impl FnMut() + Send + 'static,
    ) -> Result<(), ReactorError> {
        self.cancel_timer(&key);
        self.add_timer(key, delay, period, callback)
    }

    /// Cancels and removes the timer registered under `key`, if any.
    pub fn cancel_timer(&self, key: &K) {
        let mut timers = self.timers.lock().expect("timer map poisoned");
        if let Some(entry) = timers.remove(key) {
            entry.handle.cancel();
        }
    }

    /// Cancels every timer currently tracked by this container.
    pub fn clear(&self) {
        let mut timers = self.timers.lock().expect("timer map poisoned");
        for (_, entry) in timers.drain() {
            entry.handle.cancel();
        }
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.timers.lock().expect("timer map poisoned").contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.lock().expect("timer map poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::TimerContainer;
    use crate::reactor::EventLoop;

    fn spawn_running_loop() -> Arc<EventLoop> {
        let event_loop = EventLoop::new().expect("event loop creation failed");
        let handle = event_loop.clone();
        std::thread::spawn(move || handle.run().expect("loop run failed"));
        while !event_loop.is_running() {
            std::thread::yield_now();
        }
        event_loop
    }

    #[test]
    fn add_timer_is_a_no_op_for_an_already_live_key() {
        let event_loop = spawn_running_loop();
        let container = TimerContainer::new(event_loop.clone());
        let fired = Arc::new(AtomicUsize::new(0));

        let cb = fired.clone();
        container.add_timer(1usize, Duration::from_millis(50), None, move || {
            cb.fetch_add(1, AtomicOrdering::SeqCst);
        }).unwrap();
        // Second add_timer under the same key must not replace or duplicate the first.
        let cb2 = fired.clone();
        container.add_timer(1usize, Duration::from_millis(1), None, move || {
            cb2.fetch_add(100, AtomicOrdering::SeqCst);
        }).unwrap();

        std::thread::sleep(Duration::from_millis(150));
        event_loop.stop();
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn reset_timer_replaces_the_pending_schedule() {
        let event_loop = spawn_running_loop();
        let container = TimerContainer::new(event_loop.clone());
        let fired = Arc::new(std::sync::Mutex::new(Vec::new()));

        let cb = fired.clone();
        container.add_timer(1usize, Duration::from_millis(500), None, move || {
            cb.lock().unwrap().push("original");
        }).unwrap();

        let cb2 = fired.clone();
        container.reset_timer(1usize, Duration::from_millis(1), None, move || {
            cb2.lock().unwrap().push("replacement");
        }).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        event_loop.stop();
        assert_eq!(*fired.lock().unwrap(), vec!["replacement"]);
    }

    #[test]
    fn non_periodic_timer_self_erases_after_firing() {
        let event_loop = spawn_running_loop();
        let container = TimerContainer::new(event_loop.clone());
        container.add_timer(1usize, Duration::from_millis(1), None, || {}).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        event_loop.stop();
        assert!(!container.contains(&1usize));
    }

    #[test]
    fn cancel_timer_prevents_firing() {
        let event_loop = spawn_running_loop();
        let container = TimerContainer::new(event_loop.clone());
        let fired = Arc::new(AtomicUsize::new(0));
        let cb = fired.clone();
        container.add_timer(1usize, Duration::from_millis(30), None, move || {
            cb.fetch_add(1, AtomicOrdering::SeqCst);
        }).unwrap();
        container.cancel_timer(&1usize);

        std::thread::sleep(Duration::from_millis(80));
        event_loop.stop();
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
        assert!(!container.contains(&1usize));
    }
}
