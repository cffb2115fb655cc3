use super::worker_primitives::sleep_with_stop;
use crate::shared::{RuntimeError, ThreadId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Starts one `cycle` run for a thread. Implementations report a lost
/// race for the run slot as [`TickOutcome::SkippedBusy`].
pub trait CycleTrigger: Send + Sync {
    fn trigger_cycle(&self, thread_id: &ThreadId) -> TickOutcome;
}

pub type BusyProbe = Arc<dyn Fn(&ThreadId) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Triggered,
    SkippedBusy,
    NotArmed,
    Failed(String),
}

struct ArmedThread {
    interval_ms: u64,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Interval-driven cycle source with one timer per armed thread.
///
/// A tick that finds its thread busy is dropped, never queued. `cancel`
/// stops future ticks and leaves a run already in flight alone.
pub struct CycleScheduler {
    armed: Mutex<HashMap<ThreadId, ArmedThread>>,
    trigger: Weak<dyn CycleTrigger>,
    busy: BusyProbe,
    spawn_timers: bool,
}

impl CycleScheduler {
    pub fn new(trigger: Weak<dyn CycleTrigger>, busy: BusyProbe) -> Self {
        Self {
            armed: Mutex::new(HashMap::new()),
            trigger,
            busy,
            spawn_timers: true,
        }
    }

    /// Tracks armed threads without starting timers; ticks come only from
    /// explicit [`CycleScheduler::tick`] calls.
    pub fn manual(trigger: Weak<dyn CycleTrigger>, busy: BusyProbe) -> Self {
        Self {
            armed: Mutex::new(HashMap::new()),
            trigger,
            busy,
            spawn_timers: false,
        }
    }

    /// Arms `thread_id` unless it already is. Returns whether a new timer
    /// was armed; the interval of an existing timer is left unchanged.
    pub fn ensure(&self, thread_id: &ThreadId, interval_ms: u64) -> Result<bool, RuntimeError> {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        if armed.contains_key(thread_id) {
            return Ok(false);
        }
        let stop = Arc::new(AtomicBool::new(false));
        let handle = if self.spawn_timers {
            Some(self.spawn_timer(thread_id, interval_ms, Arc::clone(&stop))?)
        } else {
            None
        };
        armed.insert(
            thread_id.clone(),
            ArmedThread {
                interval_ms,
                stop,
                handle,
            },
        );
        Ok(true)
    }

    /// Returns whether the thread was armed.
    pub fn cancel(&self, thread_id: &ThreadId) -> bool {
        let removed = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(thread_id);
        match removed {
            Some(entry) => {
                entry.stop.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, thread_id: &ThreadId) -> bool {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(thread_id)
    }

    pub fn interval_for(&self, thread_id: &ThreadId) -> Option<u64> {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(thread_id)
            .map(|entry| entry.interval_ms)
    }

    pub fn armed_threads(&self) -> Vec<ThreadId> {
        let mut threads = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        threads.sort();
        threads
    }

    /// One tick for `thread_id`, exactly as a timer would deliver it.
    pub fn tick(&self, thread_id: &ThreadId) -> TickOutcome {
        if !self.is_armed(thread_id) {
            return TickOutcome::NotArmed;
        }
        deliver_tick(thread_id, &self.trigger, &self.busy)
    }

    /// Cancels every timer and waits for the timer threads to exit.
    pub fn shutdown(&self) {
        let drained = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, entry)| entry)
            .collect::<Vec<_>>();
        for entry in &drained {
            entry.stop.store(true, Ordering::Relaxed);
        }
        let current = thread::current().id();
        for handle in drained.into_iter().filter_map(|entry| entry.handle) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }

    fn spawn_timer(
        &self,
        thread_id: &ThreadId,
        interval_ms: u64,
        stop: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>, RuntimeError> {
        let owned_id = thread_id.clone();
        let trigger = Weak::clone(&self.trigger);
        let busy = Arc::clone(&self.busy);
        let interval = Duration::from_millis(interval_ms.max(1));
        thread::Builder::new()
            .name(format!("cycle-{thread_id}"))
            .spawn(move || {
                while sleep_with_stop(&stop, interval) {
                    if let TickOutcome::NotArmed = deliver_tick(&owned_id, &trigger, &busy) {
                        break;
                    }
                }
            })
            .map_err(|source| RuntimeError::SpawnTimer {
                thread_id: thread_id.to_string(),
                source,
            })
    }
}

impl Drop for CycleScheduler {
    fn drop(&mut self) {
        for entry in self
            .armed
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            entry.stop.store(true, Ordering::Relaxed);
        }
    }
}

fn deliver_tick(
    thread_id: &ThreadId,
    trigger: &Weak<dyn CycleTrigger>,
    busy: &BusyProbe,
) -> TickOutcome {
    if busy(thread_id) {
        return TickOutcome::SkippedBusy;
    }
    match trigger.upgrade() {
        Some(trigger) => trigger.trigger_cycle(thread_id),
        None => TickOutcome::NotArmed,
    }
}
