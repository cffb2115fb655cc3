use crate::shared::ThreadId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// At most one run per thread id. Holding a [`RunSlotGuard`] is holding
/// the slot; dropping it frees the slot.
#[derive(Debug, Clone, Default)]
pub struct RunSlots {
    active: Arc<Mutex<HashSet<ThreadId>>>,
}

impl RunSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, thread_id: &ThreadId) -> Option<RunSlotGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(thread_id.clone()) {
            return None;
        }
        Some(RunSlotGuard {
            slots: self.clone(),
            thread_id: thread_id.clone(),
        })
    }

    pub fn is_busy(&self, thread_id: &ThreadId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(thread_id)
    }

    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, thread_id: &ThreadId) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(thread_id);
    }
}

#[derive(Debug)]
pub struct RunSlotGuard {
    slots: RunSlots,
    thread_id: ThreadId,
}

impl RunSlotGuard {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }
}

impl Drop for RunSlotGuard {
    fn drop(&mut self) {
        self.slots.release(&self.thread_id);
    }
}
