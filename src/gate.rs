//! Admission gates.
//!
//! An [`AdmissionGate`] is a counting semaphore that queues callers instead
//! of rejecting them. [`acquire`](AdmissionGate::acquire) blocks until a
//! slot is free and returns a [`GatePermit`] that gives the slot back when
//! dropped.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Slots {
    in_use: Mutex<usize>,
    freed: Condvar,
    capacity: usize,
}

/// Bounded, blocking admission control.
///
/// Clones share the same slots.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    slots: Arc<Slots>,
}

impl AdmissionGate {
    /// Create a gate admitting at most `capacity` holders. Clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Slots {
                in_use: Mutex::new(0),
                freed: Condvar::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Block until a slot is free and take it.
    pub fn acquire(&self) -> GatePermit {
        let mut in_use = self.lock();
        while *in_use >= self.slots.capacity {
            in_use = self
                .slots
                .freed
                .wait(in_use)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *in_use += 1;
        GatePermit {
            slots: Arc::clone(&self.slots),
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let mut in_use = self.lock();
        if *in_use >= self.slots.capacity {
            return None;
        }
        *in_use += 1;
        Some(GatePermit {
            slots: Arc::clone(&self.slots),
        })
    }

    /// Maximum number of concurrent holders.
    pub fn capacity(&self) -> usize {
        self.slots.capacity
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.slots.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A held slot. Released on drop.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct GatePermit {
    slots: Arc<Slots>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let mut in_use = self.slots.in_use.lock().unwrap_or_else(PoisonError::into_inner);
        *in_use = in_use.saturating_sub(1);
        drop(in_use);
        self.slots.freed.notify_one();
    }
}
