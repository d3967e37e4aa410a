//! Bounded inference permits.
//!
//! A fixed number of tokens circulates through a crossbeam channel. Taking a
//! token grants the right to run the model; dropping the guard hands it back.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::time::Instant;

use crate::error::{Result, VoxscribeError};

/// Pool of execution slots shared by concurrent requests.
#[derive(Debug, Clone)]
pub struct ExecutionSlots {
    capacity: usize,
    release: Sender<()>,
    acquire: Receiver<()>,
}

/// Outcome of waiting for a slot with a deadline.
#[derive(Debug)]
pub enum SlotWait {
    Acquired(SlotGuard),
    DeadlineExpired,
}

/// Holds one slot until dropped.
#[derive(Debug)]
pub struct SlotGuard {
    release: Sender<()>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // Capacity was reserved when the token was taken, so this cannot block.
        if self.release.try_send(()).is_err() {
            tracing::warn!("Execution slot could not be returned to the pool");
        }
    }
}

impl ExecutionSlots {
    /// Create a pool of `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (release, acquire) = bounded(capacity);
        for _ in 0..capacity {
            if release.try_send(()).is_err() {
                break;
            }
        }
        Self {
            capacity,
            release,
            acquire,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.acquire.len()
    }

    /// Block until a slot is free.
    pub fn acquire(&self) -> Result<SlotGuard> {
        self.acquire
            .recv()
            .map_err(|_| VoxscribeError::inference("execution slot pool closed"))?;
        Ok(self.guard())
    }

    /// Block until a slot is free or `deadline` passes.
    pub fn acquire_until(&self, deadline: Option<Instant>) -> Result<SlotWait> {
        let Some(deadline) = deadline else {
            return self.acquire().map(SlotWait::Acquired);
        };
        match self.acquire.recv_deadline(deadline) {
            Ok(()) => Ok(SlotWait::Acquired(self.guard())),
            Err(RecvTimeoutError::Timeout) => Ok(SlotWait::DeadlineExpired),
            Err(RecvTimeoutError::Disconnected) => {
                Err(VoxscribeError::inference("execution slot pool closed"))
            }
        }
    }

    fn guard(&self) -> SlotGuard {
        SlotGuard {
            release: self.release.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn capacity_is_at_least_one() {
        assert_eq!(ExecutionSlots::new(0).capacity(), 1);
        assert_eq!(ExecutionSlots::new(3).available(), 3);
    }

    #[test]
    fn guard_returns_slot_on_drop() {
        let slots = ExecutionSlots::new(1);
        let guard = slots.acquire().unwrap();
        assert_eq!(slots.available(), 0);
        drop(guard);
        assert_eq!(slots.available(), 1);
    }

    #[test]
    fn deadline_expires_while_slot_is_held() {
        let slots = ExecutionSlots::new(1);
        let _held = slots.acquire().unwrap();
        let wait = slots
            .acquire_until(Some(Instant::now() + Duration::from_millis(20)))
            .unwrap();
        assert!(matches!(wait, SlotWait::DeadlineExpired));
    }

    #[test]
    fn single_slot_serializes_work() {
        let slots = ExecutionSlots::new(1);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        thread::scope(|s| {
            for _ in 0..4 {
                let slots = slots.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                s.spawn(move || {
                    let _guard = slots.acquire().unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(slots.available(), 1);
    }
}
