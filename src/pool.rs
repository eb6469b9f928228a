//! Fixed-capacity pool of [`LogRecord`] slots.
//!
//! All slots are allocated when the pool is built. The general slots are
//! handed out through a lock-free queue of free indices; the reserved slots
//! are kept for signal handlers and are claimed with a single compare-and-swap
//! on a per-slot flag. Neither path ever blocks or allocates.
//!
//! Ownership of a slot is carried by a move-only [`RecordHandle`]. Whoever
//! holds the handle is the only party that may touch the record, and giving
//! the handle back through [`RecordPool::release`] returns the slot.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::error::{ConfigError, PoolExhausted};
use crate::record::LogRecord;

/// Largest number of general slots a pool accepts.
pub const MAX_POOL_CAPACITY: usize = 1 << 20;

/// Largest per-slot message buffer.
pub const MAX_MESSAGE_CAPACITY: usize = 64 * 1024;

/// Smallest per-slot message buffer.
pub const MIN_MESSAGE_CAPACITY: usize = 16;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Exclusive ownership token for one pool slot.
///
/// Not `Clone`: a slot has exactly one owner at a time.
#[derive(Debug, PartialEq, Eq)]
pub struct RecordHandle {
    pool: u32,
    index: u32,
}

impl RecordHandle {
    /// Index of the slot this handle owns.
    pub fn index(&self) -> u32 {
        self.index
    }
}

pub struct RecordPool {
    id: u32,
    slots: Box<[UnsafeCell<LogRecord>]>,
    free: ArrayQueue<u32>,
    general: usize,
    reserved: Box<[AtomicBool]>,
    message_capacity: usize,
}

// SAFETY: a slot is only reachable through its `RecordHandle`, and handles are
// unique and move-only. `record` needs `&RecordHandle` and `record_mut` needs
// `&mut RecordHandle`, so the borrow rules on the handle carry over to the
// slot. The free list and reserved flags publish the slot with
// acquire/release ordering on every hand-over.
unsafe impl Sync for RecordPool {}
unsafe impl Send for RecordPool {}

impl RecordPool {
    /// Builds a pool with `capacity` general slots and `reserved` slots kept
    /// for the signal path. Every slot holds up to `message_capacity` bytes of
    /// message.
    ///
    /// # Examples
    ///
    /// ```
    /// # use async_logger::pool::RecordPool;
    /// let pool = RecordPool::new(2, 1, 64).unwrap();
    /// let a = pool.acquire().unwrap();
    /// let b = pool.acquire().unwrap();
    /// assert!(pool.acquire().is_err());
    /// pool.release(a);
    /// assert!(pool.acquire().is_ok());
    /// # pool.release(b);
    /// ```
    pub fn new(capacity: usize, reserved: usize, message_capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 || capacity > MAX_POOL_CAPACITY || reserved > MAX_POOL_CAPACITY {
            return Err(ConfigError::InvalidPoolCapacity {
                got: capacity,
                max: MAX_POOL_CAPACITY,
            });
        }
        if !(MIN_MESSAGE_CAPACITY..=MAX_MESSAGE_CAPACITY).contains(&message_capacity) {
            return Err(ConfigError::InvalidMessageCapacity {
                got: message_capacity,
                max: MAX_MESSAGE_CAPACITY,
            });
        }

        let total = capacity + reserved;
        let slots = (0..total)
            .map(|i| UnsafeCell::new(LogRecord::new(i as u32, message_capacity)))
            .collect();
        let free = ArrayQueue::new(capacity);
        for i in 0..capacity {
            let _ = free.push(i as u32);
        }
        let reserved = (0..reserved).map(|_| AtomicBool::new(false)).collect();

        Ok(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slots,
            free,
            general: capacity,
            reserved,
            message_capacity,
        })
    }

    /// Claims a general slot. Never blocks, never grows.
    #[inline]
    pub fn acquire(&self) -> Result<RecordHandle, PoolExhausted> {
        self.free
            .pop()
            .map(|index| RecordHandle { pool: self.id, index })
            .ok_or(PoolExhausted)
    }

    /// Claims one of the reserved slots with a single CAS per flag.
    ///
    /// Async-signal-safe: touches nothing but the reserved flags.
    #[inline]
    pub fn acquire_reserved(&self) -> Result<RecordHandle, PoolExhausted> {
        for (i, flag) in self.reserved.iter().enumerate() {
            if flag
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(RecordHandle {
                    pool: self.id,
                    index: (self.general + i) as u32,
                });
            }
        }
        Err(PoolExhausted)
    }

    /// Returns a slot to the pool, resetting its record.
    ///
    /// # Panics
    ///
    /// Panics if the handle was issued by a different pool.
    pub fn release(&self, mut handle: RecordHandle) {
        self.record_mut(&mut handle).reset();
        let index = handle.index as usize;
        if index < self.general {
            // The free list holds every general index, so there is always room.
            let pushed = self.free.push(handle.index);
            debug_assert!(pushed.is_ok());
        } else {
            self.reserved[index - self.general].store(false, Ordering::Release);
        }
    }

    /// Shared access to the record owned by `handle`.
    ///
    /// # Panics
    ///
    /// Panics if the handle was issued by a different pool.
    pub fn record<'a>(&'a self, handle: &'a RecordHandle) -> &'a LogRecord {
        self.check(handle);
        // SAFETY: see the `Sync` impl; the shared borrow of the unique handle
        // rules out a concurrent `record_mut`.
        unsafe { &*self.slots[handle.index as usize].get() }
    }

    pub(crate) fn record_mut<'a>(&'a self, handle: &'a mut RecordHandle) -> &'a mut LogRecord {
        self.check(handle);
        // SAFETY: see the `Sync` impl; the handle is borrowed mutably.
        unsafe { &mut *self.slots[handle.index as usize].get() }
    }

    fn check(&self, handle: &RecordHandle) {
        assert_eq!(handle.pool, self.id, "record handle used with a foreign pool");
    }

    /// Number of general slots.
    pub fn capacity(&self) -> usize {
        self.general
    }

    /// Number of slots kept for the signal path.
    pub fn reserved_capacity(&self) -> usize {
        self.reserved.len()
    }

    /// General slots currently free.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Reserved slots currently free.
    pub fn reserved_free_count(&self) -> usize {
        self.reserved
            .iter()
            .filter(|flag| !flag.load(Ordering::Relaxed))
            .count()
    }

    /// Slots of either kind currently held by someone.
    pub fn outstanding(&self) -> usize {
        (self.general - self.free_count()) + (self.reserved_capacity() - self.reserved_free_count())
    }

    pub fn message_capacity(&self) -> usize {
        self.message_capacity
    }
}

impl std::fmt::Debug for RecordPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordPool")
            .field("capacity", &self.general)
            .field("reserved", &self.reserved.len())
            .field("free", &self.free_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = RecordPool::new(3, 0, 32).unwrap();
        let handles: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.acquire(), Err(PoolExhausted));
        assert_eq!(pool.outstanding(), 3);
        for handle in handles {
            pool.release(handle);
        }
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn test_reserved_slots_are_separate() {
        let pool = RecordPool::new(1, 2, 32).unwrap();
        let general = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());

        let r1 = pool.acquire_reserved().unwrap();
        let r2 = pool.acquire_reserved().unwrap();
        assert!(r1.index() >= 1 && r2.index() >= 1);
        assert_ne!(r1.index(), r2.index());
        assert_eq!(pool.acquire_reserved(), Err(PoolExhausted));
        assert_eq!(pool.outstanding(), 3);

        pool.release(r1);
        assert_eq!(pool.reserved_free_count(), 1);
        // A released reserved slot never lands in the general free list.
        assert!(pool.acquire().is_err());
        pool.release(general);
        pool.release(r2);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_invalid_capacities() {
        assert!(matches!(
            RecordPool::new(0, 0, 64),
            Err(ConfigError::InvalidPoolCapacity { .. })
        ));
        assert!(matches!(
            RecordPool::new(4, 0, 8),
            Err(ConfigError::InvalidMessageCapacity { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "foreign pool")]
    fn test_foreign_handle_panics() {
        let a = RecordPool::new(1, 0, 32).unwrap();
        let b = RecordPool::new(1, 0, 32).unwrap();
        let handle = a.acquire().unwrap();
        b.release(handle);
    }
}
