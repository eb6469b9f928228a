//! Bounded multi-producer, single-consumer queue of record handles.
//!
//! Producers push with [`TransferQueue::try_enqueue`], which never blocks: a
//! full or closed queue hands the handle straight back. The dispatcher is the
//! only consumer. It parks with a timeout when the queue is empty and is
//! unparked by the next regular enqueue. The signal path enqueues with
//! [`TransferQueue::try_enqueue_quiet`] and leaves the dispatcher to notice
//! the record on its next poll.

use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread::{self, Thread};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;

use crate::error::QueueError;
use crate::pool::RecordHandle;

/// Result of a [`TransferQueue::dequeue`].
#[derive(Debug)]
pub enum Dequeued {
    Record(RecordHandle),
    /// Nothing arrived before the timeout.
    Empty,
    /// The queue is closed and fully drained.
    Closed,
}

pub struct TransferQueue {
    ring: ArrayQueue<RecordHandle>,
    closed: AtomicBool,
    parked: AtomicBool,
    consumer: OnceLock<Thread>,
}

impl TransferQueue {
    /// Creates a queue holding up to `capacity` handles.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. The builder rejects that earlier.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: ArrayQueue::new(capacity),
            closed: AtomicBool::new(false),
            parked: AtomicBool::new(false),
            consumer: OnceLock::new(),
        }
    }

    /// Enqueues without blocking and wakes the dispatcher if it is parked.
    #[inline]
    pub fn try_enqueue(&self, handle: RecordHandle) -> Result<(), QueueError> {
        self.try_enqueue_quiet(handle)?;
        fence(Ordering::SeqCst);
        if self.parked.load(Ordering::Relaxed) {
            self.wake();
        }
        Ok(())
    }

    /// Enqueues without blocking and without waking anyone.
    ///
    /// Async-signal-safe as long as the signal cannot land on the consumer
    /// thread: a push racing a pop interrupted on its own thread spins
    /// forever. The dispatcher thread runs with every signal blocked.
    #[inline]
    pub fn try_enqueue_quiet(&self, handle: RecordHandle) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed(handle));
        }
        self.ring.push(handle).map_err(QueueError::Full)
    }

    /// Waits up to `timeout` for a record. Consumer side only.
    pub fn dequeue(&self, timeout: Duration) -> Dequeued {
        if let Some(handle) = self.ring.pop() {
            return Dequeued::Record(handle);
        }
        if self.is_closed() {
            return self.pop_or_closed();
        }

        self.parked.store(true, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        if let Some(handle) = self.ring.pop() {
            self.parked.store(false, Ordering::Relaxed);
            return Dequeued::Record(handle);
        }
        if !self.is_closed() {
            thread::park_timeout(timeout);
        }
        self.parked.store(false, Ordering::Relaxed);

        match self.ring.pop() {
            Some(handle) => Dequeued::Record(handle),
            None if self.is_closed() => self.pop_or_closed(),
            None => Dequeued::Empty,
        }
    }

    fn pop_or_closed(&self) -> Dequeued {
        self.ring.pop().map_or(Dequeued::Closed, Dequeued::Record)
    }

    /// Takes one handle without waiting.
    pub(crate) fn pop(&self) -> Option<RecordHandle> {
        self.ring.pop()
    }

    /// Stops accepting records. Already queued records can still be drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Registers the thread that [`TransferQueue::try_enqueue`] unparks.
    pub(crate) fn register_consumer(&self, consumer: Thread) {
        let _ = self.consumer.set(consumer);
    }

    /// Unparks the consumer without enqueueing anything.
    pub(crate) fn notify(&self) {
        self.wake();
    }

    fn wake(&self) {
        if let Some(consumer) = self.consumer.get() {
            consumer.unpark();
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl std::fmt::Debug for TransferQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::RecordPool;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_fifo_and_full() {
        let pool = RecordPool::new(3, 0, 32).unwrap();
        let queue = TransferQueue::new(2);
        let first = pool.acquire().unwrap();
        let first_index = first.index();
        queue.try_enqueue(first).unwrap();
        queue.try_enqueue(pool.acquire().unwrap()).unwrap();

        let rejected = match queue.try_enqueue(pool.acquire().unwrap()) {
            Err(QueueError::Full(handle)) => handle,
            other => panic!("expected a full queue, got {:?}", other),
        };
        pool.release(rejected);

        match queue.dequeue(Duration::from_millis(1)) {
            Dequeued::Record(handle) => {
                assert_eq!(handle.index(), first_index);
                pool.release(handle);
            }
            other => panic!("expected a record, got {:?}", other),
        }
    }

    #[test]
    fn test_closed_queue_drains_then_terminates() {
        let pool = RecordPool::new(2, 0, 32).unwrap();
        let queue = TransferQueue::new(4);
        queue.try_enqueue(pool.acquire().unwrap()).unwrap();
        queue.close();

        let late = pool.acquire().unwrap();
        assert!(matches!(queue.try_enqueue(late), Err(QueueError::Closed(_))));

        assert!(matches!(queue.dequeue(Duration::from_millis(1)), Dequeued::Record(_)));
        assert!(matches!(queue.dequeue(Duration::from_millis(1)), Dequeued::Closed));
    }

    #[test]
    fn test_dequeue_times_out_when_empty() {
        let queue = TransferQueue::new(1);
        let start = Instant::now();
        assert!(matches!(queue.dequeue(Duration::from_millis(20)), Dequeued::Empty));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_enqueue_wakes_consumer() {
        let pool = Arc::new(RecordPool::new(1, 0, 32).unwrap());
        let queue = Arc::new(TransferQueue::new(1));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.register_consumer(thread::current());
                loop {
                    if let Dequeued::Record(handle) = queue.dequeue(Duration::from_secs(30)) {
                        return handle;
                    }
                }
            })
        };

        let start = Instant::now();
        thread::sleep(Duration::from_millis(20));
        queue.try_enqueue(pool.acquire().unwrap()).unwrap();
        let handle = consumer.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        pool.release(handle);
    }
}
