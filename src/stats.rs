use std::sync::atomic::{AtomicU64, Ordering};

static GLOBAL_DROPPED: AtomicU64 = AtomicU64::new(0);

/// Records dropped by every logger in the process since start.
pub fn global_dropped_count() -> u64 {
    GLOBAL_DROPPED.load(Ordering::Relaxed)
}

/// Live counters of one logger. Every update is a relaxed atomic add, so
/// the producer and signal paths can bump them freely.
#[derive(Debug, Default)]
pub struct Stats {
    attempts: AtomicU64,
    enqueued: AtomicU64,
    pool_exhausted: AtomicU64,
    queue_full: AtomicU64,
    queue_closed: AtomicU64,
    shutdown_dropped: AtomicU64,
    sync_writes: AtomicU64,
    signal_records: AtomicU64,
    delivered: AtomicU64,
    sink_errors: AtomicU64,
}

macro_rules! bump {
    ($($name:ident => $field:ident, $global:expr;)*) => {
        $(
            #[inline]
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
                if $global {
                    GLOBAL_DROPPED.fetch_add(1, Ordering::Relaxed);
                }
            }
        )*
    };
}

impl Stats {
    bump! {
        record_attempt => attempts, false;
        record_enqueued => enqueued, false;
        record_pool_exhausted => pool_exhausted, true;
        record_queue_full => queue_full, true;
        record_queue_closed => queue_closed, true;
        record_shutdown_drop => shutdown_dropped, true;
        record_sync_write => sync_writes, false;
        record_signal => signal_records, false;
        record_delivered => delivered, false;
        record_sink_error => sink_errors, false;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            pool_exhausted: self.pool_exhausted.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            queue_closed: self.queue_closed.load(Ordering::Relaxed),
            shutdown_dropped: self.shutdown_dropped.load(Ordering::Relaxed),
            sync_writes: self.sync_writes.load(Ordering::Relaxed),
            signal_records: self.signal_records.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a logger's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Calls that passed the filter.
    pub attempts: u64,
    /// Records accepted by the transfer queue.
    pub enqueued: u64,
    pub pool_exhausted: u64,
    pub queue_full: u64,
    /// Records offered after shutdown began.
    pub queue_closed: u64,
    /// Records still queued when the shutdown drain gave up.
    pub shutdown_dropped: u64,
    /// Records written on the producer thread under the sync-write policy.
    pub sync_writes: u64,
    /// Records logged through the signal path, whether or not they were queued.
    pub signal_records: u64,
    /// Records handed to at least one sink by the dispatcher.
    pub delivered: u64,
    pub sink_errors: u64,
}

impl StatsSnapshot {
    /// Records that were lost, whatever the reason.
    pub fn dropped(&self) -> u64 {
        self.pool_exhausted + self.queue_full + self.queue_closed + self.shutdown_dropped
    }
}
