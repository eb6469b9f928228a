//! Logging from inside a signal handler.
//!
//! [`SignalLogger`] restricts itself to async-signal-safe work: atomic loads
//! for the filter, a bounded CAS scan over the reserved pool slots, copying
//! into the slot, and a lock-free push onto the transfer queue. It never
//! allocates, never takes a lock, never formats text and never wakes the
//! dispatcher, which picks the record up on its next poll. Every record it
//! produces carries the reserved `signal` tag.
//!
//! ```no_run
//! # use std::sync::OnceLock;
//! # use async_logger::{Logger, Severity};
//! # use async_logger::record::Arg;
//! # use async_logger::registry::{ChannelId, TagSet};
//! # use async_logger::signal::SignalLogger;
//! static SIGNAL_LOG: OnceLock<SignalLogger> = OnceLock::new();
//!
//! extern "C" fn on_sigusr1(signo: i32) {
//!     if let Some(log) = SIGNAL_LOG.get() {
//!         let _ = log.log(Severity::Warn, ChannelId::DEFAULT, TagSet::EMPTY, "caught signal {}", &[Arg::I64(signo as i64)]);
//!     }
//! }
//!
//! let logger = Logger::builder().start()?;
//! let _ = SIGNAL_LOG.set(logger.signal_logger());
//! // install on_sigusr1 with sigaction(2)
//! # Ok::<(), async_logger::ConfigError>(())
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::dispatcher::Shared;
use crate::error::QueueError;
use crate::logger::{DropReason, Outcome};
use crate::record::{Arg, LogRecord, Origin};
use crate::registry::{ChannelId, TagSet};
use crate::severity::Severity;

/// Producer handle that is safe to use from a signal handler.
///
/// Keeping one alive does not keep the dispatcher running: once the logger
/// shuts down, records are dropped with [`DropReason::QueueClosed`].
#[derive(Clone)]
pub struct SignalLogger {
    shared: Arc<Shared>,
}

impl SignalLogger {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Logs a static format string with typed arguments. Formatting happens
    /// later on the dispatcher thread.
    pub fn log(
        &self,
        severity: Severity,
        channel: ChannelId,
        tags: TagSet,
        format: &'static str,
        args: &[Arg<'_>],
    ) -> Outcome {
        self.emit(severity, channel, tags, |record| record.set_structured(format, args))
    }

    /// Logs a message copied verbatim into the slot.
    pub fn log_str(&self, severity: Severity, channel: ChannelId, tags: TagSet, message: &str) -> Outcome {
        self.emit(severity, channel, tags, |record| record.set_text(message))
    }

    fn emit<F>(&self, severity: Severity, channel: ChannelId, tags: TagSet, fill: F) -> Outcome
    where
        F: FnOnce(&mut LogRecord),
    {
        let shared = &*self.shared;
        let tags = tags.union(TagSet::SIGNAL);
        if !shared.filter.should_log(severity, channel, tags) {
            return Outcome::Filtered;
        }
        shared.stats.record_signal();
        shared.stats.record_attempt();

        let Ok(mut handle) = shared.pool.acquire_reserved() else {
            shared.stats.record_pool_exhausted();
            return Outcome::Dropped(DropReason::PoolExhausted);
        };
        let sequence = shared.sequence.fetch_add(1, Ordering::Relaxed);
        let record = shared.pool.record_mut(&mut handle);
        record.begin(sequence, severity, channel, tags, None, Origin::Signal);
        fill(record);

        match shared.queue.try_enqueue_quiet(handle) {
            Ok(()) => {
                shared.stats.record_enqueued();
                Outcome::Queued
            }
            Err(QueueError::Full(handle)) => {
                shared.pool.release(handle);
                shared.stats.record_queue_full();
                Outcome::Dropped(DropReason::QueueFull)
            }
            Err(QueueError::Closed(handle)) => {
                shared.pool.release(handle);
                shared.stats.record_queue_closed();
                Outcome::Dropped(DropReason::QueueClosed)
            }
        }
    }

    /// Cheap pre-check, safe inside a handler.
    pub fn should_log(&self, severity: Severity, channel: ChannelId, tags: TagSet) -> bool {
        self.shared
            .filter
            .should_log(severity, channel, tags.union(TagSet::SIGNAL))
    }
}
