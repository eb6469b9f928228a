//! The logging thread.
//!
//! The dispatcher is the only consumer of the transfer queue. For each record
//! it formats once, hands the text to every accepting sink, and returns the
//! slot to the pool. When the queue goes idle it flushes the sinks.
//!
//! Shutdown is cooperative: closing the queue starts a drain bounded by the
//! configured timeout. Records still queued when it runs out are dropped and
//! counted. Sinks are then flushed and closed in registration order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow};

use crate::error::SinkError;
use crate::filter::Filter;
use crate::format::{Formatter, LocaleConfig};
use crate::logger::OverflowPolicy;
use crate::pool::RecordPool;
use crate::queue::{Dequeued, TransferQueue};
use crate::record::LogRecord;
use crate::registry::Registry;
use crate::sink::{FormattedRecord, SinkRegistry};
use crate::stats::Stats;

/// Operational events reported to the diagnostic hook.
#[derive(Debug)]
pub enum Diagnostic<'a> {
    SinkWrite { sink: &'a str, error: &'a SinkError },
    SinkFlush { sink: &'a str, error: &'a SinkError },
    SinkClose { sink: &'a str, error: &'a SinkError },
    /// The shutdown drain ran out of time with `dropped` records left.
    ShutdownTimeout { dropped: u64 },
}

pub type DiagnosticHook = Box<dyn Fn(&Diagnostic<'_>) + Send + Sync>;

/// State shared by producers, the signal path and the dispatcher.
pub(crate) struct Shared {
    pub(crate) pool: RecordPool,
    pub(crate) queue: TransferQueue,
    pub(crate) filter: Filter,
    pub(crate) registry: Arc<Registry>,
    pub(crate) sinks: SinkRegistry,
    pub(crate) stats: Stats,
    pub(crate) formatter: Box<dyn Formatter>,
    pub(crate) locale: LocaleConfig,
    pub(crate) overflow: OverflowPolicy,
    pub(crate) hook: Option<DiagnosticHook>,
    pub(crate) drain_timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) sequence: AtomicU64,
    /// Set by [`Shared::request_flush`], cleared when the dispatcher flushes.
    pub(crate) flush_requested: AtomicBool,
    /// Set once the dispatcher has closed every sink.
    pub(crate) stopped: AtomicBool,
}

impl Shared {
    fn report(&self, event: &Diagnostic<'_>) {
        match event {
            Diagnostic::SinkWrite { sink, error } => tracing::warn!(sink, %error, "sink write failed"),
            Diagnostic::SinkFlush { sink, error } => tracing::warn!(sink, %error, "sink flush failed"),
            Diagnostic::SinkClose { sink, error } => tracing::warn!(sink, %error, "sink close failed"),
            Diagnostic::ShutdownTimeout { dropped } => {
                tracing::error!(dropped, "shutdown drain timed out")
            }
        }
        if let Some(hook) = &self.hook {
            hook(event);
        }
    }

    /// Formats `record` into `text` and writes it to every accepting sink.
    ///
    /// Returns true if at least one sink accepted the record.
    pub(crate) fn deliver(&self, record: &LogRecord, text: &mut String) -> bool {
        text.clear();
        let formatted = panic::catch_unwind(AssertUnwindSafe(|| {
            self.formatter.format(record, &self.registry, &self.locale, text)
        }));
        if !matches!(formatted, Ok(Ok(()))) {
            text.clear();
            let _ = record.write_message(text);
        }

        let formatted = FormattedRecord {
            record,
            text: text.as_str(),
            registry: &self.registry,
        };
        let sinks = self.sinks.read();
        let mut accepted = false;
        for entry in sinks.iter() {
            if !entry.sink.accepts(record.severity(), record.channel(), record.tags()) {
                continue;
            }
            accepted = true;
            let result = guarded(|| entry.sink.write(&formatted));
            if let Err(error) = result {
                self.stats.record_sink_error();
                self.report(&Diagnostic::SinkWrite {
                    sink: entry.sink.name(),
                    error: &error,
                });
            }
        }
        accepted
    }

    pub(crate) fn flush_sinks(&self) {
        for entry in self.sinks.read().iter() {
            if let Err(error) = guarded(|| entry.sink.flush()) {
                self.stats.record_sink_error();
                self.report(&Diagnostic::SinkFlush {
                    sink: entry.sink.name(),
                    error: &error,
                });
            }
        }
    }

    /// Asks the dispatcher to flush every sink once the queue is idle.
    pub(crate) fn request_flush(&self) {
        self.flush_requested.store(true, Ordering::Release);
        self.queue.notify();
    }

    /// Final flush and close of every sink, in registration order. The sinks
    /// leave the registry.
    fn close_sinks(&self) {
        self.flush_sinks();
        for sink in self.sinks.take_all() {
            if let Err(error) = guarded(|| sink.close()) {
                self.stats.record_sink_error();
                self.report(&Diagnostic::SinkClose {
                    sink: sink.name(),
                    error: &error,
                });
            }
        }
    }

    /// Releases whatever is still queued, counting each as a shutdown drop.
    pub(crate) fn discard_queued(&self) -> u64 {
        let mut dropped = 0;
        while let Some(handle) = self.queue.pop() {
            self.stats.record_shutdown_drop();
            self.pool.release(handle);
            dropped += 1;
        }
        dropped
    }
}

fn guarded<F>(call: F) -> Result<(), SinkError>
where
    F: FnOnce() -> Result<(), SinkError>,
{
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| Err(SinkError::Panicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// What the dispatcher did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DispatchSummary {
    pub(crate) delivered: u64,
    pub(crate) dropped: u64,
    pub(crate) timed_out: bool,
}

/// Body of the logging thread. Returns once the queue is closed and drained
/// (or the drain timed out) and every sink has been closed.
pub(crate) fn run(shared: Arc<Shared>) -> DispatchSummary {
    // A signal handler must never interrupt this thread mid-pop: the signal
    // path pushes onto the same ring and would spin on the half-released slot.
    if let Err(error) = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&SigSet::all()), None) {
        tracing::warn!(%error, "could not block signals on the dispatcher thread");
    }
    shared.queue.register_consumer(thread::current());
    tracing::debug!(
        pool = shared.pool.capacity(),
        queue = shared.queue.capacity(),
        sinks = shared.sinks.len(),
        "dispatcher started"
    );

    let mut text = String::with_capacity(shared.pool.message_capacity() * 2);
    let mut summary = DispatchSummary::default();
    let mut dirty = false;
    let mut deadline: Option<Instant> = None;

    loop {
        let mut wait = shared.poll_interval;
        if shared.flush_requested.load(Ordering::Acquire) {
            wait = Duration::ZERO;
        }
        if shared.queue.is_closed() {
            let now = Instant::now();
            let end = *deadline.get_or_insert(now + shared.drain_timeout);
            if now >= end {
                summary.timed_out = !shared.queue.is_empty();
                break;
            }
            wait = wait.min(end - now);
        }

        match shared.queue.dequeue(wait) {
            Dequeued::Record(handle) => {
                if shared.deliver(shared.pool.record(&handle), &mut text) {
                    shared.stats.record_delivered();
                    summary.delivered += 1;
                }
                shared.pool.release(handle);
                dirty = true;
            }
            Dequeued::Empty => {
                if shared.flush_requested.swap(false, Ordering::AcqRel) || dirty {
                    shared.flush_sinks();
                    dirty = false;
                }
            }
            Dequeued::Closed => break,
        }
    }

    if summary.timed_out {
        summary.dropped = shared.discard_queued();
        shared.report(&Diagnostic::ShutdownTimeout {
            dropped: summary.dropped,
        });
    }
    shared.close_sinks();
    shared.stopped.store(true, Ordering::Release);
    tracing::debug!(
        delivered = summary.delivered,
        dropped = summary.dropped,
        "dispatcher stopped"
    );
    summary
}
