use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::SinkConfig;
use crate::dispatcher::{self, DispatchSummary, Diagnostic, DiagnosticHook, Shared};
use crate::error::{ConfigError, QueueError};
use crate::filter::Filter;
use crate::format::{DefaultFormatter, Formatter, LocaleConfig};
use crate::pool::{RecordHandle, RecordPool};
use crate::queue::TransferQueue;
use crate::record::{Arg, LogRecord, Origin, SourceLocation};
use crate::registry::{ChannelId, Registry, RegistryBuilder, TagId, TagSet};
use crate::severity::Severity;
use crate::signal::SignalLogger;
use crate::sink::{Sink, SinkId, SinkRegistry};
use crate::stats::{Stats, StatsSnapshot};
use crate::termination::TerminationHandlers;

/// Largest transfer queue a logger accepts.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// What a producer does when the transfer queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Release the slot and count the record as dropped.
    #[default]
    Drop,
    /// Format and write the record on the calling thread, bypassing the queue.
    SyncWrite,
}

/// Why a record was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    PoolExhausted,
    QueueFull,
    /// The logger is shutting down.
    QueueClosed,
}

/// Result of a producer call. Ignoring it is fine; every drop is also counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "ignore with `let _ =` if the outcome does not matter"]
pub enum Outcome {
    Queued,
    /// Written synchronously under [`OverflowPolicy::SyncWrite`].
    WrittenSync,
    /// Rejected by the filter before any slot was touched.
    Filtered,
    Dropped(DropReason),
}

impl Outcome {
    /// True if the record was queued or written.
    pub fn is_accepted(self) -> bool {
        matches!(self, Outcome::Queued | Outcome::WrittenSync)
    }
}

/// Totals reported once the logger has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Records the dispatcher handed to a sink during its lifetime.
    pub delivered: u64,
    /// Records discarded during shutdown: left over after the drain timeout
    /// or enqueued while the queue was closing.
    pub dropped: u64,
    pub timed_out: bool,
    pub stats: StatsSnapshot,
}

enum PendingSink {
    Ready(Arc<dyn Sink>),
    Config(SinkConfig),
}

/// Configures and starts a [`Logger`].
///
/// # Examples
///
/// ```
/// # use std::sync::Arc;
/// # use async_logger::{LoggerBuilder, Severity};
/// # use async_logger::sink::MemorySink;
/// let sink = Arc::new(MemorySink::new("mem"));
/// let mut builder = LoggerBuilder::new().pool_capacity(64).queue_capacity(64);
/// let nav = builder.channel_threshold("nav", Severity::Warn)?;
/// let logger = builder.sink(sink.clone()).start()?;
///
/// assert!(!logger.should_log(Severity::Info, nav, Default::default()));
/// let _ = logger.log_str(Severity::Error, nav, Default::default(), None, "stalled");
/// logger.shutdown();
/// assert_eq!(sink.messages(), vec!["stalled"]);
/// # Ok::<(), async_logger::ConfigError>(())
/// ```
pub struct LoggerBuilder {
    pool_capacity: usize,
    signal_reserve: usize,
    message_capacity: usize,
    queue_capacity: usize,
    default_threshold: Severity,
    registry: RegistryBuilder,
    channel_thresholds: Vec<(ChannelId, Severity)>,
    allow_tags: Vec<String>,
    deny_tags: Vec<String>,
    overflow: OverflowPolicy,
    shutdown_timeout: Duration,
    poll_interval: Duration,
    locale: LocaleConfig,
    formatter: Option<Box<dyn Formatter>>,
    sinks: Vec<PendingSink>,
    hook: Option<DiagnosticHook>,
    thread_name: String,
    drain_on_termination: bool,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerBuilder {
    pub fn new() -> Self {
        Self {
            pool_capacity: 1024,
            signal_reserve: 16,
            message_capacity: 512,
            queue_capacity: 1024,
            default_threshold: Severity::Info,
            registry: RegistryBuilder::new(),
            channel_thresholds: Vec::new(),
            allow_tags: Vec::new(),
            deny_tags: Vec::new(),
            overflow: OverflowPolicy::Drop,
            shutdown_timeout: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(50),
            locale: LocaleConfig::default(),
            formatter: None,
            sinks: Vec::new(),
            hook: None,
            thread_name: "async-logger".to_owned(),
            drain_on_termination: false,
        }
    }

    /// General record slots.
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Extra slots only the signal path may use.
    pub fn signal_reserve(mut self, reserve: usize) -> Self {
        self.signal_reserve = reserve;
        self
    }

    /// Message bytes per slot; longer messages are truncated.
    pub fn message_capacity(mut self, bytes: usize) -> Self {
        self.message_capacity = bytes;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Threshold of every channel without its own.
    pub fn default_threshold(mut self, severity: Severity) -> Self {
        self.default_threshold = severity;
        self
    }

    /// Registers a channel. Registering a name twice returns the same id.
    pub fn channel(&mut self, name: &str) -> Result<ChannelId, ConfigError> {
        self.registry.channel(name)
    }

    /// Registers a channel with its own threshold.
    pub fn channel_threshold(&mut self, name: &str, severity: Severity) -> Result<ChannelId, ConfigError> {
        let id = self.registry.channel(name)?;
        self.channel_thresholds.retain(|(channel, _)| *channel != id);
        self.channel_thresholds.push((id, severity));
        Ok(id)
    }

    pub fn tag(&mut self, name: &str) -> Result<TagId, ConfigError> {
        self.registry.tag(name)
    }

    /// Tagged records must carry one of these tags. Names must be registered
    /// by the time [`LoggerBuilder::start`] runs.
    pub fn allow_tags<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_tags = names.into_iter().map(Into::into).collect();
        self
    }

    /// Records carrying any of these tags are rejected.
    pub fn deny_tags<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny_tags = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    /// How long shutdown keeps draining before dropping what is left.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Longest the dispatcher sleeps between queue checks.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn locale(mut self, locale: LocaleConfig) -> Self {
        self.locale = locale;
        self
    }

    /// Defaults to [`DefaultFormatter`].
    pub fn formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.formatter = Some(Box::new(formatter));
        self
    }

    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(PendingSink::Ready(sink));
        self
    }

    /// A sink built at start, once channel and tag names can be resolved.
    pub fn sink_config(mut self, config: SinkConfig) -> Self {
        self.sinks.push(PendingSink::Config(config));
        self
    }

    pub fn diagnostic_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Diagnostic<'_>) + Send + Sync + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Name of the dispatcher thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Installs handlers for `SIGTERM`, `SIGINT`, `SIGQUIT` and `SIGHUP` that
    /// drain the queue and close the sinks before passing the signal on to
    /// the handler that was there before. Signals the process ignores are
    /// not touched, and [`Logger::shutdown`] puts the old handlers back.
    ///
    /// Only one running logger can do this; starting a second one fails with
    /// [`ConfigError::TerminationHandlersInUse`]. If the previous handler
    /// lets the process live on, the logger stays closed.
    pub fn drain_on_termination(mut self, enabled: bool) -> Self {
        self.drain_on_termination = enabled;
        self
    }

    /// Validates the configuration, freezes the registry and starts the
    /// dispatcher thread.
    pub fn start(self) -> Result<Logger, ConfigError> {
        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        if self.locale.time_precision > 9 {
            return Err(ConfigError::InvalidTimePrecision(self.locale.time_precision));
        }
        let pool = RecordPool::new(self.pool_capacity, self.signal_reserve, self.message_capacity)?;
        let registry = Arc::new(self.registry.build());

        let filter = Filter::new(self.default_threshold, registry.channel_count());
        for (channel, severity) in &self.channel_thresholds {
            filter.set_channel_threshold(*channel, *severity);
        }
        filter.set_allow_tags(registry.tag_set(&self.allow_tags)?);
        filter.set_deny_tags(registry.tag_set(&self.deny_tags)?);

        let sinks = SinkRegistry::new();
        for pending in self.sinks {
            let sink = match pending {
                PendingSink::Ready(sink) => sink,
                PendingSink::Config(config) => config.build(&registry)?,
            };
            sinks.add(sink);
        }

        let shared = Arc::new(Shared {
            pool,
            queue: TransferQueue::new(self.queue_capacity),
            filter,
            registry,
            sinks,
            stats: Stats::default(),
            formatter: self.formatter.unwrap_or_else(|| Box::new(DefaultFormatter::default())),
            locale: self.locale,
            overflow: self.overflow,
            hook: self.hook,
            drain_timeout: self.shutdown_timeout,
            poll_interval: self.poll_interval,
            sequence: AtomicU64::new(1),
            flush_requested: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(self.thread_name)
                .spawn(move || dispatcher::run(shared))
                .map_err(ConfigError::Spawn)?
        };

        let core = Arc::new(Core {
            shared,
            worker: Mutex::new(Some(worker)),
            report: Mutex::new(None),
            termination: Mutex::new(None),
        });
        if self.drain_on_termination {
            // On failure `core` drops here and stops the dispatcher.
            let handlers = TerminationHandlers::install(&core.shared)?;
            *core.termination.lock() = Some(handlers);
        }
        Ok(Logger { core })
    }
}

struct Core {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<DispatchSummary>>>,
    report: Mutex<Option<ShutdownReport>>,
    termination: Mutex<Option<TerminationHandlers>>,
}

impl Core {
    fn shutdown(&self) -> ShutdownReport {
        let mut report = self.report.lock();
        if let Some(done) = *report {
            return done;
        }

        let shared = &self.shared;
        shared.queue.close();
        let summary = match self.worker.lock().take().map(JoinHandle::join) {
            Some(Ok(summary)) => summary,
            Some(Err(_)) => {
                tracing::error!("dispatcher thread panicked");
                DispatchSummary::default()
            }
            None => DispatchSummary::default(),
        };
        // Records that raced with close() are still in the queue.
        let stragglers = shared.discard_queued();
        drop(self.termination.lock().take());

        let done = ShutdownReport {
            delivered: shared.stats.snapshot().delivered,
            dropped: summary.dropped + stragglers,
            timed_out: summary.timed_out,
            stats: shared.stats.snapshot(),
        };
        tracing::info!(
            delivered = done.delivered,
            dropped = done.dropped,
            timed_out = done.timed_out,
            "logger shut down"
        );
        *report = Some(done);
        done
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a running logger. Cheap to clone; the last clone to go away
/// shuts the logger down.
#[derive(Clone)]
pub struct Logger {
    core: Arc<Core>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = &self.core.shared;
        f.debug_struct("Logger")
            .field("pool", &shared.pool)
            .field("queue", &shared.queue)
            .field("sinks", &shared.sinks.len())
            .finish()
    }
}

impl Logger {
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new()
    }

    fn shared(&self) -> &Shared {
        &self.core.shared
    }

    /// Cheap pre-check: would a record with these properties be logged?
    #[inline]
    pub fn should_log(&self, severity: Severity, channel: ChannelId, tags: TagSet) -> bool {
        self.shared().filter.should_log(severity, channel, tags)
    }

    /// Logs preformatted arguments, usually via [`crate::log_record!`].
    pub fn log(
        &self,
        severity: Severity,
        channel: ChannelId,
        tags: TagSet,
        location: Option<SourceLocation>,
        args: fmt::Arguments<'_>,
    ) -> Outcome {
        self.emit(severity, channel, tags, location, |record| record.set_text_args(args))
    }

    pub fn log_str(
        &self,
        severity: Severity,
        channel: ChannelId,
        tags: TagSet,
        location: Option<SourceLocation>,
        message: &str,
    ) -> Outcome {
        self.emit(severity, channel, tags, location, |record| record.set_text(message))
    }

    /// Logs a format string and typed arguments; the text is rendered on the
    /// dispatcher thread.
    pub fn log_structured(
        &self,
        severity: Severity,
        channel: ChannelId,
        tags: TagSet,
        location: Option<SourceLocation>,
        format: &'static str,
        args: &[Arg<'_>],
    ) -> Outcome {
        self.emit(severity, channel, tags, location, |record| record.set_structured(format, args))
    }

    fn emit<F>(&self, severity: Severity, channel: ChannelId, tags: TagSet, location: Option<SourceLocation>, fill: F) -> Outcome
    where
        F: FnOnce(&mut LogRecord),
    {
        let shared = self.shared();
        if !shared.filter.should_log(severity, channel, tags) {
            return Outcome::Filtered;
        }
        shared.stats.record_attempt();

        let Ok(mut handle) = shared.pool.acquire() else {
            shared.stats.record_pool_exhausted();
            return Outcome::Dropped(DropReason::PoolExhausted);
        };
        let sequence = shared.sequence.fetch_add(1, Ordering::Relaxed);
        let record = shared.pool.record_mut(&mut handle);
        record.begin(sequence, severity, channel, tags, location, Origin::Thread);
        fill(record);

        match shared.queue.try_enqueue(handle) {
            Ok(()) => {
                shared.stats.record_enqueued();
                Outcome::Queued
            }
            Err(QueueError::Full(handle)) => match shared.overflow {
                OverflowPolicy::Drop => {
                    shared.pool.release(handle);
                    shared.stats.record_queue_full();
                    Outcome::Dropped(DropReason::QueueFull)
                }
                OverflowPolicy::SyncWrite => write_sync(shared, handle),
            },
            Err(QueueError::Closed(handle)) => {
                shared.pool.release(handle);
                shared.stats.record_queue_closed();
                Outcome::Dropped(DropReason::QueueClosed)
            }
        }
    }

    /// Asks the dispatcher to flush every sink once it has written what is
    /// already queued. Returns without waiting.
    pub fn request_flush(&self) {
        self.shared().request_flush();
    }

    /// Producer handle for use inside signal handlers.
    pub fn signal_logger(&self) -> SignalLogger {
        SignalLogger::new(Arc::clone(&self.core.shared))
    }

    pub fn registry(&self) -> &Registry {
        &self.shared().registry
    }

    pub fn channel(&self, name: &str) -> Option<ChannelId> {
        self.shared().registry.channel_id(name)
    }

    pub fn tags<S: AsRef<str>>(&self, names: &[S]) -> Result<TagSet, ConfigError> {
        self.shared().registry.tag_set(names)
    }

    /// Adds a sink at the end of the delivery order.
    ///
    /// Returns `None` once shutdown has begun; the sink is not registered.
    pub fn add_sink(&self, sink: Arc<dyn Sink>) -> Option<SinkId> {
        let shared = self.shared();
        shared.sinks.add_unless(sink, || shared.queue.is_closed())
    }

    /// Removes a sink. Once this returns the sink receives no further writes.
    /// It is neither flushed nor closed.
    pub fn remove_sink(&self, id: SinkId) -> Option<Arc<dyn Sink>> {
        self.shared().sinks.remove(id)
    }

    pub fn set_global_threshold(&self, severity: Severity) {
        self.shared().filter.set_global_threshold(severity);
    }

    pub fn set_channel_threshold(&self, channel: ChannelId, severity: Severity) {
        self.shared().filter.set_channel_threshold(channel, severity);
    }

    pub fn clear_channel_threshold(&self, channel: ChannelId) {
        self.shared().filter.clear_channel_threshold(channel);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared().stats.snapshot()
    }

    pub fn pool(&self) -> &RecordPool {
        &self.shared().pool
    }

    /// Records waiting for the dispatcher.
    pub fn queue_len(&self) -> usize {
        self.shared().queue.len()
    }

    /// Stops the logger: closes the queue, drains it within the shutdown
    /// timeout, then flushes and closes every sink.
    ///
    /// Safe to call more than once; later calls return the first report.
    /// Records logged afterwards are dropped with
    /// [`DropReason::QueueClosed`].
    pub fn shutdown(&self) -> ShutdownReport {
        self.core.shutdown()
    }
}

/// Overflow fallback: writes on the calling thread. Once shutdown has taken
/// the sinks nothing can receive the record, which then counts as dropped.
fn write_sync(shared: &Shared, handle: RecordHandle) -> Outcome {
    let mut text = String::new();
    let delivered = shared.deliver(shared.pool.record(&handle), &mut text);
    shared.pool.release(handle);
    if !delivered && shared.queue.is_closed() {
        shared.stats.record_queue_closed();
        return Outcome::Dropped(DropReason::QueueClosed);
    }
    shared.stats.record_sync_write();
    Outcome::WrittenSync
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn start(sink: Arc<MemorySink>) -> (Logger, ChannelId) {
        let mut builder = LoggerBuilder::new().pool_capacity(8).queue_capacity(8);
        let nav = builder.channel("nav").unwrap();
        (builder.sink(sink).start().unwrap(), nav)
    }

    #[test]
    fn test_filtered_call_touches_nothing() {
        let sink = Arc::new(MemorySink::new("mem"));
        let (logger, nav) = start(sink.clone());
        let outcome = logger.log_str(Severity::Debug, nav, TagSet::EMPTY, None, "quiet");
        assert_eq!(outcome, Outcome::Filtered);
        assert_eq!(logger.stats().attempts, 0);
        assert_eq!(logger.pool().outstanding(), 0);
        logger.shutdown();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let sink = Arc::new(MemorySink::new("mem"));
        let (logger, nav) = start(sink.clone());
        assert!(logger
            .log(Severity::Info, nav, TagSet::EMPTY, None, format_args!("n={}", 1))
            .is_accepted());
        let first = logger.shutdown();
        let second = logger.shutdown();
        assert_eq!(first, second);
        assert_eq!(first.delivered, 1);
        assert_eq!(sink.close_count(), 1);

        let late = logger.log_str(Severity::Info, nav, TagSet::EMPTY, None, "late");
        assert_eq!(late, Outcome::Dropped(DropReason::QueueClosed));
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(matches!(
            LoggerBuilder::new().queue_capacity(0).start(),
            Err(ConfigError::InvalidQueueCapacity)
        ));
        assert!(matches!(
            LoggerBuilder::new().pool_capacity(0).start(),
            Err(ConfigError::InvalidPoolCapacity { .. })
        ));
        assert!(matches!(
            LoggerBuilder::new().deny_tags(["nope"]).start(),
            Err(ConfigError::UnknownTag(_))
        ));
    }

    fn filled(shared: &Shared, channel: ChannelId, text: &str) -> RecordHandle {
        let mut handle = shared.pool.acquire().unwrap();
        let record = shared.pool.record_mut(&mut handle);
        record.begin(1, Severity::Info, channel, TagSet::EMPTY, None, Origin::Thread);
        record.set_text(text);
        handle
    }

    #[test]
    fn test_sync_write_without_sinks_is_a_closed_drop() {
        let sink = Arc::new(MemorySink::new("mem"));
        let (logger, nav) = start(sink.clone());
        let shared = &logger.core.shared;

        let outcome = write_sync(shared, filled(shared, nav, "spilled"));
        assert_eq!(outcome, Outcome::WrittenSync);
        assert_eq!(sink.messages(), vec!["spilled"]);

        // Shutdown has taken every sink; nothing can receive the record.
        logger.shutdown();
        let outcome = write_sync(shared, filled(shared, nav, "too late"));
        assert_eq!(outcome, Outcome::Dropped(DropReason::QueueClosed));
        assert_eq!(sink.messages(), vec!["spilled"]);

        let stats = logger.stats();
        assert_eq!(stats.sync_writes, 1);
        assert_eq!(stats.queue_closed, 1);
        assert_eq!(logger.pool().outstanding(), 0);
    }

    #[test]
    fn test_add_sink_after_shutdown_is_refused() {
        let sink = Arc::new(MemorySink::new("mem"));
        let (logger, _) = start(sink);
        let early = Arc::new(MemorySink::new("early"));
        assert!(logger.add_sink(early.clone()).is_some());

        logger.shutdown();
        assert_eq!(early.close_count(), 1);
        let late = Arc::new(MemorySink::new("late"));
        assert!(logger.add_sink(late.clone()).is_none());
        assert!(logger.shared().sinks.is_empty());
        assert_eq!(late.close_count(), 0);
    }
}
