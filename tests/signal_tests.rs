use async_logger::record::Origin;
use async_logger::sink::{FormattedRecord, MemorySink, Sink};
use async_logger::{
    log_record, Arg, ChannelId, ConfigError, DropReason, LoggerBuilder, Outcome, Severity, SignalLogger, SinkError,
    TagSet,
};
use nix::libc::c_int;
use nix::sys::signal::{self, pthread_sigmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

static SIGNAL_LOG: OnceLock<SignalLogger> = OnceLock::new();
static HANDLER_OUTCOME: AtomicU8 = AtomicU8::new(0);

// Termination handlers are process-wide; tests that install them take turns.
static TERMINATION_LOCK: Mutex<()> = parking_lot::const_mutex(());
static FORWARDED: AtomicI32 = AtomicI32::new(0);

const QUEUED: u8 = 1;
const NOT_QUEUED: u8 = 2;

extern "C" fn on_sigusr1(signo: c_int) {
    if let Some(log) = SIGNAL_LOG.get() {
        let outcome = log.log(
            Severity::Error,
            ChannelId::DEFAULT,
            TagSet::EMPTY,
            "caught signal {}",
            &[Arg::I64(signo as i64)],
        );
        let code = if outcome == Outcome::Queued { QUEUED } else { NOT_QUEUED };
        HANDLER_OUTCOME.store(code, Ordering::SeqCst);
    }
}

#[test]
fn test_record_from_real_signal_handler() {
    let sink = Arc::new(MemorySink::new("mem"));
    let logger = LoggerBuilder::new()
        .pool_capacity(4)
        .signal_reserve(2)
        .poll_interval(Duration::from_millis(5))
        .sink(sink.clone())
        .start()
        .unwrap();
    assert!(SIGNAL_LOG.set(logger.signal_logger()).is_ok());

    let action = SigAction::new(SigHandler::Handler(on_sigusr1), SaFlags::empty(), SigSet::empty());
    unsafe { signal::sigaction(Signal::SIGUSR1, &action) }.unwrap();
    signal::raise(Signal::SIGUSR1).unwrap();

    assert_eq!(HANDLER_OUTCOME.load(Ordering::SeqCst), QUEUED);
    // The reserved slot was used; every general slot is still free.
    assert_eq!(logger.pool().free_count(), 4);

    let report = logger.shutdown();
    assert_eq!(report.delivered, 1);
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, format!("caught signal {}", Signal::SIGUSR1 as i32));
    assert_eq!(records[0].origin, Origin::Signal);
    assert!(records[0].tags.intersects(TagSet::SIGNAL));
    assert_eq!(records[0].severity, Severity::Error);
    assert!(records[0].location.is_none());
    assert!(records[0].text.contains("#signal"));
}

#[test]
fn test_signal_path_drops_when_reserve_is_taken() {
    let sink = Arc::new(MemorySink::new("mem"));
    let logger = LoggerBuilder::new()
        .pool_capacity(2)
        .signal_reserve(1)
        .sink(sink.clone())
        .start()
        .unwrap();
    let signal = logger.signal_logger();

    let held = logger.pool().acquire_reserved().unwrap();
    assert_eq!(
        signal.log_str(Severity::Fatal, ChannelId::DEFAULT, TagSet::EMPTY, "lost"),
        Outcome::Dropped(DropReason::PoolExhausted)
    );
    logger.pool().release(held);
    assert_eq!(
        signal.log_str(Severity::Fatal, ChannelId::DEFAULT, TagSet::EMPTY, "kept"),
        Outcome::Queued
    );

    let report = logger.shutdown();
    assert_eq!(report.stats.signal_records, 2);
    assert_eq!(report.stats.pool_exhausted, 1);
    assert_eq!(sink.messages(), vec!["kept"]);

    // After shutdown the signal path reports the closed queue.
    assert_eq!(
        signal.log_str(Severity::Fatal, ChannelId::DEFAULT, TagSet::EMPTY, "late"),
        Outcome::Dropped(DropReason::QueueClosed)
    );
    assert_eq!(logger.pool().reserved_free_count(), 1);
}

#[test]
fn test_signal_tag_can_be_denied() {
    let logger = LoggerBuilder::new().deny_tags(["signal"]).start().unwrap();
    let signal = logger.signal_logger();
    assert!(!signal.should_log(Severity::Fatal, ChannelId::DEFAULT, TagSet::EMPTY));
    assert_eq!(
        signal.log_str(Severity::Fatal, ChannelId::DEFAULT, TagSet::EMPTY, "muted"),
        Outcome::Filtered
    );
    assert!(logger.should_log(Severity::Fatal, ChannelId::DEFAULT, TagSet::EMPTY));
}

/// Records which signals the writing thread had blocked.
struct MaskRecorder {
    seen: Mutex<Option<SigSet>>,
}

impl Sink for MaskRecorder {
    fn name(&self) -> &str {
        "mask"
    }

    fn write(&self, _record: &FormattedRecord<'_>) -> Result<(), SinkError> {
        let mut mask = SigSet::empty();
        pthread_sigmask(SigmaskHow::SIG_SETMASK, None, Some(&mut mask)).map_err(io::Error::from)?;
        *self.seen.lock() = Some(mask);
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[test]
fn test_dispatcher_thread_blocks_signals() {
    let recorder = Arc::new(MaskRecorder { seen: Mutex::new(None) });
    let logger = LoggerBuilder::new().sink(recorder.clone()).start().unwrap();
    let _ = log_record!(logger, Severity::Info, ChannelId::DEFAULT, "mask check");
    logger.shutdown();

    let mask = recorder.seen.lock().take().expect("dispatcher wrote the record");
    for blocked in [Signal::SIGUSR1, Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP, Signal::SIGALRM] {
        assert!(mask.contains(blocked), "{:?} reaches the dispatcher thread", blocked);
    }
}

extern "C" fn on_sighup(signo: c_int) {
    FORWARDED.store(signo, Ordering::SeqCst);
}

#[test]
fn test_termination_signal_drains_then_forwards() {
    let _serial = TERMINATION_LOCK.lock();
    let previous = SigAction::new(SigHandler::Handler(on_sighup), SaFlags::empty(), SigSet::empty());
    unsafe { signal::sigaction(Signal::SIGHUP, &previous) }.unwrap();

    let sink = Arc::new(MemorySink::new("mem"));
    let logger = LoggerBuilder::new()
        .poll_interval(Duration::from_secs(5))
        .drain_on_termination(true)
        .sink(sink.clone())
        .start()
        .unwrap();
    for step in 0..3 {
        let _ = log_record!(logger, Severity::Info, ChannelId::DEFAULT, "step {}", step);
    }
    signal::raise(Signal::SIGHUP).unwrap();

    // The handler returned only after the sinks were drained and closed.
    assert_eq!(FORWARDED.load(Ordering::SeqCst), Signal::SIGHUP as i32);
    let last = format!("terminating on signal {}", Signal::SIGHUP as i32);
    assert_eq!(sink.messages(), vec!["step 0", "step 1", "step 2", last.as_str()]);
    assert_eq!(sink.records()[3].origin, Origin::Signal);
    assert_eq!(sink.close_count(), 1);
    assert_eq!(
        logger.log_str(Severity::Info, ChannelId::DEFAULT, TagSet::EMPTY, None, "after"),
        Outcome::Dropped(DropReason::QueueClosed)
    );

    logger.shutdown();
    let current = unsafe { signal::sigaction(Signal::SIGHUP, &previous) }.unwrap();
    assert!(matches!(current.handler(), SigHandler::Handler(handler) if handler as usize == on_sighup as usize));
}

#[test]
fn test_ignored_termination_signal_is_left_alone() {
    let _serial = TERMINATION_LOCK.lock();
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    let before = unsafe { signal::sigaction(Signal::SIGQUIT, &ignore) }.unwrap();

    let sink = Arc::new(MemorySink::new("mem"));
    let logger = LoggerBuilder::new()
        .drain_on_termination(true)
        .sink(sink.clone())
        .start()
        .unwrap();
    signal::raise(Signal::SIGQUIT).unwrap();
    assert_eq!(
        logger.log_str(Severity::Info, ChannelId::DEFAULT, TagSet::EMPTY, None, "still open"),
        Outcome::Queued
    );
    let current = unsafe { signal::sigaction(Signal::SIGQUIT, &ignore) }.unwrap();
    assert_eq!(current.handler(), SigHandler::SigIgn);

    logger.shutdown();
    assert_eq!(sink.messages(), vec!["still open"]);
    unsafe { signal::sigaction(Signal::SIGQUIT, &before) }.unwrap();
}

#[test]
fn test_one_logger_owns_termination_handlers() {
    let _serial = TERMINATION_LOCK.lock();
    let first = LoggerBuilder::new().drain_on_termination(true).start().unwrap();
    assert!(matches!(
        LoggerBuilder::new().drain_on_termination(true).start(),
        Err(ConfigError::TerminationHandlersInUse)
    ));
    // Loggers without the option are unaffected.
    let plain = LoggerBuilder::new().start().unwrap();
    plain.shutdown();

    first.shutdown();
    let second = LoggerBuilder::new().drain_on_termination(true).start().unwrap();
    second.shutdown();
}
