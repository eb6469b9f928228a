use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{FormattedRecord, Sink, SinkFilter};
use crate::error::SinkError;
use crate::record::{Origin, SourceLocation};
use crate::registry::{ChannelId, TagSet};
use crate::severity::Severity;

/// Owned copy of a delivered record.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRecord {
    pub sequence: u64,
    pub timestamp_ns: u64,
    pub thread_id: u64,
    pub severity: Severity,
    pub channel: ChannelId,
    pub channel_name: String,
    pub tags: TagSet,
    pub origin: Origin,
    pub location: Option<SourceLocation>,
    pub truncated: bool,
    /// The rendered message alone.
    pub message: String,
    /// The full formatter output.
    pub text: String,
}

/// Keeps every delivered record in memory.
///
/// Meant for tests and embedding: it also counts flushes and closes and can
/// be told to fail its writes.
///
/// # Examples
///
/// ```
/// # use async_logger::sink::{MemorySink, Sink};
/// let sink = MemorySink::new("mem");
/// assert!(sink.is_empty());
/// sink.flush().unwrap();
/// assert_eq!(sink.flush_count(), 1);
/// ```
#[derive(Debug)]
pub struct MemorySink {
    name: String,
    filter: SinkFilter,
    records: Mutex<Vec<CapturedRecord>>,
    flushes: AtomicUsize,
    closes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: SinkFilter::default(),
            records: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn with_filter(mut self, filter: SinkFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().clone()
    }

    /// Rendered messages in delivery order.
    pub fn messages(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// While set, every write fails with [`SinkError::Rejected`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, severity: Severity, channel: ChannelId, tags: TagSet) -> bool {
        self.filter.accepts(severity, channel, tags)
    }

    fn write(&self, formatted: &FormattedRecord<'_>) -> Result<(), SinkError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected(format!("{} is failing writes", self.name)));
        }
        let record = formatted.record;
        let mut message = String::new();
        // Writing into a String cannot fail.
        let _ = record.write_message(&mut message);
        self.records.lock().push(CapturedRecord {
            sequence: record.sequence(),
            timestamp_ns: record.timestamp_ns(),
            thread_id: record.thread_id(),
            severity: record.severity(),
            channel: record.channel(),
            channel_name: formatted.channel_name().to_owned(),
            tags: record.tags(),
            origin: record.origin(),
            location: record.location().copied(),
            truncated: record.is_truncated(),
            message,
            text: formatted.text.to_owned(),
        });
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
