//! Log destinations.
//!
//! A [`Sink`] receives each record the dispatcher formats, provided its
//! [`Sink::accepts`] says yes. Sinks are held as `Arc<dyn Sink>` in the
//! [`SinkRegistry`] so they can be added and removed while the logger runs.
//!
//! Sinks take `&self`: the dispatcher is the usual caller, but a producer
//! running the synchronous overflow path may write concurrently, so each sink
//! guards its own state.

mod binary;
mod console;
mod file;
mod journald;
mod memory;
mod syslog;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::{RwLock, RwLockReadGuard};

use crate::error::SinkError;
use crate::record::LogRecord;
use crate::registry::{ChannelId, Registry, TagSet};
use crate::severity::Severity;

pub use binary::{
    BinarySink, BYTE_ORDER_MARK, FILE_HEADER_LEN, FILE_MAGIC, FLAG_COMPRESSED, FLAG_TRUNCATED, FRAME_HEADER_LEN,
};
pub use console::{ConsoleSink, ConsoleTarget};
pub use file::{FileSink, FileSinkOptions, Furniture};
pub use journald::JournaldSink;
pub use memory::{CapturedRecord, MemorySink};
pub use syslog::{SyslogFacility, SyslogFormat, SyslogSink, SyslogTransport};

lazy_static! {
    static ref PROGRAM_NAME: String = std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "app".to_owned());
}

/// Short name of the running executable, used as the default file base
/// name and syslog/journald identifier.
pub fn program_name() -> &'static str {
    &PROGRAM_NAME
}

/// A formatted record as seen by sinks.
#[derive(Clone, Copy)]
pub struct FormattedRecord<'a> {
    pub record: &'a LogRecord,
    /// Output of the logger's formatter.
    pub text: &'a str,
    pub registry: &'a Registry,
}

impl<'a> FormattedRecord<'a> {
    pub fn channel_name(&self) -> &'a str {
        self.registry.channel_name(self.record.channel()).unwrap_or("")
    }
}

/// A log destination.
pub trait Sink: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    fn accepts(&self, _severity: Severity, _channel: ChannelId, _tags: TagSet) -> bool {
        true
    }

    fn write(&self, record: &FormattedRecord<'_>) -> Result<(), SinkError>;

    fn flush(&self) -> Result<(), SinkError>;

    /// Called once at shutdown after the final flush.
    fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Per-sink acceptance rule.
///
/// A record is accepted when its severity reaches `threshold`, its channel
/// is listed (or no channels are listed), it carries one of `any_tags` (or
/// that set is empty), and it carries none of `no_tags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFilter {
    threshold: Severity,
    channels: Option<Vec<ChannelId>>,
    any_tags: TagSet,
    no_tags: TagSet,
}

impl Default for SinkFilter {
    fn default() -> Self {
        Self {
            threshold: Severity::Trace,
            channels: None,
            any_tags: TagSet::EMPTY,
            no_tags: TagSet::EMPTY,
        }
    }
}

impl SinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threshold(mut self, threshold: Severity) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn channels<I: IntoIterator<Item = ChannelId>>(mut self, channels: I) -> Self {
        self.channels = Some(channels.into_iter().collect());
        self
    }

    pub fn any_tags(mut self, tags: TagSet) -> Self {
        self.any_tags = tags;
        self
    }

    pub fn no_tags(mut self, tags: TagSet) -> Self {
        self.no_tags = tags;
        self
    }

    #[inline]
    pub fn accepts(&self, severity: Severity, channel: ChannelId, tags: TagSet) -> bool {
        severity >= self.threshold
            && self.channels.as_ref().map_or(true, |list| list.contains(&channel))
            && (self.any_tags.is_empty() || tags.intersects(self.any_tags))
            && !tags.intersects(self.no_tags)
    }
}

/// Accepts and discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn write(&self, _record: &FormattedRecord<'_>) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Identifies a registered sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

pub(crate) struct SinkEntry {
    pub(crate) id: SinkId,
    pub(crate) sink: Arc<dyn Sink>,
}

/// Ordered collection of sinks.
///
/// The dispatcher delivers each record under the read lock, so it sees one
/// consistent set of sinks per record. [`SinkRegistry::remove`] takes the
/// write lock and therefore waits for an in-flight delivery to finish: once
/// it returns, the removed sink gets no further writes.
pub struct SinkRegistry {
    entries: RwLock<Vec<SinkEntry>>,
    next_id: AtomicU64,
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add(&self, sink: Arc<dyn Sink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(SinkEntry { id, sink });
        id
    }

    /// Adds `sink` unless `closed` holds. Checked under the write lock, so
    /// a sink is never added after [`SinkRegistry::take_all`] ran for a close
    /// that `closed` already reports.
    pub(crate) fn add_unless<F>(&self, sink: Arc<dyn Sink>, closed: F) -> Option<SinkId>
    where
        F: FnOnce() -> bool,
    {
        let mut entries = self.entries.write();
        if closed() {
            return None;
        }
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entries.push(SinkEntry { id, sink });
        Some(id)
    }

    pub fn remove(&self, id: SinkId) -> Option<Arc<dyn Sink>> {
        let mut entries = self.entries.write();
        let pos = entries.iter().position(|entry| entry.id == id)?;
        Some(entries.remove(pos).sink)
    }

    /// Removes every sink, returning them in registration order.
    pub(crate) fn take_all(&self) -> Vec<Arc<dyn Sink>> {
        self.entries.write().drain(..).map(|entry| entry.sink).collect()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<SinkEntry>> {
        self.entries.read()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;

    #[test]
    fn test_sink_filter() {
        let mut builder = RegistryBuilder::new();
        let nav = builder.channel("nav").unwrap();
        let io = builder.tag("io").unwrap();
        let debug = builder.tag("debug").unwrap();

        let filter = SinkFilter::new()
            .threshold(Severity::Info)
            .channels([nav])
            .any_tags(TagSet::from(io))
            .no_tags(TagSet::from(debug));

        assert!(filter.accepts(Severity::Warn, nav, TagSet::from(io)));
        assert!(!filter.accepts(Severity::Debug, nav, TagSet::from(io)));
        assert!(!filter.accepts(Severity::Warn, ChannelId::DEFAULT, TagSet::from(io)));
        assert!(!filter.accepts(Severity::Warn, nav, TagSet::EMPTY));
        assert!(!filter.accepts(Severity::Warn, nav, TagSet::from(io).with(debug)));
        assert!(SinkFilter::default().accepts(Severity::Trace, nav, TagSet::EMPTY));
    }

    #[test]
    fn test_registry_add_remove() {
        let sinks = SinkRegistry::new();
        let a = sinks.add(Arc::new(NullSink));
        let b = sinks.add(Arc::new(MemorySink::new("mem")));
        assert_ne!(a, b);
        assert_eq!(sinks.len(), 2);

        let removed = sinks.remove(a).unwrap();
        assert_eq!(removed.name(), "null");
        assert!(sinks.remove(a).is_none());

        let rest = sinks.take_all();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name(), "mem");
        assert!(sinks.is_empty());
    }
}
