use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::registry::{ChannelId, TagSet};
use crate::severity::Severity;

/// Marks a channel that follows the global threshold.
const INHERIT: u8 = u8::MAX;

/// Call-site filter evaluated before any record is touched.
///
/// Every field is an atomic so thresholds can be changed while producers are
/// running; a check is a handful of relaxed loads and never locks.
#[derive(Debug)]
pub struct Filter {
    global: AtomicU8,
    channels: Box<[AtomicU8]>,
    allow: AtomicU64,
    deny: AtomicU64,
}

impl Filter {
    /// Creates a filter for `channel_count` channels, all inheriting `global`.
    pub fn new(global: Severity, channel_count: usize) -> Self {
        Self {
            global: AtomicU8::new(global.as_u8()),
            channels: (0..channel_count).map(|_| AtomicU8::new(INHERIT)).collect(),
            allow: AtomicU64::new(0),
            deny: AtomicU64::new(0),
        }
    }

    /// Decides whether a record with these properties would be logged.
    ///
    /// Severity must reach the channel threshold (or the global one when the
    /// channel has none). Any denied tag rejects the record. When an allow
    /// list is set, a tagged record needs at least one allowed tag; untagged
    /// records skip the allow list.
    ///
    /// # Examples
    ///
    /// ```
    /// # use async_logger::filter::Filter;
    /// # use async_logger::registry::{ChannelId, TagSet};
    /// # use async_logger::Severity;
    /// let filter = Filter::new(Severity::Info, 2);
    /// let nav = ChannelId::from_raw(1);
    /// filter.set_channel_threshold(nav, Severity::Warn);
    /// assert!(!filter.should_log(Severity::Info, nav, TagSet::EMPTY));
    /// assert!(filter.should_log(Severity::Info, ChannelId::DEFAULT, TagSet::EMPTY));
    /// ```
    #[inline]
    pub fn should_log(&self, severity: Severity, channel: ChannelId, tags: TagSet) -> bool {
        let threshold = match self.channels.get(channel.index()) {
            Some(slot) => match slot.load(Ordering::Relaxed) {
                INHERIT => self.global.load(Ordering::Relaxed),
                own => own,
            },
            None => self.global.load(Ordering::Relaxed),
        };
        if severity.as_u8() < threshold {
            return false;
        }
        if tags.is_empty() {
            return true;
        }
        let bits = tags.bits();
        if bits & self.deny.load(Ordering::Relaxed) != 0 {
            return false;
        }
        let allow = self.allow.load(Ordering::Relaxed);
        allow == 0 || bits & allow != 0
    }

    pub fn global_threshold(&self) -> Severity {
        Severity::from_u8(self.global.load(Ordering::Relaxed)).unwrap_or(Severity::Info)
    }

    pub fn set_global_threshold(&self, severity: Severity) {
        self.global.store(severity.as_u8(), Ordering::Relaxed);
    }

    /// Threshold in effect for `channel`.
    pub fn channel_threshold(&self, channel: ChannelId) -> Severity {
        self.channels
            .get(channel.index())
            .and_then(|slot| Severity::from_u8(slot.load(Ordering::Relaxed)))
            .unwrap_or_else(|| self.global_threshold())
    }

    /// Gives `channel` its own threshold. Unknown channels are ignored.
    pub fn set_channel_threshold(&self, channel: ChannelId, severity: Severity) {
        if let Some(slot) = self.channels.get(channel.index()) {
            slot.store(severity.as_u8(), Ordering::Relaxed);
        }
    }

    /// Makes `channel` follow the global threshold again.
    pub fn clear_channel_threshold(&self, channel: ChannelId) {
        if let Some(slot) = self.channels.get(channel.index()) {
            slot.store(INHERIT, Ordering::Relaxed);
        }
    }

    /// An empty set disables the allow list.
    pub fn set_allow_tags(&self, tags: TagSet) {
        self.allow.store(tags.bits(), Ordering::Relaxed);
    }

    pub fn set_deny_tags(&self, tags: TagSet) {
        self.deny.store(tags.bits(), Ordering::Relaxed);
    }
}
