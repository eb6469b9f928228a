//! Channel and tag name registry.
//!
//! Channels and tags are named in configuration but compared as integers on
//! the hot path. Names are registered on a [`RegistryBuilder`] during setup,
//! then frozen into an immutable [`Registry`] that is shared (behind an `Arc`)
//! by every producer and by the dispatcher. Nothing can be registered once a
//! logger has started.
//!
//! Registration deduplicates: registering the same name twice returns the
//! same id.

use std::collections::HashMap;
use std::fmt;

use crate::error::ConfigError;

/// Maximum number of channels, including the unnamed default channel.
pub const MAX_CHANNELS: usize = u16::MAX as usize;

/// Maximum number of user tags. The last bit of a [`TagSet`] is reserved
/// for [`TagId::SIGNAL`].
pub const MAX_USER_TAGS: usize = 63;

/// Name of the reserved tag carried by records logged from a signal handler.
pub const SIGNAL_TAG_NAME: &str = "signal";

/// Numeric id of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChannelId(u16);

impl ChannelId {
    /// The unnamed channel every registry starts with.
    pub const DEFAULT: ChannelId = ChannelId(0);

    pub const fn from_raw(raw: u16) -> Self {
        ChannelId(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Numeric id of a tag; doubles as its bit position in a [`TagSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId(u8);

impl TagId {
    pub const SIGNAL: TagId = TagId(63);

    pub const fn bit(self) -> u8 {
        self.0
    }
}

/// Unordered set of tags, stored as a bit mask so that filtering is a
/// couple of AND operations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TagSet(u64);

impl TagSet {
    pub const EMPTY: TagSet = TagSet(0);
    pub const SIGNAL: TagSet = TagSet(1 << 63);

    pub const fn from_bits(bits: u64) -> Self {
        TagSet(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn with(self, tag: TagId) -> Self {
        TagSet(self.0 | (1 << tag.0))
    }

    #[inline]
    pub const fn union(self, other: TagSet) -> Self {
        TagSet(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, tag: TagId) -> bool {
        self.0 & (1 << tag.0) != 0
    }

    #[inline]
    pub const fn intersects(self, other: TagSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = TagId> {
        (0u8..64).filter(move |bit| self.0 & (1 << bit) != 0).map(TagId)
    }
}

impl From<TagId> for TagSet {
    fn from(tag: TagId) -> Self {
        TagSet::EMPTY.with(tag)
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagSet({:#x})", self.0)
    }
}

/// Mutable registry used during setup.
#[derive(Debug, Clone)]
pub struct RegistryBuilder {
    channels: Vec<String>,
    tags: Vec<String>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            channels: vec![String::new()],
            tags: Vec::new(),
        }
    }

    /// Registers a channel and returns its id.
    ///
    /// The empty name is the default channel (id 0).
    ///
    /// # Examples
    ///
    /// ```
    /// # use async_logger::registry::{RegistryBuilder, ChannelId};
    /// let mut builder = RegistryBuilder::new();
    /// let nav = builder.channel("nav").unwrap();
    /// assert_eq!(builder.channel("nav").unwrap(), nav);
    /// assert_eq!(builder.channel("").unwrap(), ChannelId::DEFAULT);
    /// ```
    pub fn channel(&mut self, name: &str) -> Result<ChannelId, ConfigError> {
        if let Some(pos) = self.channels.iter().position(|c| c == name) {
            return Ok(ChannelId(pos as u16));
        }
        if self.channels.len() >= MAX_CHANNELS {
            return Err(ConfigError::TooManyChannels(MAX_CHANNELS));
        }
        self.channels.push(name.to_owned());
        Ok(ChannelId((self.channels.len() - 1) as u16))
    }

    /// Registers a tag and returns its id.
    ///
    /// `"signal"` always resolves to the reserved [`TagId::SIGNAL`].
    pub fn tag(&mut self, name: &str) -> Result<TagId, ConfigError> {
        if name == SIGNAL_TAG_NAME {
            return Ok(TagId::SIGNAL);
        }
        if let Some(pos) = self.tags.iter().position(|t| t == name) {
            return Ok(TagId(pos as u8));
        }
        if self.tags.len() >= MAX_USER_TAGS {
            return Err(ConfigError::TooManyTags(MAX_USER_TAGS));
        }
        self.tags.push(name.to_owned());
        Ok(TagId((self.tags.len() - 1) as u8))
    }

    /// Freezes the registry.
    pub fn build(self) -> Registry {
        let channels: Vec<Box<str>> = self.channels.into_iter().map(String::into_boxed_str).collect();
        let tags: Vec<Box<str>> = self.tags.into_iter().map(String::into_boxed_str).collect();
        let channel_ids = channels
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), ChannelId(i as u16)))
            .collect();
        let tag_ids = tags
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), TagId(i as u8)))
            .collect();
        Registry {
            channels,
            channel_ids,
            tags,
            tag_ids,
        }
    }
}

/// Frozen name-to-id mapping. Read-only for the lifetime of a logger.
#[derive(Debug)]
pub struct Registry {
    channels: Vec<Box<str>>,
    channel_ids: HashMap<Box<str>, ChannelId>,
    tags: Vec<Box<str>>,
    tag_ids: HashMap<Box<str>, TagId>,
}

impl Default for Registry {
    fn default() -> Self {
        RegistryBuilder::new().build()
    }
}

impl Registry {
    pub fn channel_id(&self, name: &str) -> Option<ChannelId> {
        self.channel_ids.get(name).copied()
    }

    pub fn channel_name(&self, id: ChannelId) -> Option<&str> {
        self.channels.get(id.index()).map(|name| &**name)
    }

    /// Number of channels, including the default channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn tag_id(&self, name: &str) -> Option<TagId> {
        if name == SIGNAL_TAG_NAME {
            return Some(TagId::SIGNAL);
        }
        self.tag_ids.get(name).copied()
    }

    pub fn tag_name(&self, id: TagId) -> Option<&str> {
        if id == TagId::SIGNAL {
            return Some(SIGNAL_TAG_NAME);
        }
        self.tags.get(id.0 as usize).map(|name| &**name)
    }

    /// Resolves a list of tag names into a set.
    pub fn tag_set<S: AsRef<str>>(&self, names: &[S]) -> Result<TagSet, ConfigError> {
        names.iter().try_fold(TagSet::EMPTY, |set, name| {
            let name = name.as_ref();
            self.tag_id(name)
                .map(|id| set.with(id))
                .ok_or_else(|| ConfigError::UnknownTag(name.to_owned()))
        })
    }

    pub fn tag_names(&self, tags: TagSet) -> impl Iterator<Item = &str> + '_ {
        tags.iter().filter_map(move |id| self.tag_name(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channel_exists() {
        let registry = Registry::default();
        assert_eq!(registry.channel_id(""), Some(ChannelId::DEFAULT));
        assert_eq!(registry.channel_count(), 1);
    }

    #[test]
    fn test_signal_tag_is_reserved() {
        let mut builder = RegistryBuilder::new();
        assert_eq!(builder.tag("signal").unwrap(), TagId::SIGNAL);
        let io = builder.tag("io").unwrap();
        assert_ne!(io, TagId::SIGNAL);
        let registry = builder.build();
        assert_eq!(registry.tag_name(TagId::SIGNAL), Some("signal"));
        assert!(TagSet::SIGNAL.contains(TagId::SIGNAL));
    }

    #[test]
    fn test_too_many_tags() {
        let mut builder = RegistryBuilder::new();
        for i in 0..MAX_USER_TAGS {
            builder.tag(&format!("t{i}")).unwrap();
        }
        assert!(matches!(builder.tag("one-more"), Err(ConfigError::TooManyTags(_))));
    }

    #[test]
    fn test_tag_set_operations() {
        let mut builder = RegistryBuilder::new();
        let a = builder.tag("a").unwrap();
        let b = builder.tag("b").unwrap();
        let c = builder.tag("c").unwrap();
        let registry = builder.build();

        let ab = registry.tag_set(&["a", "b"]).unwrap();
        assert!(ab.contains(a) && ab.contains(b) && !ab.contains(c));
        assert_eq!(ab.len(), 2);
        assert!(ab.intersects(TagSet::from(b)));
        assert!(!ab.intersects(TagSet::from(c)));
        assert_eq!(registry.tag_names(ab).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(matches!(registry.tag_set(&["zzz"]), Err(ConfigError::UnknownTag(_))));
    }
}
