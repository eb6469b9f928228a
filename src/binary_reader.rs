//! Reader for files written by [`crate::sink::BinarySink`].

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::record::Origin;
use crate::registry::{ChannelId, Registry, TagSet};
use crate::severity::Severity;
use crate::sink::{BYTE_ORDER_MARK, FILE_HEADER_LEN, FILE_MAGIC, FLAG_COMPRESSED, FLAG_TRUNCATED, FRAME_HEADER_LEN};

/// Why a binary log could not be decoded.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("not a binary log file")]
    BadMagic,
    #[error("unsupported byte order mark {0:#06x}")]
    BadByteOrder(u16),
    #[error("frame at offset {0} is cut short")]
    Truncated(usize),
    #[error("frame at offset {offset} has unknown severity {value}")]
    BadSeverity { offset: usize, value: u8 },
    #[error("frame at offset {offset} does not decompress: {source}")]
    Decompress {
        offset: usize,
        #[source]
        source: lz4_flex::block::DecompressError,
    },
}

/// One record decoded from a binary log.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryEntry {
    pub sequence: u64,
    /// Nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
    pub thread_id: u64,
    pub severity: Severity,
    pub channel: ChannelId,
    pub tags: TagSet,
    pub origin: Origin,
    pub truncated: bool,
    pub message: String,
}

impl BinaryEntry {
    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.timestamp_ns)
    }

    /// Renders the entry with channel and tag names looked up in `registry`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use async_logger::binary_reader::BinaryReader;
    /// # use async_logger::registry::Registry;
    /// let data = std::fs::read("rover_20240501T120000_000.slog")?;
    /// let registry = Registry::default();
    /// for entry in BinaryReader::new(&data)? {
    ///     println!("{}", entry?.to_text(&registry));
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn to_text(&self, registry: &Registry) -> String {
        let mut out = format!("[{}", self.severity.code());
        match registry.channel_name(self.channel) {
            Some("") => {}
            Some(name) => {
                out.push(' ');
                out.push_str(name);
            }
            None => out.push_str(&format!(" #{}", self.channel.raw())),
        }
        for tag in registry.tag_names(self.tags) {
            out.push_str(" #");
            out.push_str(tag);
        }
        out.push_str(&format!(" {}] {}", self.sequence, self.message));
        out
    }
}

impl fmt::Display for BinaryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} ch{} {}] {}",
            self.severity.code(),
            self.channel.raw(),
            self.sequence,
            self.message
        )
    }
}

/// Sequential decoder over the bytes of one binary log file.
///
/// Iterating yields one `Result` per frame and stops after the first error,
/// since a damaged length prefix leaves nothing to resynchronise on.
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
    file_sequence: u16,
    failed: bool,
}

impl<'a> BinaryReader<'a> {
    /// Checks the file header and positions the reader on the first frame.
    pub fn new(data: &'a [u8]) -> Result<Self, ReadError> {
        if data.len() < FILE_HEADER_LEN || data[..4] != FILE_MAGIC {
            return Err(ReadError::BadMagic);
        }
        let bom = u16::from_le_bytes([data[4], data[5]]);
        if bom != BYTE_ORDER_MARK {
            return Err(ReadError::BadByteOrder(bom));
        }
        Ok(Self {
            data,
            pos: FILE_HEADER_LEN,
            file_sequence: u16::from_le_bytes([data[6], data[7]]),
            failed: false,
        })
    }

    /// Position of this file in its rotation sequence.
    pub fn file_sequence(&self) -> u16 {
        self.file_sequence
    }

    fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos.checked_add(len)?)?;
        self.pos += len;
        Some(bytes)
    }

    fn read_u16(&mut self) -> Option<u16> {
        self.read_bytes(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes(4).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.read_bytes(8).and_then(|b| b.try_into().ok()).map(u64::from_le_bytes)
    }

    /// Decodes the next frame, or returns `None` at the end of the data.
    pub fn read_entry(&mut self) -> Option<Result<BinaryEntry, ReadError>> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        let offset = self.pos;
        let result = self.decode_frame(offset);
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn decode_frame(&mut self, offset: usize) -> Result<BinaryEntry, ReadError> {
        let len = self.read_u32().ok_or(ReadError::Truncated(offset))? as usize;
        if len < FRAME_HEADER_LEN - 4 {
            return Err(ReadError::Truncated(offset));
        }
        let head = self.read_bytes(4).ok_or(ReadError::Truncated(offset))?;
        let (flags, severity, origin) = (head[0], head[1], head[2]);
        let channel = self.read_u16().ok_or(ReadError::Truncated(offset))?;
        let sequence = self.read_u64().ok_or(ReadError::Truncated(offset))?;
        let timestamp_ns = self.read_u64().ok_or(ReadError::Truncated(offset))?;
        let tags = self.read_u64().ok_or(ReadError::Truncated(offset))?;
        let thread_id = self.read_u64().ok_or(ReadError::Truncated(offset))?;
        let body = self
            .read_bytes(len - (FRAME_HEADER_LEN - 4))
            .ok_or(ReadError::Truncated(offset))?;

        let severity = Severity::from_u8(severity).ok_or(ReadError::BadSeverity { offset, value: severity })?;
        let message = if flags & FLAG_COMPRESSED != 0 {
            let raw = lz4_flex::block::decompress_size_prepended(body)
                .map_err(|source| ReadError::Decompress { offset, source })?;
            String::from_utf8_lossy(&raw).into_owned()
        } else {
            String::from_utf8_lossy(body).into_owned()
        };

        Ok(BinaryEntry {
            sequence,
            timestamp_ns,
            thread_id,
            severity,
            channel: ChannelId::from_raw(channel),
            tags: TagSet::from_bits(tags),
            origin: if origin == 1 { Origin::Signal } else { Origin::Thread },
            truncated: flags & FLAG_TRUNCATED != 0,
            message,
        })
    }
}

impl<'a> Iterator for BinaryReader<'a> {
    type Item = Result<BinaryEntry, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_entry()
    }
}
