use std::io;
use std::path::PathBuf;

use parking_lot::Mutex;

use super::file::{FileSinkOptions, RotatingFile};
use super::{FormattedRecord, Sink, SinkFilter};
use crate::error::SinkError;
use crate::record::Origin;
use crate::registry::{ChannelId, TagSet};
use crate::severity::Severity;

/// First four bytes of every binary log file.
pub const FILE_MAGIC: [u8; 4] = *b"SLOG";

/// Byte order mark written after the magic.
pub const BYTE_ORDER_MARK: u16 = 0xFEFF;

/// Length of the file header: magic, byte order mark, file sequence.
pub const FILE_HEADER_LEN: usize = 8;

/// Bytes in front of each record body, including the length prefix.
pub const FRAME_HEADER_LEN: usize = 42;

/// The body is an LZ4 block with its uncompressed size prepended.
pub const FLAG_COMPRESSED: u8 = 0b01;

/// The message was cut to fit its pool slot.
pub const FLAG_TRUNCATED: u8 = 0b10;

/// Bodies shorter than this are never compressed.
const COMPRESS_MIN_LEN: usize = 64;

/// Compact binary log files.
///
/// Every file starts with an 8 byte header:
///
/// ```text
/// "SLOG" | 0xFEFF (u16) | file sequence (u16)
/// ```
///
/// followed by one frame per record, all integers little-endian:
///
/// ```text
/// len u32 | flags u8 | severity u8 | origin u8 | reserved u8 | channel u16 |
/// sequence u64 | timestamp u64 | tags u64 | thread u64 | body
/// ```
///
/// `len` counts every byte after itself. The body is the rendered message
/// (not the formatter output), LZ4 compressed when that is enabled and it
/// actually saves space. Files rotate the same way as [`super::FileSink`]
/// files and are read back with [`crate::binary_reader::BinaryReader`].
pub struct BinarySink {
    filter: SinkFilter,
    compress: bool,
    state: Mutex<BinaryState>,
}

struct BinaryState {
    rotating: RotatingFile,
    frame: Vec<u8>,
    body: String,
    closed: bool,
}

impl BinarySink {
    /// `options.echo` is ignored; the extension defaults to `slog` when left
    /// at `log`.
    pub fn new(options: FileSinkOptions, compress: bool) -> io::Result<Self> {
        let extension = if options.extension == "log" {
            "slog"
        } else {
            options.extension.as_str()
        };
        let rotating = RotatingFile::new(&options.directory, &options.name, extension, options.max_file_size)?;
        Ok(Self {
            filter: SinkFilter::default(),
            compress,
            state: Mutex::new(BinaryState {
                rotating,
                frame: Vec::with_capacity(256),
                body: String::with_capacity(256),
                closed: false,
            }),
        })
    }

    pub fn with_filter(mut self, filter: SinkFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Every file this sink has created so far, oldest first.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.state.lock().rotating.paths().to_vec()
    }
}

fn file_header(sequence: u32) -> [u8; FILE_HEADER_LEN] {
    let mut header = [0u8; FILE_HEADER_LEN];
    header[..4].copy_from_slice(&FILE_MAGIC);
    header[4..6].copy_from_slice(&BYTE_ORDER_MARK.to_le_bytes());
    header[6..8].copy_from_slice(&(sequence as u16).to_le_bytes());
    header
}

impl Sink for BinarySink {
    fn name(&self) -> &str {
        "binary"
    }

    fn accepts(&self, severity: Severity, channel: ChannelId, tags: TagSet) -> bool {
        self.filter.accepts(severity, channel, tags)
    }

    fn write(&self, formatted: &FormattedRecord<'_>) -> Result<(), SinkError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(SinkError::Closed);
        }
        let record = formatted.record;

        state.body.clear();
        // Writing into a String cannot fail.
        let _ = record.write_message(&mut state.body);

        let mut flags = 0u8;
        if record.is_truncated() {
            flags |= FLAG_TRUNCATED;
        }
        let compressed;
        let body: &[u8] = if self.compress && state.body.len() >= COMPRESS_MIN_LEN {
            compressed = lz4_flex::block::compress_prepend_size(state.body.as_bytes());
            if compressed.len() < state.body.len() {
                flags |= FLAG_COMPRESSED;
                &compressed
            } else {
                state.body.as_bytes()
            }
        } else {
            state.body.as_bytes()
        };

        let origin = match record.origin() {
            Origin::Thread => 0u8,
            Origin::Signal => 1u8,
        };
        let frame = &mut state.frame;
        frame.clear();
        frame.extend_from_slice(&((FRAME_HEADER_LEN - 4 + body.len()) as u32).to_le_bytes());
        frame.extend_from_slice(&[flags, record.severity().as_u8(), origin, 0]);
        frame.extend_from_slice(&record.channel().raw().to_le_bytes());
        frame.extend_from_slice(&record.sequence().to_le_bytes());
        frame.extend_from_slice(&record.timestamp_ns().to_le_bytes());
        frame.extend_from_slice(&record.tags().bits().to_le_bytes());
        frame.extend_from_slice(&record.thread_id().to_le_bytes());
        frame.extend_from_slice(body);

        let rotating = &mut state.rotating;
        if rotating.is_full() {
            rotating.finish()?;
        }
        if !rotating.is_open() {
            let sequence = rotating.open_next()?;
            rotating.write_all(&file_header(sequence))?;
        }
        rotating.write_all(frame)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.state.lock().rotating.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.closed = true;
        state.rotating.finish()?;
        Ok(())
    }
}
