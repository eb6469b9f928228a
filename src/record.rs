//! The pooled log record.
//!
//! A [`LogRecord`] lives in a pool slot for the whole life of the pool. Its
//! message buffer is allocated once when the pool is built; populating a
//! record copies into that buffer and never allocates. Text that does not fit
//! is cut at a UTF-8 boundary and the record is flagged as truncated.
//!
//! The payload is either rendered text or a structured pair of a static
//! format string and typed arguments. Structured payloads are only turned
//! into text on the dispatcher thread, which is what the signal-safe path
//! relies on.

use std::fmt;

use crate::clock;
use crate::registry::{ChannelId, TagSet};
use crate::severity::Severity;

/// Call-site information captured by the logging macros.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
    pub module: &'static str,
}

impl SourceLocation {
    /// File name without its directories.
    pub fn file_name(&self) -> &'static str {
        self.file.rsplit(['/', '\\']).next().unwrap_or(self.file)
    }
}

/// Where a record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Thread,
    Signal,
}

/// A typed argument of a structured message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg<'a> {
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Char(char),
    Str(&'a str),
}

impl fmt::Display for Arg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::I64(v) => write!(f, "{}", v),
            Arg::U64(v) => write!(f, "{}", v),
            Arg::F64(v) => write!(f, "{}", v),
            Arg::Bool(v) => write!(f, "{}", v),
            Arg::Char(v) => write!(f, "{}", v),
            Arg::Str(v) => f.write_str(v),
        }
    }
}

macro_rules! arg_from {
    ($variant:ident as $target:ty: $($source:ty),*) => {
        $(
            impl From<$source> for Arg<'_> {
                fn from(value: $source) -> Self {
                    Arg::$variant(value as $target)
                }
            }
        )*
    };
}

arg_from!(I64 as i64: i8, i16, i32, i64, isize);
arg_from!(U64 as u64: u8, u16, u32, u64, usize);
arg_from!(F64 as f64: f32, f64);

impl From<bool> for Arg<'_> {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<char> for Arg<'_> {
    fn from(value: char) -> Self {
        Arg::Char(value)
    }
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(value: &'a str) -> Self {
        Arg::Str(value)
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(value: &'a String) -> Self {
        Arg::Str(value.as_str())
    }
}

const ARG_I64: u8 = 0;
const ARG_U64: u8 = 1;
const ARG_F64: u8 = 2;
const ARG_BOOL: u8 = 3;
const ARG_CHAR: u8 = 4;
const ARG_STR: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    Text,
    Structured(&'static str),
}

/// The message view handed to formatters and sinks.
#[derive(Debug, Clone)]
pub enum Message<'a> {
    Text(&'a str),
    Structured { format: &'static str, args: ArgIter<'a> },
}

/// One log event stored in a pool slot.
pub struct LogRecord {
    sequence: u64,
    timestamp_ns: u64,
    thread_id: u64,
    severity: Severity,
    channel: ChannelId,
    tags: TagSet,
    location: Option<SourceLocation>,
    origin: Origin,
    slot: u32,
    kind: PayloadKind,
    buf: Box<[u8]>,
    len: usize,
    truncated: bool,
}

impl LogRecord {
    pub(crate) fn new(slot: u32, message_capacity: usize) -> Self {
        Self {
            sequence: 0,
            timestamp_ns: 0,
            thread_id: 0,
            severity: Severity::Info,
            channel: ChannelId::DEFAULT,
            tags: TagSet::EMPTY,
            location: None,
            origin: Origin::Thread,
            slot,
            kind: PayloadKind::Text,
            buf: vec![0u8; message_capacity].into_boxed_slice(),
            len: 0,
            truncated: false,
        }
    }

    /// Stamps the metadata of a freshly acquired record.
    pub(crate) fn begin(
        &mut self,
        sequence: u64,
        severity: Severity,
        channel: ChannelId,
        tags: TagSet,
        location: Option<SourceLocation>,
        origin: Origin,
    ) {
        self.sequence = sequence;
        self.timestamp_ns = clock::now_nanos();
        self.thread_id = clock::thread_id();
        self.severity = severity;
        self.channel = channel;
        self.tags = match origin {
            Origin::Signal => tags.union(TagSet::SIGNAL),
            Origin::Thread => tags,
        };
        self.location = location;
        self.origin = origin;
        self.kind = PayloadKind::Text;
        self.len = 0;
        self.truncated = false;
    }

    /// Returns the slot to its blank state. Called when the slot is released.
    pub(crate) fn reset(&mut self) {
        self.sequence = 0;
        self.timestamp_ns = 0;
        self.thread_id = 0;
        self.tags = TagSet::EMPTY;
        self.location = None;
        self.origin = Origin::Thread;
        self.kind = PayloadKind::Text;
        self.len = 0;
        self.truncated = false;
    }

    pub(crate) fn set_text(&mut self, text: &str) {
        self.kind = PayloadKind::Text;
        self.len = 0;
        self.truncated = false;
        self.push_str(text);
    }

    pub(crate) fn set_text_args(&mut self, args: fmt::Arguments<'_>) {
        self.kind = PayloadKind::Text;
        self.len = 0;
        self.truncated = false;
        if let Some(text) = args.as_str() {
            self.push_str(text);
        } else {
            // Err only means the buffer filled up.
            let _ = fmt::write(&mut TextWriter(self), args);
        }
    }

    pub(crate) fn set_structured(&mut self, format: &'static str, args: &[Arg<'_>]) {
        self.kind = PayloadKind::Structured(format);
        self.len = 0;
        self.truncated = false;
        for arg in args {
            if !self.encode_arg(arg) {
                self.truncated = true;
                break;
            }
        }
    }

    fn push_str(&mut self, text: &str) -> bool {
        let room = self.buf.len() - self.len;
        let take = if text.len() <= room {
            text.len()
        } else {
            self.truncated = true;
            floor_char_boundary(text, room)
        };
        self.buf[self.len..self.len + take].copy_from_slice(&text.as_bytes()[..take]);
        self.len += take;
        take == text.len()
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> bool {
        if self.buf.len() - self.len < bytes.len() {
            return false;
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        true
    }

    fn encode_arg(&mut self, arg: &Arg<'_>) -> bool {
        let start = self.len;
        let ok = match *arg {
            Arg::I64(v) => self.push_bytes(&[ARG_I64]) && self.push_bytes(&v.to_le_bytes()),
            Arg::U64(v) => self.push_bytes(&[ARG_U64]) && self.push_bytes(&v.to_le_bytes()),
            Arg::F64(v) => self.push_bytes(&[ARG_F64]) && self.push_bytes(&v.to_bits().to_le_bytes()),
            Arg::Bool(v) => self.push_bytes(&[ARG_BOOL, v as u8]),
            Arg::Char(v) => self.push_bytes(&[ARG_CHAR]) && self.push_bytes(&(v as u32).to_le_bytes()),
            Arg::Str(s) => {
                let room = (self.buf.len() - self.len).saturating_sub(3).min(u16::MAX as usize);
                let take = floor_char_boundary(s, room.min(s.len()));
                if take < s.len() {
                    self.truncated = true;
                }
                self.push_bytes(&[ARG_STR])
                    && self.push_bytes(&(take as u16).to_le_bytes())
                    && self.push_bytes(&s.as_bytes()[..take])
            }
        };
        if !ok {
            self.len = start;
        }
        ok
    }

    /// Monotonic sequence number assigned at acquisition.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Nanoseconds since the Unix epoch.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn tags(&self) -> TagSet {
        self.tags
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_signal_origin(&self) -> bool {
        self.origin == Origin::Signal
    }

    /// Pool slot index this record lives in.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// True if the message did not fit in the slot.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Maximum message bytes this slot can hold.
    pub fn message_capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn message(&self) -> Message<'_> {
        let bytes = &self.buf[..self.len];
        match self.kind {
            PayloadKind::Text => Message::Text(std::str::from_utf8(bytes).unwrap_or_default()),
            PayloadKind::Structured(format) => Message::Structured {
                format,
                args: ArgIter { bytes },
            },
        }
    }

    /// Renders the message (not the metadata) into `out`.
    pub fn write_message<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        match self.message() {
            Message::Text(text) => out.write_str(text),
            Message::Structured { format, args } => render_format(out, format, args),
        }
    }
}

impl fmt::Debug for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogRecord")
            .field("sequence", &self.sequence)
            .field("severity", &self.severity)
            .field("channel", &self.channel)
            .field("tags", &self.tags)
            .field("origin", &self.origin)
            .field("slot", &self.slot)
            .field("message", &self.message())
            .finish()
    }
}

struct TextWriter<'a>(&'a mut LogRecord);

impl fmt::Write for TextWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.0.push_str(s) {
            Ok(())
        } else {
            Err(fmt::Error)
        }
    }
}

/// Decodes the arguments of a structured payload.
#[derive(Debug, Clone)]
pub struct ArgIter<'a> {
    bytes: &'a [u8],
}

impl<'a> ArgIter<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.bytes.len() < n {
            self.bytes = &[];
            return None;
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Some(head)
    }

    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N).and_then(|b| b.try_into().ok())
    }
}

impl<'a> Iterator for ArgIter<'a> {
    type Item = Arg<'a>;

    fn next(&mut self) -> Option<Arg<'a>> {
        let tag = *self.take(1)?.first()?;
        match tag {
            ARG_I64 => self.take_array().map(|b| Arg::I64(i64::from_le_bytes(b))),
            ARG_U64 => self.take_array().map(|b| Arg::U64(u64::from_le_bytes(b))),
            ARG_F64 => self.take_array().map(|b| Arg::F64(f64::from_bits(u64::from_le_bytes(b)))),
            ARG_BOOL => self.take(1).map(|b| Arg::Bool(b[0] != 0)),
            ARG_CHAR => self
                .take_array()
                .and_then(|b| char::from_u32(u32::from_le_bytes(b)))
                .map(Arg::Char),
            ARG_STR => {
                let len = u16::from_le_bytes(self.take_array()?) as usize;
                let bytes = self.take(len)?;
                Some(Arg::Str(std::str::from_utf8(bytes).unwrap_or_default()))
            }
            _ => {
                self.bytes = &[];
                None
            }
        }
    }
}

/// Substitutes `{}` placeholders in `format` with `args`.
///
/// `{{` and `}}` are literal braces. A placeholder without a matching
/// argument renders as `{MISSING}`; surplus arguments are ignored.
///
/// # Examples
///
/// ```
/// # use async_logger::record::{render_format, Arg};
/// let mut out = String::new();
/// render_format(&mut out, "{} of {} {{ok}} {}", [Arg::U64(3), Arg::Str("4")]).unwrap();
/// assert_eq!(out, "3 of 4 {ok} {MISSING}");
/// ```
pub fn render_format<'a, W, I>(out: &mut W, format: &str, args: I) -> fmt::Result
where
    W: fmt::Write,
    I: IntoIterator<Item = Arg<'a>>,
{
    let mut args = args.into_iter();
    let bytes = format.as_bytes();
    let mut literal_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let pair = (bytes[i], bytes.get(i + 1).copied());
        let replacement = match pair {
            (b'{', Some(b'}')) => Some(None),
            (b'{', Some(b'{')) => Some(Some("{")),
            (b'}', Some(b'}')) => Some(Some("}")),
            _ => None,
        };
        match replacement {
            Some(literal) => {
                out.write_str(&format[literal_start..i])?;
                match literal {
                    Some(brace) => out.write_str(brace)?,
                    None => match args.next() {
                        Some(arg) => write!(out, "{}", arg)?,
                        None => out.write_str("{MISSING}")?,
                    },
                }
                i += 2;
                literal_start = i;
            }
            None => i += 1,
        }
    }
    out.write_str(&format[literal_start..])
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}
