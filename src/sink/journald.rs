use std::io::{self, Write};
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use parking_lot::Mutex;

use super::{program_name, FormattedRecord, Sink, SinkFilter};
use crate::error::SinkError;
use crate::registry::{ChannelId, TagSet};
use crate::severity::Severity;

const JOURNAL_SOCKET: &str = "/run/systemd/journal/socket";

struct JournalState {
    socket: Option<UnixDatagram>,
    datagram: Vec<u8>,
    message: String,
}

/// Sends records to the systemd journal using its native datagram protocol.
///
/// Each record becomes one datagram of `KEY=value` fields. Values containing
/// a newline use the length-prefixed binary form, so multi-line messages
/// arrive intact.
pub struct JournaldSink {
    path: PathBuf,
    identifier: String,
    filter: SinkFilter,
    state: Mutex<JournalState>,
}

impl Default for JournaldSink {
    fn default() -> Self {
        Self::new()
    }
}

impl JournaldSink {
    pub fn new() -> Self {
        Self::with_socket(JOURNAL_SOCKET)
    }

    /// Talks to a journal listening somewhere other than the systemd default.
    pub fn with_socket(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            identifier: program_name().to_owned(),
            filter: SinkFilter::default(),
            state: Mutex::new(JournalState {
                socket: None,
                datagram: Vec::with_capacity(512),
                message: String::with_capacity(256),
            }),
        }
    }

    /// `SYSLOG_IDENTIFIER` of every entry.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_filter(mut self, filter: SinkFilter) -> Self {
        self.filter = filter;
        self
    }
}

fn put_field(out: &mut Vec<u8>, key: &str, value: &[u8]) {
    out.extend_from_slice(key.as_bytes());
    if value.contains(&b'\n') {
        out.push(b'\n');
        out.extend_from_slice(&(value.len() as u64).to_le_bytes());
    } else {
        out.push(b'=');
    }
    out.extend_from_slice(value);
    out.push(b'\n');
}

fn put_display(out: &mut Vec<u8>, key: &str, value: impl std::fmt::Display) {
    out.extend_from_slice(key.as_bytes());
    out.push(b'=');
    // Writing into a Vec cannot fail.
    let _ = write!(out, "{}", value);
    out.push(b'\n');
}

impl Sink for JournaldSink {
    fn name(&self) -> &str {
        "journald"
    }

    fn accepts(&self, severity: Severity, channel: ChannelId, tags: TagSet) -> bool {
        self.filter.accepts(severity, channel, tags)
    }

    fn write(&self, formatted: &FormattedRecord<'_>) -> Result<(), SinkError> {
        let record = formatted.record;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        state.message.clear();
        let _ = record.write_message(&mut state.message);

        let out = &mut state.datagram;
        out.clear();
        put_field(out, "MESSAGE", state.message.as_bytes());
        put_display(out, "PRIORITY", record.severity().syslog_level());
        put_field(out, "SYSLOG_IDENTIFIER", self.identifier.as_bytes());
        if let Some(location) = record.location() {
            put_field(out, "CODE_FILE", location.file.as_bytes());
            put_display(out, "CODE_LINE", location.line);
            put_field(out, "CODE_FUNC", location.module.as_bytes());
        }
        let channel = formatted.channel_name();
        if !channel.is_empty() {
            put_field(out, "LOG_CHANNEL", channel.as_bytes());
        }
        if !record.tags().is_empty() {
            let tags: Vec<&str> = formatted.registry.tag_names(record.tags()).collect();
            put_field(out, "LOG_TAGS", tags.join(",").as_bytes());
        }
        put_display(out, "LOG_SEQUENCE", record.sequence());
        put_display(out, "THREAD", record.thread_id());

        if state.socket.is_none() {
            let socket = UnixDatagram::unbound()?;
            socket.connect(&self.path)?;
            state.socket = Some(socket);
        }
        let sent = match &state.socket {
            Some(socket) => socket.send(&state.datagram),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };
        if let Err(err) = sent {
            state.socket = None;
            return Err(err.into());
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        self.state.lock().socket = None;
        Ok(())
    }
}
