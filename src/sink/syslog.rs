use std::fmt::Write as _;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{program_name, FormattedRecord, Sink, SinkFilter};
use crate::clock::{self, TimeFormat};
use crate::error::SinkError;
use crate::registry::{ChannelId, TagSet};
use crate::severity::Severity;

/// Largest payload of a single UDP datagram.
const MAX_DATAGRAM: usize = 65507;

/// Syslog facility code, 0..=23.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyslogFacility(u8);

impl SyslogFacility {
    pub const KERN: SyslogFacility = SyslogFacility(0);
    pub const USER: SyslogFacility = SyslogFacility(1);
    pub const DAEMON: SyslogFacility = SyslogFacility(3);
    pub const LOCAL0: SyslogFacility = SyslogFacility(16);
    pub const LOCAL7: SyslogFacility = SyslogFacility(23);

    /// Values above 23 are clamped.
    pub fn new(code: u8) -> Self {
        SyslogFacility(code.min(23))
    }

    pub fn code(self) -> u8 {
        self.0.min(23)
    }
}

impl Default for SyslogFacility {
    fn default() -> Self {
        SyslogFacility::USER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyslogFormat {
    /// `<PRI>1 TIMESTAMP HOST APP - CHANNEL - MSG`
    #[default]
    Rfc5424,
    /// `<PRI>TIMESTAMP HOST APP: MSG`
    Rfc3164,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "transport", content = "address")]
pub enum SyslogTransport {
    /// `host:port`
    Udp(String),
    /// Path of a local datagram socket such as `/dev/log`.
    Unix(PathBuf),
}

impl Default for SyslogTransport {
    fn default() -> Self {
        SyslogTransport::Unix(PathBuf::from("/dev/log"))
    }
}

enum Connection {
    Udp(UdpSocket),
    Unix(UnixDatagram),
}

impl Connection {
    fn open(transport: &SyslogTransport) -> io::Result<Self> {
        match transport {
            SyslogTransport::Udp(address) => {
                let target = address
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {address}")))?;
                let local: SocketAddr = match target {
                    SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
                    SocketAddr::V6(_) => ([0u16; 8], 0).into(),
                };
                let socket = UdpSocket::bind(local)?;
                socket.connect(target)?;
                Ok(Connection::Udp(socket))
            }
            SyslogTransport::Unix(path) => {
                let socket = UnixDatagram::unbound()?;
                socket.connect(path)?;
                Ok(Connection::Unix(socket))
            }
        }
    }

    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Udp(socket) => socket.send(&payload[..payload.len().min(MAX_DATAGRAM)]),
            Connection::Unix(socket) => socket.send(payload),
        }
    }
}

struct SyslogState {
    connection: Option<Connection>,
    line: String,
}

/// Sends each record to a syslog daemon.
///
/// The socket is opened on first use and reopened after a send error, so a
/// daemon that restarts only costs the records sent while it was down.
pub struct SyslogSink {
    transport: SyslogTransport,
    format: SyslogFormat,
    facility: SyslogFacility,
    app_name: String,
    hostname: String,
    filter: SinkFilter,
    state: Mutex<SyslogState>,
}

impl SyslogSink {
    pub fn new(transport: SyslogTransport) -> Self {
        Self {
            transport,
            format: SyslogFormat::default(),
            facility: SyslogFacility::default(),
            app_name: program_name().to_owned(),
            hostname: hostname(),
            filter: SinkFilter::default(),
            state: Mutex::new(SyslogState {
                connection: None,
                line: String::with_capacity(256),
            }),
        }
    }

    pub fn with_format(mut self, format: SyslogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_facility(mut self, facility: SyslogFacility) -> Self {
        self.facility = facility;
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_filter(mut self, filter: SinkFilter) -> Self {
        self.filter = filter;
        self
    }

    /// PRI value of a record: facility * 8 + level.
    pub fn priority(&self, severity: Severity) -> u8 {
        self.facility.code() * 8 + severity.syslog_level()
    }

    fn render(&self, record: &FormattedRecord<'_>, line: &mut String) -> std::fmt::Result {
        let priority = self.priority(record.record.severity());
        let time = record.record.timestamp_ns();
        match self.format {
            SyslogFormat::Rfc5424 => {
                let channel = match record.channel_name() {
                    "" => "-",
                    name => name,
                };
                write!(line, "<{}>1 ", priority)?;
                clock::write_time(line, time, 3, TimeFormat::FullT)?;
                write!(line, " {} {} - {} - {}", self.hostname, self.app_name, channel, record.text)
            }
            SyslogFormat::Rfc3164 => {
                write!(line, "<{}>", priority)?;
                clock::write_time(line, time, 3, TimeFormat::FullT)?;
                write!(line, " {} {}: {}", self.hostname, self.app_name, record.text)
            }
        }
    }
}

fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|name| name.trim().to_owned())
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "-".to_owned())
}

impl Sink for SyslogSink {
    fn name(&self) -> &str {
        "syslog"
    }

    fn accepts(&self, severity: Severity, channel: ChannelId, tags: TagSet) -> bool {
        self.filter.accepts(severity, channel, tags)
    }

    fn write(&self, record: &FormattedRecord<'_>) -> Result<(), SinkError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.line.clear();
        self.render(record, &mut state.line)
            .map_err(|_| SinkError::Rejected("unrenderable timestamp".to_owned()))?;

        if state.connection.is_none() {
            state.connection = Some(Connection::open(&self.transport)?);
        }
        let sent = match &state.connection {
            Some(connection) => connection.send(state.line.as_bytes()),
            None => return Err(SinkError::Closed),
        };
        if let Err(err) = sent {
            state.connection = None;
            return Err(err.into());
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        self.state.lock().connection = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{LogRecord, Origin};
    use crate::registry::RegistryBuilder;

    #[test]
    fn test_priority() {
        let sink = SyslogSink::new(SyslogTransport::default());
        assert_eq!(sink.priority(Severity::Info), 14);
        let sink = sink.with_facility(SyslogFacility::new(40));
        assert_eq!(sink.priority(Severity::Error), 23 * 8 + 3);
    }

    #[test]
    fn test_udp_delivery() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let address = receiver.local_addr().unwrap().to_string();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(5)))
            .unwrap();

        let mut builder = RegistryBuilder::new();
        let nav = builder.channel("nav").unwrap();
        let registry = builder.build();
        let mut rec = LogRecord::new(0, 64);
        rec.begin(1, Severity::Warn, nav, TagSet::EMPTY, None, Origin::Thread);
        rec.set_text("low battery");

        let sink = SyslogSink::new(SyslogTransport::Udp(address)).with_app_name("rover");
        let formatted = FormattedRecord {
            record: &rec,
            text: "low battery",
            registry: &registry,
        };
        sink.write(&formatted).unwrap();

        let mut buf = [0u8; 1024];
        let n = receiver.recv(&mut buf).unwrap();
        let line = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(line.starts_with("<12>1 "), "{}", line);
        assert!(line.ends_with(" rover - nav - low battery"), "{}", line);
    }
}
