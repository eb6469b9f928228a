use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::clock::{self, TimeFormat};
use crate::record::LogRecord;
use crate::registry::Registry;

/// How timestamps are rendered by the text formatters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocaleConfig {
    /// Fractional second digits, 0..=9.
    pub time_precision: u8,
    pub time_format: TimeFormat,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            time_precision: 3,
            time_format: TimeFormat::FullT,
        }
    }
}

/// Turns a record into the text handed to sinks.
///
/// The dispatcher calls this once per record and reuses `out` between
/// records, so implementations should append rather than allocate.
pub trait Formatter: Send + Sync {
    fn format(&self, record: &LogRecord, registry: &Registry, locale: &LocaleConfig, out: &mut String) -> fmt::Result;
}

/// `[SEVR channel #tag time] message`
///
/// The channel is left out for the default channel and tags are left out
/// when the record has none.
///
/// # Examples
///
/// ```text
/// [WARN nav #io 2024-05-01T12:00:00.125Z] heading drift 3.5 deg
/// [INFO 2024-05-01T12:00:00.130Z] started
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFormatter {
    /// Append ` (file.rs:line)` when the record has a source location.
    pub location: bool,
}

impl DefaultFormatter {
    pub fn with_location() -> Self {
        Self { location: true }
    }
}

impl Formatter for DefaultFormatter {
    fn format(&self, record: &LogRecord, registry: &Registry, locale: &LocaleConfig, out: &mut String) -> fmt::Result {
        out.push('[');
        out.push_str(record.severity().code());
        match registry.channel_name(record.channel()) {
            Some("") | None => {}
            Some(name) => {
                out.push(' ');
                out.push_str(name);
            }
        }
        for tag in registry.tag_names(record.tags()) {
            out.push_str(" #");
            out.push_str(tag);
        }
        out.push(' ');
        clock::write_time(out, record.timestamp_ns(), locale.time_precision, locale.time_format)?;
        out.push_str("] ");
        record.write_message(out)?;
        if self.location {
            if let Some(loc) = record.location() {
                write!(out, " ({}:{})", loc.file_name(), loc.line)?;
            }
        }
        Ok(())
    }
}

/// Only the message text.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageOnlyFormatter;

impl Formatter for MessageOnlyFormatter {
    fn format(&self, record: &LogRecord, _registry: &Registry, _locale: &LocaleConfig, out: &mut String) -> fmt::Result {
        record.write_message(out)
    }
}
