use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use super::{FormattedRecord, Sink, SinkFilter};
use crate::error::SinkError;
use crate::registry::{ChannelId, TagSet};
use crate::severity::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleTarget {
    #[default]
    Stdout,
    Stderr,
}

/// One formatted line per record on stdout or stderr.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    target: ConsoleTarget,
    filter: SinkFilter,
}

impl ConsoleSink {
    pub fn new(target: ConsoleTarget) -> Self {
        Self {
            target,
            filter: SinkFilter::default(),
        }
    }

    pub fn stdout() -> Self {
        Self::new(ConsoleTarget::Stdout)
    }

    pub fn stderr() -> Self {
        Self::new(ConsoleTarget::Stderr)
    }

    pub fn with_filter(mut self, filter: SinkFilter) -> Self {
        self.filter = filter;
        self
    }
}

pub(super) fn write_line<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")
}

impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        match self.target {
            ConsoleTarget::Stdout => "stdout",
            ConsoleTarget::Stderr => "stderr",
        }
    }

    fn accepts(&self, severity: Severity, channel: ChannelId, tags: TagSet) -> bool {
        self.filter.accepts(severity, channel, tags)
    }

    fn write(&self, record: &FormattedRecord<'_>) -> Result<(), SinkError> {
        match self.target {
            ConsoleTarget::Stdout => write_line(&mut io::stdout().lock(), record.text)?,
            ConsoleTarget::Stderr => write_line(&mut io::stderr().lock(), record.text)?,
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        match self.target {
            ConsoleTarget::Stdout => io::stdout().flush()?,
            ConsoleTarget::Stderr => io::stderr().flush()?,
        }
        Ok(())
    }
}
