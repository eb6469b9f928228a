//! Adapter that routes the `log` crate facade into a [`Logger`].
//!
//! A record's target selects the channel when a channel of that name is
//! registered; anything else lands on the default channel.

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::logger::Logger;
use crate::record::SourceLocation;
use crate::registry::{ChannelId, TagSet};
use crate::severity::Severity;

pub struct LogBridge {
    logger: Logger,
}

impl LogBridge {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    fn channel(&self, target: &str) -> ChannelId {
        self.logger.channel(target).unwrap_or(ChannelId::DEFAULT)
    }

    /// Installs the bridge as the process-wide `log` logger.
    ///
    /// Fails if another logger was installed first.
    pub fn install(self, max_level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.logger.should_log(
            Severity::from(metadata.level()),
            self.channel(metadata.target()),
            TagSet::EMPTY,
        )
    }

    fn log(&self, record: &Record<'_>) {
        let severity = Severity::from(record.level());
        let channel = self.channel(record.target());
        if !self.logger.should_log(severity, channel, TagSet::EMPTY) {
            return;
        }
        let location = match (record.file_static(), record.line()) {
            (Some(file), Some(line)) => Some(SourceLocation {
                file,
                line,
                module: record.module_path_static().unwrap_or(""),
            }),
            _ => None,
        };
        let _ = self
            .logger
            .log(severity, channel, TagSet::EMPTY, location, *record.args());
    }

    /// Asks the dispatcher to flush the sinks after what is already queued.
    fn flush(&self) {
        self.logger.request_flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LoggerBuilder;
    use crate::sink::MemorySink;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_target_selects_channel() {
        let sink = Arc::new(MemorySink::new("mem"));
        let mut builder = LoggerBuilder::new().default_threshold(Severity::Debug);
        let nav = builder.channel("nav").unwrap();
        let logger = builder.sink(sink.clone()).start().unwrap();
        let bridge = LogBridge::new(logger.clone());

        bridge.log(
            &Record::builder()
                .level(log::Level::Warn)
                .target("nav")
                .args(format_args!("wheel slip {}", 2))
                .file_static(Some("src/nav.rs"))
                .line(Some(17))
                .build(),
        );
        bridge.log(
            &Record::builder()
                .level(log::Level::Info)
                .target("elsewhere")
                .args(format_args!("hello"))
                .build(),
        );
        bridge.log(
            &Record::builder()
                .level(log::Level::Trace)
                .target("nav")
                .args(format_args!("too quiet"))
                .build(),
        );

        logger.shutdown();
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].channel, nav);
        assert_eq!(records[0].severity, Severity::Warn);
        assert_eq!(records[0].message, "wheel slip 2");
        assert_eq!(records[0].location.map(|l| l.line), Some(17));
        assert_eq!(records[1].channel, ChannelId::DEFAULT);
    }

    #[test]
    fn test_flush_reaches_sinks() {
        let sink = Arc::new(MemorySink::new("mem"));
        let logger = LoggerBuilder::new()
            .poll_interval(Duration::from_secs(5))
            .sink(sink.clone())
            .start()
            .unwrap();
        let bridge = LogBridge::new(logger.clone());

        // Nothing logged, so only an explicit request flushes.
        bridge.flush();
        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.flush_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sink.flush_count(), 1);
        logger.shutdown();
    }
}
