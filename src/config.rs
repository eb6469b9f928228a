//! Declarative logger configuration.
//!
//! [`LoggerConfig`] mirrors the knobs of [`LoggerBuilder`] in a form that
//! deserializes with serde. Every field has a default, so a config file only
//! needs to mention what it changes:
//!
//! ```
//! # use async_logger::config::LoggerConfig;
//! let config = LoggerConfig::from_json_str(r#"{
//!     "pool_capacity": 256,
//!     "channels": [{ "name": "nav", "threshold": "warn" }, { "name": "io" }],
//!     "tags": ["net"],
//!     "sinks": [
//!         { "kind": "console", "target": "stderr", "threshold": "error" },
//!         { "kind": "null" }
//!     ]
//! }"#).unwrap();
//! assert_eq!(config.pool_capacity, 256);
//! assert_eq!(config.queue_capacity, 1024);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SinkError};
use crate::format::LocaleConfig;
use crate::logger::{Logger, LoggerBuilder, OverflowPolicy};
use crate::registry::Registry;
use crate::severity::Severity;
use crate::sink::{
    BinarySink, ConsoleSink, ConsoleTarget, FileSink, FileSinkOptions, JournaldSink, NullSink, Sink, SinkFilter,
    SyslogFacility, SyslogFormat, SyslogSink, SyslogTransport,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub pool_capacity: usize,
    pub signal_reserve: usize,
    /// Message bytes per pool slot.
    pub message_capacity: usize,
    pub queue_capacity: usize,
    pub default_threshold: Severity,
    pub channels: Vec<ChannelConfig>,
    pub tags: Vec<String>,
    pub allow_tags: Vec<String>,
    pub deny_tags: Vec<String>,
    pub overflow: OverflowPolicy,
    pub shutdown_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub locale: LocaleConfig,
    /// Drain the queue on `SIGTERM`, `SIGINT`, `SIGQUIT` and `SIGHUP`.
    pub drain_on_termination: bool,
    pub sinks: Vec<SinkConfig>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 1024,
            signal_reserve: 16,
            message_capacity: 512,
            queue_capacity: 1024,
            default_threshold: Severity::Info,
            channels: Vec::new(),
            tags: Vec::new(),
            allow_tags: Vec::new(),
            deny_tags: Vec::new(),
            overflow: OverflowPolicy::Drop,
            shutdown_timeout_ms: 2000,
            poll_interval_ms: 50,
            locale: LocaleConfig::default(),
            drain_on_termination: false,
            sinks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    /// Falls back to the default threshold when absent.
    #[serde(default)]
    pub threshold: Option<Severity>,
}

impl LoggerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// A builder carrying this configuration, ready for programmatic
    /// additions such as extra sinks or a diagnostic hook.
    pub fn builder(self) -> Result<LoggerBuilder, ConfigError> {
        let mut builder = LoggerBuilder::new()
            .pool_capacity(self.pool_capacity)
            .signal_reserve(self.signal_reserve)
            .message_capacity(self.message_capacity)
            .queue_capacity(self.queue_capacity)
            .default_threshold(self.default_threshold)
            .allow_tags(self.allow_tags)
            .deny_tags(self.deny_tags)
            .overflow(self.overflow)
            .shutdown_timeout(Duration::from_millis(self.shutdown_timeout_ms))
            .poll_interval(Duration::from_millis(self.poll_interval_ms))
            .locale(self.locale)
            .drain_on_termination(self.drain_on_termination);
        for channel in &self.channels {
            match channel.threshold {
                Some(threshold) => builder.channel_threshold(&channel.name, threshold)?,
                None => builder.channel(&channel.name)?,
            };
        }
        for tag in &self.tags {
            builder.tag(tag)?;
        }
        for sink in self.sinks {
            builder = builder.sink_config(sink);
        }
        Ok(builder)
    }

    pub fn start(self) -> Result<Logger, ConfigError> {
        self.builder()?.start()
    }
}

/// Sink acceptance rule by name; resolved against the registry at start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkFilterConfig {
    pub threshold: Option<Severity>,
    /// Empty means every channel.
    pub channels: Vec<String>,
    pub any_tags: Vec<String>,
    pub no_tags: Vec<String>,
}

impl SinkFilterConfig {
    pub fn resolve(&self, registry: &Registry) -> Result<SinkFilter, ConfigError> {
        let mut filter = SinkFilter::new()
            .threshold(self.threshold.unwrap_or(Severity::Trace))
            .any_tags(registry.tag_set(&self.any_tags)?)
            .no_tags(registry.tag_set(&self.no_tags)?);
        if !self.channels.is_empty() {
            let channels = self
                .channels
                .iter()
                .map(|name| {
                    registry
                        .channel_id(name)
                        .ok_or_else(|| ConfigError::UnknownChannel(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            filter = filter.channels(channels);
        }
        Ok(filter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyslogTransportKind {
    Udp,
    #[default]
    Unix,
}

/// One sink, selected by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    Console {
        #[serde(default)]
        target: ConsoleTarget,
        #[serde(flatten)]
        filter: SinkFilterConfig,
    },
    File {
        directory: PathBuf,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        extension: Option<String>,
        #[serde(default)]
        max_file_size: Option<u64>,
        #[serde(default)]
        echo: bool,
        #[serde(flatten)]
        filter: SinkFilterConfig,
    },
    Binary {
        directory: PathBuf,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        max_file_size: Option<u64>,
        #[serde(default)]
        compress: bool,
        #[serde(flatten)]
        filter: SinkFilterConfig,
    },
    Syslog {
        #[serde(default)]
        transport: SyslogTransportKind,
        /// `host:port` for UDP, a socket path for Unix. Defaults to `/dev/log`.
        #[serde(default)]
        address: Option<String>,
        #[serde(default)]
        format: SyslogFormat,
        #[serde(default)]
        facility: Option<u8>,
        #[serde(default)]
        app_name: Option<String>,
        #[serde(flatten)]
        filter: SinkFilterConfig,
    },
    Journald {
        #[serde(default)]
        socket: Option<PathBuf>,
        #[serde(default)]
        identifier: Option<String>,
        #[serde(flatten)]
        filter: SinkFilterConfig,
    },
    Null,
}

fn file_options(directory: &Path, name: &Option<String>, max_file_size: Option<u64>) -> FileSinkOptions {
    let mut options = FileSinkOptions {
        directory: directory.to_path_buf(),
        ..FileSinkOptions::default()
    };
    if let Some(name) = name {
        options.name = name.clone();
    }
    if let Some(max) = max_file_size {
        options.max_file_size = max;
    }
    options
}

impl SinkConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkConfig::Console { .. } => "console",
            SinkConfig::File { .. } => "file",
            SinkConfig::Binary { .. } => "binary",
            SinkConfig::Syslog { .. } => "syslog",
            SinkConfig::Journald { .. } => "journald",
            SinkConfig::Null => "null",
        }
    }

    /// Constructs the sink, resolving filter names against `registry`.
    pub fn build(&self, registry: &Registry) -> Result<Arc<dyn Sink>, ConfigError> {
        let failed = |err: std::io::Error| ConfigError::Sink {
            name: self.kind().to_owned(),
            source: SinkError::Io(err),
        };
        let sink: Arc<dyn Sink> = match self {
            SinkConfig::Console { target, filter } => {
                Arc::new(ConsoleSink::new(*target).with_filter(filter.resolve(registry)?))
            }
            SinkConfig::File {
                directory,
                name,
                extension,
                max_file_size,
                echo,
                filter,
            } => {
                let mut options = file_options(directory, name, *max_file_size);
                options.echo = *echo;
                if let Some(extension) = extension {
                    options.extension = extension.clone();
                }
                Arc::new(
                    FileSink::new(options)
                        .map_err(failed)?
                        .with_filter(filter.resolve(registry)?),
                )
            }
            SinkConfig::Binary {
                directory,
                name,
                max_file_size,
                compress,
                filter,
            } => {
                let options = file_options(directory, name, *max_file_size);
                Arc::new(
                    BinarySink::new(options, *compress)
                        .map_err(failed)?
                        .with_filter(filter.resolve(registry)?),
                )
            }
            SinkConfig::Syslog {
                transport,
                address,
                format,
                facility,
                app_name,
                filter,
            } => {
                let transport = match (transport, address) {
                    (SyslogTransportKind::Udp, Some(address)) => SyslogTransport::Udp(address.clone()),
                    (SyslogTransportKind::Udp, None) => SyslogTransport::Udp("127.0.0.1:514".to_owned()),
                    (SyslogTransportKind::Unix, Some(path)) => SyslogTransport::Unix(PathBuf::from(path)),
                    (SyslogTransportKind::Unix, None) => SyslogTransport::default(),
                };
                let mut sink = SyslogSink::new(transport)
                    .with_format(*format)
                    .with_filter(filter.resolve(registry)?);
                if let Some(code) = facility {
                    sink = sink.with_facility(SyslogFacility::new(*code));
                }
                if let Some(app_name) = app_name {
                    sink = sink.with_app_name(app_name.clone());
                }
                Arc::new(sink)
            }
            SinkConfig::Journald {
                socket,
                identifier,
                filter,
            } => {
                let mut sink = match socket {
                    Some(path) => JournaldSink::with_socket(path.clone()),
                    None => JournaldSink::new(),
                };
                if let Some(identifier) = identifier {
                    sink = sink.with_identifier(identifier.clone());
                }
                Arc::new(sink.with_filter(filter.resolve(registry)?))
            }
            SinkConfig::Null => Arc::new(NullSink),
        };
        Ok(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;

    #[test]
    fn test_defaults() {
        let config = LoggerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, LoggerConfig::default());
        assert_eq!(config.overflow, OverflowPolicy::Drop);
        assert_eq!(config.locale.time_precision, 3);
        assert!(!config.drain_on_termination);
    }

    #[test]
    fn test_sink_kinds_parse() {
        let config = LoggerConfig::from_json_str(
            r#"{
                "overflow": "sync_write",
                "drain_on_termination": true,
                "sinks": [
                    { "kind": "file", "directory": "/tmp/logs", "max_file_size": 4096, "channels": ["nav"] },
                    { "kind": "binary", "directory": "/tmp/logs", "compress": true },
                    { "kind": "syslog", "transport": "udp", "address": "10.0.0.1:514", "format": "rfc3164" },
                    { "kind": "journald", "identifier": "rover", "no_tags": ["noisy"] }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.overflow, OverflowPolicy::SyncWrite);
        assert!(config.drain_on_termination);
        assert_eq!(config.sinks.len(), 4);
        match &config.sinks[0] {
            SinkConfig::File {
                max_file_size, filter, ..
            } => {
                assert_eq!(*max_file_size, Some(4096));
                assert_eq!(filter.channels, vec!["nav".to_owned()]);
            }
            other => panic!("unexpected sink {:?}", other),
        }
        assert_eq!(config.sinks[2].kind(), "syslog");
    }

    #[test]
    fn test_bad_json_is_a_parse_error() {
        assert!(matches!(
            LoggerConfig::from_json_str(r#"{ "pool_capacity": "lots" }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_filter_names_must_exist() {
        let mut builder = RegistryBuilder::new();
        builder.channel("nav").unwrap();
        let registry = builder.build();

        let known = SinkFilterConfig {
            channels: vec!["nav".into()],
            ..Default::default()
        };
        assert!(known.resolve(&registry).is_ok());

        let unknown = SinkFilterConfig {
            channels: vec!["sonar".into()],
            ..Default::default()
        };
        assert!(matches!(
            unknown.resolve(&registry),
            Err(ConfigError::UnknownChannel(name)) if name == "sonar"
        ));
    }
}
