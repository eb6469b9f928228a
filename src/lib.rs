//! # Async Logger
//!
//! A logging engine for latency-sensitive programs such as control loops,
//! where a log call must never block, never allocate and never stall the
//! calling thread behind disk or network I/O.
//!
//! ## Key Features
//!
//! * Fixed-capacity pool of preallocated records; the hot path only copies
//! * Bounded lock-free queue between application threads and one logging thread
//! * Per-channel thresholds and tag allow/deny rules checked with integer compares
//! * Lossy under overload: drops are counted, never raised
//! * A separate path that is safe to call from inside a signal handler
//! * Optional drain of queued records when the process gets a termination signal
//! * Console, rotating file, binary, syslog and journald sinks
//!
//! ## Main Components
//!
//! * [`Logger`]: producer handle, created by [`LoggerBuilder`] or [`LoggerConfig`]
//! * [`pool::RecordPool`]: the record slots and their ownership handles
//! * [`queue::TransferQueue`]: the bounded queue drained by the dispatcher
//! * [`sink::Sink`]: the destination interface and its implementations
//! * [`signal::SignalLogger`]: the restricted producer for signal handlers
//! * [`binary_reader::BinaryReader`]: decoder for files of the binary sink
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use async_logger::{log_record, log_tagged, LoggerBuilder, Severity};
//! use async_logger::sink::MemorySink;
//!
//! let sink = Arc::new(MemorySink::new("mem"));
//! let mut builder = LoggerBuilder::new().pool_capacity(256).queue_capacity(256);
//! let nav = builder.channel_threshold("nav", Severity::Info)?;
//! builder.tag("odometry")?;
//! let logger = builder.sink(sink.clone()).start()?;
//!
//! let odometry = logger.tags(&["odometry"])?;
//! let _ = log_record!(logger, Severity::Info, nav, "heading {} deg", 270);
//! let _ = log_tagged!(logger, Severity::Warn, nav, odometry; "drift {:.2} m", 0.25);
//! let _ = log_record!(logger, Severity::Debug, nav, "filtered out");
//!
//! let report = logger.shutdown();
//! assert_eq!(report.delivered, 2);
//! assert_eq!(sink.messages(), vec!["heading 270 deg", "drift 0.25 m"]);
//! # Ok::<(), async_logger::ConfigError>(())
//! ```

#[macro_use]
mod macros;

pub mod binary_reader;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod format;
pub mod logger;
pub mod pool;
pub mod queue;
pub mod record;
pub mod registry;
pub mod severity;
pub mod signal;
pub mod sink;
pub mod stats;
pub mod termination;

pub use bridge::LogBridge;
pub use config::{LoggerConfig, SinkConfig};
pub use dispatcher::{Diagnostic, DiagnosticHook};
pub use error::{ConfigError, PoolExhausted, QueueError, SinkError};
pub use logger::{DropReason, Logger, LoggerBuilder, Outcome, OverflowPolicy, ShutdownReport};
pub use record::{Arg, SourceLocation};
pub use registry::{ChannelId, TagId, TagSet};
pub use severity::Severity;
pub use signal::SignalLogger;
pub use stats::{global_dropped_count, StatsSnapshot};
