/// Captures the call site as a [`SourceLocation`](crate::record::SourceLocation).
#[macro_export]
macro_rules! source_location {
    () => {
        $crate::record::SourceLocation {
            file: file!(),
            line: line!(),
            module: module_path!(),
        }
    };
}

/// Logs a record with `format!`-style arguments.
///
/// The filter runs before the arguments are evaluated or formatted, so a
/// disabled call costs one atomic load per check.
///
/// # Examples
///
/// ```
/// use async_logger::{log_record, Logger, Severity};
/// use async_logger::registry::ChannelId;
///
/// let logger = Logger::builder().start()?;
/// let speed = 3.5;
/// let _ = log_record!(logger, Severity::Info, ChannelId::DEFAULT, "speed {:.1} m/s", speed);
/// logger.shutdown();
/// # Ok::<(), async_logger::ConfigError>(())
/// ```
#[macro_export]
macro_rules! log_record {
    ($logger:expr, $severity:expr, $channel:expr, $($fmt:tt)+) => {
        $crate::log_tagged!($logger, $severity, $channel, $crate::registry::TagSet::EMPTY; $($fmt)+)
    };
}

/// Like [`log_record!`] with a tag set before the format string.
#[macro_export]
macro_rules! log_tagged {
    ($logger:expr, $severity:expr, $channel:expr, $tags:expr; $($fmt:tt)+) => {{
        let logger = &$logger;
        let (severity, channel, tags) = ($severity, $channel, $tags);
        if logger.should_log(severity, channel, tags) {
            logger.log(
                severity,
                channel,
                tags,
                Some($crate::source_location!()),
                format_args!($($fmt)+),
            )
        } else {
            $crate::Outcome::Filtered
        }
    }};
}

/// Logs a static format string with typed arguments that are rendered later
/// on the logging thread. Each argument must convert into
/// [`Arg`](crate::record::Arg).
///
/// ```
/// use async_logger::{log_structured, Logger, Severity};
/// use async_logger::registry::ChannelId;
///
/// let logger = Logger::builder().start()?;
/// let _ = log_structured!(logger, Severity::Warn, ChannelId::DEFAULT, "cell {} at {}V", 3u8, 3.61);
/// logger.shutdown();
/// # Ok::<(), async_logger::ConfigError>(())
/// ```
#[macro_export]
macro_rules! log_structured {
    ($logger:expr, $severity:expr, $channel:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        let logger = &$logger;
        let (severity, channel) = ($severity, $channel);
        let tags = $crate::registry::TagSet::EMPTY;
        if logger.should_log(severity, channel, tags) {
            logger.log_structured(
                severity,
                channel,
                tags,
                Some($crate::source_location!()),
                $fmt,
                &[$($crate::record::Arg::from($arg)),*],
            )
        } else {
            $crate::Outcome::Filtered
        }
    }};
}
