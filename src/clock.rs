//! Timestamp and thread identity helpers.
//!
//! Everything called on the producer side of this module is safe to call
//! from inside a signal handler: reading the clock is a `clock_gettime`
//! call and the thread id lives in a const-initialised thread local with no
//! destructor.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

/// Nanoseconds since the Unix epoch.
///
/// A clock set before 1970 reads as 0.
#[inline]
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Small process-unique id for the calling thread, assigned on first use.
///
/// # Examples
///
/// ```
/// # use async_logger::clock::thread_id;
/// let here = thread_id();
/// assert_eq!(here, thread_id());
/// let there = std::thread::spawn(thread_id).join().unwrap();
/// assert_ne!(here, there);
/// ```
#[inline]
pub fn thread_id() -> u64 {
    THREAD_ID.with(|id| {
        let current = id.get();
        if current != 0 {
            return current;
        }
        let assigned = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        id.set(assigned);
        assigned
    })
}

/// Layout of rendered timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFormat {
    /// `YYYY-MM-DD hh:mm:ss.fZ`
    FullSpace,
    /// `YYYYMMDDThhmmss.fZ`
    Compact,
    /// `YYYY-MM-DDThh:mm:ss.fZ`
    #[default]
    FullT,
}

/// Writes `nanos` as a UTC ISO 8601 timestamp.
///
/// `precision` is the number of fractional second digits, clamped to 0..=9.
///
/// # Examples
///
/// ```
/// # use async_logger::clock::{write_time, TimeFormat};
/// let mut out = String::new();
/// write_time(&mut out, 1_500_000_000, 3, TimeFormat::FullT).unwrap();
/// assert_eq!(out, "1970-01-01T00:00:01.500Z");
/// ```
pub fn write_time<W: fmt::Write>(out: &mut W, nanos: u64, precision: u8, format: TimeFormat) -> fmt::Result {
    const NANOS_PER_SEC: u64 = 1_000_000_000;
    let precision = precision.min(9) as u32;
    let secs = (nanos / NANOS_PER_SEC) as i64;
    let remainder = (nanos % NANOS_PER_SEC) as u32;

    let Some(time) = DateTime::from_timestamp(secs, remainder) else {
        return Err(fmt::Error);
    };
    let pattern = match format {
        TimeFormat::FullSpace => "%Y-%m-%d %H:%M:%S",
        TimeFormat::Compact => "%Y%m%dT%H%M%S",
        TimeFormat::FullT => "%Y-%m-%dT%H:%M:%S",
    };
    write!(out, "{}", time.format(pattern))?;
    if precision > 0 {
        let fraction = remainder / 10u32.pow(9 - precision);
        write!(out, ".{:0width$}", fraction, width = precision as usize)?;
    }
    out.write_char('Z')
}
