//! Time helpers shared across the wire layer

use chrono::Utc;

/// 100-nanosecond ticks per second, the service's time unit.
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// 100-nanosecond ticks per millisecond.
pub const TICKS_PER_MILLISECOND: u64 = 10_000;

/// Javascript-style date string used in `X-Timestamp` headers.
///
/// The service expects the fixed `GMT+0000 (Coordinated Universal Time)`
/// suffix regardless of the local timezone.
pub fn js_date_string() -> String {
    Utc::now()
        .format("%a %b %d %Y %H:%M:%S GMT+0000 (Coordinated Universal Time)")
        .to_string()
}
