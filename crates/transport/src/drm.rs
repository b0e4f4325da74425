//! Connection token generation with clock-skew correction
//!
//! Every channel open carries a token derived from the wall clock,
//! aligned to a 5-minute window of server time. Clients within ±150s of
//! the server succeed immediately; a drifted clock is corrected from the
//! server date on the first authentication failure.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use readaloud_core::{Error, Result};

/// Fixed token the service issues to the Edge browser build.
pub const TRUSTED_CLIENT_TOKEN: &str = "6A5AA1D4EAFF4E9FB37E23D68491D6F4";

/// Seconds from the Windows file-time epoch (1601-01-01) to the Unix epoch.
const WINDOWS_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// Tokens are valid for a 5-minute window of server time.
const TOKEN_WINDOW_SECS: i64 = 300;

/// 100-ns ticks per second, the unit of Windows file time.
const TICKS_PER_SECOND: i128 = 10_000_000;

/// Process-wide clock skew, shared by every job so a learned offset
/// benefits later connections.
static CLOCK_SKEW_SECONDS: Mutex<f64> = Mutex::new(0.0);

/// The accumulated clock skew in seconds.
pub fn clock_skew_seconds() -> f64 {
    *CLOCK_SKEW_SECONDS.lock()
}

/// Add `delta_seconds` to the accumulated clock skew.
pub fn adjust_clock_skew(delta_seconds: f64) {
    let mut skew = CLOCK_SKEW_SECONDS.lock();
    *skew += delta_seconds;
    tracing::debug!(delta_seconds, total_seconds = *skew, "adjusted clock skew");
}

/// Current Unix time corrected by the accumulated skew.
fn corrected_unix_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0 + clock_skew_seconds()
}

/// Generate a fresh token from the corrected wall clock.
pub fn generate_token() -> String {
    token_for(corrected_unix_seconds())
}

/// Generate the token for a given corrected Unix time.
///
/// The time is shifted to the Windows file-time epoch, floored to the
/// nearest 300-second boundary, converted to 100-ns ticks, concatenated
/// with the trusted client token and hashed with SHA-256.
pub fn token_for(unix_seconds: f64) -> String {
    let windows_secs = unix_seconds.floor() as i64 + WINDOWS_EPOCH_OFFSET_SECS;
    let bucket = windows_secs - windows_secs.rem_euclid(TOKEN_WINDOW_SECS);
    let ticks = i128::from(bucket) * TICKS_PER_SECOND;

    let mut hasher = Sha256::new();
    hasher.update(format!("{ticks}{TRUSTED_CLIENT_TOKEN}").as_bytes());
    let digest = hasher.finalize();

    let mut token = String::with_capacity(64);
    for byte in digest {
        let _ = write!(token, "{byte:02X}");
    }
    token
}

/// Correct the clock skew from the `Date` header of a rejecting response.
///
/// Returns the applied delta in seconds. A missing or unparsable date
/// makes the authentication failure fatal.
pub fn adjust_from_server_date(server_date: Option<&str>) -> Result<f64> {
    let Some(date) = server_date else {
        return Err(Error::Drm {
            reason: "authentication was rejected and no server date was available to correct \
                     clock skew"
                .to_string(),
            server_date: None,
        });
    };
    let parsed = DateTime::parse_from_rfc2822(date).map_err(|_| Error::Drm {
        reason: format!("could not parse server date '{date}'"),
        server_date: Some(date.to_string()),
    })?;

    let server_seconds = parsed.timestamp_millis() as f64 / 1000.0;
    let delta = server_seconds - corrected_unix_seconds();
    adjust_clock_skew(delta);
    tracing::info!(delta_seconds = delta, "corrected clock skew from server date");
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = token_for(1_700_000_000.0);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(token, token.to_uppercase());
    }

    #[test]
    fn test_token_stable_within_window() {
        // 1_699_999_800 starts a 300s bucket once shifted to the Windows
        // epoch (both values are divisible by 300).
        let base = 1_699_999_800.0;
        assert_eq!(token_for(base), token_for(base + 299.0));
        assert_ne!(token_for(base), token_for(base + 300.0));
    }

    #[test]
    fn test_subsecond_time_does_not_change_token() {
        assert_eq!(token_for(1_700_000_000.25), token_for(1_700_000_000.75));
    }

    // Serialized in one test: the skew counter is process-wide.
    #[test]
    fn test_skew_adjustment_and_server_date() {
        let before = clock_skew_seconds();
        adjust_clock_skew(42.0);
        assert!((clock_skew_seconds() - before - 42.0).abs() < 1e-9);
        adjust_clock_skew(-42.0);

        // A server date ~600s ahead of the corrected clock.
        let ahead = Utc::now() + chrono::Duration::seconds(600);
        let header = ahead.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let start = clock_skew_seconds();
        let delta = adjust_from_server_date(Some(&header)).unwrap();
        assert!((delta - 600.0).abs() < 5.0, "delta was {delta}");
        assert!((clock_skew_seconds() - start - delta).abs() < 1e-6);
        adjust_clock_skew(-delta);

        // Missing or garbage dates are fatal.
        assert!(adjust_from_server_date(None).is_err());
        assert!(adjust_from_server_date(Some("not a date")).is_err());
    }
}
