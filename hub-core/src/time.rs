//! Farcaster epoch time helpers.
//!
//! All in-message timestamps are milliseconds since the Farcaster epoch,
//! 2021-01-01T00:00:00Z, carried as `u32` on the wire and widened to `u64`
//! for arithmetic.

use std::time::{SystemTime, UNIX_EPOCH};

/// The Farcaster epoch, in milliseconds since the Unix epoch.
pub const FARCASTER_EPOCH_MS: u64 = 1_609_459_200_000;

/// Milliseconds since the Farcaster epoch, saturating at zero for clocks
/// behind the epoch.
pub fn now_ms() -> u64 {
    let unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    unix_ms.saturating_sub(FARCASTER_EPOCH_MS)
}

/// Convert a Farcaster timestamp to milliseconds since the Unix epoch.
pub fn to_unix_ms(timestamp: u64) -> u64 {
    FARCASTER_EPOCH_MS + timestamp
}

/// Age of a timestamp relative to `now`, zero if the timestamp is in the
/// future.
pub fn age_ms(timestamp: u32, now: u64) -> u64 {
    now.saturating_sub(timestamp as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_roundtrip() {
        assert_eq!(to_unix_ms(0), FARCASTER_EPOCH_MS);
        assert_eq!(to_unix_ms(1_000), FARCASTER_EPOCH_MS + 1_000);
    }

    #[test]
    fn test_age_saturates() {
        assert_eq!(age_ms(5_000, 2_000), 0);
        assert_eq!(age_ms(2_000, 5_000), 3_000);
    }
}
