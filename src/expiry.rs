//! Expiry rules shared by the store, the sweeper and the reaper.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

/// Sentinel expire value: delete after the first successful download.
pub const ASAP: &str = "asap";

static DURATION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)([dhms])").expect("duration token pattern is valid")
});

/// Convert a duration string like `2h4m10s` or `1d` into seconds.
///
/// Parsing is lenient: anything that is not a `<digits><unit>` token is
/// skipped, so malformed input yields a smaller (possibly zero) total
/// instead of an error.
pub fn duration_to_seconds(duration: &str) -> u64 {
    DURATION_TOKEN
        .captures_iter(duration)
        .map(|caps| {
            let value: u64 = caps[1].parse().unwrap_or(u64::MAX);
            let unit = match &caps[2] {
                "d" => 86_400,
                "h" => 3_600,
                "m" => 60,
                _ => 1,
            };
            value.saturating_mul(unit)
        })
        .fold(0u64, u64::saturating_add)
}

/// Number of seconds a record with the given expire value may live.
pub fn threshold_seconds(expire: &str, default_expire_secs: u64) -> u64 {
    if expire == ASAP {
        default_expire_secs
    } else {
        duration_to_seconds(expire)
    }
}

/// `true` once `now - created >= threshold`.
///
/// `asap` records use the server-wide default as their threshold here; the
/// delete-after-first-download rule is enforced separately by the reaper.
pub fn is_expired(
    created: DateTime<Utc>,
    expire: &str,
    default_expire_secs: u64,
    now: DateTime<Utc>,
) -> bool {
    let threshold = threshold_seconds(expire, default_expire_secs);
    let age = now.timestamp().saturating_sub(created.timestamp());
    age >= 0 && age as u64 >= threshold
}

/// Accepts `asap` or a string made only of digits and duration units.
pub fn is_valid_expire(expire: &str) -> bool {
    expire == ASAP
        || (!expire.is_empty()
            && expire
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, 'd' | 'h' | 'm' | 's')))
}
