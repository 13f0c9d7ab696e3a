//! Duration strings for mute expiry and read-history windows.
//!
//! The two grammars differ: mute accepts `w` and `forever`, read windows
//! accept neither.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::CoreError;

/// Matches: "30m", "8h", "1d", "2w"
static MUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([mhdw])$").expect("valid mute regex"));

/// Matches: "30m", "1h", "7d"
static OFFSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([mhd])$").expect("valid offset regex"));

/// Expiry value the backend reads as "muted indefinitely".
pub const MUTE_FOREVER: i32 = i32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MuteDuration {
    pub seconds: i64,
    pub is_forever: bool,
    label_value: i64,
    label_unit: char,
}

impl MuteDuration {
    pub fn forever() -> Self {
        Self {
            seconds: 0,
            is_forever: true,
            label_value: 0,
            label_unit: ' ',
        }
    }

    /// Absolute expiry to send to the backend, clamped to the 32-bit range.
    pub fn mute_until(&self, now: DateTime<Utc>) -> i32 {
        if self.is_forever {
            return MUTE_FOREVER;
        }
        let until = now.timestamp().saturating_add(self.seconds);
        i32::try_from(until).unwrap_or(MUTE_FOREVER)
    }

    /// "forever" or "for 2h".
    pub fn describe(&self) -> String {
        if self.is_forever {
            "forever".to_string()
        } else {
            format!("for {}{}", self.label_value, self.label_unit)
        }
    }
}

/// Parses `forever` or `<positive integer><m|h|d|w>`.
pub fn parse_mute_duration(input: &str) -> Result<MuteDuration, CoreError> {
    let raw = input.trim();
    let lower = raw.to_lowercase();
    if lower == "forever" {
        return Ok(MuteDuration::forever());
    }

    let invalid = || {
        CoreError::InvalidDuration(format!(
            "{raw:?}. Use a number with m, h, d or w (e.g. 30m, 8h, 1w), or forever"
        ))
    };

    let caps = MUTE_RE.captures(&lower).ok_or_else(invalid)?;
    let value: i64 = caps[1].parse().map_err(|_| invalid())?;
    if value < 1 {
        return Err(invalid());
    }
    let unit = caps[2].chars().next().ok_or_else(invalid)?;
    let seconds = value.checked_mul(unit_seconds(unit)).ok_or_else(invalid)?;

    Ok(MuteDuration {
        seconds,
        is_forever: false,
        label_value: value,
        label_unit: unit,
    })
}

/// Parses a read-window offset (`<n><m|h|d>`) and returns `now` minus it.
pub fn parse_time_offset(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
    let raw = input.trim();
    let invalid = || {
        CoreError::InvalidDuration(format!(
            "invalid time offset {raw:?}. Use format like \"1h\", \"30m\", \"7d\""
        ))
    };

    let caps = OFFSET_RE.captures(raw).ok_or_else(invalid)?;
    let value: i64 = caps[1].parse().map_err(|_| invalid())?;
    let unit = caps[2].chars().next().ok_or_else(invalid)?;
    let seconds = value.checked_mul(unit_seconds(unit)).ok_or_else(invalid)?;
    let offset = Duration::try_seconds(seconds).ok_or_else(invalid)?;
    now.checked_sub_signed(offset).ok_or_else(invalid)
}

fn unit_seconds(unit: char) -> i64 {
    match unit {
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        _ => 604_800,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 15, 4, 5)
            .single()
            .expect("valid datetime")
    }

    #[test]
    fn forever_is_flagged() {
        let duration = parse_mute_duration("forever").expect("forever");
        assert!(duration.is_forever);
        assert_eq!(duration.mute_until(test_now()), i32::MAX);
        assert_eq!(duration.describe(), "forever");
        assert!(parse_mute_duration(" Forever ").expect("case").is_forever);
    }

    #[test]
    fn units_convert_to_seconds() {
        let two_hours = parse_mute_duration("2h").expect("2h");
        assert_eq!(two_hours.seconds, 7200);
        assert!(!two_hours.is_forever);
        assert_eq!(two_hours.describe(), "for 2h");

        assert_eq!(parse_mute_duration("30m").expect("30m").seconds, 1800);
        assert_eq!(parse_mute_duration("1d").expect("1d").seconds, 86_400);
        assert_eq!(parse_mute_duration("1w").expect("1w").seconds, 604_800);
    }

    #[test]
    fn mute_until_is_relative_to_now() {
        let now = test_now();
        let duration = parse_mute_duration("8h").expect("8h");
        assert_eq!(duration.mute_until(now) as i64, now.timestamp() + 8 * 3600);
    }

    #[test]
    fn rejects_malformed_durations() {
        for input in ["3x", "0", "0m", "", "h", "-1h", "1.5h", "1 h", "never"] {
            let err = parse_mute_duration(input).expect_err(input);
            assert!(matches!(err, CoreError::InvalidDuration(_)), "{input}");
        }
    }

    #[test]
    fn overflowing_duration_is_invalid() {
        assert!(parse_mute_duration("99999999999999999w").is_err());
    }

    #[test]
    fn offsets_subtract_from_now() {
        let now = test_now();
        assert_eq!(parse_time_offset("1h", now).expect("1h"), now - Duration::hours(1));
        assert_eq!(parse_time_offset("30m", now).expect("30m"), now - Duration::minutes(30));
        assert_eq!(parse_time_offset("7d", now).expect("7d"), now - Duration::days(7));
        assert_eq!(parse_time_offset("0m", now).expect("0m"), now);
    }

    #[test]
    fn offsets_have_no_weeks_or_forever() {
        let now = test_now();
        assert!(parse_time_offset("1w", now).is_err());
        assert!(parse_time_offset("forever", now).is_err());
        assert!(parse_time_offset("2x", now).is_err());
    }
}
