//! Expiry argument parsing.

use anyhow::{bail, Result};
use chrono::DateTime;

use canopy_core::Timestamp;

/// Parse an expiry argument relative to `now`.
///
/// Accepts, in order of preference: an RFC 3339 timestamp
/// (`2026-09-01T00:00:00Z`), absolute unix milliseconds, or a relative
/// duration with an `s`/`m`/`h`/`d` suffix (`90s`, `30m`, `12h`, `7d`).
pub(crate) fn parse_expiry(input: &str, now: Timestamp) -> Result<Timestamp> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(Timestamp::from_millis(dt.timestamp_millis()));
    }
    if let Ok(millis) = input.parse::<i64>() {
        return Ok(Timestamp::from_millis(millis));
    }
    if let Some((value, unit)) = split_suffix(input) {
        let scale: i64 = match unit {
            's' => 1_000,
            'm' => 60_000,
            'h' => 3_600_000,
            'd' => 86_400_000,
            _ => bail!("unknown duration unit {unit:?} in {input:?}"),
        };
        let Ok(count) = value.parse::<i64>() else {
            bail!("bad duration value in {input:?}");
        };
        if count <= 0 {
            bail!("duration must be positive in {input:?}");
        }
        return Ok(now.saturating_add_millis(count.saturating_mul(scale)));
    }
    bail!("cannot parse expiry {input:?}: expected RFC 3339, unix millis, or a duration like 30m")
}

fn split_suffix(input: &str) -> Option<(&str, char)> {
    let last = input.chars().last()?;
    if !last.is_ascii_alphabetic() {
        return None;
    }
    Some((input.get(..input.len().checked_sub(last.len_utf8())?)?, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Timestamp {
        Timestamp::from_millis(1_000_000)
    }

    #[test]
    fn test_rfc3339() {
        let ts = parse_expiry("1970-01-01T00:00:10Z", now()).unwrap();
        assert_eq!(ts.as_millis(), 10_000);
    }

    #[test]
    fn test_unix_millis() {
        let ts = parse_expiry("5000000", now()).unwrap();
        assert_eq!(ts.as_millis(), 5_000_000);
    }

    #[test]
    fn test_durations() {
        assert_eq!(parse_expiry("90s", now()).unwrap().as_millis(), 1_090_000);
        assert_eq!(parse_expiry("30m", now()).unwrap().as_millis(), 2_800_000);
        assert_eq!(
            parse_expiry("1h", now()).unwrap().as_millis(),
            4_600_000
        );
        assert_eq!(
            parse_expiry("1d", now()).unwrap().as_millis(),
            87_400_000
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_expiry("soon", now()).is_err());
        assert!(parse_expiry("10w", now()).is_err());
        assert!(parse_expiry("-5m", now()).is_err());
        assert!(parse_expiry("", now()).is_err());
    }
}
