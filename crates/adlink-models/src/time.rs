//! Token expiry arithmetic.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};

/// Tokens are refreshed this many minutes before their recorded expiry.
pub const EXPIRY_BUFFER_MINUTES: i64 = 5;

/// Whether a token is expired or will expire within the default buffer.
///
/// A missing expiry is treated as expired: without expiry info the only safe
/// assumption is that the token needs a refresh.
pub fn is_token_expired(expires_at: Option<DateTime<Utc>>) -> bool {
    is_token_expired_with_buffer(expires_at, Duration::minutes(EXPIRY_BUFFER_MINUTES))
}

/// Expiry check with an explicit buffer.
pub fn is_token_expired_with_buffer(expires_at: Option<DateTime<Utc>>, buffer: Duration) -> bool {
    match expires_at {
        None => true,
        Some(expires_at) => Utc::now() + buffer >= expires_at,
    }
}

/// Parse an expiry timestamp from storage.
///
/// Accepts RFC 3339 first; naive timestamps (written by services that drop
/// the offset) are pinned to UTC so they compare correctly against `Utc::now`.
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
        return Some(aware.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_expiry_is_expired() {
        assert!(is_token_expired(None));
    }

    #[test]
    fn test_expired_in_past() {
        let expires_at = Utc::now() - Duration::hours(1);
        assert!(is_token_expired(Some(expires_at)));
    }

    #[test]
    fn test_expiring_within_buffer() {
        // Inside the 5-minute window counts as expired
        let expires_at = Utc::now() + Duration::minutes(3);
        assert!(is_token_expired(Some(expires_at)));
    }

    #[test]
    fn test_valid_beyond_buffer() {
        let expires_at = Utc::now() + Duration::minutes(30);
        assert!(!is_token_expired(Some(expires_at)));
    }

    #[test]
    fn test_custom_buffer() {
        let expires_at = Utc::now() + Duration::minutes(8);
        assert!(!is_token_expired(Some(expires_at)));
        assert!(is_token_expired_with_buffer(
            Some(expires_at),
            Duration::minutes(10)
        ));
    }

    #[test]
    fn test_parse_rfc3339() {
        let parsed = parse_expiry("2026-08-06T12:00:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-08-06T10:00:00+00:00");
    }

    #[test]
    fn test_parse_naive_pinned_to_utc() {
        let parsed = parse_expiry("2026-08-06T12:00:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-08-06T12:00:00+00:00");
    }

    #[test]
    fn test_naive_and_aware_agree() {
        // A naive timestamp one hour out must behave exactly like the
        // equivalent timezone-aware timestamp.
        let future = Utc::now() + Duration::hours(1);
        let aware = future.to_rfc3339();
        let naive = future.format("%Y-%m-%dT%H:%M:%S").to_string();

        let from_aware = parse_expiry(&aware);
        let from_naive = parse_expiry(&naive);
        assert!(from_aware.is_some());
        assert!(from_naive.is_some());
        assert_eq!(
            is_token_expired(from_aware),
            is_token_expired(from_naive)
        );
        assert!(!is_token_expired(from_naive));
    }

    #[test]
    fn test_parse_naive_with_space_separator() {
        let parsed = parse_expiry("2026-08-06 12:00:00.123456").unwrap();
        assert_eq!(parsed.timestamp_subsec_micros(), 123456);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_expiry("not a timestamp").is_none());
        assert!(parse_expiry("").is_none());
    }
}
