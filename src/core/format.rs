use chrono::{DateTime, Utc};

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

/// Seconds since `start`. A start in the future (daemon clock ahead of
/// ours) yields its magnitude; the skew itself is reported by the diff
/// tracker when the connection first appears.
pub fn connection_age_secs(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(start).num_seconds().abs()
}

pub fn format_age(secs: i64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

/// Age label for a connection, `-` when the start time is unknown.
pub fn format_connection_age(start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match start {
        Some(start) => format_age(connection_age_secs(start, now)),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_speed(2048), "2.0 KB/s");
    }

    #[test]
    fn test_format_age_buckets() {
        assert_eq!(format_age(59), "59s");
        assert_eq!(format_age(61), "1m");
        assert_eq!(format_age(7200), "2h");
        assert_eq!(format_age(3 * 86400), "3d");
    }

    #[test]
    fn test_clock_skew_uses_magnitude() {
        let now = Utc::now();
        assert_eq!(connection_age_secs(now + Duration::seconds(30), now), 30);
        assert_eq!(connection_age_secs(now - Duration::seconds(30), now), 30);
    }

    #[test]
    fn test_unknown_start() {
        assert_eq!(format_connection_age(None, Utc::now()), "-");
    }
}
