use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, Local, Utc};
use chrono_tz::Tz;
use regex::Regex;

pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

fn hhmm_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([01]?\d|2[0-3]):([0-5]\d)$").expect("hhmm regex"))
}

/// Parse an IANA zone id. Empty or unknown ids resolve to `None`, meaning
/// "use the system-local zone".
pub fn resolve_zone(tz_name: &str) -> Option<Tz> {
    let name = tz_name.trim();
    if name.is_empty() {
        return None;
    }
    name.parse::<Tz>().ok()
}

/// Current wall-clock time in the configured zone, falling back to the
/// system-local zone when the id is empty or unknown.
pub fn now_in_zone(tz_name: &str) -> DateTime<FixedOffset> {
    match resolve_zone(tz_name) {
        Some(tz) => Utc::now().with_timezone(&tz).fixed_offset(),
        None => Local::now().fixed_offset(),
    }
}

/// Parse `"HH:MM"` (leading zero optional on the hour) into `(hour, minute)`.
pub fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let caps = hhmm_re().captures(s.trim())?;
    let h = caps.get(1)?.as_str().parse().ok()?;
    let m = caps.get(2)?.as_str().parse().ok()?;
    Some((h, m))
}

pub fn fmt_hhmm(hour: u32, minute: u32) -> String {
    format!("{hour:02}:{minute:02}")
}

/// Advance a wall-clock minute, wrapping midnight.
pub fn plus_one_minute(hour: u32, minute: u32) -> (u32, u32) {
    let minute = (minute + 1) % 60;
    let hour = if minute == 0 { (hour + 1) % 24 } else { hour };
    (hour, minute)
}

/// `"HH:MM"` of the instant, zero-padded.
pub fn hhmm_key(dt: &DateTime<FixedOffset>) -> String {
    dt.format("%H:%M").to_string()
}

/// `"YYYY-MM-DD"` of the instant.
pub fn date_key(dt: &DateTime<FixedOffset>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

/// `"YYYY-MM-DD HH:MM"` of the instant, the minute-bucket key reminders
/// and dedup tags compare against.
pub fn minute_key(dt: &DateTime<FixedOffset>) -> String {
    dt.format(DEFAULT_TIME_FORMAT).to_string()
}

/// strftime-format the instant; an empty or invalid format string falls
/// back to [`DEFAULT_TIME_FORMAT`].
pub fn format_with(dt: &DateTime<FixedOffset>, fmt: &str) -> String {
    use std::fmt::Write as _;
    if fmt.trim().is_empty() {
        return minute_key(dt);
    }
    let mut out = String::new();
    if write!(out, "{}", dt.format(fmt)).is_err() {
        return minute_key(dt);
    }
    out
}
