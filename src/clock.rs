//! Parsing and formatting of clock times entered by hand.

use crate::types::{Time, has_time};

/// Parses `H:MM:SS`, `MM:SS` or plain seconds, with an optional decimal part
/// when `ticks_per_second` is 10. Returns ticks, or `None` for malformed text.
pub fn parse_time(text: &str, ticks_per_second: Time) -> Option<Time> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let (whole, fraction) = match text.split_once(['.', ',']) {
        Some((w, f)) => (w, Some(f)),
        None => (text, None),
    };

    let parts: Vec<&str> = whole.split(':').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    let mut seconds: i64 = 0;
    for (i, part) in parts.iter().enumerate() {
        let value: i64 = part.parse().ok()?;
        if i > 0 && value >= 60 {
            return None;
        }
        seconds = seconds * 60 + value;
    }

    let mut ticks = seconds.checked_mul(i64::from(ticks_per_second))?;
    if let Some(f) = fraction {
        if ticks_per_second <= 1 || f.len() != 1 {
            return None;
        }
        ticks += i64::from(f.parse::<u8>().ok()?);
    }
    Time::try_from(ticks).ok()
}

/// Formats ticks as `H:MM:SS` (or `MM:SS` under an hour); `-` without time.
pub fn format_time(time: Time, ticks_per_second: Time) -> String {
    if !has_time(time) {
        return "-".to_string();
    }
    let tps = ticks_per_second.max(1);
    let seconds = time / tps;
    let (h, m, s) = (seconds / 3600, (seconds / 60) % 60, seconds % 60);
    let base = if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    };
    if tps > 1 {
        format!("{base}.{}", time % tps)
    } else {
        base
    }
}
