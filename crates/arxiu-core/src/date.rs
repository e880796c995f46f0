//! Flexible date parsing with quality estimation.
//!
//! Transcribers write act dates in many shapes: `12/03/1803`, `15.03.1803`,
//! `1/3/03`, `??/??/1804`, or a lone `¿` when the book gives no date. The
//! parser turns each into an ISO date (when fully readable), a text
//! passthrough (when not), and a [`Quality`].
//!
//! # Precedence
//!
//! 1. `¿` anywhere ⇒ `no_record`.
//! 2. Empty ⇒ `no_record`.
//! 3. `?` anywhere, or day/month/year that do not form a calendar date ⇒ `doubtful`.
//! 4. Year only, or month and year ⇒ `incomplete`.
//! 5. Otherwise ⇒ `clear`, with the ISO date and an empty passthrough.

use chrono::NaiveDate;

use crate::models::Quality;

/// Result of [`parse_flexible_date`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexibleDate {
    /// Parsed calendar date, when the input was fully readable.
    pub date: Option<NaiveDate>,
    /// Original text, kept whenever the date could not be fully parsed.
    pub text: String,
    pub quality: Quality,
}

impl FlexibleDate {
    /// ISO rendering of [`date`](Self::date), or `""`.
    pub fn iso(&self) -> String {
        self.date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }

    /// The `(iso, text, quality)` triple.
    pub fn as_tuple(&self) -> (String, String, &'static str) {
        (self.iso(), self.text.clone(), self.quality.as_str())
    }

    fn unreadable(text: &str, quality: Quality) -> Self {
        Self {
            date: None,
            text: text.to_string(),
            quality,
        }
    }
}

fn parse_year(part: &str) -> Option<i32> {
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match part.len() {
        2 => part.parse::<i32>().ok().map(|y| 1900 + y),
        4 => part.parse::<i32>().ok(),
        _ => None,
    }
}

fn parse_small(part: &str, max: u32) -> Option<u32> {
    if part.is_empty() || part.len() > 2 || !part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    part.parse::<u32>().ok().filter(|v| (1..=max).contains(v))
}

/// Parse a free-form act date.
///
/// See the module docs for precedence rules.
///
/// ```rust
/// use arxiu_core::date::parse_flexible_date;
///
/// let d = parse_flexible_date("12/03/1803");
/// assert_eq!(d.as_tuple(), ("1803-03-12".to_string(), String::new(), "clear"));
/// ```
pub fn parse_flexible_date(input: &str) -> FlexibleDate {
    let trimmed = input.trim();

    if trimmed.contains('¿') {
        return FlexibleDate::unreadable(trimmed, Quality::NoRecord);
    }
    if trimmed.is_empty() {
        return FlexibleDate::unreadable("", Quality::NoRecord);
    }
    if trimmed.contains('?') {
        return FlexibleDate::unreadable(trimmed, Quality::Doubtful);
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let parts: Vec<&str> = compact.split(['/', '.', '-']).collect();

    match parts.as_slice() {
        [d, m, y] => {
            let day = parse_small(d, 31);
            let month = parse_small(m, 12);
            let year = parse_year(y);
            match (day, month, year) {
                (Some(day), Some(month), Some(year)) => {
                    match NaiveDate::from_ymd_opt(year, month, day) {
                        Some(date) => FlexibleDate {
                            date: Some(date),
                            text: String::new(),
                            quality: Quality::Clear,
                        },
                        None => FlexibleDate::unreadable(trimmed, Quality::Doubtful),
                    }
                }
                _ => FlexibleDate::unreadable(trimmed, Quality::Doubtful),
            }
        }
        [m, y] if y.len() == 4 => match (parse_small(m, 12), parse_year(y)) {
            (Some(_), Some(_)) => FlexibleDate::unreadable(trimmed, Quality::Incomplete),
            _ => FlexibleDate::unreadable(trimmed, Quality::Doubtful),
        },
        [y] if y.len() == 4 && parse_year(y).is_some() => {
            FlexibleDate::unreadable(trimmed, Quality::Incomplete)
        }
        _ => FlexibleDate::unreadable(trimmed, Quality::Doubtful),
    }
}

/// Parse the strict `dd/mm/yyyy` format. Anything else yields `None`.
pub fn parse_ddmmyyyy(input: &str) -> Option<NaiveDate> {
    let t = input.trim();
    let bytes = t.as_bytes();
    if bytes.len() != 10 || bytes[2] != b'/' || bytes[5] != b'/' {
        return None;
    }
    let day: u32 = t[0..2].parse().ok()?;
    let month: u32 = t[3..5].parse().ok()?;
    let year: i32 = t[6..10].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse an ISO `YYYY-MM-DD` date.
pub fn parse_iso(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(s: &str) -> (String, String, &'static str) {
        parse_flexible_date(s).as_tuple()
    }

    #[test]
    fn test_clear_dates() {
        assert_eq!(triple("12/03/1803"), ("1803-03-12".into(), "".into(), "clear"));
        assert_eq!(triple("15.03.1803"), ("1803-03-15".into(), "".into(), "clear"));
        assert_eq!(triple(" 1/3/1803 "), ("1803-03-01".into(), "".into(), "clear"));
        assert_eq!(triple("1-3-03"), ("1903-03-01".into(), "".into(), "clear"));
    }

    #[test]
    fn test_markers() {
        assert_eq!(triple("??/??/1804"), ("".into(), "??/??/1804".into(), "doubtful"));
        assert_eq!(triple("¿"), ("".into(), "¿".into(), "no_record"));
        assert_eq!(triple(""), ("".into(), "".into(), "no_record"));
    }

    #[test]
    fn test_invalid_calendar_is_doubtful() {
        assert_eq!(triple("31/02/1803"), ("".into(), "31/02/1803".into(), "doubtful"));
        assert_eq!(triple("aa/bb/cccc"), ("".into(), "aa/bb/cccc".into(), "doubtful"));
    }

    #[test]
    fn test_partial_dates_are_incomplete() {
        assert_eq!(triple("1803"), ("".into(), "1803".into(), "incomplete"));
        assert_eq!(triple("03/1803"), ("".into(), "03/1803".into(), "incomplete"));
    }

    #[test]
    fn test_every_valid_ddmmyyyy_is_clear() {
        let mut d = NaiveDate::from_ymd_opt(1800, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(1804, 12, 31).unwrap();
        while d <= end {
            let text = d.format("%d/%m/%Y").to_string();
            let parsed = parse_flexible_date(&text);
            assert_eq!(parsed.date, Some(d), "{}", text);
            assert_eq!(parsed.text, "");
            assert_eq!(parsed.quality, Quality::Clear);
            d = d.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_strict_format() {
        assert_eq!(parse_ddmmyyyy("12/03/1803"), NaiveDate::from_ymd_opt(1803, 3, 12));
        assert_eq!(parse_ddmmyyyy("1/3/1803"), None);
        assert_eq!(parse_ddmmyyyy("12.03.1803"), None);
    }
}
