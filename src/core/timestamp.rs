// LogTrawl - core/timestamp.rs
//
// Timestamp derivation from the named groups of a timestamp regex.
//
// Groups named `_Y`, `_M`, `_D`, `_h`, `_m`, `_s`, optionally followed by one
// digit (`_M2`), are date/time components. The digit suffix lets a single
// alternation carry several formats without duplicate group names. Any other
// group not starting with `_` is returned as an extra user field.

use crate::util::constants;
use crate::util::error::TimestampError;
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Range;

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// A timestamp found on one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTimestamp {
    pub timestamp: NaiveDateTime,
    /// Byte range of the whole match within the line.
    pub span: Range<usize>,
    /// Non-underscore named groups that took part in the match.
    pub extra_fields: Vec<(String, String)>,
}

/// Component letter of a group name, if it follows the `_X[digit]` scheme.
fn component_of(name: &str) -> Option<char> {
    let mut chars = name.chars();
    if chars.next()? != '_' {
        return None;
    }
    let c = chars.next().filter(|c| "YMDhms".contains(*c))?;
    match (chars.next(), chars.next()) {
        (None, _) => Some(c),
        (Some(d), None) if d.is_ascii_digit() => Some(c),
        _ => None,
    }
}

fn number(component: char, value: &str) -> Result<u32, TimestampError> {
    value
        .trim()
        .parse()
        .map_err(|_| TimestampError::InvalidNumber {
            component,
            value: value.to_string(),
        })
}

fn month(value: &str) -> Result<u32, TimestampError> {
    let value = value.trim();
    if value.chars().count() <= 2 {
        return number('M', value);
    }
    let prefix: String = value.chars().take(3).collect::<String>().to_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|i| i as u32 + 1)
        .ok_or_else(|| TimestampError::UnknownMonth {
            value: value.to_string(),
        })
}

/// Search `line` with `re` and build a timestamp from its component groups.
///
/// `fallback_year` is used when no year group took part in the match; a year
/// below 100 is offset by 2000. Seconds default to 0.
pub fn derive_timestamp(
    re: &Regex,
    line: &str,
    fallback_year: i32,
) -> Result<ParsedTimestamp, TimestampError> {
    let caps = re.captures(line).ok_or(TimestampError::NoMatch)?;

    let mut components: BTreeMap<char, &str> = BTreeMap::new();
    let mut extra_fields = Vec::new();
    for name in re.capture_names().flatten() {
        let Some(m) = caps.name(name) else {
            continue;
        };
        match component_of(name) {
            Some(c) if !m.as_str().is_empty() => {
                components.insert(c, m.as_str());
            }
            Some(_) => {}
            None if !name.starts_with('_') => {
                extra_fields.push((name.to_string(), m.as_str().to_string()));
            }
            None => {}
        }
    }

    if components.len() < constants::MIN_TIMESTAMP_COMPONENTS {
        return Err(TimestampError::TooFewComponents {
            found: components.len(),
            required: constants::MIN_TIMESTAMP_COMPONENTS,
        });
    }
    let required = |c: char| {
        components
            .get(&c)
            .copied()
            .ok_or(TimestampError::MissingComponent { component: c })
    };

    let year = match components.get(&'Y') {
        Some(v) => {
            let y = v.trim().parse::<i32>().map_err(|_| TimestampError::InvalidNumber {
                component: 'Y',
                value: v.to_string(),
            })?;
            if y < constants::TWO_DIGIT_YEAR_LIMIT {
                y + constants::TWO_DIGIT_YEAR_BASE
            } else {
                y
            }
        }
        None => fallback_year,
    };
    let month = month(required('M')?)?;
    let day = number('D', required('D')?)?;
    let hour = number('h', required('h')?)?;
    let minute = number('m', required('m')?)?;
    let second = match components.get(&'s') {
        Some(v) => number('s', v)?,
        None => 0,
    };

    let timestamp = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or(TimestampError::InvalidDate {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })?;

    let whole = caps.get(0).map_or(0..0, |m| m.range());
    Ok(ParsedTimestamp {
        timestamp,
        span: whole,
        extra_fields,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .and_then(|d| d.and_hms_opt(h, mi, s))
            .unwrap()
    }

    fn iso() -> Regex {
        Regex::new(constants::DEFAULT_REX_TIMESTAMP).unwrap()
    }

    #[test]
    fn test_component_names() {
        assert_eq!(component_of("_Y"), Some('Y'));
        assert_eq!(component_of("_M2"), Some('M'));
        assert_eq!(component_of("_s9"), Some('s'));
        assert_eq!(component_of("_x"), None);
        assert_eq!(component_of("_M12"), None);
        assert_eq!(component_of("_Ma"), None);
        assert_eq!(component_of("Y"), None);
    }

    #[test]
    fn test_iso_timestamp() {
        let parsed = derive_timestamp(&iso(), "2024-01-02 10:00:00 continuation", 1999).unwrap();
        assert_eq!(parsed.timestamp, ts(2024, 1, 2, 10, 0, 0));
        assert_eq!(parsed.span, 0..19);
        assert!(parsed.extra_fields.is_empty());
    }

    #[test]
    fn test_textual_and_numeric_months() {
        let re = Regex::new(
            r"(?P<_M>[A-Za-z]+|\d\d)/(?P<_D>\d\d) (?P<_h>\d\d):(?P<_m>\d\d)",
        )
        .unwrap();
        let a = derive_timestamp(&re, "Feb/03 04:05", 2020).unwrap();
        let b = derive_timestamp(&re, "02/03 04:05", 2020).unwrap();
        let c = derive_timestamp(&re, "FEBRUARY/03 04:05", 2020).unwrap();
        assert_eq!(a.timestamp, ts(2020, 2, 3, 4, 5, 0));
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.timestamp, c.timestamp);
        assert_eq!(
            derive_timestamp(&re, "Foo/03 04:05", 2020),
            Err(TimestampError::UnknownMonth {
                value: "Foo".into()
            })
        );
    }

    #[test]
    fn test_two_digit_year_adds_2000() {
        let re = Regex::new(
            r"(?P<_D>\d\d)\.(?P<_M>\d\d)\.(?P<_Y>\d\d) (?P<_h>\d\d):(?P<_m>\d\d):(?P<_s>\d\d)",
        )
        .unwrap();
        let parsed = derive_timestamp(&re, "05.06.16 07:08:09", 1970).unwrap();
        assert_eq!(parsed.timestamp, ts(2016, 6, 5, 7, 8, 9));
        let parsed = derive_timestamp(&re, "05.06.99 07:08:09", 1970).unwrap();
        assert_eq!(parsed.timestamp.format("%Y").to_string(), "2099");
    }

    #[test]
    fn test_alternative_formats_with_suffixes() {
        let re = Regex::new(
            r"^(?:(?P<_Y>\d{4})-(?P<_M>\d\d)-(?P<_D>\d\d) (?P<_h>\d\d):(?P<_m>\d\d)|(?P<_M2>[A-Z][a-z]{2}) +(?P<_D2>\d+) (?P<_h2>\d\d):(?P<_m2>\d\d):(?P<_s2>\d\d))",
        )
        .unwrap();
        let syslog = derive_timestamp(&re, "Mar  7 01:02:03 host sshd", 2023).unwrap();
        assert_eq!(syslog.timestamp, ts(2023, 3, 7, 1, 2, 3));
        let iso = derive_timestamp(&re, "2021-12-31 23:59 x", 2023).unwrap();
        assert_eq!(iso.timestamp, ts(2021, 12, 31, 23, 59, 0));
    }

    #[test]
    fn test_extra_fields_from_timestamp_line() {
        let re = Regex::new(
            r"^(?P<_Y>\d{4})-(?P<_M>\d\d)-(?P<_D>\d\d) (?P<_h>\d\d):(?P<_m>\d\d) \[(?P<thread>\w+)\](?P<_ignored>x)?(?P<opt>y)?",
        )
        .unwrap();
        let parsed = derive_timestamp(&re, "2021-01-01 00:00 [main] go", 2023).unwrap();
        assert_eq!(
            parsed.extra_fields,
            vec![("thread".to_string(), "main".to_string())]
        );
    }

    #[test]
    fn test_failures() {
        let re = Regex::new(r"(?P<_h>\d\d):(?P<_m>\d\d):(?P<_s>\d\d)").unwrap();
        assert_eq!(
            derive_timestamp(&re, "10:11:12", 2020),
            Err(TimestampError::TooFewComponents {
                found: 3,
                required: 4
            })
        );
        let re = Regex::new(r"(?P<_Y>\d{4}) (?P<_D>\d\d) (?P<_h>\d\d):(?P<_m>\d\d)").unwrap();
        assert_eq!(
            derive_timestamp(&re, "2020 01 10:11", 2020),
            Err(TimestampError::MissingComponent { component: 'M' })
        );
        assert!(matches!(
            derive_timestamp(&iso(), "2024-02-30 10:00:00", 2020),
            Err(TimestampError::InvalidDate { .. })
        ));
        assert_eq!(
            derive_timestamp(&iso(), "no timestamp here", 2020),
            Err(TimestampError::NoMatch)
        );
    }

    #[test]
    fn test_missing_year_uses_fallback() {
        let re = Regex::new(r"(?P<_M>\d\d)-(?P<_D>[ \d]\d) (?P<_h>\d\d):(?P<_m>\d\d)").unwrap();
        let parsed = derive_timestamp(&re, "04- 9 12:30", 2019).unwrap();
        assert_eq!(parsed.timestamp, ts(2019, 4, 9, 12, 30, 0));
    }
}
