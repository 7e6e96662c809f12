// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};

/// A microsecond-resolution epoch timestamp, as stored in column data and the transaction file.
pub type Timestamp = i64;

/// Error returned when a partition directory name cannot be parsed under the table's
/// partitioning scheme.
///
/// Per the directory-scan contract, this is always swallowed by the caller (unparseable
/// directory names are assumed to be internal writer artifacts) and never escapes as a public
/// [`crate::Error`] variant.
#[derive(Debug)]
pub(crate) struct ParseError;

fn to_naive(ts: Timestamp) -> NaiveDateTime {
    let secs = ts.div_euclid(1_000_000);
    let micros = ts.rem_euclid(1_000_000);
    #[allow(clippy::unwrap_used)]
    DateTime::<Utc>::from_timestamp(secs, (micros * 1000) as u32)
        .unwrap()
        .naive_utc()
}

fn from_naive(dt: NaiveDateTime) -> Timestamp {
    dt.and_utc().timestamp_micros()
}

fn floor_year(ts: Timestamp) -> Timestamp {
    let dt = to_naive(ts);
    #[allow(clippy::unwrap_used)]
    let date = NaiveDate::from_ymd_opt(dt.year(), 1, 1).unwrap();
    from_naive(date.and_hms_opt(0, 0, 0).unwrap())
}

fn floor_month(ts: Timestamp) -> Timestamp {
    let dt = to_naive(ts);
    #[allow(clippy::unwrap_used)]
    let date = NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1).unwrap();
    from_naive(date.and_hms_opt(0, 0, 0).unwrap())
}

fn floor_day(ts: Timestamp) -> Timestamp {
    let dt = to_naive(ts);
    from_naive(dt.date().and_hms_opt(0, 0, 0).unwrap())
}

fn add_years(base: Timestamp, n: i64) -> Timestamp {
    let dt = to_naive(base);
    #[allow(clippy::cast_possible_truncation)]
    let year = dt.year() as i64 + n;
    #[allow(clippy::unwrap_used)]
    let date = NaiveDate::from_ymd_opt(year as i32, dt.month(), 1).unwrap();
    from_naive(date.and_hms_opt(0, 0, 0).unwrap())
}

fn add_months(base: Timestamp, n: i64) -> Timestamp {
    let dt = to_naive(base);
    let total = i64::from(dt.year()) * 12 + i64::from(dt.month() - 1) + n;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) + 1;
    #[allow(clippy::unwrap_used, clippy::cast_possible_truncation)]
    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, 1).unwrap();
    from_naive(date.and_hms_opt(0, 0, 0).unwrap())
}

fn add_days(base: Timestamp, n: i64) -> Timestamp {
    let dt = to_naive(base);
    from_naive(dt + Duration::days(n))
}

fn between_years(a: Timestamp, b: Timestamp) -> i64 {
    let fa = to_naive(floor_year(a));
    let fb = to_naive(floor_year(b));
    i64::from(fb.year() - fa.year())
}

fn between_months(a: Timestamp, b: Timestamp) -> i64 {
    let fa = to_naive(floor_month(a));
    let fb = to_naive(floor_month(b));
    (i64::from(fb.year()) * 12 + i64::from(fb.month()))
        - (i64::from(fa.year()) * 12 + i64::from(fa.month()))
}

fn between_days(a: Timestamp, b: Timestamp) -> i64 {
    let fa = to_naive(floor_day(a)).date();
    let fb = to_naive(floor_day(b)).date();
    (fb - fa).num_days()
}

/// The calendar granularity (or absence thereof) a table is partitioned by.
///
/// Binds the four per-granularity operations (floor, add, between, format/parse) once, at
/// reader construction, rather than dispatching per row.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PartitionScheme {
    /// No partitioning: a single `default/` directory holds the whole table.
    None,
    /// One partition directory per calendar year (`YYYY`).
    Year,
    /// One partition directory per calendar month (`YYYY-MM`).
    Month,
    /// One partition directory per calendar day (`YYYY-MM-DD`).
    Day,
}

/// Directory name used by non-partitioned tables.
pub const DEFAULT_PARTITION_NAME: &str = "default";

impl PartitionScheme {
    /// Floors `ts` to the granularity boundary.
    ///
    /// # Panics
    ///
    /// Panics if called on [`PartitionScheme::None`] — callers must never floor a
    /// non-partitioned table's timestamp.
    #[must_use]
    pub fn floor(self, ts: Timestamp) -> Timestamp {
        match self {
            Self::None => {
                panic!("PartitionScheme::floor is undefined for a non-partitioned table")
            }
            Self::Year => floor_year(ts),
            Self::Month => floor_month(ts),
            Self::Day => floor_day(ts),
        }
    }

    /// Advances `base` by `n` units of this granularity. `n` may be negative.
    #[must_use]
    pub fn add(self, base: Timestamp, n: i64) -> Timestamp {
        match self {
            Self::None => base,
            Self::Year => add_years(base, n),
            Self::Month => add_months(base, n),
            Self::Day => add_days(base, n),
        }
    }

    /// Counts complete granularity units between `floor(a)` and `floor(b)`.
    ///
    /// The caller guarantees `a <= b`. Always `0` for [`PartitionScheme::None`].
    #[must_use]
    pub fn between(self, a: Timestamp, b: Timestamp) -> i64 {
        match self {
            Self::None => 0,
            Self::Year => between_years(a, b),
            Self::Month => between_months(a, b),
            Self::Day => between_days(a, b),
        }
    }

    /// Formats a partition-start instant as its directory name.
    #[must_use]
    pub fn format(self, ts: Timestamp) -> String {
        let dt = to_naive(ts);
        match self {
            Self::None => DEFAULT_PARTITION_NAME.to_string(),
            Self::Year => format!("{:04}", dt.year()),
            Self::Month => format!("{:04}-{:02}", dt.year(), dt.month()),
            Self::Day => format!("{:04}-{:02}-{:02}", dt.year(), dt.month(), dt.day()),
        }
    }

    /// Parses a directory name into the instant it represents.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if `name` does not match this scheme's expected format. Callers
    /// must swallow this error silently: unrecognized directories are assumed to be
    /// writer-internal artifacts, not malformed partitions.
    pub(crate) fn parse(self, name: &str) -> Result<Timestamp, ParseError> {
        match self {
            Self::None => {
                if name == DEFAULT_PARTITION_NAME {
                    Ok(0)
                } else {
                    Err(ParseError)
                }
            }
            Self::Year => {
                let year: i32 = name.parse().map_err(|_| ParseError)?;
                if name.len() != 4 {
                    return Err(ParseError);
                }
                let date = NaiveDate::from_ymd_opt(year, 1, 1).ok_or(ParseError)?;
                Ok(from_naive(date.and_hms_opt(0, 0, 0).ok_or(ParseError)?))
            }
            Self::Month => {
                let (y, m) = name.split_once('-').ok_or(ParseError)?;
                if y.len() != 4 || m.len() != 2 {
                    return Err(ParseError);
                }
                let year: i32 = y.parse().map_err(|_| ParseError)?;
                let month: u32 = m.parse().map_err(|_| ParseError)?;
                let date = NaiveDate::from_ymd_opt(year, month, 1).ok_or(ParseError)?;
                Ok(from_naive(date.and_hms_opt(0, 0, 0).ok_or(ParseError)?))
            }
            Self::Day => {
                let mut parts = name.split('-');
                let y = parts.next().ok_or(ParseError)?;
                let m = parts.next().ok_or(ParseError)?;
                let d = parts.next().ok_or(ParseError)?;
                if parts.next().is_some() || y.len() != 4 || m.len() != 2 || d.len() != 2 {
                    return Err(ParseError);
                }
                let year: i32 = y.parse().map_err(|_| ParseError)?;
                let month: u32 = m.parse().map_err(|_| ParseError)?;
                let day: u32 = d.parse().map_err(|_| ParseError)?;
                let date = NaiveDate::from_ymd_opt(year, month, day).ok_or(ParseError)?;
                Ok(from_naive(date.and_hms_opt(0, 0, 0).ok_or(ParseError)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn ymd_micros(y: i32, m: u32, d: u32) -> Timestamp {
        #[allow(clippy::unwrap_used)]
        from_naive(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn day_format_parse_roundtrip() {
        let ts = ymd_micros(2020, 1, 2);
        let name = PartitionScheme::Day.format(ts);
        assert_eq!(name, "2020-01-02");
        assert_eq!(PartitionScheme::Day.parse(&name).unwrap(), ts);
    }

    #[test]
    fn month_format_parse_roundtrip() {
        let ts = ymd_micros(2020, 11, 1);
        let name = PartitionScheme::Month.format(ts);
        assert_eq!(name, "2020-11");
        assert_eq!(PartitionScheme::Month.parse(&name).unwrap(), ts);
    }

    #[test]
    fn year_format_parse_roundtrip() {
        let ts = ymd_micros(2020, 1, 1);
        let name = PartitionScheme::Year.format(ts);
        assert_eq!(name, "2020");
        assert_eq!(PartitionScheme::Year.parse(&name).unwrap(), ts);
    }

    #[test]
    fn floor_day_truncates_time_of_day() {
        let start = ymd_micros(2020, 1, 2);
        let noon = start + 12 * 3_600 * 1_000_000;
        assert_eq!(PartitionScheme::Day.floor(noon), start);
    }

    #[test]
    fn between_days_across_month_boundary() {
        let a = ymd_micros(2020, 1, 31);
        let b = ymd_micros(2020, 2, 2);
        assert_eq!(PartitionScheme::Day.between(a, b), 2);
    }

    #[test]
    fn between_months_across_year_boundary() {
        let a = ymd_micros(2020, 11, 15);
        let b = ymd_micros(2021, 1, 3);
        assert_eq!(PartitionScheme::Month.between(a, b), 2);
    }

    #[test]
    fn add_months_wraps_year() {
        let a = ymd_micros(2020, 11, 1);
        assert_eq!(PartitionScheme::Month.add(a, 3), ymd_micros(2021, 2, 1));
    }

    #[test]
    fn parse_rejects_malformed_names() {
        assert!(PartitionScheme::Day.parse("snapshot").is_err());
        assert!(PartitionScheme::Day.parse("2020-1-2").is_err());
        assert!(PartitionScheme::Year.parse("20200").is_err());
    }

    #[test]
    #[should_panic = "non-partitioned"]
    fn floor_none_panics() {
        let _ = PartitionScheme::None.floor(0);
    }
}
