use crate::error::{EtlError, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Dense integer key of a calendar date, `YYYYMMDD`, e.g. 2024-06-30 -> `20240630`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeKey(pub i32);

impl TimeKey {
    /// The key of a date; pure, total over [`YEARS`]. [`parse_date`] rejects dates outside it.
    pub fn of(date: NaiveDate) -> Self {
        Self(date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32)
    }

    /// Rebuild the date from the key's (year, month, day) components.
    pub fn to_date(self) -> Option<NaiveDate> {
        let (year, rest) = (self.0 / 10_000, self.0 % 10_000);
        NaiveDate::from_ymd_opt(year, (rest / 100) as u32, (rest % 100) as u32)
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A row of `Dim_Time`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DimTime {
    pub time_key: TimeKey,
    pub date: NaiveDate,
    pub year: i32,
    pub quarter: i32,
    pub month: i32,
    /// ISO week number; the first days of January may belong to week 52/53 of the
    /// previous ISO year, and are kept that way.
    pub week: i32,
    pub day: i32,
}

impl DimTime {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            time_key: TimeKey::of(date),
            date,
            year: date.year(),
            quarter: quarter_of(date.month()),
            month: date.month() as i32,
            week: date.iso_week().week() as i32,
            day: date.day() as i32,
        }
    }
}

/// `ceil(month / 3)`
pub fn quarter_of(month: u32) -> i32 {
    month.div_ceil(3) as i32
}

/// One `Dim_Time` row per distinct date, ordered by key.
pub fn derive_dim_time<I>(dates: I) -> Vec<DimTime>
where
    I: IntoIterator<Item = NaiveDate>,
{
    dates
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(DimTime::from_date)
        .collect()
}

/// Years a `TimeKey` can encode without overflowing `i32`.
pub const YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

/// Parse a provider timestamp down to its date. Accepts `YYYY-MM-DD`, with an optional
/// `T`/space separated time of day. The year must lie in [`YEARS`].
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.date()))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").map(|dt| dt.date())
        })
        .map_err(|_| EtlError::InvalidDate(raw.to_string()))?;

    if !YEARS.contains(&date.year()) {
        return Err(EtlError::InvalidDate(raw.to_string()));
    }
    Ok(date)
}

/// Lookups over a set of `Dim_Time` rows.
///
/// - by exact date, for daily price facts;
/// - by (year, quarter), for quarterly ratio facts. A quarter resolves to the lowest
///   `TimeKey` known inside it, i.e. the ratio fact borrows a daily key rather than carrying
///   a quarter-level one.
#[derive(Debug, Default)]
pub struct TimeIndex {
    by_date: HashMap<NaiveDate, TimeKey>,
    by_quarter: HashMap<(i32, i32), TimeKey>,
}

impl TimeIndex {
    pub fn new(rows: &[DimTime]) -> Self {
        let mut index = Self::default();
        for row in rows {
            index.by_date.insert(row.date, row.time_key);
            index
                .by_quarter
                .entry((row.year, row.quarter))
                .and_modify(|key| *key = (*key).min(row.time_key))
                .or_insert(row.time_key);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.by_date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }

    pub fn by_date(&self, date: &NaiveDate) -> Option<TimeKey> {
        self.by_date.get(date).copied()
    }

    pub fn by_quarter(&self, year: i32, quarter: i32) -> Option<TimeKey> {
        self.by_quarter.get(&(year, quarter)).copied()
    }
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////
