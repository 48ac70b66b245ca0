use chrono::NaiveDate;

/// Sentinel printed on the wire for an absent date, e.g. the exit date of a
/// patient who has not been discharged. It never parses as a `Date`.
pub const NO_DATE: &str = "00-00-0000";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DateError {
    #[error("'{0}' is not a DD-MM-YYYY calendar date")]
    Malformed(String),
    #[error("interval [{0}, {1}] is not ascending")]
    Interval(Date, Date),
}

/// A calendar day. `Ord` is chronological; the textual form is `DD-MM-YYYY`,
/// matching both input file names and query arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(NaiveDate);

impl Date {
    /// Build a date from components. Returns None for impossible calendar
    /// days, including day or month zero.
    pub fn from_dmy(day: u32, month: u32, year: i32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }
}

impl std::str::FromStr for Date {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || DateError::Malformed(s.to_string());

        // Require the fixed-width DD-MM-YYYY shape before consulting the
        // calendar, so that "1-1-2020" and "2020-01-01" are rejected.
        let bytes = s.as_bytes();
        if bytes.len() != 10 || bytes[2] != b'-' || bytes[5] != b'-' {
            return Err(malformed());
        }
        if !s
            .bytes()
            .enumerate()
            .all(|(i, b)| matches!(i, 2 | 5) || b.is_ascii_digit())
        {
            return Err(malformed());
        }

        let day: u32 = s[0..2].parse().map_err(|_| malformed())?;
        let month: u32 = s[3..5].parse().map_err(|_| malformed())?;
        let year: i32 = s[6..10].parse().map_err(|_| malformed())?;

        Date::from_dmy(day, month, year).ok_or_else(malformed)
    }
}

impl std::fmt::Display for Date {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%d-%m-%Y"))
    }
}

/// An inclusive `[first, last]` interval of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    first: Date,
    last: Date,
}

impl DateRange {
    pub fn new(first: Date, last: Date) -> Result<Self, DateError> {
        if first > last {
            return Err(DateError::Interval(first, last));
        }
        Ok(Self { first, last })
    }

    /// The degenerate single-day interval.
    pub fn single(day: Date) -> Self {
        Self {
            first: day,
            last: day,
        }
    }

    pub fn first(&self) -> Date {
        self.first
    }

    pub fn last(&self) -> Date {
        self.last
    }

    pub fn contains(&self, day: Date) -> bool {
        self.first <= day && day <= self.last
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.first, self.last)
    }
}
