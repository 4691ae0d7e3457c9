//! Calendar-date keys for images.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::format_description::BorrowedFormatItem;
use time::macros::{date, format_description};
use time::{Date, OffsetDateTime};

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// A calendar day (UTC) identifying exactly one image.
///
/// Serialized as `YYYY-MM-DD`. Ordering follows the calendar.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageDate(Date);

impl ImageDate {
    /// First day the upstream archive has an entry for.
    pub const EARLIEST: ImageDate = ImageDate(date!(1995 - 06 - 16));

    /// Wrap a `time::Date`.
    pub fn new(date: Date) -> Self {
        Self(date)
    }

    /// Build from year/month/day components.
    pub fn from_ymd(year: i32, month: u8, day: u8) -> crate::Result<Self> {
        let month = time::Month::try_from(month)
            .map_err(|e| crate::Error::InvalidDate(format!("{year}-{month}-{day}: {e}")))?;
        Date::from_calendar_date(year, month, day)
            .map(Self)
            .map_err(|e| crate::Error::InvalidDate(format!("{year}-{month}-{day}: {e}")))
    }

    /// Parse a `YYYY-MM-DD` string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Date::parse(s.trim(), DATE_FORMAT)
            .map(Self)
            .map_err(|e| crate::Error::InvalidDate(format!("{s:?}: {e}")))
    }

    /// Today's date in UTC.
    pub fn today_utc() -> Self {
        Self(OffsetDateTime::now_utc().date())
    }

    /// Get the underlying `time::Date`.
    pub fn as_date(&self) -> Date {
        self.0
    }

    /// Reject dates the upstream archive cannot have: before [`Self::EARLIEST`]
    /// or after `today`.
    pub fn ensure_published(&self, today: ImageDate) -> crate::Result<()> {
        if *self > today {
            return Err(crate::Error::DateOutOfRange {
                date: self.to_string(),
                reason: "date is in the future",
            });
        }
        if *self < Self::EARLIEST {
            return Err(crate::Error::DateOutOfRange {
                date: self.to_string(),
                reason: "date precedes the first published image (1995-06-16)",
            });
        }
        Ok(())
    }
}

impl From<Date> for ImageDate {
    fn from(date: Date) -> Self {
        Self(date)
    }
}

impl From<ImageDate> for Date {
    fn from(date: ImageDate) -> Self {
        date.0
    }
}

impl FromStr for ImageDate {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageDate {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<ImageDate> for String {
    fn from(date: ImageDate) -> Self {
        date.to_string()
    }
}

impl fmt::Debug for ImageDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageDate({self})")
    }
}

impl fmt::Display for ImageDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}",
            self.0.year(),
            u8::from(self.0.month()),
            self.0.day()
        )
    }
}
