use anyhow::{Context, Result, bail};
use time::{Date, Duration, Month, OffsetDateTime, UtcOffset};

pub const MS_PER_DAY: i64 = 86_400_000;

/// Turns event timestamps into the window keys the store is indexed by.
///
/// Day keys are `YYYY-MM-DD`, week keys `YYYY-Www` (ISO-8601 week-numbering
/// year, so Jan 1 may belong to the previous year's last week) and month keys
/// `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: UtcOffset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowKeys {
    pub date: Date,
    pub day: String,
    pub week: String,
    pub month: String,
    pub previous_month: String,
    pub hour: u8,
    /// Monday = 0.
    pub weekday: u8,
}

impl Calendar {
    pub fn utc() -> Self {
        Self {
            offset: UtcOffset::UTC,
        }
    }

    pub fn with_offset(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// Uses the machine's current UTC offset, falling back to UTC when the
    /// platform cannot report it safely.
    pub fn local() -> Self {
        match UtcOffset::current_local_offset() {
            Ok(offset) => Self { offset },
            Err(err) => {
                log::debug!("local offset unavailable ({err}), using UTC");
                Self::utc()
            }
        }
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    pub fn datetime(&self, timestamp_ms: i64) -> Result<OffsetDateTime> {
        let nanos = i128::from(timestamp_ms) * 1_000_000;
        let utc = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .with_context(|| format!("timestamp {timestamp_ms} is out of range"))?;
        // `to_offset` panics when the shifted date leaves the supported range.
        let local = utc
            .checked_add(Duration::seconds(i64::from(self.offset.whole_seconds())))
            .with_context(|| format!("timestamp {timestamp_ms} is out of range"))?;
        Ok(local.replace_offset(self.offset))
    }

    /// Keys sort chronologically only for four-digit years, so anything
    /// outside 0000..=9999 is rejected.
    pub fn keys(&self, timestamp_ms: i64) -> Result<WindowKeys> {
        let at = self.datetime(timestamp_ms)?;
        let date = at.date();
        if !(0..=9999).contains(&date.year()) {
            bail!("timestamp {timestamp_ms} falls in year {}", date.year());
        }
        Ok(WindowKeys {
            date,
            day: day_key(date),
            week: week_key(date),
            month: month_key(date),
            previous_month: previous_month_key(date),
            hour: at.hour(),
            weekday: date.weekday().number_days_from_monday(),
        })
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

pub fn day_key(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn week_key(date: Date) -> String {
    let (year, week, _) = date.to_iso_week_date();
    format!("{year:04}-W{week:02}")
}

pub fn month_key(date: Date) -> String {
    format!("{:04}-{:02}", date.year(), u8::from(date.month()))
}

pub fn previous_month_key(date: Date) -> String {
    let month = date.month().previous();
    let year = if month == Month::December {
        date.year() - 1
    } else {
        date.year()
    };
    format!("{:04}-{:02}", year, u8::from(month))
}

pub fn parse_day_key(key: &str) -> Option<Date> {
    let mut parts = key.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u8 = parts.next()?.parse().ok()?;
    let day: u8 = parts.next()?.parse().ok()?;
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

/// First day still inside a trailing window of `days` ending on `reference`.
pub fn window_start(reference: Date, days: i64) -> Date {
    reference
        .checked_sub(Duration::days(days))
        .unwrap_or(Date::MIN)
}

pub fn now_epoch_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000) as i64
}
