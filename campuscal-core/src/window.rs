//! Visible date window for calendar views.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{CampusCalError, CampusCalResult};

/// Days covered by the default window when no end date is given.
pub const DEFAULT_WINDOW_DAYS: u64 = 7;

/// The `[from, latest)` range a calendar view currently renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleWindow {
    pub from: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

impl VisibleWindow {
    /// Builds a window without checking it; see [`VisibleWindow::is_valid`].
    pub fn new(from: DateTime<Utc>, latest: DateTime<Utc>) -> Self {
        VisibleWindow { from, latest }
    }

    pub fn try_new(from: DateTime<Utc>, latest: DateTime<Utc>) -> CampusCalResult<Self> {
        let window = VisibleWindow::new(from, latest);
        if window.is_valid() {
            Ok(window)
        } else {
            Err(CampusCalError::InvalidWindow {
                from: from.to_rfc3339(),
                latest: latest.to_rfc3339(),
            })
        }
    }

    pub fn is_valid(&self) -> bool {
        self.from <= self.latest
    }

    /// Whether `[start, end)` overlaps this window.
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.latest && end > self.from
    }

    pub fn duration(&self) -> TimeDelta {
        self.latest - self.from
    }

    /// A single day in `tz`.
    pub fn day(date: NaiveDate, tz: Tz) -> Self {
        Self::days_from(date, 1, tz)
    }

    /// The calendar week containing `date`.
    pub fn week(date: NaiveDate, week_start: Weekday, tz: Tz) -> Self {
        Self::days_from(start_of_week(date, week_start), 7, tz)
    }

    /// The visible days of a month grid: the month extended to full weeks.
    pub fn month_grid(year: i32, month: u32, week_start: Weekday, tz: Tz) -> CampusCalResult<Self> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| CampusCalError::Parse(format!("Invalid month {year}-{month:02}")))?;
        let last = first
            .checked_add_months(Months::new(1))
            .and_then(|d| d.pred_opt())
            .ok_or_else(|| CampusCalError::Parse(format!("Month {year}-{month:02} out of range")))?;

        let grid_start = start_of_week(first, week_start);
        let grid_end = start_of_week(last, week_start) + Days::new(7);

        Ok(VisibleWindow::new(
            local_midnight(grid_start, tz),
            local_midnight(grid_end, tz),
        ))
    }

    /// Parse command line dates into a window.
    /// - `from`: YYYY-MM-DD, defaults to today
    /// - `to`: YYYY-MM-DD (inclusive), defaults to DEFAULT_WINDOW_DAYS after `from`
    pub fn from_args(from: Option<&str>, to: Option<&str>, tz: Tz) -> CampusCalResult<Self> {
        let from_date = match from {
            Some(s) => parse_date(s)?,
            None => Utc::now().with_timezone(&tz).date_naive(),
        };

        let end_date = match to {
            Some(s) => parse_date(s)? + Days::new(1),
            None => from_date + Days::new(DEFAULT_WINDOW_DAYS),
        };

        Self::try_new(local_midnight(from_date, tz), local_midnight(end_date, tz))
    }

    fn days_from(date: NaiveDate, days: u64, tz: Tz) -> Self {
        VisibleWindow::new(local_midnight(date, tz), local_midnight(date + Days::new(days), tz))
    }
}

/// First day of the week containing `date`.
pub fn start_of_week(date: NaiveDate, week_start: Weekday) -> NaiveDate {
    let back = (date.weekday().num_days_from_monday() + 7 - week_start.num_days_from_monday()) % 7;
    date - Days::new(u64::from(back))
}

/// Midnight of `date` in `tz`, as a UTC instant.
///
/// Zones that skip midnight on DST changes start the day at the first valid
/// local time instead.
pub fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(midnight + TimeDelta::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

fn parse_date(s: &str) -> CampusCalResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| CampusCalError::Parse(format!("Invalid date format '{}'. Expected YYYY-MM-DD", s)))
}
