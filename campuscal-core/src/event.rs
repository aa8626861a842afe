//! Calendar event types.
//!
//! Templates are what the remote API stores and returns. Occurrences are
//! what the calendar grid draws; they are derived from templates on every
//! expansion and never stored.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::window::VisibleWindow;

/// Identifier of a calendar (e.g. "school-events", "grade-7b").
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalendarId(String);

impl CalendarId {
    pub fn new(id: impl Into<String>) -> Self {
        CalendarId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CalendarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CalendarId {
    fn from(id: &str) -> Self {
        CalendarId(id.to_string())
    }
}

impl From<String> for CalendarId {
    fn from(id: String) -> Self {
        CalendarId(id)
    }
}

/// A calendar as seen by an occurrence: its id and display color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarRef {
    pub id: CalendarId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl CalendarRef {
    pub fn new(id: impl Into<CalendarId>) -> Self {
        CalendarRef {
            id: id.into(),
            color: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

impl From<CalendarId> for CalendarRef {
    fn from(id: CalendarId) -> Self {
        CalendarRef { id, color: None }
    }
}

/// A stored calendar entry, possibly recurring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTemplate {
    pub id: String,
    /// Owning calendar. Sources that scope files by calendar fill this in.
    #[serde(default)]
    pub calendar_id: CalendarId,
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub full_day: bool,
    /// Zone whose wall clock recurring instances keep (UTC when absent).
    #[serde(default)]
    pub time_zone: Option<Tz>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
}

impl EventTemplate {
    pub fn new(
        id: impl Into<String>,
        calendar_id: impl Into<CalendarId>,
        summary: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        EventTemplate {
            id: id.into(),
            calendar_id: calendar_id.into(),
            summary: summary.into(),
            description: None,
            location: None,
            start,
            end,
            full_day: false,
            time_zone: None,
            recurrence: None,
        }
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    pub fn with_time_zone(mut self, tz: Tz) -> Self {
        self.time_zone = Some(tz);
        self
    }

    pub fn full_day(mut self) -> Self {
        self.full_day = true;
        self
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// Whether this template could produce an occurrence inside `window`.
    ///
    /// Cheap pre-filter for sources; exact answers come from expansion.
    pub fn may_occur_in(&self, window: &VisibleWindow) -> bool {
        match &self.recurrence {
            None => window.intersects(self.start, self.end),
            Some(rule) => {
                self.start < window.latest
                    && rule.until.is_none_or(|until| {
                        match (
                            until.checked_add_signed(self.duration()),
                            window.from.checked_sub_signed(TimeDelta::days(1)),
                        ) {
                            (Some(last_end), Some(earliest)) => last_end > earliest,
                            _ => true,
                        }
                    })
            }
        }
    }
}

fn default_interval() -> u32 {
    1
}

/// Repetition rule attached to a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    #[serde(default = "default_interval")]
    pub interval: u32,
    pub frequency: Frequency,
    /// Last instant an occurrence may start at.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of occurrences.
    #[serde(default, alias = "occurrences")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_weekday: Vec<Weekday>,
    /// Days of the month; negative values count back from the month's end.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_month_day: Vec<i8>,
}

impl Recurrence {
    pub fn new(frequency: Frequency) -> Self {
        Recurrence {
            interval: 1,
            frequency,
            until: None,
            count: None,
            by_weekday: Vec::new(),
            by_month_day: Vec::new(),
        }
    }

    pub fn every(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn on_weekdays(mut self, weekdays: impl IntoIterator<Item = Weekday>) -> Self {
        self.by_weekday = weekdays.into_iter().collect();
        self
    }

    pub fn on_month_days(mut self, days: impl IntoIterator<Item = i8>) -> Self {
        self.by_month_day = days.into_iter().collect();
        self
    }

    /// Interval with the non-positive case mapped to 1.
    pub fn effective_interval(&self) -> u32 {
        self.interval.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// Anything the API sends that we do not step (HOURLY, typos, ...).
    #[serde(other)]
    Unsupported,
}

/// One concrete, dated instance of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub template_id: String,
    pub calendar: CalendarRef,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub full_day: bool,
    pub recurring: bool,
}

impl Occurrence {
    /// Builds the instance of `template` starting at `start`.
    pub fn of(template: &EventTemplate, start: DateTime<Utc>) -> Self {
        Occurrence {
            template_id: template.id.clone(),
            calendar: CalendarRef::new(template.calendar_id.clone()),
            summary: template.summary.clone(),
            description: template.description.clone(),
            location: template.location.clone(),
            start,
            end: start
                .checked_add_signed(template.duration())
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            full_day: template.full_day,
            recurring: template.is_recurring(),
        }
    }

    /// Identity of an occurrence: the template it came from and its start.
    pub fn key(&self) -> (&str, DateTime<Utc>) {
        (&self.template_id, self.start)
    }
}

impl fmt::Display for Occurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary)
    }
}
