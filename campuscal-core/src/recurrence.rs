//! Recurrence expansion for calendar templates.
//!
//! Expands a template into the concrete occurrences that overlap a visible
//! window. Candidates are stepped lazily from the template start, so a rule
//! with no end only costs as much as the window it is rendered into.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use rrule::{NWeekday, RRule, Unvalidated};
use tracing::{debug, warn};

use crate::error::{CampusCalError, CampusCalResult};
use crate::event::{EventTemplate, Frequency, Occurrence, Recurrence};
use crate::window::VisibleWindow;

/// Expand a template into its occurrences inside `window`, ordered by start.
///
/// Never fails: a template that ends before it starts, or a window whose
/// `from` is after `latest`, yields no occurrences. Rules with an
/// unsupported frequency are treated as a single, non-repeating event.
pub fn expand(template: &EventTemplate, window: &VisibleWindow) -> Vec<Occurrence> {
    if !window.is_valid() {
        warn!(from = %window.from, latest = %window.latest, "Ignoring expansion into inverted window");
        return Vec::new();
    }

    if template.end < template.start {
        debug!(template_id = %template.id, "Template ends before it starts, no occurrences");
        return Vec::new();
    }

    let rule = match &template.recurrence {
        Some(rule) if rule.frequency != Frequency::Unsupported => rule,
        Some(_) => {
            debug!(template_id = %template.id, "Unsupported frequency, expanding base occurrence only");
            return single(template, window);
        }
        None => return single(template, window),
    };

    let mut occurrences: Vec<Occurrence> = Candidates::new(template, rule, window)
        .map(|start| Occurrence::of(template, start))
        .collect();

    occurrences.sort_by_key(|o| o.start);
    occurrences
}

/// Expand several templates into one list, ordered by start.
pub fn expand_all<'a>(
    templates: impl IntoIterator<Item = &'a EventTemplate>,
    window: &VisibleWindow,
) -> Vec<Occurrence> {
    let mut occurrences: Vec<Occurrence> = templates
        .into_iter()
        .flat_map(|template| expand(template, window))
        .collect();

    sort_occurrences(&mut occurrences);
    occurrences
}

/// Order by start; ties by template id then calendar id, so merged lists do
/// not depend on the order calendars were fetched in.
pub fn sort_occurrences(occurrences: &mut [Occurrence]) {
    occurrences.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.template_id.cmp(&b.template_id))
            .then_with(|| a.calendar.id.cmp(&b.calendar.id))
    });
}

fn single(template: &EventTemplate, window: &VisibleWindow) -> Vec<Occurrence> {
    if window.intersects(template.start, template.end) {
        vec![Occurrence::of(template, template.start)]
    } else {
        Vec::new()
    }
}

/// Outcome of stepping the base start by `k` intervals.
enum Step {
    /// A real local start time.
    At(NaiveDateTime),
    /// This step lands on a date that doesn't exist (Feb 30, Feb 29 in a
    /// non-leap year). Carries the first day of the month it would be in.
    Missing(NaiveDate),
    /// Past the representable date range.
    OutOfRange,
}

/// Lazy stream of occurrence starts that fall inside the window.
struct Candidates<'a> {
    template: &'a EventTemplate,
    rule: &'a Recurrence,
    window: &'a VisibleWindow,
    tz: Tz,
    local_start: NaiveDateTime,
    interval: u64,
    duration: TimeDelta,
    next_step: u64,
    generated: u32,
    done: bool,
}

impl<'a> Candidates<'a> {
    fn new(template: &'a EventTemplate, rule: &'a Recurrence, window: &'a VisibleWindow) -> Self {
        let tz = template.time_zone.unwrap_or(Tz::UTC);

        let mut candidates = Candidates {
            template,
            rule,
            window,
            tz,
            local_start: template.start.with_timezone(&tz).naive_local(),
            interval: u64::from(rule.effective_interval()),
            duration: template.duration(),
            next_step: 0,
            generated: 0,
            done: false,
        };

        // A count limit has to be counted from the first occurrence, so only
        // unlimited rules may jump ahead.
        if rule.count.is_none() {
            candidates.next_step = candidates.first_relevant_step();
        }

        candidates
    }

    /// A step index at or before the first candidate that can reach the
    /// window. Errs on the early side; earlier candidates are skipped anyway.
    fn first_relevant_step(&self) -> u64 {
        // Windows reaching back to the start of representable time need no jump.
        let Some(target) = self
            .window
            .from
            .checked_sub_signed(self.duration)
            .and_then(|t| t.checked_sub_signed(TimeDelta::days(2)))
        else {
            return 0;
        };

        if target <= self.template.start {
            return 0;
        }

        let target = target.with_timezone(&self.tz).naive_local();
        if target <= self.local_start {
            return 0;
        }

        let units = match self.rule.frequency {
            Frequency::Daily => (target - self.local_start).num_days(),
            Frequency::Weekly => (target - self.local_start).num_days() / 7,
            Frequency::Monthly => {
                i64::from(target.year() - self.local_start.year()) * 12
                    + i64::from(target.month()) - i64::from(self.local_start.month())
                    - 1
            }
            Frequency::Yearly => i64::from(target.year() - self.local_start.year()) - 1,
            Frequency::Unsupported => 0,
        };

        u64::try_from(units).map_or(0, |units| units / self.interval)
    }

    fn step(&self, k: u64) -> Step {
        let Some(amount) = k.checked_mul(self.interval) else {
            return Step::OutOfRange;
        };

        match self.rule.frequency {
            Frequency::Daily => self.add_days(amount),
            Frequency::Weekly => match amount.checked_mul(7) {
                Some(days) => self.add_days(days),
                None => Step::OutOfRange,
            },
            Frequency::Monthly => {
                let month0 = i64::from(self.local_start.month0());
                let Some(total) = i64::try_from(amount).ok().and_then(|a| a.checked_add(month0)) else {
                    return Step::OutOfRange;
                };
                let year = i64::from(self.local_start.year()) + total.div_euclid(12);
                // month0 in 0..12 fits in u32
                let month = total.rem_euclid(12) as u32 + 1;
                self.on_date(year, month)
            }
            Frequency::Yearly => {
                let Some(year) = i64::try_from(amount)
                    .ok()
                    .and_then(|a| a.checked_add(i64::from(self.local_start.year())))
                else {
                    return Step::OutOfRange;
                };
                self.on_date(year, self.local_start.month())
            }
            Frequency::Unsupported => Step::OutOfRange,
        }
    }

    fn add_days(&self, days: u64) -> Step {
        match self.local_start.checked_add_days(Days::new(days)) {
            Some(local) => Step::At(local),
            None => Step::OutOfRange,
        }
    }

    fn on_date(&self, year: i64, month: u32) -> Step {
        let Ok(year) = i32::try_from(year) else {
            return Step::OutOfRange;
        };
        let Some(first_of_month) = NaiveDate::from_ymd_opt(year, month, 1) else {
            return Step::OutOfRange;
        };

        match NaiveDate::from_ymd_opt(year, month, self.local_start.day()) {
            Some(date) => Step::At(date.and_time(self.local_start.time())),
            None => Step::Missing(first_of_month),
        }
    }

    fn is_past_until(&self, start: DateTime<Utc>, local: NaiveDateTime) -> bool {
        let Some(until) = self.rule.until else {
            return false;
        };

        if self.template.full_day {
            local.date() > until.with_timezone(&self.tz).date_naive()
        } else {
            start > until
        }
    }

    fn matches_restrictions(&self, date: NaiveDate) -> bool {
        let weekday_ok =
            self.rule.by_weekday.is_empty() || self.rule.by_weekday.contains(&date.weekday());
        let month_day_ok = self.rule.by_month_day.is_empty()
            || self.rule.by_month_day.iter().any(|&day| month_day_matches(date, day));

        weekday_ok && month_day_ok
    }
}

impl Iterator for Candidates<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let k = self.next_step;
            self.next_step += 1;

            let local = match self.step(k) {
                Step::At(local) => local,
                Step::Missing(first_of_month) => {
                    let local = first_of_month.and_time(self.local_start.time());
                    let month_start = to_utc(self.tz, local);
                    if month_start >= self.window.latest || self.is_past_until(month_start, local) {
                        self.done = true;
                    }
                    continue;
                }
                Step::OutOfRange => {
                    self.done = true;
                    continue;
                }
            };

            let start = to_utc(self.tz, local);

            if start >= self.window.latest || self.is_past_until(start, local) {
                self.done = true;
                continue;
            }

            if !self.matches_restrictions(local.date()) {
                continue;
            }

            if let Some(count) = self.rule.count {
                if self.generated >= count {
                    self.done = true;
                    continue;
                }
            }
            self.generated += 1;

            if start
                .checked_add_signed(self.duration)
                .is_none_or(|end| end > self.window.from)
            {
                return Some(start);
            }
        }

        None
    }
}

/// Resolve a wall-clock time in `tz`. Ambiguous times take the earlier
/// instant; times inside a DST gap move forward by an hour.
fn to_utc(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| {
            local
                .checked_add_signed(TimeDelta::hours(1))
                .and_then(|later| tz.from_local_datetime(&later).earliest())
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| local.and_utc())
}

fn month_day_matches(date: NaiveDate, day: i8) -> bool {
    let day = i32::from(day);
    // day() is at most 31
    let current = date.day() as i32;

    match day {
        1..=31 => current == day,
        -31..=-1 => current == days_in_month(date) + 1 + day,
        _ => false,
    }
}

fn days_in_month(date: NaiveDate) -> i32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(31, |d| d.day() as i32)
}

impl Recurrence {
    /// Parse an RFC 5545 RRULE value (`FREQ=WEEKLY;COUNT=3;BYDAY=MO`), with
    /// or without the `RRULE:` prefix.
    ///
    /// Ordinal weekdays (`2MO`) keep only the weekday.
    pub fn from_rrule(text: &str) -> CampusCalResult<Self> {
        let text = text.trim();
        let text = text.strip_prefix("RRULE:").unwrap_or(text);

        let rule: RRule<Unvalidated> = text
            .parse()
            .map_err(|e| CampusCalError::Parse(format!("Invalid RRULE '{}': {}", text, e)))?;

        let frequency = match rule.get_freq() {
            rrule::Frequency::Daily => Frequency::Daily,
            rrule::Frequency::Weekly => Frequency::Weekly,
            rrule::Frequency::Monthly => Frequency::Monthly,
            rrule::Frequency::Yearly => Frequency::Yearly,
            _ => Frequency::Unsupported,
        };

        let by_weekday = rule
            .get_by_weekday()
            .iter()
            .map(|nweekday| match nweekday {
                NWeekday::Every(weekday) | NWeekday::Nth(_, weekday) => *weekday,
            })
            .collect();

        Ok(Recurrence {
            interval: u32::from(rule.get_interval()),
            frequency,
            until: rule.get_until().map(|until| until.with_timezone(&Utc)),
            count: rule.get_count(),
            by_weekday,
            by_month_day: rule.get_by_month_day().to_vec(),
        })
    }
}
