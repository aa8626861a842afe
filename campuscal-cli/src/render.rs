//! Terminal rendering for campuscal-core types.

use campuscal_core::Occurrence;
use campuscal_core::source::CalendarInfo;
use campuscal_core::sync::CalendarFailure;
use chrono::NaiveDate;
use chrono_tz::Tz;
use owo_colors::OwoColorize;

/// Colored terminal rendering, with times shown in `tz`.
pub trait Render {
    fn render(&self, tz: Tz) -> String;
}

impl Render for Occurrence {
    fn render(&self, tz: Tz) -> String {
        let time = format_time(self, tz);
        let tag = paint(&format!("[{}]", self.calendar.id), self.calendar.color.as_deref());
        let repeat = if self.recurring { " ↻" } else { "" };

        match &self.location {
            Some(location) => format!(
                "  {} {}{} {} {}",
                time,
                self.summary,
                repeat.dimmed(),
                format!("@ {location}").dimmed(),
                tag
            ),
            None => format!("  {} {}{} {}", time, self.summary, repeat.dimmed(), tag),
        }
    }
}

impl Render for CalendarFailure {
    fn render(&self, _tz: Tz) -> String {
        format!("{} {}: {}", "!".red(), self.calendar_id.bold(), self.error.to_string().red())
    }
}

impl Render for CalendarInfo {
    fn render(&self, _tz: Tz) -> String {
        let swatch = paint("●", self.color.as_deref());
        if self.name == self.id.as_str() {
            format!("{} {}", swatch, self.id)
        } else {
            format!("{} {} {}", swatch, self.id, format!("({})", self.name).dimmed())
        }
    }
}

/// Occurrences grouped under a label per day. Expects them ordered by start.
pub fn render_agenda(occurrences: &[Occurrence], tz: Tz) -> Vec<String> {
    let today = chrono::Utc::now().with_timezone(&tz).date_naive();
    let mut lines = Vec::new();
    let mut current_date: Option<NaiveDate> = None;

    for occurrence in occurrences {
        let date = occurrence.start.with_timezone(&tz).date_naive();

        if current_date != Some(date) {
            if current_date.is_some() {
                lines.push(String::new());
            }
            lines.push(format_date_label(date, today).bold().to_string());
            current_date = Some(date);
        }

        lines.push(occurrence.render(tz));
    }

    if lines.is_empty() {
        lines.push("No events found".dimmed().to_string());
    }

    lines
}

/// "Today", "Tomorrow" or e.g. "Wed Feb 25".
pub fn format_date_label(date: NaiveDate, today: NaiveDate) -> String {
    match (date - today).num_days() {
        0 => "Today".to_string(),
        1 => "Tomorrow".to_string(),
        _ => date.format("%a %b %-d").to_string(),
    }
}

fn format_time(occurrence: &Occurrence, tz: Tz) -> String {
    if occurrence.full_day {
        return "all-day".to_string();
    }
    format!("{:>7}", occurrence.start.with_timezone(&tz).format("%H:%M"))
}

/// Paint `text` in a `#rrggbb` calendar color; plain dimmed text otherwise.
fn paint(text: &str, color: Option<&str>) -> String {
    match color.and_then(parse_hex_color) {
        Some((r, g, b)) => text.truecolor(r, g, b).to_string(),
        None => text.dimmed().to_string(),
    }
}

fn parse_hex_color(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}
