use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use campuscal_core::VisibleWindow;
use chrono::{Datelike, Days, NaiveDate};
use owo_colors::OwoColorize;

use crate::commands::Context;
use crate::render::{Render, render_agenda};

pub async fn run(ctx: &Context, year: Option<i32>, month: Option<u32>, calendars: &[String]) -> Result<()> {
    let today = chrono::Utc::now().with_timezone(&ctx.tz).date_naive();
    let year = year.unwrap_or(today.year());
    let month = month.unwrap_or(today.month());

    let active = ctx.resolve_calendars(calendars)?;
    let window = VisibleWindow::month_grid(year, month, ctx.config.week_start, ctx.tz)?;
    let first = NaiveDate::from_ymd_opt(year, month, 1).context("Invalid month")?;

    let update = ctx.collect(active, window).await?;

    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for occurrence in &update.occurrences {
        *per_day.entry(occurrence.start.with_timezone(&ctx.tz).date_naive()).or_default() += 1;
    }

    println!("{}", first.format("%B %Y").bold());

    let grid_start = window.from.with_timezone(&ctx.tz).date_naive();
    let header: Vec<String> = (0..7)
        .filter_map(|i| grid_start.checked_add_days(Days::new(i)))
        .map(|d| format!("{:<4}", &d.format("%a").to_string()[..2]))
        .collect();
    println!("{}", header.concat().dimmed());

    let grid_end = window.latest.with_timezone(&ctx.tz).date_naive();
    let mut day = grid_start;
    while day < grid_end {
        let mut row = String::new();
        for _ in 0..7 {
            row.push_str(&render_cell(day, first.month(), today, per_day.get(&day).copied()));
            day = day.succ_opt().context("Date out of range")?;
        }
        println!("{}", row);
    }

    let in_month: Vec<_> = update
        .occurrences
        .iter()
        .filter(|o| o.start.with_timezone(&ctx.tz).month() == month)
        .cloned()
        .collect();

    println!();
    for line in render_agenda(&in_month, ctx.tz) {
        println!("{}", line);
    }

    for failure in &update.failures {
        println!("{}", failure.render(ctx.tz));
    }

    Ok(())
}

/// One four-column cell: the day number and a dot when something happens.
fn render_cell(day: NaiveDate, month: u32, today: NaiveDate, events: Option<usize>) -> String {
    let number = format!("{:>2}", day.day());
    let number = if day == today {
        number.reversed().to_string()
    } else if day.month() != month {
        number.dimmed().to_string()
    } else {
        number
    };
    let marker = if events.is_some() { "•".cyan().to_string() } else { " ".to_string() };
    format!("{}{} ", number, marker)
}
