use anyhow::Result;
use campuscal_core::VisibleWindow;

use crate::commands::Context;
use crate::render::{Render, render_agenda};

pub async fn run(
    ctx: &Context,
    calendars: &[String],
    from: Option<&str>,
    to: Option<&str>,
    json: bool,
) -> Result<()> {
    let active = ctx.resolve_calendars(calendars)?;
    let window = VisibleWindow::from_args(from, to, ctx.tz)?;

    let update = ctx.collect(active, window).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&update.occurrences)?);
        for failure in &update.failures {
            tracing::warn!(calendar = %failure.calendar_id, error = %failure.error, "Calendar failed to load");
        }
        return Ok(());
    }

    for line in render_agenda(&update.occurrences, ctx.tz) {
        println!("{}", line);
    }

    if !update.failures.is_empty() {
        println!();
        for failure in &update.failures {
            println!("{}", failure.render(ctx.tz));
        }
    }

    Ok(())
}
