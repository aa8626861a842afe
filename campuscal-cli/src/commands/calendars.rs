use anyhow::Result;
use owo_colors::OwoColorize;

use crate::commands::Context;
use crate::render::Render;

pub fn run(ctx: &Context) -> Result<()> {
    let calendars = ctx.source.calendars();

    if calendars.is_empty() {
        println!("{}", format!("No calendars in {}", ctx.source.root().display()).dimmed());
        return Ok(());
    }

    for calendar in &calendars {
        let count = match calendar.templates() {
            Ok(templates) => format!("{} templates", templates.len()),
            Err(e) => format!("unreadable: {e}"),
        };
        let default = if ctx.config.default_calendars.iter().any(|id| id == calendar.id.as_str()) {
            " (default)"
        } else {
            ""
        };

        println!("{}{} {}", calendar.render(ctx.tz), default.green(), count.dimmed());
    }

    Ok(())
}
