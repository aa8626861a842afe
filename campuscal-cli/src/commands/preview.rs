use std::path::Path;

use anyhow::Result;
use campuscal_core::source::read_template;
use campuscal_core::{VisibleWindow, expand};
use owo_colors::OwoColorize;

use crate::commands::Context;
use crate::render::render_agenda;

/// Expand one template file against the window, no calendar directory needed.
pub fn run(ctx: &Context, file: &Path, from: Option<&str>, to: Option<&str>) -> Result<()> {
    let template = read_template(file)?;
    let window = VisibleWindow::from_args(from, to, ctx.tz)?;

    let occurrences = expand(&template, &window);

    let rule = match &template.recurrence {
        Some(recurrence) => format!("repeats {:?} every {}", recurrence.frequency, recurrence.effective_interval()),
        None => "does not repeat".to_string(),
    };
    println!("{} {}", template.summary.bold(), format!("({rule})").dimmed());
    println!();

    for line in render_agenda(&occurrences, ctx.tz) {
        println!("{}", line);
    }

    Ok(())
}
