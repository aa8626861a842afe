use anyhow::Result;
use campuscal_core::VisibleWindow;
use owo_colors::OwoColorize;

use crate::commands::Context;
use crate::render::{Render, render_agenda};

/// Print the agenda, then reprint every time a calendar changes on disk,
/// until Ctrl-C.
pub async fn run(ctx: &Context, calendars: &[String], from: Option<&str>, to: Option<&str>) -> Result<()> {
    let active = ctx.resolve_calendars(calendars)?;
    let window = VisibleWindow::from_args(from, to, ctx.tz)?;

    let source = ctx.source.clone().with_poll_interval(ctx.config.poll_interval()?);
    let synchronizer = ctx.synchronizer(source)?;

    let tz = ctx.tz;
    let subscription = synchronizer.observe(active, window, move |update| {
        if !update.is_settled() {
            return;
        }

        let stamp = chrono::Utc::now().with_timezone(&tz).format("%H:%M:%S");
        println!("{}", format!("── updated {stamp} ──").dimmed());
        for line in render_agenda(&update.occurrences, tz) {
            println!("{}", line);
        }
        for failure in &update.failures {
            println!("{}", failure.render(tz));
        }
        println!();
    });

    tokio::signal::ctrl_c().await?;
    subscription.unsubscribe();
    tracing::info!("Stopped watching");

    Ok(())
}
