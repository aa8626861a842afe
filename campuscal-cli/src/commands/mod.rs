pub mod calendars;
pub mod events;
pub mod month;
pub mod preview;
pub mod watch;

use anyhow::Result;
use campuscal_core::config::CampusCalConfig;
use campuscal_core::source::DirectorySource;
use campuscal_core::{ActiveCalendarSet, EventWindowSynchronizer, SyncUpdate, VisibleWindow};
use chrono_tz::Tz;
use tokio::sync::mpsc;

pub struct Context {
    pub config: CampusCalConfig,
    pub tz: Tz,
    pub source: DirectorySource,
}

impl Context {
    pub fn new(config: CampusCalConfig, tz: Tz) -> Self {
        let source = DirectorySource::new(config.data_path());
        Context { config, tz, source }
    }

    /// Calendars to show: the ones named on the command line, else the
    /// configured defaults, else all of them.
    pub fn resolve_calendars(&self, filter: &[String]) -> Result<ActiveCalendarSet> {
        let all_calendars = self.source.calendars();

        if all_calendars.is_empty() {
            anyhow::bail!(
                "No calendars found in {}.\n\n\
                Create one with a calendar.toml:\n  \
                mkdir -p {}/school && echo 'name = \"School\"' > {}/school/calendar.toml",
                self.source.root().display(),
                self.source.root().display(),
                self.source.root().display()
            );
        }

        let wanted: &[String] = if filter.is_empty() {
            &self.config.default_calendars
        } else {
            filter
        };

        if wanted.is_empty() {
            return Ok(ActiveCalendarSet::new(all_calendars.iter().map(|c| c.to_ref())));
        }

        let mut active = ActiveCalendarSet::default();
        for id in wanted {
            match all_calendars.iter().find(|c| c.id.as_str() == id) {
                Some(cal) => active.insert(cal.to_ref()),
                None => {
                    let available: Vec<_> = all_calendars.iter().map(|c| c.id.to_string()).collect();
                    anyhow::bail!(
                        "Calendar '{}' not found. Available: {}",
                        id,
                        available.join(", ")
                    );
                }
            }
        }

        Ok(active)
    }

    pub fn synchronizer(&self, source: DirectorySource) -> Result<EventWindowSynchronizer<DirectorySource>> {
        Ok(EventWindowSynchronizer::new(source).with_fetch_timeout(self.config.fetch_timeout()?))
    }

    /// Observe once and return the first update with every calendar loaded.
    pub async fn collect(&self, active: ActiveCalendarSet, window: VisibleWindow) -> Result<SyncUpdate> {
        let synchronizer = self.synchronizer(self.source.clone())?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = synchronizer.observe(active, window, move |update| {
            let _ = tx.send(update.clone());
        });

        while let Some(update) = rx.recv().await {
            if update.is_settled() {
                subscription.unsubscribe();
                return Ok(update);
            }
        }

        anyhow::bail!("Calendar loading stopped before all calendars were read")
    }
}
