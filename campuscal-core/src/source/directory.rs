//! Calendars stored as directories of JSON template files.
//!
//! ```text
//! calendar_dir/
//!   school-events/
//!     calendar.toml      name, color
//!     parents-evening.json
//!     weekly-assembly.json
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{CampusCalError, CampusCalResult};
use crate::event::{CalendarId, CalendarRef, EventTemplate};
use crate::source::{EventFeed, EventSource};
use crate::window::VisibleWindow;

const CALENDAR_FILE: &str = "calendar.toml";

/// Contents of a calendar's calendar.toml
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
struct CalendarMeta {
    name: Option<String>,
    color: Option<String>,
}

/// A calendar found in the calendar directory.
#[derive(Debug, Clone)]
pub struct CalendarInfo {
    pub id: CalendarId,
    pub name: String,
    pub color: Option<String>,
    pub path: PathBuf,
}

impl CalendarInfo {
    fn load(path: PathBuf) -> CampusCalResult<Self> {
        let id = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(CalendarId::from)
            .ok_or_else(|| CampusCalError::Config(format!("Invalid calendar directory {}", path.display())))?;

        let content = std::fs::read_to_string(path.join(CALENDAR_FILE))?;
        let meta: CalendarMeta =
            toml::from_str(&content).map_err(|e| CampusCalError::Config(format!("{}: {}", id, e)))?;

        Ok(CalendarInfo {
            name: meta.name.unwrap_or_else(|| id.to_string()),
            color: meta.color,
            id,
            path,
        })
    }

    pub fn to_ref(&self) -> CalendarRef {
        CalendarRef {
            id: self.id.clone(),
            color: self.color.clone(),
        }
    }

    /// Load every template file of this calendar. Files that fail to parse
    /// are skipped.
    pub fn templates(&self) -> CampusCalResult<Vec<EventTemplate>> {
        let mut templates: Vec<EventTemplate> = template_files(&self.path)?
            .into_iter()
            .filter_map(|path| match read_template(&path) {
                Ok(template) => Some(template),
                Err(e) => {
                    warn!(calendar = %self.id, path = %path.display(), error = %e, "Skipping unreadable template");
                    None
                }
            })
            .map(|mut template| {
                template.calendar_id = self.id.clone();
                template
            })
            .collect();

        templates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(templates)
    }
}

fn template_files(dir: &Path) -> CampusCalResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|e| e == "json"))
        .collect();

    files.sort();
    Ok(files)
}

/// Read a single template file.
pub fn read_template(path: &Path) -> CampusCalResult<EventTemplate> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| CampusCalError::Serialization(format!("{}: {}", path.display(), e)))
}

/// Modification times of a calendar's files, used to notice changes.
fn fingerprint(dir: &Path) -> Vec<(PathBuf, Option<SystemTime>)> {
    let mut files = template_files(dir).unwrap_or_default();
    files.push(dir.join(CALENDAR_FILE));

    files
        .into_iter()
        .map(|path| {
            let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
            (path, modified)
        })
        .collect()
}

/// Event source backed by a calendar directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    poll_interval: Option<Duration>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectorySource {
            root: root.into(),
            poll_interval: None,
        }
    }

    /// Enable live feeds that re-read a calendar whenever its files change.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Discover calendars: subdirectories holding a calendar.toml.
    pub fn calendars(&self) -> Vec<CalendarInfo> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut calendars: Vec<CalendarInfo> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && path.join(CALENDAR_FILE).exists())
            .filter_map(|path| match CalendarInfo::load(path) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(error = %e, "Skipping calendar with unreadable calendar.toml");
                    None
                }
            })
            .collect();

        calendars.sort_by(|a, b| a.id.cmp(&b.id));
        calendars
    }

    pub fn calendar(&self, calendar_id: &CalendarId) -> CampusCalResult<CalendarInfo> {
        let path = self.root.join(calendar_id.as_str());

        if !path.join(CALENDAR_FILE).exists() {
            return Err(CampusCalError::CalendarNotFound(calendar_id.to_string()));
        }

        CalendarInfo::load(path)
    }

    fn load(&self, calendar_id: &CalendarId, window: &VisibleWindow) -> CampusCalResult<Vec<EventTemplate>> {
        let templates = self.calendar(calendar_id)?.templates()?;

        Ok(templates
            .into_iter()
            .filter(|template| template.may_occur_in(window))
            .collect())
    }
}

impl EventSource for DirectorySource {
    async fn fetch_events(
        &self,
        calendar_id: &CalendarId,
        window: &VisibleWindow,
    ) -> CampusCalResult<Vec<EventTemplate>> {
        let templates = self.load(calendar_id, window)?;
        debug!(calendar = %calendar_id, count = templates.len(), "Loaded templates from disk");
        Ok(templates)
    }

    fn watch_events(&self, calendar_id: &CalendarId, window: &VisibleWindow) -> Option<EventFeed> {
        let interval = self.poll_interval?;
        let (tx, rx) = mpsc::unbounded_channel();

        let source = self.clone();
        let calendar_id = calendar_id.clone();
        let window = *window;
        let dir = self.root.join(calendar_id.as_str());
        let mut last = fingerprint(&dir);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if tx.is_closed() {
                    break;
                }

                let current = fingerprint(&dir);
                if current == last {
                    continue;
                }
                last = current;

                debug!(calendar = %calendar_id, "Calendar files changed, reloading");
                if tx.send(source.load(&calendar_id, &window)).is_err() {
                    break;
                }
            }
        });

        Some(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn write_calendar(root: &Path, id: &str, color: Option<&str>) -> PathBuf {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        let meta = match color {
            Some(color) => format!("name = \"{id} calendar\"\ncolor = \"{color}\"\n"),
            None => String::new(),
        };
        std::fs::write(dir.join(CALENDAR_FILE), meta).unwrap();
        dir
    }

    fn write_template(dir: &Path, id: &str, start: &str, end: &str) {
        let json = format!(
            r#"{{"id": "{id}", "summary": "{id}", "start": "{start}", "end": "{end}"}}"#
        );
        std::fs::write(dir.join(format!("{id}.json")), json).unwrap();
    }

    fn january() -> VisibleWindow {
        VisibleWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_discovers_calendars() {
        let tmp = TempDir::new().unwrap();
        write_calendar(tmp.path(), "school", Some("#ff8800"));
        write_calendar(tmp.path(), "grade-7b", None);
        std::fs::create_dir_all(tmp.path().join("not-a-calendar")).unwrap();

        let calendars = DirectorySource::new(tmp.path()).calendars();

        let ids: Vec<_> = calendars.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["grade-7b", "school"]);
        assert_eq!(calendars[0].name, "grade-7b");
        assert_eq!(calendars[1].name, "school calendar");
        assert_eq!(calendars[1].to_ref().color.as_deref(), Some("#ff8800"));
    }

    #[test]
    fn test_missing_calendar() {
        let tmp = TempDir::new().unwrap();
        let result = DirectorySource::new(tmp.path()).calendar(&"ghost".into());
        assert!(matches!(result, Err(CampusCalError::CalendarNotFound(_))));
    }

    #[tokio::test]
    async fn test_fetch_assigns_calendar_and_filters() {
        let tmp = TempDir::new().unwrap();
        let dir = write_calendar(tmp.path(), "school", None);
        write_template(&dir, "exam", "2024-01-15T08:00:00Z", "2024-01-15T12:00:00Z");
        write_template(&dir, "spring", "2024-04-02T08:00:00Z", "2024-04-02T12:00:00Z");
        std::fs::write(dir.join("broken.json"), "{ not json").unwrap();

        let source = DirectorySource::new(tmp.path());
        let templates = source.fetch_events(&"school".into(), &january()).await.unwrap();

        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].id, "exam");
        assert_eq!(templates[0].calendar_id, CalendarId::from("school"));
    }

    #[tokio::test]
    async fn test_watch_without_polling_is_none() {
        let tmp = TempDir::new().unwrap();
        write_calendar(tmp.path(), "school", None);

        let source = DirectorySource::new(tmp.path());
        assert!(source.watch_events(&"school".into(), &january()).is_none());
    }

    #[tokio::test]
    async fn test_watch_pushes_on_change() {
        let tmp = TempDir::new().unwrap();
        let dir = write_calendar(tmp.path(), "school", None);

        let source = DirectorySource::new(tmp.path()).with_poll_interval(Duration::from_millis(20));
        let mut feed = source.watch_events(&"school".into(), &january()).unwrap();

        write_template(&dir, "exam", "2024-01-15T08:00:00Z", "2024-01-15T12:00:00Z");

        let pushed = tokio::time::timeout(Duration::from_secs(5), feed.recv())
            .await
            .expect("Should push within timeout")
            .unwrap()
            .unwrap();
        assert_eq!(pushed.len(), 1);
    }
}
