//! Event sources.
//!
//! A source is wherever templates come from: the portal API, a directory of
//! JSON files, or memory. The synchronizer only talks to this trait.

mod directory;
mod memory;

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::CampusCalResult;
use crate::event::{CalendarId, EventTemplate};
use crate::window::VisibleWindow;

pub use directory::{CalendarInfo, DirectorySource, read_template};
pub use memory::MemorySource;

/// Live feed of template lists for one calendar and window.
///
/// Every item replaces the previous list. Dropping the receiver ends the watch.
pub type EventFeed = mpsc::UnboundedReceiver<CampusCalResult<Vec<EventTemplate>>>;

pub trait EventSource: Send + Sync + 'static {
    /// One-shot read of the templates of `calendar_id` that may occur in `window`.
    fn fetch_events(
        &self,
        calendar_id: &CalendarId,
        window: &VisibleWindow,
    ) -> impl Future<Output = CampusCalResult<Vec<EventTemplate>>> + Send;

    /// Live read. Sources without push support return `None` and are only
    /// fetched.
    fn watch_events(&self, _calendar_id: &CalendarId, _window: &VisibleWindow) -> Option<EventFeed> {
        None
    }
}
