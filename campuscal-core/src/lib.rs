//! Calendar core for the school portal.
//!
//! This crate holds everything the calendar views need besides rendering:
//! - `event` for event templates, recurrence rules and concrete occurrences
//! - `window` for the visible date window and its arithmetic
//! - `recurrence` for expanding templates into occurrences
//! - `source` for the event sources templates are fetched from
//! - `sync` for keeping a live occurrence list for a set of calendars
//! - `config` for the global configuration file

pub mod config;
pub mod error;
pub mod event;
pub mod recurrence;
pub mod source;
pub mod sync;
pub mod window;

pub use error::{CampusCalError, CampusCalResult};
pub use event::*;
pub use recurrence::{expand, expand_all};
pub use sync::{ActiveCalendarSet, EventWindowSynchronizer, Subscription, SyncUpdate};
pub use window::VisibleWindow;
