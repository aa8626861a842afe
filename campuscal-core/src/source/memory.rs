//! In-memory event source with live feeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{CampusCalError, CampusCalResult};
use crate::event::{CalendarId, EventTemplate};
use crate::source::{EventFeed, EventSource};
use crate::window::VisibleWindow;

type FeedSender = mpsc::UnboundedSender<CampusCalResult<Vec<EventTemplate>>>;

#[derive(Default)]
struct MemoryState {
    calendars: HashMap<CalendarId, Vec<EventTemplate>>,
    failures: HashMap<CalendarId, String>,
    delays: HashMap<CalendarId, Duration>,
    fetches: HashMap<CalendarId, usize>,
    watchers: HashMap<CalendarId, Vec<(VisibleWindow, FeedSender)>>,
}

/// Calendars held in memory.
///
/// Changes made with [`MemorySource::set_events`] and
/// [`MemorySource::fail_with`] are pushed to every live feed of that calendar,
/// which makes this the stand-in for the portal API in previews and tests.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace a calendar's templates and clear any injected failure.
    pub fn set_events(&self, calendar_id: impl Into<CalendarId>, events: Vec<EventTemplate>) {
        let calendar_id = calendar_id.into();
        let mut state = self.lock();

        state.failures.remove(&calendar_id);
        state.calendars.insert(calendar_id.clone(), events);

        let templates = state.calendars.get(&calendar_id).cloned().unwrap_or_default();
        if let Some(watchers) = state.watchers.get_mut(&calendar_id) {
            watchers.retain(|(window, tx)| tx.send(Ok(in_window(&templates, window))).is_ok());
        }
    }

    /// Make fetches of this calendar fail until the next `set_events`.
    pub fn fail_with(&self, calendar_id: impl Into<CalendarId>, message: impl Into<String>) {
        let calendar_id = calendar_id.into();
        let message = message.into();
        let mut state = self.lock();

        state.failures.insert(calendar_id.clone(), message.clone());

        if let Some(watchers) = state.watchers.get_mut(&calendar_id) {
            watchers.retain(|(_, tx)| tx.send(Err(CampusCalError::Source(message.clone()))).is_ok());
        }
    }

    /// Delay every fetch of this calendar, to simulate a slow API.
    pub fn set_delay(&self, calendar_id: impl Into<CalendarId>, delay: Duration) {
        self.lock().delays.insert(calendar_id.into(), delay);
    }

    /// Number of fetches issued for a calendar so far.
    pub fn fetch_count(&self, calendar_id: &CalendarId) -> usize {
        self.lock().fetches.get(calendar_id).copied().unwrap_or(0)
    }

    /// Number of feeds for a calendar whose receiver is still alive.
    pub fn live_watchers(&self, calendar_id: &CalendarId) -> usize {
        let mut state = self.lock();
        match state.watchers.get_mut(calendar_id) {
            Some(watchers) => {
                watchers.retain(|(_, tx)| !tx.is_closed());
                watchers.len()
            }
            None => 0,
        }
    }
}

fn in_window(templates: &[EventTemplate], window: &VisibleWindow) -> Vec<EventTemplate> {
    templates
        .iter()
        .filter(|t| t.may_occur_in(window))
        .cloned()
        .collect()
}

impl EventSource for MemorySource {
    async fn fetch_events(
        &self,
        calendar_id: &CalendarId,
        window: &VisibleWindow,
    ) -> CampusCalResult<Vec<EventTemplate>> {
        let delay = {
            let mut state = self.lock();
            *state.fetches.entry(calendar_id.clone()).or_default() += 1;
            state.delays.get(calendar_id).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        if let Some(message) = state.failures.get(calendar_id) {
            return Err(CampusCalError::Source(message.clone()));
        }

        Ok(state
            .calendars
            .get(calendar_id)
            .map(|templates| in_window(templates, window))
            .unwrap_or_default())
    }

    fn watch_events(&self, calendar_id: &CalendarId, window: &VisibleWindow) -> Option<EventFeed> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .watchers
            .entry(calendar_id.clone())
            .or_default()
            .push((*window, tx));
        Some(rx)
    }
}
