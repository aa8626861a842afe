//! Per-calendar fetch state held by a synchronizer.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CampusCalError, CampusCalResult};
use crate::event::{CalendarId, CalendarRef, EventTemplate, Occurrence};
use crate::recurrence::{expand, sort_occurrences};
use crate::sync::{ActiveCalendarSet, CalendarFailure, SyncUpdate};
use crate::window::VisibleWindow;

/// Where a calendar is in its fetch cycle.
///
/// Calendars not in the active set are `Idle`; the others move
/// `Fetching -> Ready` or `Fetching -> Error`, and back to `Fetching` on a
/// window change or refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarPhase {
    Idle,
    Fetching,
    Ready,
    Error,
}

struct CalendarSlot {
    calendar: CalendarRef,
    phase: CalendarPhase,
    generation: u64,
    templates: Vec<EventTemplate>,
    error: Option<Arc<CampusCalError>>,
}

/// A fetch the driver has to start: calendar plus the generation its result
/// must carry to be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchTicket {
    pub calendar_id: CalendarId,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ActiveChange {
    pub added: Vec<FetchTicket>,
    pub removed: Vec<CalendarId>,
}

pub(crate) struct WindowState {
    window: VisibleWindow,
    slots: BTreeMap<CalendarId, CalendarSlot>,
    next_generation: u64,
}

impl WindowState {
    pub fn new(window: VisibleWindow) -> Self {
        WindowState {
            window,
            slots: BTreeMap::new(),
            next_generation: 0,
        }
    }

    pub fn window(&self) -> &VisibleWindow {
        &self.window
    }

    fn ticket(&mut self, calendar_id: &CalendarId) -> FetchTicket {
        self.next_generation += 1;
        FetchTicket {
            calendar_id: calendar_id.clone(),
            generation: self.next_generation,
        }
    }

    /// Replace the active set. Removed calendars drop out at once; added ones
    /// start fetching. Kept calendars pick up color changes without a fetch.
    pub fn set_active(&mut self, active: &ActiveCalendarSet) -> ActiveChange {
        let mut change = ActiveChange::default();

        let removed: Vec<CalendarId> = self
            .slots
            .keys()
            .filter(|id| !active.contains(id))
            .cloned()
            .collect();
        for calendar_id in removed {
            self.slots.remove(&calendar_id);
            change.removed.push(calendar_id);
        }

        for calendar in active.iter() {
            if let Some(slot) = self.slots.get_mut(&calendar.id) {
                slot.calendar = calendar.clone();
                continue;
            }

            let ticket = self.ticket(&calendar.id);
            self.slots.insert(
                calendar.id.clone(),
                CalendarSlot {
                    calendar: calendar.clone(),
                    phase: CalendarPhase::Fetching,
                    generation: ticket.generation,
                    templates: Vec::new(),
                    error: None,
                },
            );
            change.added.push(ticket);
        }

        change
    }

    /// Move to a new window; every calendar refetches. Held templates stay
    /// until the new results arrive.
    pub fn set_window(&mut self, window: VisibleWindow) -> Vec<FetchTicket> {
        if !window.is_valid() {
            warn!(from = %window.from, latest = %window.latest, "Inverted window, nothing will be shown");
        }
        self.window = window;
        self.refetch()
    }

    pub fn refetch(&mut self) -> Vec<FetchTicket> {
        let ids: Vec<CalendarId> = self.slots.keys().cloned().collect();

        ids.iter()
            .map(|calendar_id| {
                let ticket = self.ticket(calendar_id);
                if let Some(slot) = self.slots.get_mut(calendar_id) {
                    slot.generation = ticket.generation;
                    slot.phase = CalendarPhase::Fetching;
                }
                ticket
            })
            .collect()
    }

    /// Apply a fetch or feed result. Returns false when the result is stale:
    /// the calendar was removed or refetched since the request went out.
    pub fn apply(
        &mut self,
        calendar_id: &CalendarId,
        generation: u64,
        result: CampusCalResult<Vec<EventTemplate>>,
    ) -> bool {
        let Some(slot) = self.slots.get_mut(calendar_id) else {
            debug!(calendar = %calendar_id, "Dropping result for inactive calendar");
            return false;
        };

        if slot.generation != generation {
            debug!(calendar = %calendar_id, generation, current = slot.generation, "Dropping stale result");
            return false;
        }

        match result {
            Ok(templates) => {
                debug!(calendar = %calendar_id, count = templates.len(), "Calendar ready");
                slot.templates = templates;
                slot.error = None;
                slot.phase = CalendarPhase::Ready;
            }
            Err(e) => {
                warn!(calendar = %calendar_id, error = %e, "Calendar fetch failed");
                slot.templates.clear();
                slot.error = Some(Arc::new(e));
                slot.phase = CalendarPhase::Error;
            }
        }

        true
    }

    #[cfg(test)]
    pub fn phase(&self, calendar_id: &CalendarId) -> CalendarPhase {
        self.slots
            .get(calendar_id)
            .map_or(CalendarPhase::Idle, |slot| slot.phase)
    }

    /// Merge every held template list and expand it against the window.
    pub fn snapshot(&self) -> SyncUpdate {
        let mut occurrences: Vec<Occurrence> = self
            .slots
            .values()
            .flat_map(|slot| {
                slot.templates.iter().flat_map(|template| {
                    expand(template, &self.window).into_iter().map(|mut occurrence| {
                        occurrence.calendar = slot.calendar.clone();
                        occurrence
                    })
                })
            })
            .collect();
        sort_occurrences(&mut occurrences);

        let failures = self
            .slots
            .iter()
            .filter_map(|(calendar_id, slot)| {
                slot.error.as_ref().map(|error| CalendarFailure {
                    calendar_id: calendar_id.clone(),
                    error: Arc::clone(error),
                })
            })
            .collect();

        let pending = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.phase == CalendarPhase::Fetching)
            .map(|(calendar_id, _)| calendar_id.clone())
            .collect();

        SyncUpdate {
            window: self.window,
            occurrences,
            failures,
            pending,
        }
    }
}
