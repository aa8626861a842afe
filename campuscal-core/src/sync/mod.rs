//! Live occurrence lists for a set of calendars.
//!
//! [`EventWindowSynchronizer::observe`] starts a background task that fetches
//! (and, where the source supports it, watches) every active calendar for
//! the visible window, merges the results, expands them and hands the
//! resulting [`SyncUpdate`] to a callback. The returned [`Subscription`]
//! changes the active calendars or the window, and stops everything when
//! dropped.

mod state;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{CampusCalError, CampusCalResult};
use crate::event::{CalendarId, CalendarRef, EventTemplate, Occurrence};
use crate::source::EventSource;
use crate::window::VisibleWindow;

use state::{FetchTicket, WindowState};

/// Default upper bound for a single fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Calendars currently toggled on, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveCalendarSet(BTreeMap<CalendarId, CalendarRef>);

impl ActiveCalendarSet {
    pub fn new(calendars: impl IntoIterator<Item = CalendarRef>) -> Self {
        ActiveCalendarSet(calendars.into_iter().map(|c| (c.id.clone(), c)).collect())
    }

    pub fn from_ids<I>(ids: impl IntoIterator<Item = I>) -> Self
    where
        I: Into<CalendarId>,
    {
        Self::new(ids.into_iter().map(CalendarRef::new))
    }

    pub fn insert(&mut self, calendar: CalendarRef) {
        self.0.insert(calendar.id.clone(), calendar);
    }

    pub fn remove(&mut self, calendar_id: &CalendarId) -> Option<CalendarRef> {
        self.0.remove(calendar_id)
    }

    pub fn contains(&self, calendar_id: &CalendarId) -> bool {
        self.0.contains_key(calendar_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalendarRef> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A calendar whose last fetch failed. It shows no events until the next
/// successful fetch.
#[derive(Debug, Clone)]
pub struct CalendarFailure {
    pub calendar_id: CalendarId,
    pub error: Arc<CampusCalError>,
}

/// What the calendar view renders.
#[derive(Debug, Clone)]
pub struct SyncUpdate {
    pub window: VisibleWindow,
    /// Expanded occurrences of every active calendar, ordered by start.
    pub occurrences: Vec<Occurrence>,
    pub failures: Vec<CalendarFailure>,
    /// Calendars with a fetch in flight.
    pub pending: Vec<CalendarId>,
}

impl SyncUpdate {
    fn empty(window: VisibleWindow) -> Self {
        SyncUpdate {
            window,
            occurrences: Vec::new(),
            failures: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// No fetch is outstanding.
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn occurrences_of<'a>(&'a self, calendar_id: &'a CalendarId) -> impl Iterator<Item = &'a Occurrence> {
        self.occurrences.iter().filter(move |o| &o.calendar.id == calendar_id)
    }
}

enum Command {
    SetActive(ActiveCalendarSet),
    SetWindow(VisibleWindow),
    Refetch,
    Shutdown,
}

struct Loaded {
    ticket: FetchTicket,
    result: CampusCalResult<Vec<EventTemplate>>,
}

pub struct EventWindowSynchronizer<S> {
    source: Arc<S>,
    fetch_timeout: Duration,
}

impl<S: EventSource> EventWindowSynchronizer<S> {
    pub fn new(source: S) -> Self {
        Self::from_shared(Arc::new(source))
    }

    pub fn from_shared(source: Arc<S>) -> Self {
        EventWindowSynchronizer {
            source,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Start observing `active` calendars over `window`.
    ///
    /// `on_update` runs on the synchronizer task after every change: once
    /// right away, then for each fetch result, live push, or change made
    /// through the returned [`Subscription`]. Must be called from within a
    /// tokio runtime.
    pub fn observe<F>(&self, active: ActiveCalendarSet, window: VisibleWindow, on_update: F) -> Subscription
    where
        F: FnMut(&SyncUpdate) + Send + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let latest = Arc::new(Mutex::new(SyncUpdate::empty(window)));

        let driver = Driver {
            source: Arc::clone(&self.source),
            fetch_timeout: self.fetch_timeout,
            state: WindowState::new(window),
            tasks: HashMap::new(),
            on_update: Box::new(on_update),
            closed: Arc::clone(&closed),
            latest: Arc::clone(&latest),
        };
        tokio::spawn(driver.run(active, commands_rx));

        Subscription {
            commands: commands_tx,
            closed,
            latest,
        }
    }
}

/// Handle to a running observation. Dropping it unsubscribes.
pub struct Subscription {
    commands: mpsc::UnboundedSender<Command>,
    closed: Arc<AtomicBool>,
    latest: Arc<Mutex<SyncUpdate>>,
}

impl Subscription {
    pub fn set_active_calendars(&self, active: ActiveCalendarSet) {
        self.send(Command::SetActive(active));
    }

    pub fn set_window(&self, window: VisibleWindow) {
        self.send(Command::SetWindow(window));
    }

    /// Request every active calendar again, including failed ones.
    pub fn refetch(&self) {
        self.send(Command::Refetch);
    }

    /// The most recently delivered update.
    pub fn snapshot(&self) -> SyncUpdate {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Stop observing. No update is delivered after this returns, apart from
    /// one already being delivered on another thread. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // The driver may already be gone; nothing to stop then.
            let _ = self.commands.send(Command::Shutdown);
        }
    }

    fn send(&self, command: Command) {
        if self.is_active() {
            let _ = self.commands.send(command);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

struct Driver<S> {
    source: Arc<S>,
    fetch_timeout: Duration,
    state: WindowState,
    tasks: HashMap<CalendarId, JoinHandle<()>>,
    on_update: Box<dyn FnMut(&SyncUpdate) + Send>,
    closed: Arc<AtomicBool>,
    latest: Arc<Mutex<SyncUpdate>>,
}

impl<S: EventSource> Driver<S> {
    async fn run(mut self, active: ActiveCalendarSet, mut commands: mpsc::UnboundedReceiver<Command>) {
        let (loaded_tx, mut loaded_rx) = mpsc::unbounded_channel::<Loaded>();

        let change = self.state.set_active(&active);
        self.start_fetches(change.added, &loaded_tx);
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::SetActive(active)) => {
                        let change = self.state.set_active(&active);
                        for calendar_id in &change.removed {
                            self.stop(calendar_id);
                        }
                        self.start_fetches(change.added, &loaded_tx);
                        self.publish();
                    }
                    Some(Command::SetWindow(window)) => {
                        let tickets = self.state.set_window(window);
                        self.start_fetches(tickets, &loaded_tx);
                        self.publish();
                    }
                    Some(Command::Refetch) => {
                        let tickets = self.state.refetch();
                        self.start_fetches(tickets, &loaded_tx);
                        self.publish();
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(loaded) = loaded_rx.recv() => {
                    if self.state.apply(&loaded.ticket.calendar_id, loaded.ticket.generation, loaded.result) {
                        self.publish();
                    }
                }
            }
        }

        for (_, task) in self.tasks.drain() {
            task.abort();
        }
        debug!("Synchronizer stopped");
    }

    fn stop(&mut self, calendar_id: &CalendarId) {
        if let Some(task) = self.tasks.remove(calendar_id) {
            task.abort();
        }
    }

    fn start_fetches(&mut self, tickets: Vec<FetchTicket>, loaded_tx: &mpsc::UnboundedSender<Loaded>) {
        let window = *self.state.window();

        for ticket in tickets {
            self.stop(&ticket.calendar_id);

            debug!(calendar = %ticket.calendar_id, generation = ticket.generation, "Fetching calendar");
            let task = tokio::spawn(follow_calendar(
                Arc::clone(&self.source),
                ticket.clone(),
                window,
                self.fetch_timeout,
                loaded_tx.clone(),
            ));
            self.tasks.insert(ticket.calendar_id, task);
        }
    }

    fn publish(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let update = self.state.snapshot();
        (self.on_update)(&update);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = update;
    }
}

/// Fetch one calendar, then forward its live feed until the receiver side
/// goes away or the task is aborted.
async fn follow_calendar<S: EventSource>(
    source: Arc<S>,
    ticket: FetchTicket,
    window: VisibleWindow,
    fetch_timeout: Duration,
    loaded_tx: mpsc::UnboundedSender<Loaded>,
) {
    // Watch before fetching so no change between the two is missed.
    let feed = source.watch_events(&ticket.calendar_id, &window);

    let result = timeout(fetch_timeout, source.fetch_events(&ticket.calendar_id, &window))
        .await
        .unwrap_or_else(|_| Err(CampusCalError::SourceTimeout(fetch_timeout)));

    let loaded = Loaded {
        ticket: ticket.clone(),
        result,
    };
    if loaded_tx.send(loaded).is_err() {
        return;
    }

    let Some(mut feed) = feed else {
        return;
    };

    while let Some(result) = feed.recv().await {
        let loaded = Loaded {
            ticket: ticket.clone(),
            result,
        };
        if loaded_tx.send(loaded).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    const WAIT: Duration = Duration::from_secs(5);

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
    }

    fn january() -> VisibleWindow {
        VisibleWindow::new(at(1, 0), Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
    }

    fn template(id: &str, calendar: &str, day: u32) -> EventTemplate {
        EventTemplate::new(id, calendar, id, at(day, 9), at(day, 9) + TimeDelta::hours(1))
    }

    fn channel_observer() -> (
        impl FnMut(&SyncUpdate) + Send + 'static,
        mpsc::UnboundedReceiver<SyncUpdate>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (move |update: &SyncUpdate| {
            let _ = tx.send(update.clone());
        }, rx)
    }

    async fn wait_for(
        updates: &mut mpsc::UnboundedReceiver<SyncUpdate>,
        done: impl Fn(&SyncUpdate) -> bool,
    ) -> SyncUpdate {
        tokio::time::timeout(WAIT, async {
            loop {
                let update = updates.recv().await.expect("Synchronizer stopped early");
                if done(&update) {
                    return update;
                }
            }
        })
        .await
        .expect("Timed out waiting for update")
    }

    #[tokio::test]
    async fn test_failed_calendar_does_not_block_others() {
        let source = MemorySource::new();
        source.fail_with("a", "GraphQL error");
        source.set_events("b", vec![template("b1", "b", 3), template("b2", "b", 4)]);

        let (on_update, mut updates) = channel_observer();
        let _subscription = EventWindowSynchronizer::new(source).observe(
            ActiveCalendarSet::from_ids(["a", "b"]),
            january(),
            on_update,
        );

        let update = wait_for(&mut updates, SyncUpdate::is_settled).await;

        assert_eq!(update.occurrences.len(), 2);
        assert!(update.occurrences.iter().all(|o| o.calendar.id == CalendarId::from("b")));
        assert_eq!(update.failures.len(), 1);
        assert_eq!(update.failures[0].calendar_id, CalendarId::from("a"));
    }

    #[tokio::test]
    async fn test_inverted_window_delivers_empty_update() {
        let source = MemorySource::new();
        source.set_events("a", vec![template("a1", "a", 3)]);
        let inverted = VisibleWindow::new(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(), at(1, 0));

        let (on_update, mut updates) = channel_observer();
        let subscription = EventWindowSynchronizer::new(source).observe(
            ActiveCalendarSet::from_ids(["a"]),
            inverted,
            on_update,
        );

        let update = wait_for(&mut updates, SyncUpdate::is_settled).await;
        assert_eq!(update.window, inverted);
        assert!(update.occurrences.is_empty());
        assert!(update.failures.is_empty());

        subscription.set_window(january());
        wait_for(&mut updates, |u| u.is_settled() && u.window == january() && u.occurrences.len() == 1).await;

        subscription.set_window(inverted);
        let update = wait_for(&mut updates, |u| u.is_settled() && u.window == inverted).await;
        assert!(update.occurrences.is_empty());
        assert!(update.failures.is_empty());
    }

    #[tokio::test]
    async fn test_first_update_is_immediate() {
        let source = MemorySource::new();
        source.set_delay("a", Duration::from_millis(200));

        let (on_update, mut updates) = channel_observer();
        let _subscription = EventWindowSynchronizer::new(source).observe(
            ActiveCalendarSet::from_ids(["a"]),
            january(),
            on_update,
        );

        let first = wait_for(&mut updates, |_| true).await;
        assert_eq!(first.pending, vec![CalendarId::from("a")]);
    }

    #[tokio::test]
    async fn test_removing_in_flight_calendar() {
        let source = MemorySource::new();
        source.set_events("slow", vec![template("s1", "slow", 3)]);
        source.set_events("fast", vec![template("f1", "fast", 4)]);
        source.set_delay("slow", Duration::from_millis(100));

        let (on_update, mut updates) = channel_observer();
        let subscription = EventWindowSynchronizer::new(source).observe(
            ActiveCalendarSet::from_ids(["slow", "fast"]),
            january(),
            on_update,
        );

        subscription.set_active_calendars(ActiveCalendarSet::from_ids(["fast"]));
        wait_for(&mut updates, |u| u.is_settled() && u.occurrences.len() == 1).await;

        // Give the slow fetch time to come back; it must not be merged.
        tokio::time::sleep(Duration::from_millis(250)).await;
        let snapshot = subscription.snapshot();
        assert_eq!(snapshot.occurrences.len(), 1);
        assert_eq!(snapshot.occurrences[0].template_id, "f1");
    }

    #[tokio::test]
    async fn test_removal_drops_contribution_without_fetch() {
        let source = MemorySource::new();
        source.set_events("a", vec![template("a1", "a", 3)]);
        source.set_events("b", vec![template("b1", "b", 4)]);

        let (on_update, mut updates) = channel_observer();
        let synchronizer = EventWindowSynchronizer::new(source.clone());
        let subscription = synchronizer.observe(ActiveCalendarSet::from_ids(["a", "b"]), january(), on_update);
        wait_for(&mut updates, |u| u.is_settled() && u.occurrences.len() == 2).await;

        subscription.set_active_calendars(ActiveCalendarSet::from_ids(["b"]));
        let update = wait_for(&mut updates, |u| u.occurrences.len() == 1).await;

        assert_eq!(update.occurrences_of(&"a".into()).count(), 0);
        assert_eq!(source.fetch_count(&"b".into()), 1);
    }

    #[tokio::test]
    async fn test_live_push_updates_only_that_calendar() {
        let source = MemorySource::new();
        source.set_events("a", vec![template("a1", "a", 3)]);
        source.set_events("b", vec![template("b1", "b", 4)]);

        let (on_update, mut updates) = channel_observer();
        let _subscription = EventWindowSynchronizer::new(source.clone()).observe(
            ActiveCalendarSet::from_ids(["a", "b"]),
            january(),
            on_update,
        );
        wait_for(&mut updates, |u| u.is_settled() && u.occurrences.len() == 2).await;

        source.set_events("a", vec![template("a1", "a", 3), template("a2", "a", 5)]);
        let update = wait_for(&mut updates, |u| u.occurrences.len() == 3).await;

        assert_eq!(update.occurrences_of(&"a".into()).count(), 2);
        assert_eq!(source.fetch_count(&"a".into()), 1);
        assert_eq!(source.fetch_count(&"b".into()), 1);
    }

    #[tokio::test]
    async fn test_window_change_refetches_and_reexpands() {
        let source = MemorySource::new();
        let weekly = EventTemplate::new("w", "a", "Weekly", at(1, 9), at(1, 10))
            .with_recurrence(crate::event::Recurrence::new(crate::event::Frequency::Weekly));
        source.set_events("a", vec![weekly]);

        let (on_update, mut updates) = channel_observer();
        let subscription = EventWindowSynchronizer::new(source.clone()).observe(
            ActiveCalendarSet::from_ids(["a"]),
            VisibleWindow::new(at(1, 0), at(8, 0)),
            on_update,
        );
        let update = wait_for(&mut updates, SyncUpdate::is_settled).await;
        assert_eq!(update.occurrences.len(), 1);

        subscription.set_window(january());
        let update = wait_for(&mut updates, |u| u.is_settled() && u.window == january()).await;

        assert_eq!(update.occurrences.len(), 5);
        assert_eq!(source.fetch_count(&"a".into()), 2);
    }

    #[tokio::test]
    async fn test_refetch_recovers_failed_calendar() {
        let source = MemorySource::new();
        source.fail_with("a", "timeout");

        let (on_update, mut updates) = channel_observer();
        let subscription = EventWindowSynchronizer::new(source.clone()).observe(
            ActiveCalendarSet::from_ids(["a"]),
            january(),
            on_update,
        );
        wait_for(&mut updates, |u| u.is_settled() && !u.failures.is_empty()).await;

        // set_events also pushes to the live feed; refetch must converge either way
        source.set_events("a", vec![template("a1", "a", 3)]);
        subscription.refetch();

        let update = wait_for(&mut updates, |u| u.is_settled() && u.occurrences.len() == 1).await;
        assert!(update.failures.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_timeout_reported_as_failure() {
        let source = MemorySource::new();
        source.set_events("a", vec![template("a1", "a", 3)]);
        source.set_delay("a", Duration::from_secs(60));

        let (on_update, mut updates) = channel_observer();
        let _subscription = EventWindowSynchronizer::new(source)
            .with_fetch_timeout(Duration::from_millis(50))
            .observe(ActiveCalendarSet::from_ids(["a"]), january(), on_update);

        let update = wait_for(&mut updates, SyncUpdate::is_settled).await;
        assert!(matches!(*update.failures[0].error, CampusCalError::SourceTimeout(_)));
        assert_eq!(
            update.failures[0].error.to_string(),
            "Event source request timed out after 50ms"
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_releases_feeds() {
        let source = MemorySource::new();
        source.set_events("a", vec![template("a1", "a", 3)]);

        let (on_update, mut updates) = channel_observer();
        let subscription = EventWindowSynchronizer::new(source.clone()).observe(
            ActiveCalendarSet::from_ids(["a"]),
            january(),
            on_update,
        );
        wait_for(&mut updates, SyncUpdate::is_settled).await;

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());

        // The driver drops its callback on shutdown, closing the channel.
        tokio::time::timeout(WAIT, async { while updates.recv().await.is_some() {} })
            .await
            .expect("Updates channel should close");

        // Aborted feed tasks release their receivers once the runtime drops them.
        tokio::time::timeout(WAIT, async {
            while source.live_watchers(&"a".into()) > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Live feeds should be released");
    }
}
