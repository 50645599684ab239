//! Session tracker. Turns program activity into time intervals.
//!
//! Everything that changes sessions goes through one task: activity from the event thread, idle
//! timers, the flush tick, record change wakeups and shutdown. Transitions for a path are
//! therefore totally ordered and no lock guards the session map.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Result};
use serde_json::json;
use tokio::{
    select,
    sync::{broadcast, mpsc, oneshot, Notify},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, time::DelayQueue};
use tracing::{debug, error, info, instrument, trace, warn};

use session::{display_name, PendingClose, Session, WatchList};

use crate::{
    store::{fields, Operator, Predicate, Record, RecordType, Store, StoreError, StoreResult, Time},
    utils::clock::Clock,
};

use super::collection::event::WindowEventKind;

pub mod session;

const EVENT_BUFFER: usize = 64;
const NOTIFICATION_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Inactivity after which a session is closed.
    pub idle_timeout: Duration,
    /// How often open sessions are written to the store.
    pub flush_interval: Duration,
    /// Create an `auto` record for every program without one.
    pub track_all: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            flush_interval: Duration::from_secs(60),
            track_all: false,
        }
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    /// The program at `path` owns the foreground window and something happened to it.
    Activity {
        kind: WindowEventKind,
        path: Arc<str>,
    },
    /// Closes every open session, then replies.
    CloseAll(oneshot::Sender<()>),
}

/// Changes broadcast to subscribers of [TrackerHandle::subscribe].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    SessionStarted {
        path: Arc<str>,
        record_id: u64,
        time_id: u64,
        start: i64,
    },
    SessionExtended {
        record_id: u64,
        time_id: u64,
        end: i64,
    },
    SessionClosed {
        path: Arc<str>,
        record_id: u64,
        time_id: u64,
        end: i64,
    },
    /// Paths with an open session, sorted.
    ActiveChanged { paths: Vec<Arc<str>> },
}

/// Cheap to clone entry point into a running [SessionTracker].
#[derive(Clone)]
pub struct TrackerHandle {
    events: mpsc::Sender<SessionEvent>,
    records_changed: Arc<Notify>,
    notifications: broadcast::Sender<Notification>,
}

impl TrackerHandle {
    /// Raw event channel, used by the event thread.
    pub fn events(&self) -> mpsc::Sender<SessionEvent> {
        self.events.clone()
    }

    pub async fn activity(&self, kind: WindowEventKind, path: impl Into<Arc<str>>) -> Result<()> {
        self.events
            .send(SessionEvent::Activity {
                kind,
                path: path.into(),
            })
            .await
            .map_err(|_| anyhow!("Tracker is not running"))
    }

    /// Asks the tracker to rebuild its watch list. Several calls before the tracker wakes up
    /// result in a single rebuild.
    pub fn records_changed(&self) {
        self.records_changed.notify_one();
    }

    /// Closes all open sessions and waits until their intervals are written.
    pub async fn close_all(&self) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        self.events
            .send(SessionEvent::CloseAll(sender))
            .await
            .map_err(|_| anyhow!("Tracker is not running"))?;
        receiver
            .await
            .map_err(|_| anyhow!("Tracker stopped before closing sessions"))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }
}

/// Why a session is being closed. An expired timer is already gone from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Armed,
    Expired,
}

pub struct SessionTracker {
    store: Arc<Store>,
    clock: Box<dyn Clock>,
    config: TrackerConfig,
    events: mpsc::Receiver<SessionEvent>,
    records_changed: Arc<Notify>,
    notifications: broadcast::Sender<Notification>,
    shutdown: CancellationToken,
    watch_list: WatchList,
    sessions: HashMap<Arc<str>, Session>,
    timers: DelayQueue<Arc<str>>,
    /// Closes whose write failed, retried on every flush.
    pending: Vec<PendingClose>,
    /// Paths `trackAll` found an existing record for. Cleared on every watch list rebuild.
    unadoptable: HashSet<Arc<str>>,
}

impl SessionTracker {
    pub fn new(
        store: Arc<Store>,
        clock: Box<dyn Clock>,
        config: TrackerConfig,
        shutdown: CancellationToken,
    ) -> (Self, TrackerHandle) {
        let (events_sender, events) = mpsc::channel(EVENT_BUFFER);
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let records_changed = Arc::new(Notify::new());
        let handle = TrackerHandle {
            events: events_sender,
            records_changed: records_changed.clone(),
            notifications: notifications.clone(),
        };
        let tracker = Self {
            store,
            clock,
            config,
            events,
            records_changed,
            notifications,
            shutdown,
            watch_list: WatchList::default(),
            sessions: HashMap::new(),
            timers: DelayQueue::new(),
            pending: Vec::new(),
            unadoptable: HashSet::new(),
        };
        (tracker, handle)
    }

    /// Executes the tracker event loop. Open sessions are closed before returning.
    pub async fn run(mut self) -> Result<()> {
        self.refresh();
        info!("Watching {} programs", self.watch_list.len());

        let period = self.config.flush_interval;
        let mut flush = interval_at(Instant::now() + period, period);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                Some(expired) = futures::future::poll_fn(|cx| self.timers.poll_expired(cx)),
                    if !self.timers.is_empty() =>
                {
                    let path = expired.into_inner();
                    debug!("{path} went idle");
                    self.finalize(&path, TimerState::Expired);
                }
                _ = flush.tick() => self.flush(),
                _ = self.records_changed.notified() => self.refresh(),
            }
        }

        self.close_all();
        self.retry_pending();
        if !self.pending.is_empty() {
            warn!("Stopping with {} session ends not written", self.pending.len());
        }
        info!("Tracker stopped");
        Ok(())
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Activity { kind, path } => self.on_activity(kind, path),
            SessionEvent::CloseAll(done) => {
                self.close_all();
                let _ = done.send(());
            }
        }
    }

    #[instrument(skip(self))]
    fn on_activity(&mut self, kind: WindowEventKind, path: Arc<str>) {
        if let Some(session) = self.sessions.get(&path) {
            self.timers.reset(&session.timer, self.config.idle_timeout);
            trace!("Idle timer reset");
            return;
        }

        let Some(record_id) = self.resolve_record(&path) else {
            trace!("Not watched, ignoring");
            return;
        };

        let now = self.clock.now_ms();
        let interval = fields(json!({ "start": now, "end": now }));
        let time_id = match self.store.create::<Time>(&interval, Some(record_id)) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to open a session for record {record_id} {e:?}");
                return;
            }
        };

        let timer = self.timers.insert(path.clone(), self.config.idle_timeout);
        self.sessions.insert(
            path.clone(),
            Session {
                record_id,
                time_id,
                end: now,
                timer,
            },
        );
        info!("Opened session {time_id} of record {record_id}");
        self.notify(Notification::SessionStarted {
            path,
            record_id,
            time_id,
            start: now,
        });
        self.notify_active();
    }

    fn resolve_record(&mut self, path: &Arc<str>) -> Option<u64> {
        if let Some(record_id) = self.watch_list.get(path) {
            return Some(record_id);
        }
        if !self.config.track_all || self.unadoptable.contains(path) {
            return None;
        }
        self.adopt(path)
            .inspect_err(|e| error!("Failed to create a record for {path} {e:?}"))
            .ok()
            .flatten()
    }

    /// Creates an `auto` record for a program seen for the first time. Programs that already
    /// have a record, such as a manual one, are left alone.
    fn adopt(&mut self, path: &Arc<str>) -> StoreResult<Option<u64>> {
        let by_path = Predicate::new("executablePath", &**path, Operator::Eq);
        if !self.store.query::<Record>(None, Some(&by_path))?.is_empty() {
            self.unadoptable.insert(path.clone());
            return Ok(None);
        }
        let record = fields(json!({
            "name": display_name(path),
            "type": RecordType::Auto.as_str(),
            "executablePath": &**path,
        }));
        let record_id = self.store.create::<Record>(&record, None)?;
        self.watch_list.insert(path.clone(), record_id);
        info!("Started tracking {path} as record {record_id}");
        Ok(Some(record_id))
    }

    /// Closes the session of `path`. Does nothing if there is none.
    #[instrument(skip(self))]
    fn finalize(&mut self, path: &Arc<str>, timer: TimerState) {
        let Some(session) = self.sessions.remove(path) else {
            trace!("No open session");
            return;
        };
        if timer == TimerState::Armed {
            self.timers.remove(&session.timer);
        }

        let end = self.clock.now_ms().max(session.end);
        match write_end(&self.store, session.record_id, session.time_id, end) {
            Ok(()) => info!("Closed session {} of record {}", session.time_id, session.record_id),
            Err(e) if is_gone(&e) => {
                warn!("Record {} is gone, dropping its session", session.record_id)
            }
            Err(e) => {
                error!("Failed to close session {}, retrying on the next flush {e:?}", session.time_id);
                self.pending.push(PendingClose {
                    record_id: session.record_id,
                    time_id: session.time_id,
                    end,
                });
            }
        }
        self.notify(Notification::SessionClosed {
            path: path.clone(),
            record_id: session.record_id,
            time_id: session.time_id,
            end,
        });
        self.notify_active();
    }

    /// Writes the final `end` of sessions whose close failed earlier.
    fn retry_pending(&mut self) {
        let store = &self.store;
        self.pending.retain(|close| {
            match write_end(store, close.record_id, close.time_id, close.end) {
                Ok(()) => {
                    info!("Closed session {} of record {}", close.time_id, close.record_id);
                    false
                }
                Err(e) if is_gone(&e) => false,
                Err(e) => {
                    error!("Still failing to close session {} {e:?}", close.time_id);
                    true
                }
            }
        });
    }

    fn close_all(&mut self) {
        let paths = self.sessions.keys().cloned().collect::<Vec<_>>();
        for path in paths {
            self.finalize(&path, TimerState::Armed);
        }
    }

    /// Rebuilds the watch list from the store and closes sessions whose path no longer leads to
    /// their record.
    fn refresh(&mut self) {
        let records = match self.store.query::<Record>(None, None) {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to rebuild the watch list, keeping the previous one {e:?}");
                return;
            }
        };
        self.unadoptable.clear();
        let watch_list = WatchList::from_records(&records);
        if watch_list != self.watch_list {
            debug!("Watch list changed, {} programs", watch_list.len());
        }
        self.watch_list = watch_list;

        let stale = self
            .sessions
            .iter()
            .filter(|(path, session)| self.watch_list.get(path) != Some(session.record_id))
            .map(|(path, _)| path.clone())
            .collect::<Vec<_>>();
        for path in stale {
            info!("{path} is no longer watched");
            self.finalize(&path, TimerState::Armed);
        }
    }

    /// Extends every open session to now. Store failures are retried on the next tick.
    fn flush(&mut self) {
        // Picks up records edited by other processes too.
        self.refresh();
        self.retry_pending();

        let now = self.clock.now_ms();
        let mut gone = Vec::new();
        for (path, session) in self.sessions.iter_mut() {
            let end = now.max(session.end);
            match write_end(&self.store, session.record_id, session.time_id, end) {
                Ok(()) => {
                    session.end = end;
                    let _ = self.notifications.send(Notification::SessionExtended {
                        record_id: session.record_id,
                        time_id: session.time_id,
                        end,
                    });
                }
                Err(e) if is_gone(&e) => gone.push(path.clone()),
                Err(e) => error!("Failed to extend session of {path}, retrying later {e:?}"),
            }
        }
        for path in gone {
            self.finalize(&path, TimerState::Armed);
        }
        trace!("Flushed {} sessions", self.sessions.len());
    }

    fn notify(&self, notification: Notification) {
        // Having no subscribers is fine.
        let _ = self.notifications.send(notification);
    }

    fn notify_active(&self) {
        let mut paths = self.sessions.keys().cloned().collect::<Vec<_>>();
        paths.sort();
        self.notify(Notification::ActiveChanged { paths });
    }
}

fn write_end(store: &Store, record_id: u64, time_id: u64, end: i64) -> StoreResult<()> {
    store.update::<Time>(time_id, Some(record_id), &fields(json!({ "end": end })))
}

/// The interval or its record was deleted while the session was open.
fn is_gone(error: &StoreError) -> bool {
    matches!(
        error,
        StoreError::EntityNotFound { .. } | StoreError::CollectionNotFound { .. }
    )
}
