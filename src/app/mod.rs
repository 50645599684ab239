//! Typed record and interval operations used by the command line. Record changes wake up the
//! tracker so its watch list stays current.

use std::{path::Path, sync::Arc};

use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use crate::{
    daemon::tracker::{Notification, TrackerHandle},
    store::{
        fields, Fields, Operator, Predicate, Record, RecordType, Store, StoreError, StoreResult,
        Time,
    },
};

pub const DATABASE_FILE: &str = "data.db";
pub const SNAPSHOT_FILE: &str = "snapshot.json";

pub struct App {
    store: Arc<Store>,
    tracker: Option<TrackerHandle>,
}

impl App {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            tracker: None,
        }
    }

    /// Opens the database of an application directory.
    pub fn open(dir: &Path, snapshot: bool) -> StoreResult<Self> {
        let store = Store::open(&dir.join(DATABASE_FILE))?
            .with_snapshot(snapshot.then(|| dir.join(SNAPSHOT_FILE)));
        Ok(Self::new(Arc::new(store)))
    }

    /// Routes record changes to a tracker running in this process.
    pub fn with_tracker(mut self, tracker: TrackerHandle) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn records_changed(&self) {
        if let Some(tracker) = &self.tracker {
            debug!("Requesting watch list rebuild");
            tracker.records_changed();
        }
    }

    #[instrument(skip(self))]
    pub fn create_record(
        &self,
        name: &str,
        kind: RecordType,
        executable_path: &str,
    ) -> StoreResult<u64> {
        let id = self.store.create::<Record>(
            &fields(json!({
                "name": name,
                "type": kind.as_str(),
                "executablePath": executable_path,
            })),
            None,
        )?;
        info!("Created record {id}");
        self.records_changed();
        Ok(id)
    }

    #[instrument(skip(self))]
    pub fn delete_record(&self, id: u64) -> StoreResult<()> {
        self.store.delete::<Record>(id, None)?;
        info!("Deleted record {id}");
        self.records_changed();
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn update_record(&self, id: u64, changes: &Fields) -> StoreResult<()> {
        self.store.update::<Record>(id, None, changes)?;
        self.records_changed();
        Ok(())
    }

    pub fn list_records(&self, predicate: Option<&Predicate>) -> StoreResult<Vec<Record>> {
        self.store.query::<Record>(None, predicate)
    }

    pub fn record(&self, id: u64) -> StoreResult<Record> {
        self.store.get::<Record>(id, None)
    }

    /// The oldest record pointing at `path`.
    pub fn find_record_by_path(&self, path: &str) -> StoreResult<Option<Record>> {
        let predicate = Predicate::new("executablePath", path, Operator::Eq);
        Ok(self
            .store
            .query::<Record>(None, Some(&predicate))?
            .into_iter()
            .next())
    }

    /// Whether no record points at `path` yet.
    pub fn is_path_available(&self, path: &str) -> StoreResult<bool> {
        Ok(self.find_record_by_path(path)?.is_none())
    }

    #[instrument(skip(self))]
    pub fn create_time(&self, record_id: u64, start: i64, end: i64) -> StoreResult<u64> {
        self.store.create::<Time>(
            &fields(json!({ "start": start, "end": end })),
            Some(record_id),
        )
    }

    #[instrument(skip(self))]
    pub fn update_time(&self, record_id: u64, id: u64, changes: &Fields) -> StoreResult<()> {
        self.store.update::<Time>(id, Some(record_id), changes)
    }

    #[instrument(skip(self))]
    pub fn delete_time(&self, record_id: u64, id: u64) -> StoreResult<()> {
        self.store.delete::<Time>(id, Some(record_id))
    }

    /// Intervals of a record in id order. A deleted record has none.
    pub fn list_times(
        &self,
        record_id: u64,
        predicate: Option<&Predicate>,
    ) -> StoreResult<Vec<Time>> {
        match self.store.query::<Time>(Some(record_id), predicate) {
            Err(StoreError::CollectionNotFound { .. }) => Ok(Vec::new()),
            result => result,
        }
    }

    /// Tracker notifications, if a tracker runs in this process.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Notification>> {
        self.tracker.as_ref().map(TrackerHandle::subscribe)
    }
}
