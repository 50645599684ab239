use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::fs::operations::write_json_locked;

use super::{
    compare::Predicate,
    entity::{Entity, Fields, APP_INFO, RECORD},
    error::{StoreError, StoreResult},
    kv::{id_to_key, key_to_id, BucketId, KvStore, Tx, ROOT},
};

const VERSION_KEY: &[u8] = b"version";

/// Generic document store over [KvStore]. Entities are addressed by the bucket path their
/// descriptor returns and stored as JSON under sequential ids.
pub struct Store {
    kv: KvStore,
    snapshot_path: Option<PathBuf>,
}

impl Store {
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::init(KvStore::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(KvStore::open_in_memory()?)
    }

    /// After every mutation the whole store is flattened and written to `path`. Only meant for
    /// inspection during development.
    pub fn with_snapshot(mut self, path: Option<PathBuf>) -> Self {
        self.snapshot_path = path;
        self
    }

    fn init(kv: KvStore) -> StoreResult<Self> {
        kv.update(|tx| {
            let info = tx.create_bucket_if_not_exists(ROOT, APP_INFO)?;
            tx.create_bucket_if_not_exists(ROOT, RECORD)?;
            tx.put(info, VERSION_KEY, env!("CARGO_PKG_VERSION").as_bytes())
        })?;
        Ok(Self {
            kv,
            snapshot_path: None,
        })
    }

    /// Version of the application that last opened the store.
    pub fn version(&self) -> StoreResult<Option<String>> {
        self.kv.view(|tx| {
            let info = resolve(tx, &[APP_INFO.to_string()])?;
            Ok(tx
                .get(info, VERSION_KEY)?
                .map(|v| String::from_utf8_lossy(&v).into_owned()))
        })
    }

    /// Creates an entity from `fields` merged onto its defaults and returns the assigned id.
    #[instrument(skip(self, fields), fields(kind = %E::KIND))]
    pub fn create<E: Entity>(&self, fields: &Fields, parent: Option<u64>) -> StoreResult<u64> {
        let path = E::storage_path(parent)?;
        let id = self
            .kv
            .update(|tx| {
                let collection = resolve(tx, &path)?;
                let mut entity = E::default();
                entity.apply(fields)?;
                entity.validate()?;
                let id = tx.next_sequence(collection)?;
                entity.set_id(id);
                tx.put(collection, &id_to_key(id), &serde_json::to_vec(&entity)?)?;
                entity.on_created(tx, collection, parent)?;
                Ok(id)
            })
            .inspect_err(|e| error!("Failed to create {} in {}: {e}", E::KIND, path.join("/")))?;
        debug!("Created {} {id} in {}", E::KIND, path.join("/"));
        self.export_snapshot();
        Ok(id)
    }

    pub fn get<E: Entity>(&self, id: u64, parent: Option<u64>) -> StoreResult<E> {
        let path = E::storage_path(parent)?;
        self.kv
            .view(|tx| load(tx, resolve(tx, &path)?, id))
            .inspect_err(|e| debug!("Failed to get {} {id} in {}: {e}", E::KIND, path.join("/")))
    }

    /// Scans the collection in id order, keeping the entities the predicate accepts. Both the
    /// stored field and the comparison value are coerced through the entity descriptor first.
    #[instrument(skip(self, predicate), fields(kind = %E::KIND))]
    pub fn query<E: Entity>(
        &self,
        parent: Option<u64>,
        predicate: Option<&Predicate>,
    ) -> StoreResult<Vec<E>> {
        let path = E::storage_path(parent)?;
        self.kv
            .view(|tx| {
                let collection = resolve(tx, &path)?;
                let wanted = predicate
                    .map(|p| E::coerce(&p.field, &p.value))
                    .transpose()?;

                let mut result = Vec::new();
                for (key, data) in tx.entries(collection)? {
                    if key_to_id(&key).is_none() {
                        continue;
                    }
                    let entity: E = serde_json::from_slice(&data)?;
                    if let (Some(predicate), Some(wanted)) = (predicate, &wanted) {
                        let unsupported = || StoreError::UnsupportedFieldKind {
                            kind: E::KIND,
                            field: predicate.field.clone(),
                        };
                        let stored = entity.field(&predicate.field).ok_or_else(unsupported)?;
                        let matched = stored
                            .matches(predicate.operator, wanted)
                            .ok_or_else(unsupported)?;
                        if !matched {
                            continue;
                        }
                    }
                    result.push(entity);
                }
                Ok(result)
            })
            .inspect_err(|e| {
                error!(
                    "Failed to query {} in {} with {:?}: {e}",
                    E::KIND,
                    path.join("/"),
                    predicate.map(|p| p.to_string())
                )
            })
    }

    /// Overlays the patchable keys of `fields` onto an existing entity.
    #[instrument(skip(self, fields), fields(kind = %E::KIND))]
    pub fn update<E: Entity>(&self, id: u64, parent: Option<u64>, fields: &Fields) -> StoreResult<()> {
        let path = E::storage_path(parent)?;
        self.kv
            .update(|tx| {
                let collection = resolve(tx, &path)?;
                let previous: E = load(tx, collection, id)?;
                let mut entity = previous.clone();
                entity.apply(fields)?;
                entity.validate()?;
                tx.put(collection, &id_to_key(id), &serde_json::to_vec(&entity)?)?;
                entity.on_updated(&previous, tx, collection, parent)
            })
            .inspect_err(|e| error!("Failed to update {} {id} in {}: {e}", E::KIND, path.join("/")))?;
        self.export_snapshot();
        Ok(())
    }

    #[instrument(skip(self), fields(kind = %E::KIND))]
    pub fn delete<E: Entity>(&self, id: u64, parent: Option<u64>) -> StoreResult<()> {
        let path = E::storage_path(parent)?;
        self.kv
            .update(|tx| {
                let collection = resolve(tx, &path)?;
                let entity: E = load(tx, collection, id)?;
                tx.delete(collection, &id_to_key(id))?;
                entity.on_deleted(tx, collection, parent)
            })
            .inspect_err(|e| error!("Failed to delete {} {id} in {}: {e}", E::KIND, path.join("/")))?;
        debug!("Deleted {} {id} in {}", E::KIND, path.join("/"));
        self.export_snapshot();
        Ok(())
    }

    /// Flattens the whole store into nested JSON objects. Ids are written as decimal keys,
    /// nested buckets as nested objects.
    pub fn snapshot(&self) -> StoreResult<Value> {
        self.kv.view(|tx| flatten(tx, ROOT))
    }

    fn export_snapshot(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let result = self
            .snapshot()
            .map_err(anyhow::Error::from)
            .and_then(|snapshot| write_json_locked(path, &snapshot));
        if let Err(e) = result {
            warn!("Failed to export store snapshot to {path:?}: {e:?}");
        }
    }
}

fn resolve(tx: &Tx<'_>, path: &[String]) -> StoreResult<BucketId> {
    let mut bucket = ROOT;
    for (depth, name) in path.iter().enumerate() {
        bucket = tx
            .bucket(bucket, name)?
            .ok_or_else(|| StoreError::CollectionNotFound {
                path: path[..=depth].join("/"),
            })?;
    }
    Ok(bucket)
}

fn load<E: Entity>(tx: &Tx<'_>, collection: BucketId, id: u64) -> StoreResult<E> {
    let data = tx
        .get(collection, &id_to_key(id))?
        .ok_or(StoreError::EntityNotFound { kind: E::KIND, id })?;
    Ok(serde_json::from_slice(&data)?)
}

fn flatten(tx: &Tx<'_>, bucket: BucketId) -> StoreResult<Value> {
    let mut map = serde_json::Map::new();
    for (key, data) in tx.entries(bucket)? {
        let name = match key_to_id(&key) {
            Some(id) => id.to_string(),
            None => String::from_utf8_lossy(&key).into_owned(),
        };
        let value = serde_json::from_slice(&data)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&data).into_owned()));
        map.insert(name, value);
    }
    for (name, child) in tx.children(bucket)? {
        map.insert(name, flatten(tx, child)?);
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    use super::*;
    use crate::store::{
        compare::{Operator, Predicate},
        entity::{fields, time_bucket_name, EntityKind, Record, RecordType, Time},
    };

    fn demo_record(store: &Store) -> Result<u64> {
        Ok(store.create::<Record>(
            &fields(json!({
                "name": "demo",
                "type": "auto",
                "executablePath": "C:\\demo.exe",
            })),
            None,
        )?)
    }

    fn assert_total_matches(store: &Store, record_id: u64) -> Result<()> {
        let record = store.get::<Record>(record_id, None)?;
        let sum: i64 = store
            .query::<Time>(Some(record_id), None)?
            .iter()
            .map(Time::duration_ms)
            .sum();
        assert_eq!(record.total_time_ms, sum);
        Ok(())
    }

    #[test]
    fn test_create_time_updates_total() -> Result<()> {
        let store = Store::open_in_memory()?;
        let record_id = demo_record(&store)?;
        assert_eq!(record_id, 1);

        let time_id =
            store.create::<Time>(&fields(json!({"start": 1000, "end": 5000})), Some(record_id))?;
        assert_eq!(time_id, 1);
        assert_eq!(store.get::<Record>(record_id, None)?.total_time_ms, 4000);

        store.update::<Time>(time_id, Some(record_id), &fields(json!({"end": 9000})))?;
        assert_eq!(store.get::<Record>(record_id, None)?.total_time_ms, 8000);
        Ok(())
    }

    #[test]
    fn test_total_invariant_over_mutations() -> Result<()> {
        let store = Store::open_in_memory()?;
        let record_id = demo_record(&store)?;
        let other_id = demo_record(&store)?;

        let first = store.create::<Time>(&fields(json!({"start": 0, "end": 10})), Some(record_id))?;
        assert_total_matches(&store, record_id)?;
        // Overlapping manual intervals are accepted.
        let second = store.create::<Time>(&fields(json!({"start": 5, "end": 50})), Some(record_id))?;
        assert_total_matches(&store, record_id)?;
        store.create::<Time>(&fields(json!({"start": 0, "end": 1000})), Some(other_id))?;
        assert_total_matches(&store, other_id)?;

        store.update::<Time>(first, Some(record_id), &fields(json!({"end": 100})))?;
        assert_total_matches(&store, record_id)?;
        store.update::<Time>(second, Some(record_id), &fields(json!({"start": 40})))?;
        assert_total_matches(&store, record_id)?;
        store.delete::<Time>(first, Some(record_id))?;
        assert_total_matches(&store, record_id)?;

        assert_eq!(store.get::<Record>(record_id, None)?.total_time_ms, 10);
        assert_eq!(store.get::<Record>(other_id, None)?.total_time_ms, 1000);
        Ok(())
    }

    #[test]
    fn test_invalid_interval_is_rejected() -> Result<()> {
        let store = Store::open_in_memory()?;
        let record_id = demo_record(&store)?;
        let result = store.create::<Time>(&fields(json!({"start": 10, "end": 5})), Some(record_id));
        assert!(matches!(result, Err(StoreError::InvalidInterval { start: 10, end: 5 })));

        let id = store.create::<Time>(&fields(json!({"start": 10, "end": 20})), Some(record_id))?;
        let result = store.update::<Time>(id, Some(record_id), &fields(json!({"end": 0})));
        assert!(matches!(result, Err(StoreError::InvalidInterval { .. })));
        assert_eq!(store.get::<Time>(id, Some(record_id))?.end, 20);
        assert_eq!(store.get::<Record>(record_id, None)?.total_time_ms, 10);
        Ok(())
    }

    #[test]
    fn test_oversized_intervals_are_rejected() -> Result<()> {
        let store = Store::open_in_memory()?;
        let record_id = demo_record(&store)?;

        // Floats saturate to the ends of the i64 range, the span between them doesn't fit.
        let result = store.create::<Time>(
            &fields(json!({"start": -1e300, "end": 1e300})),
            Some(record_id),
        );
        assert!(matches!(result, Err(StoreError::InvalidInterval { .. })));

        let huge = store.create::<Time>(
            &fields(json!({"start": 0, "end": i64::MAX})),
            Some(record_id),
        )?;
        let result = store.create::<Time>(&fields(json!({"start": 0, "end": 10})), Some(record_id));
        assert!(matches!(result, Err(StoreError::TotalOverflow { id }) if id == record_id));
        assert_eq!(store.query::<Time>(Some(record_id), None)?.len(), 1);
        assert_eq!(store.get::<Record>(record_id, None)?.total_time_ms, i64::MAX);

        store.update::<Time>(huge, Some(record_id), &fields(json!({"start": 100})))?;
        store.create::<Time>(&fields(json!({"start": 0, "end": 10})), Some(record_id))?;
        assert_eq!(store.get::<Record>(record_id, None)?.total_time_ms, i64::MAX - 90);
        Ok(())
    }

    #[test]
    fn test_create_time_without_record_fails() -> Result<()> {
        let store = Store::open_in_memory()?;
        let result = store.create::<Time>(&fields(json!({"start": 0, "end": 1})), Some(7));
        assert!(
            matches!(result, Err(StoreError::CollectionNotFound { path }) if path == "record/time7")
        );
        let result = store.create::<Time>(&fields(json!({"start": 0, "end": 1})), None);
        assert!(matches!(result, Err(StoreError::MissingParent(EntityKind::Time))));
        Ok(())
    }

    #[test]
    fn test_missing_entities() -> Result<()> {
        let store = Store::open_in_memory()?;
        let result = store.update::<Record>(3, None, &fields(json!({"name": "x"})));
        assert!(matches!(
            result,
            Err(StoreError::EntityNotFound { kind: EntityKind::Record, id: 3 })
        ));
        let result = store.delete::<Record>(3, None);
        assert!(matches!(result, Err(StoreError::EntityNotFound { .. })));
        Ok(())
    }

    #[test]
    fn test_update_ignores_unknown_keys() -> Result<()> {
        let store = Store::open_in_memory()?;
        let id = demo_record(&store)?;
        store.update::<Record>(
            id,
            None,
            &fields(json!({"name": "renamed", "colour": "blue", "totalTimeMs": 99})),
        )?;
        let record = store.get::<Record>(id, None)?;
        assert_eq!(record.name, "renamed");
        assert_eq!(record.total_time_ms, 0);
        assert_eq!(record.kind, RecordType::Auto);
        Ok(())
    }

    #[test]
    fn test_delete_record_cascades_and_persists() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.db");
        {
            let store = Store::open(&path)?;
            let id = demo_record(&store)?;
            store.create::<Time>(&fields(json!({"start": 0, "end": 10})), Some(id))?;
            store.create::<Time>(&fields(json!({"start": 20, "end": 30})), Some(id))?;
            store.delete::<Record>(id, None)?;

            let result = store.query::<Time>(Some(id), None);
            assert!(matches!(result, Err(StoreError::CollectionNotFound { .. })));
        }

        let store = Store::open(&path)?;
        assert!(store.query::<Record>(None, None)?.is_empty());
        assert!(store.query::<Time>(Some(1), None).is_err());
        let snapshot = store.snapshot()?;
        assert!(snapshot["record"].get(time_bucket_name(1)).is_none());
        // Ids are never reused after a delete.
        assert_eq!(demo_record(&store)?, 2);
        assert!(store.query::<Time>(Some(2), None)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_query_by_executable_path() -> Result<()> {
        let store = Store::open_in_memory()?;
        demo_record(&store)?;
        store.create::<Record>(
            &fields(json!({"name": "other", "type": "auto", "executablePath": "/usr/bin/other"})),
            None,
        )?;
        store.create::<Record>(
            &fields(json!({"name": "demo again", "executablePath": "C:\\demo.exe"})),
            None,
        )?;

        let predicate = Predicate::new("executablePath", "C:\\demo.exe", Operator::Eq);
        let found = store.query::<Record>(None, Some(&predicate))?;
        assert_eq!(found.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);

        let predicate = Predicate::new("executablePath", "/nowhere", Operator::Eq);
        assert!(store.query::<Record>(None, Some(&predicate))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_query_with_integer_predicate() -> Result<()> {
        let store = Store::open_in_memory()?;
        let id = demo_record(&store)?;
        for (start, end) in [(0, 10), (100, 150), (200, 400), (500, 500)] {
            store.create::<Time>(&fields(json!({"start": start, "end": end})), Some(id))?;
        }
        let predicate = Predicate::parse("start", 100.0, ">=")?;
        let times = store.query::<Time>(Some(id), Some(&predicate))?;
        assert_eq!(times.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 3, 4]);

        let predicate = Predicate::parse("end", 400, "<")?;
        let times = store.query::<Time>(Some(id), Some(&predicate))?;
        assert_eq!(times.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
        Ok(())
    }

    #[test]
    fn test_query_fails_closed_on_unsupported_fields() -> Result<()> {
        let store = Store::open_in_memory()?;
        demo_record(&store)?;

        let predicate = Predicate::new("colour", "red", Operator::Eq);
        let result = store.query::<Record>(None, Some(&predicate));
        assert!(matches!(result, Err(StoreError::UnsupportedFieldKind { .. })));

        let predicate = Predicate::new("name", json!({"nested": true}), Operator::Eq);
        let result = store.query::<Record>(None, Some(&predicate));
        assert!(matches!(result, Err(StoreError::UnsupportedFieldKind { .. })));
        Ok(())
    }

    #[test]
    fn test_metadata_keys_are_skipped() -> Result<()> {
        let store = Store::open_in_memory()?;
        demo_record(&store)?;
        store.kv.update(|tx| {
            let records = resolve(tx, &[RECORD.to_string()])?;
            tx.put(records, b"schema", b"2")
        })?;

        let records = store.query::<Record>(None, None)?;
        assert_eq!(records.len(), 1);
        assert_eq!(store.version()?.as_deref(), Some(env!("CARGO_PKG_VERSION")));
        Ok(())
    }

    #[test]
    fn test_snapshot_layout() -> Result<()> {
        let dir = tempdir()?;
        let snapshot_path = dir.path().join("snapshot.json");
        let store = Store::open_in_memory()?.with_snapshot(Some(snapshot_path.clone()));
        let id = demo_record(&store)?;
        store.create::<Time>(&fields(json!({"start": 1000, "end": 5000})), Some(id))?;

        let written: Value = serde_json::from_slice(&std::fs::read(&snapshot_path)?)?;
        assert_eq!(written, store.snapshot()?);
        assert_eq!(written["appInfo"]["version"], json!(env!("CARGO_PKG_VERSION")));
        assert_eq!(written["record"]["1"]["totalTimeMs"], json!(4000));
        assert_eq!(written["record"]["time1"]["1"], json!({"id": 1, "start": 1000, "end": 5000}));
        Ok(())
    }
}
