//! Entity descriptors. Each stored kind declares where it lives, which of its fields can be
//! patched, and how raw JSON values are narrowed into its field types. The store itself only
//! moves bytes around and calls back into these descriptors.

use std::fmt::{Debug, Display};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::{
    compare::FieldValue,
    error::{StoreError, StoreResult},
    kv::{id_to_key, BucketId, Tx},
};

pub const APP_INFO: &str = "appInfo";
pub const RECORD: &str = "record";
pub const TIME: &str = "time";

/// Raw field map used for creation defaults and partial updates.
pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Record,
    Time,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Record => write!(f, "record"),
            EntityKind::Time => write!(f, "time"),
        }
    }
}

/// Field map of a JSON object. Anything else yields an empty map.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

/// Name of the nested bucket holding the intervals of a record.
pub fn time_bucket_name(record_id: u64) -> String {
    format!("{TIME}{record_id}")
}

pub trait Entity: Serialize + DeserializeOwned + Default + Clone + Debug {
    const KIND: EntityKind;

    /// Fields that creation and partial updates may set.
    const PATCHABLE: &'static [&'static str];

    /// Buckets to descend through, starting from the root, to reach the collection of this
    /// kind.
    fn storage_path(parent: Option<u64>) -> StoreResult<Vec<String>>;

    fn id(&self) -> u64;

    fn set_id(&mut self, id: u64);

    /// Narrows a raw value into the declared type of `field`.
    fn coerce(field: &str, raw: &Value) -> StoreResult<FieldValue>;

    /// Current value of a comparable field.
    fn field(&self, field: &str) -> Option<FieldValue>;

    /// Sets a field from an already coerced value. Returns false if the field isn't patchable.
    fn assign(&mut self, field: &str, value: FieldValue) -> bool;

    fn validate(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Runs inside the creating transaction. `collection` is the bucket the entity was put
    /// into.
    fn on_created(&self, _tx: &Tx<'_>, _collection: BucketId, _parent: Option<u64>) -> StoreResult<()> {
        Ok(())
    }

    fn on_updated(
        &self,
        _previous: &Self,
        _tx: &Tx<'_>,
        _collection: BucketId,
        _parent: Option<u64>,
    ) -> StoreResult<()> {
        Ok(())
    }

    fn on_deleted(&self, _tx: &Tx<'_>, _collection: BucketId, _parent: Option<u64>) -> StoreResult<()> {
        Ok(())
    }

    /// Overlays patchable keys of `fields`. Unknown keys are skipped.
    fn apply(&mut self, fields: &Fields) -> StoreResult<()> {
        for (name, raw) in fields {
            if !Self::PATCHABLE.contains(&name.as_str()) {
                tracing::trace!("Ignoring field {name} for {}", Self::KIND);
                continue;
            }
            let value = Self::coerce(name, raw)?;
            self.assign(name, value);
        }
        Ok(())
    }
}

fn unsupported(kind: EntityKind, field: &str) -> StoreError {
    StoreError::UnsupportedFieldKind {
        kind,
        field: field.to_string(),
    }
}

fn coerce_integer(kind: EntityKind, field: &str, raw: &Value) -> StoreResult<FieldValue> {
    let Value::Number(number) = raw else {
        return Err(unsupported(kind, field));
    };
    number
        .as_i64()
        .or_else(|| number.as_f64().map(|v| v as i64))
        .map(FieldValue::Integer)
        .ok_or_else(|| unsupported(kind, field))
}

fn coerce_text(kind: EntityKind, field: &str, raw: &Value) -> StoreResult<FieldValue> {
    match raw {
        Value::String(s) => Ok(FieldValue::Text(s.clone())),
        _ => Err(unsupported(kind, field)),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    #[default]
    Manual,
    Auto,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Manual => "manual",
            RecordType::Auto => "auto",
        }
    }

    /// Accepts the textual names as well as the legacy numeric codes (0 manual, 1 auto).
    fn from_raw(raw: &Value) -> Option<Self> {
        match raw {
            Value::String(s) if s == "manual" => Some(RecordType::Manual),
            Value::String(s) if s == "auto" => Some(RecordType::Auto),
            Value::Number(n) if n.as_i64() == Some(0) => Some(RecordType::Manual),
            Value::Number(n) if n.as_i64() == Some(1) => Some(RecordType::Auto),
            _ => None,
        }
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked program.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RecordType,
    #[serde(default)]
    pub executable_path: String,
    /// Sum of the durations of every interval of this record.
    #[serde(default)]
    pub total_time_ms: i64,
}

impl Entity for Record {
    const KIND: EntityKind = EntityKind::Record;
    const PATCHABLE: &'static [&'static str] = &["name", "type", "executablePath"];

    fn storage_path(_parent: Option<u64>) -> StoreResult<Vec<String>> {
        Ok(vec![RECORD.to_string()])
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn coerce(field: &str, raw: &Value) -> StoreResult<FieldValue> {
        match field {
            "id" | "totalTimeMs" => coerce_integer(Self::KIND, field, raw),
            "name" | "executablePath" => coerce_text(Self::KIND, field, raw),
            "type" => RecordType::from_raw(raw)
                .map(|v| FieldValue::Text(v.as_str().to_string()))
                .ok_or_else(|| unsupported(Self::KIND, field)),
            _ => Err(unsupported(Self::KIND, field)),
        }
    }

    fn field(&self, field: &str) -> Option<FieldValue> {
        match field {
            "id" => Some(FieldValue::Integer(self.id as i64)),
            "name" => Some(FieldValue::Text(self.name.clone())),
            "type" => Some(FieldValue::Text(self.kind.as_str().to_string())),
            "executablePath" => Some(FieldValue::Text(self.executable_path.clone())),
            "totalTimeMs" => Some(FieldValue::Integer(self.total_time_ms)),
            _ => None,
        }
    }

    fn assign(&mut self, field: &str, value: FieldValue) -> bool {
        match (field, value) {
            ("name", FieldValue::Text(v)) => self.name = v,
            ("executablePath", FieldValue::Text(v)) => self.executable_path = v,
            ("type", FieldValue::Text(v)) => match v.as_str() {
                "auto" => self.kind = RecordType::Auto,
                "manual" => self.kind = RecordType::Manual,
                _ => return false,
            },
            _ => return false,
        }
        true
    }

    fn on_created(&self, tx: &Tx<'_>, collection: BucketId, _parent: Option<u64>) -> StoreResult<()> {
        tx.create_bucket_if_not_exists(collection, &time_bucket_name(self.id))?;
        Ok(())
    }

    fn on_deleted(&self, tx: &Tx<'_>, collection: BucketId, _parent: Option<u64>) -> StoreResult<()> {
        tx.delete_bucket(collection, &time_bucket_name(self.id))?;
        Ok(())
    }
}

/// One usage interval of a record, in epoch milliseconds.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    pub id: u64,
    pub start: i64,
    pub end: i64,
}

impl Time {
    /// Stored intervals always pass [Entity::validate], so this only saturates on documents
    /// written by hand.
    pub fn duration_ms(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

/// Adds `delta` to the rolling total of the record owning a time collection.
fn adjust_total(tx: &Tx<'_>, collection: BucketId, record_id: Option<u64>, delta: i64) -> StoreResult<()> {
    let record_id = record_id.ok_or(StoreError::MissingParent(EntityKind::Time))?;
    if delta == 0 {
        return Ok(());
    }
    // The time collection is nested inside the record collection, next to the record itself.
    let records = tx
        .parent_of(collection)?
        .ok_or_else(|| StoreError::CollectionNotFound {
            path: RECORD.to_string(),
        })?;
    let key = id_to_key(record_id);
    let data = tx.get(records, &key)?.ok_or(StoreError::EntityNotFound {
        kind: EntityKind::Record,
        id: record_id,
    })?;
    let mut record: Record = serde_json::from_slice(&data)?;
    record.total_time_ms = record
        .total_time_ms
        .checked_add(delta)
        .ok_or(StoreError::TotalOverflow { id: record_id })?;
    tx.put(records, &key, &serde_json::to_vec(&record)?)
}

impl Entity for Time {
    const KIND: EntityKind = EntityKind::Time;
    const PATCHABLE: &'static [&'static str] = &["start", "end"];

    fn storage_path(parent: Option<u64>) -> StoreResult<Vec<String>> {
        let parent = parent.ok_or(StoreError::MissingParent(Self::KIND))?;
        Ok(vec![RECORD.to_string(), time_bucket_name(parent)])
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn coerce(field: &str, raw: &Value) -> StoreResult<FieldValue> {
        match field {
            "id" | "start" | "end" => coerce_integer(Self::KIND, field, raw),
            _ => Err(unsupported(Self::KIND, field)),
        }
    }

    fn field(&self, field: &str) -> Option<FieldValue> {
        match field {
            "id" => Some(FieldValue::Integer(self.id as i64)),
            "start" => Some(FieldValue::Integer(self.start)),
            "end" => Some(FieldValue::Integer(self.end)),
            _ => None,
        }
    }

    fn assign(&mut self, field: &str, value: FieldValue) -> bool {
        match (field, value) {
            ("start", FieldValue::Integer(v)) => self.start = v,
            ("end", FieldValue::Integer(v)) => self.end = v,
            _ => return false,
        }
        true
    }

    fn validate(&self) -> StoreResult<()> {
        if self.end < self.start || self.end.checked_sub(self.start).is_none() {
            return Err(StoreError::InvalidInterval {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    fn on_created(&self, tx: &Tx<'_>, collection: BucketId, parent: Option<u64>) -> StoreResult<()> {
        adjust_total(tx, collection, parent, self.duration_ms())
    }

    fn on_updated(
        &self,
        previous: &Self,
        tx: &Tx<'_>,
        collection: BucketId,
        parent: Option<u64>,
    ) -> StoreResult<()> {
        let delta = self
            .duration_ms()
            .checked_sub(previous.duration_ms())
            .ok_or(StoreError::TotalOverflow {
                id: parent.unwrap_or_default(),
            })?;
        adjust_total(tx, collection, parent, delta)
    }

    fn on_deleted(&self, tx: &Tx<'_>, collection: BucketId, parent: Option<u64>) -> StoreResult<()> {
        adjust_total(tx, collection, parent, -self.duration_ms())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_integer_fields_narrow_floats() {
        assert_eq!(
            Time::coerce("end", &json!(9000.0)).unwrap(),
            FieldValue::Integer(9000)
        );
        assert_eq!(
            Time::coerce("start", &json!(12.9)).unwrap(),
            FieldValue::Integer(12)
        );
    }

    #[test]
    fn test_record_type_accepts_legacy_codes() {
        assert_eq!(
            Record::coerce("type", &json!(1)).unwrap(),
            FieldValue::Text("auto".into())
        );
        assert_eq!(
            Record::coerce("type", &json!("manual")).unwrap(),
            FieldValue::Text("manual".into())
        );
        assert!(Record::coerce("type", &json!("sometimes")).is_err());
    }

    #[test]
    fn test_uncomparable_values_fail() {
        assert!(matches!(
            Record::coerce("name", &json!(true)),
            Err(StoreError::UnsupportedFieldKind { .. })
        ));
        assert!(matches!(
            Time::coerce("start", &json!([1, 2])),
            Err(StoreError::UnsupportedFieldKind { .. })
        ));
        assert!(matches!(
            Time::coerce("colour", &json!(1)),
            Err(StoreError::UnsupportedFieldKind { .. })
        ));
    }

    #[test]
    fn test_apply_skips_unknown_and_derived_fields() {
        let mut record = Record {
            id: 3,
            name: "old".into(),
            kind: RecordType::Manual,
            executable_path: String::new(),
            total_time_ms: 500,
        };
        record
            .apply(&fields(json!({
                "name": "new",
                "type": "auto",
                "totalTimeMs": 1,
                "id": 99,
                "colour": "red",
            })))
            .unwrap();

        assert_eq!(record.name, "new");
        assert_eq!(record.kind, RecordType::Auto);
        assert_eq!(record.total_time_ms, 500);
        assert_eq!(record.id, 3);
    }

    #[test]
    fn test_storage_paths() {
        assert_eq!(Record::storage_path(None).unwrap(), vec!["record"]);
        assert_eq!(Time::storage_path(Some(4)).unwrap(), vec!["record", "time4"]);
        assert!(matches!(
            Time::storage_path(None),
            Err(StoreError::MissingParent(EntityKind::Time))
        ));
    }

    #[test]
    fn test_record_document_shape() {
        let record = Record {
            id: 1,
            name: "demo".into(),
            kind: RecordType::Auto,
            executable_path: "C:\\demo.exe".into(),
            total_time_ms: 4000,
        };
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "id": 1,
                "name": "demo",
                "type": "auto",
                "executablePath": "C:\\demo.exe",
                "totalTimeMs": 4000,
            })
        );
    }
}
