use std::{collections::HashMap, sync::Arc};

use tokio_util::time::delay_queue;

use crate::store::{Record, RecordType};

/// An open usage interval of one program. Lives only while the program stays active.
#[derive(Debug)]
pub struct Session {
    pub record_id: u64,
    pub time_id: u64,
    /// Last `end` written to the store. Never decreases.
    pub end: i64,
    pub timer: delay_queue::Key,
}

/// A closed session whose final `end` is not in the store yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingClose {
    pub record_id: u64,
    pub time_id: u64,
    pub end: i64,
}

/// Executable paths eligible for automatic tracking, mapped to the record they belong to.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchList {
    paths: HashMap<Arc<str>, u64>,
}

impl WatchList {
    /// Every `auto` record with a non empty path. When two records share a path the older one
    /// wins.
    pub fn from_records(records: &[Record]) -> Self {
        let mut paths = HashMap::new();
        for record in records {
            if record.kind != RecordType::Auto || record.executable_path.is_empty() {
                continue;
            }
            paths
                .entry(Arc::from(record.executable_path.as_str()))
                .or_insert(record.id);
        }
        Self { paths }
    }

    pub fn get(&self, path: &str) -> Option<u64> {
        self.paths.get(path).copied()
    }

    pub fn insert(&mut self, path: Arc<str>, record_id: u64) {
        self.paths.insert(path, record_id);
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Display name for a record created from an executable path: the file name without its
/// extension. Handles both `/` and `\` separators.
pub fn display_name(path: &str) -> &str {
    let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    }
}

#[cfg(test)]
mod tests {
    use super::{display_name, WatchList};
    use crate::store::{Record, RecordType};

    fn record(id: u64, kind: RecordType, path: &str) -> Record {
        Record {
            id,
            name: format!("r{id}"),
            kind,
            executable_path: path.into(),
            total_time_ms: 0,
        }
    }

    #[test]
    fn test_watch_list_only_has_auto_records_with_path() {
        let list = WatchList::from_records(&[
            record(1, RecordType::Auto, "C:\\demo.exe"),
            record(2, RecordType::Manual, "/usr/bin/vim"),
            record(3, RecordType::Auto, ""),
            record(4, RecordType::Auto, "C:\\demo.exe"),
        ]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.get("C:\\demo.exe"), Some(1));
        assert_eq!(list.get("/usr/bin/vim"), None);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("C:\\Program Files\\demo.exe"), "demo");
        assert_eq!(display_name("/usr/bin/nvim"), "nvim");
        assert_eq!(display_name("/opt/app/.hidden"), ".hidden");
        assert_eq!(display_name("plain"), "plain");
    }
}
