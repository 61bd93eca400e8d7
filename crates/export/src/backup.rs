//! JSON backup of the canonical collection, with a durable last-backup
//! stamp.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use atrio_core::FeedbackRecord;
use atrio_persist::{MetaStore, LAST_BACKUP_KEY};

use crate::ExportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReceipt {
    pub path: PathBuf,
    /// ISO-8601 stamp persisted as the last backup time.
    pub timestamp: String,
}

/// Serialize the whole collection to an indented JSON document and record
/// the backup stamp. The stamp is only written after the file landed, so a
/// failed backup never moves it.
pub fn backup_all(
    records: &[FeedbackRecord],
    dir: &Path,
    meta: &dyn MetaStore,
    now: DateTime<Utc>,
) -> Result<BackupReceipt, ExportError> {
    let t0 = Instant::now();
    let body = serde_json::to_string_pretty(records)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("Feedback_Backup_{}.json", now.date_naive()));
    fs::write(&path, body)?;

    let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    meta.put(LAST_BACKUP_KEY, &timestamp)?;
    metrics::counter!("backup_total", 1u64);
    metrics::histogram!("backup_ms", t0.elapsed().as_secs_f64() * 1000.0);
    info!(path = %path.display(), records = records.len(), "backup written");
    Ok(BackupReceipt { path, timestamp })
}

pub fn last_backup(meta: &dyn MetaStore) -> Option<String> {
    meta.get(LAST_BACKUP_KEY).ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct MapMeta(Mutex<std::collections::HashMap<String, String>>);

    impl MapMeta {
        fn new() -> Self {
            Self(Mutex::new(std::collections::HashMap::new()))
        }
    }

    impl MetaStore for MapMeta {
        fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
            self.0.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }
    }

    fn record(n: u8) -> FeedbackRecord {
        FeedbackRecord::from_row(&serde_json::json!({
            "id": format!("00000000-0000-0000-0000-0000000000{:02x}", n),
            "name": "Ada",
            "email": "ada@example.com",
            "hotel_name": "Grand Plaza",
            "ratings": {"staff": 5, "comfort": 4},
            "comments": "Excellent service at the front desk.",
            "created_at": "2025-03-05T09:00:00Z",
            "status": "in-progress",
        }))
        .expect("test row")
    }

    fn temp_dir() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("atrio-backup-{nanos}"))
    }

    #[test]
    fn backup_round_trips_and_stamps() {
        let records: Vec<FeedbackRecord> = (1..=3).map(record).collect();
        let meta = MapMeta::new();
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 12, 0, 0).unwrap();

        let receipt = backup_all(&records, &temp_dir(), &meta, now).unwrap();
        assert!(receipt.path.ends_with("Feedback_Backup_2025-03-07.json"));

        let body = fs::read_to_string(&receipt.path).unwrap();
        let restored: Vec<FeedbackRecord> = serde_json::from_str(&body).unwrap();
        assert_eq!(restored, records);

        assert_eq!(last_backup(&meta).as_deref(), Some(receipt.timestamp.as_str()));
        assert_eq!(receipt.timestamp, "2025-03-07T12:00:00.000Z");
    }

    #[test]
    fn empty_collection_still_backs_up() {
        let meta = MapMeta::new();
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 12, 0, 0).unwrap();
        let receipt = backup_all(&[], &temp_dir(), &meta, now).unwrap();
        let body = fs::read_to_string(&receipt.path).unwrap();
        assert_eq!(body.trim(), "[]");
    }
}
