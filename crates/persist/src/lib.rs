//! Atrio persistence: minimal SQLite key-value store for durable admin
//! metadata. Keep code tiny and predictable.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use metrics::histogram;

/// The one key the pipeline writes today: ISO-8601 stamp of the last
/// successful backup.
pub const LAST_BACKUP_KEY: &str = "last_backup";

pub trait MetaStore: Send + Sync {
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<String>>;
}

/// SQLite-backed store. Simple, synchronous. Nothing here is latency
/// sensitive.
pub struct SqliteMeta {
    db: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteMeta {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("ATRIO_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path)
            .with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", &"WAL").ok();
        db.pragma_update(None, "synchronous", &"NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .context("creating meta table")?;
        let me = Self { db: std::sync::Mutex::new(db) };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(me)
    }
}

impl MetaStore for SqliteMeta {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        let started = std::time::Instant::now();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO meta(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            (key, value),
        )?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let started = std::time::Instant::now();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT value FROM meta WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        let out = match rows.next()? {
            Some(row) => Some(row.get::<_, String>(0)?),
            None => None,
        };
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".atrio");
        let _ = std::fs::create_dir_all(&p);
        p.push("atrio.db");
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    "atrio.db".to_string()
}

/// ISO-8601 stamp for "now", millisecond precision, UTC.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
