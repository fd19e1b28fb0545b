use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{LoreError, Result};
use crate::models::{CachedIndexState, EvictionRecord, QueryRecord};
use crate::registry::RegistrySnapshot;

pub const KEY_INDEX_CACHE: &str = "index_cache";
pub const KEY_SOURCE_REGISTRY: &str = "source_registry";

/// Durable state under the workspace root: cached index and registry
/// snapshots in a kv table, plus append-only query and eviction logs.
/// Malformed persisted payloads load as absent rather than failing startup.
#[derive(Clone)]
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateStore").finish_non_exhaustive()
    }
}

impl SqliteStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LoreError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS system_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS query_log (
                query_id TEXT PRIMARY KEY,
                asked_at TEXT NOT NULL,
                query TEXT NOT NULL,
                source_ids_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_query_log_asked_at
            ON query_log(asked_at DESC);

            CREATE TABLE IF NOT EXISTS eviction_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                remote_id TEXT NOT NULL,
                evicted_at TEXT NOT NULL,
                reason TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn get_system_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LoreError::Internal("sqlite mutex poisoned".to_string()))?;
        let value = conn
            .query_row(
                "SELECT value FROM system_kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_system_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LoreError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute(
            r#"
            INSERT INTO system_kv(key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
              value = excluded.value,
              updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn save_index_cache(&self, cache: &CachedIndexState) -> Result<()> {
        let payload = serde_json::to_string(cache)?;
        self.set_system_value(KEY_INDEX_CACHE, &payload)
    }

    pub fn load_index_cache(&self) -> Result<Option<CachedIndexState>> {
        let raw = self.get_system_value(KEY_INDEX_CACHE)?;
        Ok(raw.and_then(|value| serde_json::from_str(&value).ok()))
    }

    pub fn save_registry(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let payload = serde_json::to_string(snapshot)?;
        self.set_system_value(KEY_SOURCE_REGISTRY, &payload)
    }

    pub fn load_registry(&self) -> Result<Option<RegistrySnapshot>> {
        let raw = self.get_system_value(KEY_SOURCE_REGISTRY)?;
        Ok(raw.and_then(|value| serde_json::from_str(&value).ok()))
    }

    pub fn append_query_record(&self, record: &QueryRecord) -> Result<()> {
        let source_ids = serde_json::to_string(&record.source_ids)?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| LoreError::Internal("sqlite mutex poisoned".to_string()))?;
        conn.execute(
            r#"
            INSERT INTO query_log(query_id, asked_at, query, source_ids_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                record.query_id,
                record.asked_at.to_rfc3339(),
                record.query,
                source_ids
            ],
        )?;
        Ok(())
    }

    pub fn recent_query_records(&self, limit: usize) -> Result<Vec<QueryRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LoreError::Internal("sqlite mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            r#"
            SELECT query_id, asked_at, query, source_ids_json
            FROM query_log
            ORDER BY asked_at DESC, rowid DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let asked_at: String = row.get(1)?;
            let source_ids: String = row.get(3)?;
            Ok(QueryRecord {
                query_id: row.get(0)?,
                asked_at: parse_timestamp(&asked_at),
                query: row.get(2)?,
                source_ids: serde_json::from_str(&source_ids).unwrap_or_default(),
            })
        })?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    pub fn append_eviction_records(&self, records: &[EvictionRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let conn = self
            .conn
            .lock()
            .map_err(|_| LoreError::Internal("sqlite mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO eviction_log(path, remote_id, evicted_at, reason)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )?;
        for record in records {
            stmt.execute(params![
                record.path,
                record.remote_id,
                record.evicted_at.to_rfc3339(),
                record.reason
            ])?;
        }
        Ok(())
    }

    pub fn recent_evictions(&self, limit: usize) -> Result<Vec<EvictionRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LoreError::Internal("sqlite mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            r#"
            SELECT path, remote_id, evicted_at, reason
            FROM eviction_log
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let evicted_at: String = row.get(2)?;
            Ok(EvictionRecord {
                path: row.get(0)?,
                remote_id: row.get(1)?,
                evicted_at: parse_timestamp(&evicted_at),
                reason: row.get(3)?,
            })
        })?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    pub fn query_log_len(&self) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LoreError::Internal("sqlite mutex poisoned".to_string()))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM query_log", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
