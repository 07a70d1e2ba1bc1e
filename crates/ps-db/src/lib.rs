//! Storage layer for pumpsync.
//!
//! Persists raw device events and reconciled records using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` instance can be moved between threads but cannot be shared
//! across threads without external synchronization.
//!
//! # Schema
//!
//! ## Timestamps
//!
//! Device events keep the vendor timestamp text exactly as received, plus a
//! derived `timestamp_ms` (epoch milliseconds, NULL when the text does not
//! parse) used for ordering and range queries. Records store epoch
//! milliseconds only.
//!
//! ## Record Bodies
//!
//! The `body` column of `records` holds the JSON serialization of a
//! [`ps_core::OutputRecord`]. The `kind`, `timestamp_ms` and `end_ms`
//! columns duplicate fields of the body so they can be queried directly.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use thiserror::Error;

use ps_core::{EventCode, EventKey, MeteredRecord, OutputRecord, RawDeviceEvent};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored event row no longer maps onto a device event.
    #[error("invalid stored event {event_id}: {message}")]
    InvalidEventData { event_id: String, message: String },
    /// A record body could not be encoded or decoded.
    #[error("invalid record body for {record_id}")]
    InvalidRecordBody {
        record_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A reconciled record as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: String,
    pub kind: String,
    pub timestamp_ms: i64,
    pub end_ms: Option<i64>,
    /// JSON-encoded [`OutputRecord`].
    pub body: String,
}

impl StoredRecord {
    /// Decodes the stored body.
    pub fn record(&self) -> Result<OutputRecord, DbError> {
        serde_json::from_str(&self.body).map_err(|source| DbError::InvalidRecordBody {
            record_id: self.id.clone(),
            source,
        })
    }
}

impl MeteredRecord for StoredRecord {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

/// An event row before validation.
struct EventRow {
    id: String,
    timestamp: String,
    code: String,
    value: Option<String>,
    payload: Option<String>,
    deleted: bool,
}

impl EventRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            code: row.get(2)?,
            value: row.get(3)?,
            payload: row.get(4)?,
            deleted: row.get(5)?,
        })
    }

    fn into_event(self) -> Result<RawDeviceEvent, DbError> {
        let invalid = |message: String| DbError::InvalidEventData {
            event_id: self.id.clone(),
            message,
        };
        let id = EventKey::new(self.id.as_str()).map_err(|e| invalid(e.to_string()))?;
        let code: EventCode = self.code.parse().map_err(|e| invalid(format!("{e}")))?;
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .map_err(|e| invalid(format!("payload is not JSON: {e}")))?;

        Ok(RawDeviceEvent {
            id,
            code,
            timestamp: self.timestamp,
            value: self.value,
            payload,
            deleted: self.deleted,
        })
    }
}

const EVENT_COLUMNS: &str = "id, timestamp, code, value, payload, deleted";

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            -- Raw vendor events, one row per event key
            -- timestamp: vendor text as received
            -- timestamp_ms: parsed epoch milliseconds, NULL if unparsable
            -- payload: vendor JSON object, NULL if absent
            CREATE TABLE IF NOT EXISTS device_events (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                timestamp_ms INTEGER,
                code TEXT NOT NULL,
                value TEXT,
                payload TEXT,
                deleted INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_device_events_time ON device_events(timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_device_events_code ON device_events(code);

            -- Reconciled records; body is the JSON-encoded record
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                end_ms INTEGER,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_kind_time ON records(kind, timestamp_ms);
            ",
        )?;
        Ok(())
    }

    /// Stores a batch of events, replacing earlier rows with the same key.
    ///
    /// A later soft-delete of an event therefore supersedes the earlier row.
    pub fn insert_events(&mut self, events: &[RawDeviceEvent]) -> Result<usize, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO device_events (id, timestamp, timestamp_ms, code, value, payload, deleted)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    timestamp_ms = excluded.timestamp_ms,
                    code = excluded.code,
                    value = excluded.value,
                    payload = excluded.payload,
                    deleted = excluded.deleted
                ",
            )?;
            for event in events {
                let payload = event.payload.as_ref().map(ToString::to_string);
                written += stmt.execute(params![
                    event.id.as_str(),
                    event.timestamp,
                    event.timestamp_ms(),
                    event.code.as_str(),
                    event.value,
                    payload,
                    event.deleted,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(written, "stored device events");
        Ok(written)
    }

    /// Lists all events ordered by time then key.
    ///
    /// Events whose timestamp did not parse sort first.
    pub fn list_events(&self) -> Result<Vec<RawDeviceEvent>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT {EVENT_COLUMNS}
            FROM device_events
            ORDER BY timestamp_ms ASC, id ASC
            "
        ))?;
        let rows = stmt.query_map([], EventRow::from_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }

    /// Lists events within a time range.
    ///
    /// The range is inclusive of `start` and exclusive of `end`.
    pub fn list_events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawDeviceEvent>, DbError> {
        if end <= start {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT {EVENT_COLUMNS}
            FROM device_events
            WHERE timestamp_ms >= ? AND timestamp_ms < ?
            ORDER BY timestamp_ms ASC, id ASC
            "
        ))?;
        let rows = stmt.query_map(
            [start.timestamp_millis(), end.timestamp_millis()],
            EventRow::from_row,
        )?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }

    /// Number of stored events, soft-deleted ones included.
    pub fn event_count(&self) -> Result<usize, DbError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM device_events", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Latest parsable event time.
    pub fn last_event_time(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        let latest: Option<i64> = self.conn.query_row(
            "SELECT MAX(timestamp_ms) FROM device_events",
            [],
            |row| row.get(0),
        )?;
        Ok(latest.and_then(DateTime::from_timestamp_millis))
    }

    /// Replaces every stored record with the output of a full run.
    ///
    /// Record IDs derive from event keys, so a rerun rewrites what the last
    /// run wrote, including spans that were open then and are closed now.
    /// Records the run no longer produces (suppressed carbs, soft-deleted
    /// events) are removed.
    pub fn replace_records(&mut self, records: &[OutputRecord]) -> Result<usize, DbError> {
        self.store_records(None, records)
    }

    /// Replaces the stored records timestamped within a time range.
    ///
    /// The range is inclusive of `start` and exclusive of `end`, matching
    /// [`Database::list_events_in_range`]. Records outside it are kept.
    pub fn replace_records_in_range(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        records: &[OutputRecord],
    ) -> Result<usize, DbError> {
        self.store_records(
            Some((start.timestamp_millis(), end.timestamp_millis())),
            records,
        )
    }

    fn store_records(
        &mut self,
        range: Option<(i64, i64)>,
        records: &[OutputRecord],
    ) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        let removed = match range {
            Some((start, end)) => tx.execute(
                "DELETE FROM records WHERE timestamp_ms >= ? AND timestamp_ms < ?",
                [start, end],
            )?,
            None => tx.execute("DELETE FROM records", [])?,
        };
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO records (id, kind, timestamp_ms, end_ms, body)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    kind = excluded.kind,
                    timestamp_ms = excluded.timestamp_ms,
                    end_ms = excluded.end_ms,
                    body = excluded.body
                ",
            )?;
            for record in records {
                let body =
                    serde_json::to_string(record).map_err(|source| DbError::InvalidRecordBody {
                        record_id: record.id().to_string(),
                        source,
                    })?;
                let end_ms = match record {
                    OutputRecord::StateSpan(span) => span.end_ms,
                    _ => None,
                };
                written += stmt.execute(params![
                    record.id().as_str(),
                    record.kind(),
                    record.timestamp_ms(),
                    end_ms,
                    body,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(removed, written, "stored records");
        Ok(written)
    }

    /// Lists stored records ordered by time then ID, optionally of one kind.
    pub fn list_records(&self, kind: Option<&str>) -> Result<Vec<StoredRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, kind, timestamp_ms, end_ms, body
            FROM records
            WHERE ?1 IS NULL OR kind = ?1
            ORDER BY timestamp_ms ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([kind], |row| {
            Ok(StoredRecord {
                id: row.get(0)?,
                kind: row.get(1)?,
                timestamp_ms: row.get(2)?,
                end_ms: row.get(3)?,
                body: row.get(4)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
