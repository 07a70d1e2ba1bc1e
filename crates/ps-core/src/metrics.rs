//! Sync metrics over reconciled or stored records.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::record::OutputRecord;

/// Trait for records that can be counted by [`SyncMetrics`].
///
/// Implemented by in-memory output records and by stored rows, so the same
/// metrics describe a fresh run and the database.
pub trait MeteredRecord {
    /// Storage kind name (e.g., "bolus", "`state_span`").
    fn kind(&self) -> &str;

    /// Epoch milliseconds the record describes.
    fn timestamp_ms(&self) -> i64;
}

impl MeteredRecord for OutputRecord {
    fn kind(&self) -> &str {
        Self::kind(self)
    }

    fn timestamp_ms(&self) -> i64 {
        Self::timestamp_ms(self)
    }
}

/// Totals describing how much has been synced and how recently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncMetrics {
    pub total_records: usize,
    /// Latest record timestamp.
    pub last_entry_time: Option<DateTime<Utc>>,
    /// Records in `(now - 24h, now]`.
    pub entries_last_24h: usize,
    pub by_kind: BTreeMap<String, usize>,
}

impl SyncMetrics {
    pub fn collect<R: MeteredRecord>(records: &[R], now: DateTime<Utc>) -> Self {
        let now_ms = now.timestamp_millis();
        let since_ms = (now - Duration::hours(24)).timestamp_millis();

        let mut metrics = Self::default();
        let mut latest: Option<i64> = None;
        for record in records {
            let ts = record.timestamp_ms();
            metrics.total_records += 1;
            *metrics.by_kind.entry(record.kind().to_string()).or_default() += 1;
            if ts > since_ms && ts <= now_ms {
                metrics.entries_last_24h += 1;
            }
            latest = latest.max(Some(ts));
        }
        metrics.last_entry_time = latest.and_then(DateTime::from_timestamp_millis);
        metrics
    }
}
