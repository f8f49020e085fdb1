use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{decode_latencies, encode_latencies, parse_datetime},
    models::LatencyRecord,
};

fn row_to_record(row: &Row) -> Result<LatencyRecord> {
    let recorded_at: String = row.get("recorded_at")?;
    let latencies: String = row.get("latencies")?;

    Ok(LatencyRecord {
        recorded_at: parse_datetime(&recorded_at, "recorded_at")?,
        host: row.get("host")?,
        latencies: decode_latencies(&latencies)?,
    })
}

impl Database {
    /// Append one batch. Returns false when an identical row already exists.
    pub async fn append_latency_record(&self, record: &LatencyRecord) -> Result<bool> {
        let record = record.clone();
        self.execute(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO latency_log (recorded_at, host, latencies)
                 VALUES (?1, ?2, ?3)",
                params![
                    record.recorded_at.to_rfc3339(),
                    record.host,
                    encode_latencies(&record.latencies),
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    /// Drop rows recorded before `cutoff`; returns how many went.
    pub async fn prune_latency_log(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM latency_log WHERE recorded_at < ?1",
                params![cutoff.to_rfc3339()],
            )?;
            Ok(removed)
        })
        .await
    }

    /// Newest batches for `host` holding at least `max_samples` samples in
    /// total, returned oldest first.
    pub async fn load_recent_latencies(&self, host: &str, max_samples: usize) -> Result<Vec<LatencyRecord>> {
        let host = host.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT recorded_at, host, latencies
                 FROM latency_log
                 WHERE host = ?1
                 ORDER BY recorded_at DESC, id DESC",
            )?;

            let mut rows = stmt.query(params![host])?;
            let mut records = Vec::new();
            let mut total = 0usize;
            while total < max_samples {
                let Some(row) = rows.next()? else { break };
                let record = row_to_record(row)?;
                total += record.latencies.len();
                records.push(record);
            }

            records.reverse();
            Ok(records)
        })
        .await
    }
}
