use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted sampling batch. `None` entries are failed probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyRecord {
    pub recorded_at: DateTime<Utc>,
    pub host: String,
    pub latencies: Vec<Option<f64>>,
}
