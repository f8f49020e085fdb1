//! Network reliability signal for the registration host.
//!
//! Samples are TCP-connect timings kept in a bounded sliding window, persisted
//! batch by batch to the latency log and reloaded at start-up.

pub mod probe;
pub mod stats;

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::db::{Database, LatencyRecord};

pub use probe::ProbeConfig;
pub use stats::{LatencySample, Rating, ReliabilityStats, ResponsivenessThresholds};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub probe: ProbeConfig,
    pub thresholds: ResponsivenessThresholds,
    pub window_cap: usize,
    pub samples_per_round: usize,
    /// Minimum spacing between background sampling rounds.
    pub cooldown_secs: u64,
    pub retention_days: i64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            thresholds: ResponsivenessThresholds::default(),
            window_cap: 2_500,
            samples_per_round: 5,
            cooldown_secs: 25,
            retention_days: 30,
        }
    }
}

/// Identity of a sample for deduplication: batch time, position within the
/// batch, and the latency rounded to a tenth of a millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SampleKey {
    recorded_ms: i64,
    ordinal: usize,
    tenths: i64,
}

impl SampleKey {
    fn new(recorded_at: DateTime<Utc>, ordinal: usize, value_ms: Option<f64>) -> Self {
        Self {
            recorded_ms: recorded_at.timestamp_millis(),
            ordinal,
            tenths: value_ms.map(|v| (v * 10.0).round() as i64).unwrap_or(-10),
        }
    }
}

struct MonitorState {
    window: VecDeque<(SampleKey, LatencySample)>,
    seen: HashSet<SampleKey>,
    pending: Vec<LatencyRecord>,
    last_round: Option<Instant>,
}

#[derive(Clone)]
pub struct ReliabilityMonitor {
    inner: Arc<Mutex<MonitorState>>,
    config: Arc<ReliabilityConfig>,
    db: Option<Database>,
}

impl ReliabilityMonitor {
    pub fn new(config: ReliabilityConfig, db: Option<Database>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MonitorState {
                window: VecDeque::with_capacity(config.window_cap.min(4_096)),
                seen: HashSet::new(),
                pending: Vec::new(),
                last_round: None,
            })),
            config: Arc::new(config),
            db,
        }
    }

    pub fn thresholds(&self) -> &ResponsivenessThresholds {
        &self.config.thresholds
    }

    /// Prune expired rows, then seed the window from the newest persisted
    /// batches. Returns how many samples were added.
    pub async fn load_history(&self) -> Result<usize> {
        let Some(db) = &self.db else {
            return Ok(0);
        };

        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);
        let pruned = db.prune_latency_log(cutoff).await?;
        if pruned > 0 {
            log_info!("[reliability] pruned {pruned} expired latency row(s)");
        }

        let records = db
            .load_recent_latencies(&self.config.probe.target, self.config.window_cap)
            .await?;

        let mut state = self.inner.lock().await;
        let added: usize = records
            .iter()
            .map(|record| self.ingest(&mut state, record))
            .sum();
        log_info!("[reliability] loaded {added} sample(s) from history");
        Ok(added)
    }

    /// Run one sampling round now, regardless of the cooldown.
    pub async fn sample(&self, count: usize, concurrent: bool) -> ReliabilityStats {
        let samples = probe::sample(&self.config.probe, count, concurrent).await;
        let record = LatencyRecord {
            recorded_at: samples.first().map(|s| s.taken_at).unwrap_or_else(Utc::now),
            host: self.config.probe.target.clone(),
            latencies: samples.iter().map(|s| s.value_ms).collect(),
        };

        let stats = {
            let mut state = self.inner.lock().await;
            state.last_round = Some(Instant::now());
            if self.ingest(&mut state, &record) > 0 {
                state.pending.push(record);
            }
            Self::stats_of(&state)
        };

        self.flush().await;
        log_info!(
            "[reliability] round of {count}: score {:.1} ({}), failure rate {:.0}%",
            stats.score,
            stats.rating.as_str(),
            stats.failure_rate
        );
        stats
    }

    /// A sampling round unless one ran within the cooldown.
    pub async fn maybe_sample(&self) -> Option<ReliabilityStats> {
        let cooldown = Duration::from_secs(self.config.cooldown_secs);
        {
            let state = self.inner.lock().await;
            if let Some(last) = state.last_round {
                if last.elapsed() < cooldown {
                    return None;
                }
            }
        }
        Some(self.sample(self.config.samples_per_round, true).await)
    }

    pub async fn stats(&self) -> ReliabilityStats {
        let state = self.inner.lock().await;
        Self::stats_of(&state)
    }

    pub async fn rating(&self) -> Rating {
        self.stats().await.rating
    }

    pub async fn is_responsive(&self) -> bool {
        self.stats().await.is_responsive(&self.config.thresholds)
    }

    /// Volatile links are sampled more often; never faster than the cooldown.
    pub fn next_interval(&self, stats: &ReliabilityStats) -> Duration {
        let secs = if stats.count == 0 || stats.failure_rate > 10.0 || stats.coefficient_of_variation() > 0.5 {
            25
        } else if stats.coefficient_of_variation() > 0.2 {
            40
        } else {
            60
        };
        Duration::from_secs(secs.max(self.config.cooldown_secs))
    }

    pub fn spawn_sampler(&self, token: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            log_info!("[reliability] background sampler started");
            loop {
                let stats = monitor.stats().await;
                let wait = monitor.next_interval(&stats);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                monitor.maybe_sample().await;
            }
            log_info!("[reliability] background sampler stopped");
        })
    }

    fn stats_of(state: &MonitorState) -> ReliabilityStats {
        ReliabilityStats::compute(state.window.iter().map(|(_, sample)| sample))
    }

    fn ingest(&self, state: &mut MonitorState, record: &LatencyRecord) -> usize {
        let mut added = 0;
        for (ordinal, value) in record.latencies.iter().enumerate() {
            let key = SampleKey::new(record.recorded_at, ordinal, *value);
            if !state.seen.insert(key) {
                continue;
            }
            state.window.push_back((
                key,
                LatencySample {
                    value_ms: *value,
                    taken_at: record.recorded_at,
                },
            ));
            added += 1;

            while state.window.len() > self.config.window_cap {
                if let Some((old, _)) = state.window.pop_front() {
                    state.seen.remove(&old);
                }
            }
        }
        added
    }

    /// Write pending batches; anything that fails stays queued for the next round.
    async fn flush(&self) {
        let Some(db) = &self.db else {
            return;
        };

        let pending = std::mem::take(&mut self.inner.lock().await.pending);
        let mut failed = Vec::new();
        for record in pending {
            if let Err(err) = db.append_latency_record(&record).await {
                log_warn!("[reliability] failed to persist latency batch: {err:#}");
                failed.push(record);
            }
        }
        if !failed.is_empty() {
            self.inner.lock().await.pending.extend(failed);
        }
    }
}
