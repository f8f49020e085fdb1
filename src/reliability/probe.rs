use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpStream,
    sync::Semaphore,
    task::JoinSet,
    time::{sleep, timeout, Instant},
};

use super::stats::LatencySample;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// `host:port` of the registration service.
    pub target: String,
    pub timeout_ms: u64,
    pub max_concurrency: usize,
    /// Pause between probes when sampling sequentially.
    pub spacing_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target: "registration.example.edu:22".into(),
            timeout_ms: 3_000,
            max_concurrency: 4,
            spacing_ms: 200,
        }
    }
}

/// Time one TCP handshake against `target`.
pub async fn probe_once(target: &str, limit: Duration) -> LatencySample {
    let started = Instant::now();
    let taken_at = Utc::now();
    match timeout(limit, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => LatencySample::success(started.elapsed().as_secs_f64() * 1000.0, taken_at),
        Ok(Err(err)) => {
            log::debug!("probe to {target} failed: {err}");
            LatencySample::failure(taken_at)
        }
        Err(_) => {
            log::debug!("probe to {target} timed out after {limit:?}");
            LatencySample::failure(taken_at)
        }
    }
}

/// Run `count` probes. Concurrent runs go through a bounded pool; sequential
/// runs are spaced out so they do not look like a burst to the host.
pub async fn sample(config: &ProbeConfig, count: usize, concurrent: bool) -> Vec<LatencySample> {
    let limit = Duration::from_millis(config.timeout_ms);

    if !concurrent {
        let mut samples = Vec::with_capacity(count);
        for index in 0..count {
            if index > 0 {
                sleep(Duration::from_millis(config.spacing_ms)).await;
            }
            samples.push(probe_once(&config.target, limit).await);
        }
        return samples;
    }

    let pool = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let mut tasks = JoinSet::new();
    for _ in 0..count {
        let pool = pool.clone();
        let target = config.target.clone();
        tasks.spawn(async move {
            let _permit = pool.acquire_owned().await.ok();
            probe_once(&target, limit).await
        });
    }

    let mut samples = Vec::with_capacity(count);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(sample) => samples.push(sample),
            Err(err) => {
                log::warn!("probe task failed: {err}");
                samples.push(LatencySample::failure(Utc::now()));
            }
        }
    }
    samples.sort_by_key(|sample| sample.taken_at);
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{accepting_endpoint, closed_endpoint};

    fn config(target: String) -> ProbeConfig {
        ProbeConfig {
            target,
            timeout_ms: 500,
            max_concurrency: 2,
            spacing_ms: 1,
        }
    }

    #[tokio::test]
    async fn open_port_yields_latencies() {
        let samples = sample(&config(accepting_endpoint().await), 5, true).await;
        assert_eq!(samples.len(), 5);
        assert!(samples.iter().all(|s| s.value_ms.is_some()));
    }

    #[tokio::test]
    async fn closed_port_counts_failures() {
        let samples = sample(&config(closed_endpoint().await), 3, false).await;
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.value_ms.is_none()));
    }
}
