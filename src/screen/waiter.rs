use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};

use crate::error::{AutomationError, AutomationResult};

use super::{
    classifier::{classify, Outcome, Outcomes},
    reader::{ScreenSnapshot, ScreenSource},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub poll_interval_ms: u64,
    pub default_timeout_ms: u64,
    pub prompt_timeout_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            default_timeout_ms: 2_500,
            prompt_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WaitResult {
    Matched {
        outcome: Outcome,
        outcomes: Outcomes,
        text: String,
    },
    TimedOut {
        text: String,
        waited: Duration,
    },
}

impl WaitResult {
    pub fn text(&self) -> &str {
        match self {
            WaitResult::Matched { text, .. } | WaitResult::TimedOut { text, .. } => text,
        }
    }

    /// Convert a timeout into [`AutomationError::Timeout`], naming what was awaited.
    pub fn matched_or_timeout(self, expected: &str) -> AutomationResult<(Outcome, Outcomes, String)> {
        match self {
            WaitResult::Matched {
                outcome,
                outcomes,
                text,
            } => Ok((outcome, outcomes, text)),
            WaitResult::TimedOut { text, waited } => Err(AutomationError::Timeout {
                expected: expected.to_string(),
                waited,
                screen: text,
            }),
        }
    }
}

/// Three-way answer for connection-bound prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptState {
    Ready(String),
    Maintenance(String),
    TimedOut(String),
}

#[derive(Clone)]
pub struct ResponseWaiter {
    screen: Arc<dyn ScreenSource>,
    config: WaitConfig,
}

impl ResponseWaiter {
    pub fn new(screen: Arc<dyn ScreenSource>, config: WaitConfig) -> Self {
        Self { screen, config }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.config.default_timeout_ms)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.config.prompt_timeout_ms)
    }

    /// One capture, off the async runtime.
    pub async fn snapshot(&self) -> AutomationResult<ScreenSnapshot> {
        let screen = self.screen.clone();
        tokio::task::spawn_blocking(move || screen.capture())
            .await
            .map_err(|err| AutomationError::Internal(anyhow::anyhow!("capture worker join failed: {err}")))?
    }

    /// Poll until one of `wanted` shows up. The first entry of `wanted` that is
    /// present wins, so callers list outcomes in precedence order.
    pub async fn wait_for(&self, wanted: &[Outcome], timeout: Option<Duration>) -> AutomationResult<WaitResult> {
        self.wait_until(|outcomes| outcomes.any_of(wanted), timeout)
            .await
    }

    /// Poll until `pick` selects an outcome from the current classification.
    pub async fn wait_until<F>(&self, pick: F, timeout: Option<Duration>) -> AutomationResult<WaitResult>
    where
        F: Fn(&Outcomes) -> Option<Outcome>,
    {
        let timeout = timeout.unwrap_or_else(|| self.default_timeout());
        let started = Instant::now();
        let deadline = started + timeout;
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            let snapshot = self.snapshot().await?;
            let outcomes = classify(&snapshot.text);

            if let Some(outcome) = pick(&outcomes) {
                return Ok(WaitResult::Matched {
                    outcome,
                    outcomes,
                    text: snapshot.text,
                });
            }

            if Instant::now() >= deadline {
                log::debug!("wait timed out after {:?}; last screen: {}", timeout, snapshot.text);
                return Ok(WaitResult::TimedOut {
                    text: snapshot.text,
                    waited: started.elapsed(),
                });
            }

            sleep(poll).await;
        }
    }

    /// Wait for a connection-bound prompt. A maintenance banner short-circuits
    /// the wait even if the expected marker is also present.
    pub async fn wait_for_prompt(&self, expected: Outcome, timeout: Option<Duration>) -> AutomationResult<PromptState> {
        let timeout = timeout.unwrap_or_else(|| self.prompt_timeout());
        let result = self
            .wait_for(&[Outcome::Maintenance, expected], Some(timeout))
            .await?;

        Ok(match result {
            WaitResult::Matched {
                outcome: Outcome::Maintenance,
                text,
                ..
            } => PromptState::Maintenance(text),
            WaitResult::Matched { text, .. } => PromptState::Ready(text),
            WaitResult::TimedOut { text, .. } => PromptState::TimedOut(text),
        })
    }
}
