use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    coordinator::{SessionContext, SessionEvent},
    notify::{Notice, Notifier},
    terminal::Key,
};

use super::jittered;

/// Cursor right then back left; moves nothing on any form screen.
pub const KEEPALIVE_KEYS: [Key; 2] = [Key::Right, Key::Left];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Screen-blank timeout reported by the display, when known.
    pub display_timeout_secs: Option<u64>,
    pub fallback_threshold_secs: u64,
    /// Fraction of the display timeout after which the session is nudged.
    pub threshold_ratio: f64,
    /// Nudges tolerated before the user is warned.
    pub warn_after_nudges: u32,
    pub check_every_secs: u64,
    pub jitter_secs: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            display_timeout_secs: None,
            fallback_threshold_secs: 300,
            threshold_ratio: 0.8,
            warn_after_nudges: 3,
            check_every_secs: 30,
            jitter_secs: 10,
        }
    }
}

impl IdleConfig {
    pub fn threshold(&self) -> Duration {
        match self.display_timeout_secs {
            Some(secs) if secs > 0 => Duration::from_secs_f64(secs as f64 * self.threshold_ratio),
            _ => Duration::from_secs(self.fallback_threshold_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    Wait,
    Nudge,
    NudgeAndWarn,
}

pub fn idle_decision(idle: Duration, threshold: Duration, nudges_so_far: u32, warn_after: u32) -> IdleAction {
    if idle < threshold {
        IdleAction::Wait
    } else if nudges_so_far >= warn_after {
        IdleAction::NudgeAndWarn
    } else {
        IdleAction::Nudge
    }
}

pub async fn idle_keeper_loop(
    session: Weak<SessionContext>,
    access: Arc<Mutex<()>>,
    notifier: Arc<dyn Notifier>,
    config: IdleConfig,
    cancel_token: CancellationToken,
) {
    let threshold = config.threshold();
    info!("idle keeper running; nudging after {}s idle", threshold.as_secs());

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(jittered(config.check_every_secs, config.jitter_secs)) => {}
        }

        let Some(session) = session.upgrade() else {
            debug!("session dropped; idle keeper exiting");
            break;
        };
        if !session.is_logged_in() {
            continue;
        }

        let idle = session.idle_for();
        let action = idle_decision(idle, threshold, session.nudges(), config.warn_after_nudges);
        if action == IdleAction::Wait {
            continue;
        }

        // Never type into the middle of a running operation.
        let Ok(_guard) = access.try_lock() else {
            debug!("operation in flight; skipping idle nudge");
            continue;
        };

        if let Err(err) = session.port().send_keys(&KEEPALIVE_KEYS) {
            warn!("idle nudge failed: {err:#}");
            continue;
        }
        let nudges = session.record_nudge();
        debug!("idle nudge #{nudges} after {}s", idle.as_secs());

        if action == IdleAction::NudgeAndWarn {
            notifier.notify(Notice::IdleWarning { idle, nudges });
            session.publish(SessionEvent::IdleWarning { nudges });
        }
    }
}
