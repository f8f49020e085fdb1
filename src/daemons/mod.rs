//! Background loops that live for the duration of a signed-in session.

pub mod idle_keeper;
pub mod watchdog;

use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{coordinator::SessionContext, notify::Notifier};

pub use idle_keeper::{IdleAction, IdleConfig};
pub use watchdog::WatchdogConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub idle: IdleConfig,
    pub watchdog: WatchdogConfig,
}

/// `base` plus or minus up to `spread`, never below one second.
pub fn jittered(base_secs: u64, spread_secs: u64) -> Duration {
    let spread = spread_secs.min(base_secs) as i64;
    let offset = if spread == 0 {
        0
    } else {
        rand::thread_rng().gen_range(-spread..=spread)
    };
    Duration::from_secs((base_secs as i64 + offset).max(1) as u64)
}

pub struct SessionDaemons {
    handles: Vec<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl SessionDaemons {
    pub fn start(
        session: Weak<SessionContext>,
        access: Arc<Mutex<()>>,
        notifier: Arc<dyn Notifier>,
        config: &DaemonConfig,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let handles = vec![
            tokio::spawn(idle_keeper::idle_keeper_loop(
                session.clone(),
                access.clone(),
                notifier.clone(),
                config.idle.clone(),
                cancel_token.clone(),
            )),
            tokio::spawn(watchdog::watchdog_loop(
                session,
                access,
                notifier,
                config.watchdog.clone(),
                cancel_token.clone(),
            )),
        ];
        info!("session daemons started");
        Self {
            handles,
            cancel_token,
        }
    }

    /// True once any loop has exited on its own, e.g. the watchdog after
    /// reporting a vanished terminal.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().any(JoinHandle::is_finished)
    }

    pub async fn stop(self) -> Result<()> {
        self.cancel_token.cancel();
        for handle in self.handles {
            handle.await.context("session daemon failed to join")?;
        }
        info!("session daemons stopped");
        Ok(())
    }
}
