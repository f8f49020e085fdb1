use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use tokio::sync::Mutex;

use crate::{
    coordinator::{SessionContext, SessionEvent},
    notify::{Notice, Notifier},
};

use super::jittered;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub check_every_secs: u64,
    pub jitter_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_every_secs: 20,
            jitter_secs: 5,
        }
    }
}

/// Polls the terminal process until it disappears, reports that once, and
/// stops. Pre-boot relaunches the terminal on purpose, so checks are skipped
/// while it holds the session. The sign-out is applied under the terminal
/// access lock.
pub async fn watchdog_loop(
    session: Weak<SessionContext>,
    access: Arc<Mutex<()>>,
    notifier: Arc<dyn Notifier>,
    config: WatchdogConfig,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(jittered(config.check_every_secs, config.jitter_secs)) => {}
        }

        let Some(session) = session.upgrade() else {
            debug!("session dropped; watchdog exiting");
            break;
        };
        if session.preboot_claimed() {
            continue;
        }

        let process = session.process().clone();
        let alive = match tokio::task::spawn_blocking(move || process.is_alive()).await {
            Ok(alive) => alive,
            Err(err) => {
                warn!("process check failed to join: {err}");
                continue;
            }
        };
        if alive {
            continue;
        }

        warn!("terminal process vanished");
        let _guard = tokio::select! {
            _ = cancel_token.cancelled() => break,
            guard = access.lock() => guard,
        };
        session.mark_signed_out();
        session.publish(SessionEvent::TerminalVanished);
        notifier.notify(Notice::TerminalVanished);
        break;
    }
    info!("watchdog stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::terminal::Semester;
    use crate::testing::{FakeProcess, FakeTerminal, RecordingNotifier};

    fn config() -> WatchdogConfig {
        WatchdogConfig {
            check_every_secs: 20,
            jitter_secs: 0,
        }
    }

    #[tokio::test]
    async fn reports_once_then_stops() {
        tokio::time::pause();
        let process = Arc::new(FakeProcess::running());
        let session = SessionContext::new(Arc::new(FakeTerminal::new("")), process.clone());
        session.mark_logged_in(Semester::new("B25").unwrap());
        let mut events = session.subscribe();
        let notifier = Arc::new(RecordingNotifier::default());

        let handle = tokio::spawn(watchdog_loop(
            Arc::downgrade(&session),
            Arc::new(Mutex::new(())),
            notifier.clone(),
            config(),
            CancellationToken::new(),
        ));

        tokio::time::sleep(Duration::from_secs(30)).await;
        process.set_alive(false);
        handle.await.unwrap();

        assert_eq!(events.recv().await.unwrap(), SessionEvent::TerminalVanished);
        assert_eq!(notifier.notices(), vec![Notice::TerminalVanished]);
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn stays_quiet_while_preboot_owns_the_terminal() {
        tokio::time::pause();
        let process = Arc::new(FakeProcess::stopped());
        let session = SessionContext::new(Arc::new(FakeTerminal::new("")), process);
        assert!(session.claim_preboot());
        let notifier = Arc::new(RecordingNotifier::default());
        let token = CancellationToken::new();

        let handle = tokio::spawn(watchdog_loop(
            Arc::downgrade(&session),
            Arc::new(Mutex::new(())),
            notifier.clone(),
            config(),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(100)).await;
        token.cancel();
        handle.await.unwrap();
        assert!(notifier.notices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_running_operation_before_signing_out() {
        let process = Arc::new(FakeProcess::stopped());
        let session = SessionContext::new(Arc::new(FakeTerminal::new("")), process);
        session.mark_logged_in(Semester::new("B25").unwrap());
        let access = Arc::new(Mutex::new(()));
        let held = access.clone().lock_owned().await;
        let notifier = Arc::new(RecordingNotifier::default());

        let handle = tokio::spawn(watchdog_loop(
            Arc::downgrade(&session),
            access,
            notifier.clone(),
            config(),
            CancellationToken::new(),
        ));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(session.is_logged_in());
        assert!(notifier.notices().is_empty());

        drop(held);
        handle.await.unwrap();
        assert!(!session.is_logged_in());
        assert_eq!(notifier.notices(), vec![Notice::TerminalVanished]);
    }
}
