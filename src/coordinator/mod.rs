//! Single entry point for everything that touches the terminal.
//!
//! Operations are serialized through one FIFO access lock, wrapped with
//! pre-flight checks and an unconditional teardown, and always come back as an
//! [`OperationReport`] rather than an error.

pub mod preflight;
pub mod session;

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, Semaphore},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    daemons::{DaemonConfig, SessionDaemons},
    error::{AutomationError, AutomationResult, ErrorKind},
    notify::{Notice, Notifier},
    terminal::{OperationIntent, OperationOutput, TerminalDriver},
};

pub use preflight::{Preflight, PreflightConfig};
pub use session::{SessionContext, SessionEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Operations allowed to wait for the access lock at once.
    pub workers: usize,
    /// Outer bound a UI waits on a spawned operation.
    pub outer_timeout_secs: u64,
    /// Extra attempts after a session desync.
    pub desync_retries: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            outer_timeout_secs: 90,
            desync_retries: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub screen: Option<String>,
}

impl From<&AutomationError> for OperationFailure {
    fn from(err: &AutomationError) -> Self {
        Self {
            kind: err.kind(),
            message: format!("{err:#}"),
            screen: err.screen_text().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub id: Uuid,
    pub label: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub result: Result<OperationOutput, OperationFailure>,
}

impl OperationReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(|failure| failure.kind)
    }
}

/// Told about every finished operation, e.g. to re-enable UI controls.
pub trait OperationObserver: Send + Sync {
    fn operation_finished(&self, report: &OperationReport);
}

/// Handle to an operation running on the worker pool.
pub struct OperationTicket {
    pub id: Uuid,
    label: &'static str,
    handle: JoinHandle<OperationReport>,
}

impl OperationTicket {
    /// Wait up to `outer` for the report. On expiry the operation keeps
    /// running; only the wait is abandoned.
    pub async fn wait(self, outer: Duration) -> AutomationResult<OperationReport> {
        match tokio::time::timeout(outer, self.handle).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(join_err)) => Err(AutomationError::Internal(anyhow::anyhow!(
                "{} worker failed: {join_err}",
                self.label
            ))),
            Err(_) => Err(AutomationError::Timeout {
                expected: format!("{} to finish", self.label),
                waited: outer,
                screen: String::new(),
            }),
        }
    }
}

struct CoordinatorInner {
    access: Arc<Mutex<()>>,
    pool: Arc<Semaphore>,
    driver: TerminalDriver,
    session: Arc<SessionContext>,
    preflight: Preflight,
    notifier: Arc<dyn Notifier>,
    observers: RwLock<Vec<Arc<dyn OperationObserver>>>,
    daemons: Mutex<Option<SessionDaemons>>,
    daemon_config: DaemonConfig,
    config: CoordinatorConfig,
}

#[derive(Clone)]
pub struct OperationCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl OperationCoordinator {
    pub fn new(
        driver: TerminalDriver,
        session: Arc<SessionContext>,
        preflight: Preflight,
        notifier: Arc<dyn Notifier>,
        daemon_config: DaemonConfig,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                access: Arc::new(Mutex::new(())),
                pool: Arc::new(Semaphore::new(config.workers.max(1))),
                driver,
                session,
                preflight,
                notifier,
                observers: RwLock::new(Vec::new()),
                daemons: Mutex::new(None),
                daemon_config,
                config,
            }),
        }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.inner.session
    }

    pub fn driver(&self) -> &TerminalDriver {
        &self.inner.driver
    }

    pub fn outer_timeout(&self) -> Duration {
        Duration::from_secs(self.inner.config.outer_timeout_secs)
    }

    pub fn add_observer(&self, observer: Arc<dyn OperationObserver>) {
        match self.inner.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    /// Run `intent` on the worker pool.
    pub fn spawn(&self, intent: OperationIntent) -> OperationTicket {
        let coordinator = self.clone();
        let label = intent.label();
        let id = Uuid::new_v4();
        let handle = tokio::spawn(async move {
            let _permit = coordinator.inner.pool.clone().acquire_owned().await.ok();
            coordinator.submit_with_id(id, intent).await
        });
        OperationTicket { id, label, handle }
    }

    /// Run `intent` once the terminal is free. Never returns an error: failures
    /// are logged and carried in the report.
    pub async fn submit(&self, intent: OperationIntent) -> OperationReport {
        self.submit_with_id(Uuid::new_v4(), intent).await
    }

    async fn submit_with_id(&self, id: Uuid, intent: OperationIntent) -> OperationReport {
        let label = intent.label();
        let access = self.inner.access.clone();
        let guard = access.lock().await;

        let started = Utc::now();
        info!("[{id}] {label} started");
        self.inner.session.touch();

        let result = self.run_locked(&intent).await;
        self.teardown();

        if let Err(err) = &result {
            match err.screen_text() {
                Some(screen) => error!("[{id}] {label} failed: {err:#}\n--- screen ---\n{screen}"),
                None => error!("[{id}] {label} failed: {err:#}"),
            }
        }
        let session_change = self.apply_session_change(&intent, &result);
        drop(guard);

        match session_change {
            Some(true) => self.start_daemons().await,
            Some(false) => self.stop_daemons().await,
            None => {}
        }

        let report = OperationReport {
            id,
            label: label.to_string(),
            started,
            finished: Utc::now(),
            result: result.as_ref().map(Clone::clone).map_err(OperationFailure::from),
        };

        if let Err(failure) = &report.result {
            self.inner.notifier.notify(Notice::OperationFailed {
                label: report.label.clone(),
                kind: failure.kind,
                message: failure.message.clone(),
            });
        }
        info!("[{id}] {label} finished ({})", if report.is_success() { "ok" } else { "failed" });

        let observers = match self.inner.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for observer in observers {
            observer.operation_finished(&report);
        }
        report
    }

    async fn run_locked(&self, intent: &OperationIntent) -> AutomationResult<OperationOutput> {
        self.inner.preflight.check(intent).await?;

        let port = self.inner.session.port();
        port.set_input_blocked(true);

        loop {
            match self.inner.driver.execute(intent).await {
                Err(AutomationError::SessionDesync { screen })
                    if self.inner.session.retries() < self.inner.config.desync_retries =>
                {
                    let attempt = self.inner.session.bump_retries();
                    warn!("{} desynced (attempt {attempt}); retrying\n{screen}", intent.label());
                    self.inner.session.set_transient_error("session desync");
                    self.inner.driver.reset_navigation().await?;
                }
                other => return other,
            }
        }
    }

    fn teardown(&self) {
        let session = &self.inner.session;
        session.port().set_input_blocked(false);
        session.clear_transient_error();
        session.reset_retries();
        session.touch();
    }

    /// `Some(true)` when the operation signed in, `Some(false)` when it ended
    /// the session.
    fn apply_session_change(
        &self,
        intent: &OperationIntent,
        result: &AutomationResult<OperationOutput>,
    ) -> Option<bool> {
        let session = &self.inner.session;
        match (intent, result) {
            (
                OperationIntent::Login { semester, .. } | OperationIntent::AutoEnroll { semester, .. },
                Ok(_),
            ) => {
                let fresh = !session.is_logged_in();
                session.mark_logged_in(semester.clone());
                fresh.then_some(true)
            }
            (OperationIntent::SignOut, Ok(_)) => {
                session.mark_signed_out();
                Some(false)
            }
            (_, Err(AutomationError::InvalidCredentials { .. })) => {
                session.mark_signed_out();
                None
            }
            _ => None,
        }
    }

    async fn start_daemons(&self) {
        let mut daemons = self.inner.daemons.lock().await;
        if let Some(previous) = daemons.take() {
            if !previous.is_finished() {
                *daemons = Some(previous);
                return;
            }
            if let Err(err) = previous.stop().await {
                warn!("failed to reap session daemons: {err:#}");
            }
        }
        *daemons = Some(SessionDaemons::start(
            Arc::downgrade(&self.inner.session),
            self.inner.access.clone(),
            self.inner.notifier.clone(),
            &self.inner.daemon_config,
        ));
    }

    pub async fn stop_daemons(&self) {
        let daemons = self.inner.daemons.lock().await.take();
        if let Some(daemons) = daemons {
            if let Err(err) = daemons.stop().await {
                warn!("failed to stop session daemons: {err:#}");
            }
        }
    }

    pub async fn daemons_running(&self) -> bool {
        self.inner
            .daemons
            .lock()
            .await
            .as_ref()
            .is_some_and(|daemons| !daemons.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::{
        screen::{ResponseWaiter, WaitConfig},
        terminal::{CourseRequest, DriverConfig, MenuTarget, Semester},
        testing::{FakeProcess, FakeTerminal, RecordingNotifier},
        vault::Credentials,
    };

    fn coordinator(terminal: &FakeTerminal, process: Arc<FakeProcess>) -> (OperationCoordinator, Arc<RecordingNotifier>) {
        let waiter = ResponseWaiter::new(
            Arc::new(terminal.clone()),
            WaitConfig {
                poll_interval_ms: 1,
                default_timeout_ms: 200,
                prompt_timeout_ms: 200,
            },
        );
        let driver = TerminalDriver::new(
            Arc::new(terminal.clone()),
            waiter,
            DriverConfig {
                key_delay_ms: 10,
                rows_per_screen: 6,
            },
        );
        let session = SessionContext::new(Arc::new(terminal.clone()), process.clone());
        let preflight = Preflight::new(
            PreflightConfig {
                internet_endpoints: Vec::new(),
                remote_host: String::new(),
                connect_timeout_ms: 100,
                launch_wait_ms: 100,
            },
            process,
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = OperationCoordinator::new(
            driver,
            session,
            preflight,
            notifier.clone(),
            DaemonConfig::default(),
            CoordinatorConfig::default(),
        );
        (coordinator, notifier)
    }

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<String>>);

    impl OperationObserver for Recorder {
        fn operation_finished(&self, report: &OperationReport) {
            self.0.lock().unwrap().push(report.label.clone());
        }
    }

    #[tokio::test]
    async fn concurrent_operations_never_interleave() {
        let terminal = FakeTerminal::new("MAIN MENU");
        terminal
            .on("MAIN MENU", "1<Enter>", "COURSE ENROLLMENT")
            .on("MAIN MENU", "2<Enter>", "SECTION SEARCH")
            .on("COURSE ENROLLMENT", "CIIC3015", "COURSE ENROLLMENT\nCIIC3015 010 CONFIRMED")
            .on("COURSE ENROLLMENT", "<F3>", "MAIN MENU")
            .on("SECTION SEARCH", "MATE3031<Enter>", "SECTIONS FOR MATE3031\n020 TTH 10:30")
            .on("SECTION", "<F3>", "MAIN MENU");
        let (coordinator, _) = coordinator(&terminal, Arc::new(FakeProcess::running()));

        let enroll = coordinator.spawn(OperationIntent::Enroll {
            request: CourseRequest {
                course: "CIIC3015".into(),
                section: "010".into(),
            },
        });
        let search = coordinator.spawn(OperationIntent::Search {
            course: "MATE3031".into(),
        });

        let enroll = enroll.wait(Duration::from_secs(5)).await.unwrap();
        let search = search.wait(Duration::from_secs(5)).await.unwrap();
        assert!(enroll.is_success(), "{:?}", enroll.result);
        assert!(search.is_success(), "{:?}", search.result);

        let enroll_first = ["1<Enter>", "CIIC3015<Tab>010<Tab><Enter>", "<F3>", "2<Enter>", "MATE3031<Enter>"];
        let search_first = ["2<Enter>", "MATE3031<Enter>", "<F3>", "1<Enter>", "CIIC3015<Tab>010<Tab><Enter>"];
        let typed = terminal.typed();
        assert!(typed == enroll_first || typed == search_first, "interleaved: {typed:?}");
    }

    #[tokio::test]
    async fn failures_become_reports_and_teardown_runs() {
        let terminal = FakeTerminal::new("SYSTEM UNDER MAINTENANCE");
        let (coordinator, notifier) = coordinator(&terminal, Arc::new(FakeProcess::running()));
        let recorder = Arc::new(Recorder::default());
        coordinator.add_observer(recorder.clone());
        coordinator.session().set_transient_error("left over");

        let report = coordinator
            .submit(OperationIntent::Menu {
                target: MenuTarget::Enrollment,
            })
            .await;

        assert_eq!(report.failure_kind(), Some(ErrorKind::RemoteMaintenance));
        let failure = report.result.as_ref().unwrap_err();
        assert_eq!(failure.screen.as_deref(), Some("SYSTEM UNDER MAINTENANCE"));
        assert_eq!(coordinator.session().transient_error(), None);
        assert_eq!(coordinator.session().retries(), 0);
        assert_eq!(recorder.0.lock().unwrap().clone(), vec!["menu".to_string()]);
        assert_eq!(notifier.notices().len(), 1);
    }

    #[tokio::test]
    async fn dead_terminal_fails_preflight_without_keystrokes() {
        let terminal = FakeTerminal::new("MAIN MENU");
        let (coordinator, _) = coordinator(&terminal, Arc::new(FakeProcess::stopped()));

        let report = coordinator.submit(OperationIntent::SignOut).await;
        assert_eq!(report.failure_kind(), Some(ErrorKind::TerminalUnavailable));
        assert!(terminal.typed().is_empty());
    }

    #[tokio::test]
    async fn desync_is_retried_once() {
        let terminal = FakeTerminal::new("GARBLED");
        let (coordinator, _) = coordinator(&terminal, Arc::new(FakeProcess::running()));

        let report = coordinator
            .submit(OperationIntent::Menu {
                target: MenuTarget::MainMenu,
            })
            .await;

        assert_eq!(report.failure_kind(), Some(ErrorKind::SessionDesync));
        // Reset inside the script, the coordinator's reset, then the retried script's reset.
        assert_eq!(terminal.typed().len(), 3);
    }

    #[tokio::test]
    async fn login_and_sign_out_drive_daemons() {
        let terminal = FakeTerminal::new("SIGN IN");
        terminal
            .on("SIGN IN", "<Enter>", "MAIN MENU")
            .on("MAIN MENU", "9<Enter>", "SIGN IN");
        let (coordinator, _) = coordinator(&terminal, Arc::new(FakeProcess::running()));

        let login = coordinator
            .submit(OperationIntent::Login {
                credentials: Credentials::new("802123456", "1234"),
                semester: Semester::new("B25").unwrap(),
            })
            .await;
        assert!(login.is_success());
        assert!(coordinator.session().is_logged_in());
        assert!(coordinator.daemons_running().await);

        let sign_out = coordinator.submit(OperationIntent::SignOut).await;
        assert!(sign_out.is_success());
        assert!(!coordinator.session().is_logged_in());
        assert!(!coordinator.daemons_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_comes_back_with_the_next_login() {
        let terminal = FakeTerminal::new("SIGN IN");
        terminal.on("SIGN IN", "<Enter>", "MAIN MENU");
        let process = Arc::new(FakeProcess::running());
        let (coordinator, notifier) = coordinator(&terminal, process.clone());
        let login = || OperationIntent::Login {
            credentials: Credentials::new("802123456", "1234"),
            semester: Semester::new("B25").unwrap(),
        };
        let vanished = |notifier: &RecordingNotifier| {
            notifier
                .notices()
                .iter()
                .filter(|notice| **notice == Notice::TerminalVanished)
                .count()
        };

        assert!(coordinator.submit(login()).await.is_success());
        process.set_alive(false);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(vanished(&notifier), 1);
        assert!(!coordinator.session().is_logged_in());
        assert!(!coordinator.daemons_running().await);

        process.set_alive(true);
        terminal.set_screen("SIGN IN");
        assert!(coordinator.submit(login()).await.is_success());
        assert!(coordinator.daemons_running().await);

        process.set_alive(false);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(vanished(&notifier), 2);
        assert!(!coordinator.session().is_logged_in());
    }

    #[tokio::test]
    async fn outer_wait_gives_up_without_cancelling() {
        let terminal = FakeTerminal::new("GARBLED");
        let (coordinator, _) = coordinator(&terminal, Arc::new(FakeProcess::running()));

        let ticket = coordinator.spawn(OperationIntent::Menu {
            target: MenuTarget::MainMenu,
        });
        let err = ticket.wait(Duration::from_millis(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
