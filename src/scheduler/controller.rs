//! Drives one scheduled enrollment from arming to its terminal outcome.
//!
//! A single loop owns the [`CountdownSession`]; ticks, task completions,
//! user cancels and watchdog reports all arrive there as [`SchedulerEvent`]s.
//! Pre-boot and firing run as their own tasks and report back on the same
//! channel, so the loop never blocks on the terminal.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    coordinator::{OperationCoordinator, SessionEvent},
    db::{Database, EnrollmentRun, Termination},
    error::{AutomationError, AutomationResult},
    notify::{Notice, Notifier},
    reliability::ReliabilityMonitor,
    terminal::{CourseRequest, OperationIntent, OperationOutput, Semester},
    vault::CredentialSource,
};

use super::{
    countdown::{render_remaining, tick_interval, Locale},
    deadline::{parse_deadline, EnrollmentDeadline},
    state::{plan_preboot, CountdownPhase, CountdownSession, SchedulerAction, SchedulerEvent},
    surface::CountdownSurface,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Local wall-clock time, the zone deadlines are printed in.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause between raising the terminal and submitting.
    pub settle_ms: u64,
    /// How long an unhealthy reliability signal may hold the fire.
    pub veto_grace_secs: u64,
    pub veto_recheck_secs: u64,
    pub preboot_attempts: u32,
    /// Pause after tearing the terminal down before the next login attempt.
    pub relaunch_wait_ms: u64,
    pub locale: Locale,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            settle_ms: 3_000,
            veto_grace_secs: 60,
            veto_recheck_secs: 5,
            preboot_attempts: 3,
            relaunch_wait_ms: 5_000,
            locale: Locale::English,
        }
    }
}

/// What the scheduler submits once the deadline arrives.
#[derive(Debug, Clone)]
pub struct EnrollmentPlan {
    pub semester: Semester,
    pub requests: Vec<CourseRequest>,
}

impl EnrollmentPlan {
    fn courses(&self) -> String {
        self.requests
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

struct ActiveRun {
    run_id: String,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<Termination>>,
    session: Arc<Mutex<CountdownSession>>,
}

/// Shared pieces handed to the loop and its tasks.
#[derive(Clone)]
struct Runtime {
    coordinator: OperationCoordinator,
    reliability: ReliabilityMonitor,
    credentials: Option<Arc<dyn CredentialSource>>,
    surface: Arc<dyn CountdownSurface>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    db: Option<Database>,
    config: Arc<SchedulerConfig>,
}

pub struct EnrollmentScheduler {
    runtime: Runtime,
    active: Mutex<Option<ActiveRun>>,
}

impl EnrollmentScheduler {
    pub fn new(
        coordinator: OperationCoordinator,
        reliability: ReliabilityMonitor,
        surface: Arc<dyn CountdownSurface>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            runtime: Runtime {
                coordinator,
                reliability,
                credentials: None,
                surface,
                notifier,
                clock: Arc::new(SystemClock),
                db: None,
                config: Arc::new(config),
            },
            active: Mutex::new(None),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.runtime.credentials = Some(credentials);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.runtime.clock = clock;
        self
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.runtime.db = Some(db);
        self
    }

    /// Parse the deadline out of `text` and arm the countdown.
    pub async fn arm_from_text(&self, text: &str, plan: EnrollmentPlan) -> AutomationResult<EnrollmentDeadline> {
        let deadline = parse_deadline(text, &plan.semester)?;
        log_info!(
            "[scheduler] deadline for {} is {} ({:?})",
            plan.semester,
            deadline.timestamp,
            deadline.confidence
        );
        self.arm(deadline, plan).await?;
        Ok(deadline)
    }

    /// Read the terminal as it stands and arm from whatever deadline it shows.
    pub async fn arm_from_terminal(&self, plan: EnrollmentPlan) -> AutomationResult<EnrollmentDeadline> {
        let text = self.runtime.coordinator.driver().read_screen().await?;
        self.arm_from_text(&text, plan).await
    }

    pub async fn arm(&self, deadline: EnrollmentDeadline, plan: EnrollmentPlan) -> AutomationResult<()> {
        if self.is_active() {
            return Err(AutomationError::Internal(anyhow::anyhow!(
                "an enrollment countdown is already running"
            )));
        }

        let runtime = &self.runtime;
        let now = runtime.clock.now();
        let preboot_at = plan_preboot(
            deadline.timestamp,
            now,
            runtime.credentials.is_some(),
            &mut rand::thread_rng(),
        );

        let mut session = CountdownSession::new(deadline.timestamp);
        let initial = match session.arm(now, preboot_at) {
            Ok(actions) => actions,
            Err(err) => {
                log_warn!("[scheduler] refusing to arm for {}: {err}", deadline.timestamp);
                return Err(err);
            }
        };
        if let Some(at) = preboot_at {
            log_info!("[scheduler] pre-boot planned for {at}");
        }

        let run = EnrollmentRun {
            id: Uuid::new_v4().to_string(),
            term: plan.semester.code().to_string(),
            courses: plan.courses(),
            deadline: deadline.timestamp,
            armed_at: Utc::now(),
            finished_at: None,
            termination: None,
            detail: None,
        };
        if let Some(db) = &runtime.db {
            if let Err(err) = db.insert_enrollment_run(&run).await {
                log_warn!("[scheduler] could not record run {}: {err:#}", run.id);
            }
        }

        runtime.surface.show(&format!(
            "Enrollment for {} opens {}",
            plan.semester,
            deadline.timestamp.format("%m/%d/%Y %H:%M")
        ));
        runtime.surface.set_cancel_enabled(true);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let session = Arc::new(Mutex::new(session));

        let handle = tokio::spawn(run_loop(
            runtime.clone(),
            run.id.clone(),
            plan,
            session.clone(),
            initial,
            events_tx.clone(),
            events_rx,
            shutdown.clone(),
        ));

        *lock(&self.active) = Some(ActiveRun {
            run_id: run.id,
            events: events_tx,
            shutdown,
            handle: Some(handle),
            session,
        });
        Ok(())
    }

    /// Ask the countdown to stop. Ignored once firing has begun.
    pub fn cancel(&self) {
        if let Some(active) = lock(&self.active).as_ref() {
            let _ = active.events.send(SchedulerEvent::UserCancel);
        }
    }

    /// Stop the loop outright, e.g. on process exit.
    pub fn shutdown(&self) {
        if let Some(active) = lock(&self.active).as_ref() {
            active.shutdown.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.active)
            .as_ref()
            .map(|active| !lock(&active.session).phase().is_terminal())
            .unwrap_or(false)
    }

    pub fn run_id(&self) -> Option<String> {
        lock(&self.active).as_ref().map(|active| active.run_id.clone())
    }

    pub fn snapshot(&self) -> Option<CountdownSession> {
        lock(&self.active)
            .as_ref()
            .map(|active| lock(&active.session).clone())
    }

    /// Wait for the current countdown to end. `None` when nothing was armed
    /// or another caller is already waiting.
    pub async fn wait_finished(&self) -> Option<Termination> {
        let handle = lock(&self.active).as_mut().and_then(|active| active.handle.take())?;
        match handle.await {
            Ok(termination) => Some(termination),
            Err(err) => {
                log_error!("[scheduler] countdown task failed: {err}");
                None
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    runtime: Runtime,
    run_id: String,
    plan: EnrollmentPlan,
    session: Arc<Mutex<CountdownSession>>,
    initial: Vec<SchedulerAction>,
    events_tx: mpsc::UnboundedSender<SchedulerEvent>,
    mut events_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    shutdown: CancellationToken,
) -> Termination {
    let mut session_events = runtime.coordinator.session().subscribe();
    let mut last_rating = None;
    let mut actions = initial;

    loop {
        for action in actions.drain(..) {
            if let Some(termination) = perform(&runtime, &run_id, &plan, action, &events_tx).await {
                return termination;
            }
        }

        let rating = runtime.reliability.rating().await;
        if last_rating != Some(rating) {
            runtime
                .surface
                .set_rating_line(&format!("Connection reliability: {}", rating.as_str()));
            last_rating = Some(rating);
        }

        let wait = {
            let session = lock(&session);
            let remaining = session.remaining(runtime.clock.now());
            // Wake exactly at the deadline rather than up to one tick late.
            let until_deadline = remaining.to_std().unwrap_or(Duration::ZERO);
            tick_interval(remaining).min(until_deadline.max(Duration::from_millis(10)))
        };

        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                let termination = Termination::Cancelled;
                finish_run(&runtime, &run_id, termination, "scheduler stopped".into()).await;
                return termination;
            }
            Some(event) = events_rx.recv() => event,
            received = session_events.recv() => match received {
                Ok(SessionEvent::TerminalVanished) => SchedulerEvent::TerminalVanished,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => SchedulerEvent::Tick,
            },
            _ = sleep(wait) => SchedulerEvent::Tick,
        };

        if event != SchedulerEvent::Tick {
            log_debug!("[scheduler] {event:?}");
        }
        actions = lock(&session).step(event, runtime.clock.now());
    }
}

async fn perform(
    runtime: &Runtime,
    run_id: &str,
    plan: &EnrollmentPlan,
    action: SchedulerAction,
    events: &mpsc::UnboundedSender<SchedulerEvent>,
) -> Option<Termination> {
    match action {
        SchedulerAction::Render { remaining } => {
            runtime
                .surface
                .set_countdown(&render_remaining(remaining, runtime.config.locale));
            None
        }
        SchedulerAction::StartPreboot => {
            let runtime = runtime.clone();
            let semester = plan.semester.clone();
            let events = events.clone();
            tokio::spawn(async move {
                let ok = preboot(&runtime, &semester).await;
                let _ = events.send(SchedulerEvent::PrebootFinished { ok });
            });
            None
        }
        SchedulerAction::BeginFire => {
            runtime.surface.set_cancel_enabled(false);
            let runtime = runtime.clone();
            let plan = plan.clone();
            let events = events.clone();
            tokio::spawn(async move {
                let (ok, detail) = fire(&runtime, &plan).await;
                let _ = events.send(SchedulerEvent::FireCompleted { ok, detail });
            });
            None
        }
        SchedulerAction::Finish { termination, detail } => {
            finish_run(runtime, run_id, termination, detail).await;
            Some(termination)
        }
    }
}

async fn finish_run(runtime: &Runtime, run_id: &str, termination: Termination, detail: String) {
    log_info!("[scheduler] run {run_id} ended: {} ({detail})", termination.as_str());
    runtime.surface.close();
    if let Some(db) = &runtime.db {
        if let Err(err) = db
            .finish_enrollment_run(run_id, termination, Some(detail.clone()), Utc::now())
            .await
        {
            log_warn!("[scheduler] could not record end of run {run_id}: {err:#}");
        }
    }
    runtime
        .notifier
        .notify(Notice::EnrollmentFinished { termination, detail });
}

/// Best-effort sign-in ahead of the deadline. Between failed attempts the
/// terminal is torn down; the next login's pre-flight relaunches it.
async fn preboot(runtime: &Runtime, semester: &Semester) -> bool {
    let session = runtime.coordinator.session().clone();
    if !session.claim_preboot() {
        log_warn!("[scheduler] pre-boot already in progress elsewhere");
        return false;
    }

    let ok = preboot_attempts(runtime, semester).await;
    session.release_preboot();
    ok
}

async fn preboot_attempts(runtime: &Runtime, semester: &Semester) -> bool {
    let Some(source) = &runtime.credentials else {
        return false;
    };
    let credentials = match source.credentials() {
        Ok(credentials) => credentials,
        Err(err) => {
            log_warn!("[scheduler] pre-boot skipped, credentials unavailable: {err:#}");
            return false;
        }
    };

    let attempts = runtime.config.preboot_attempts.max(1);
    for attempt in 1..=attempts {
        let report = runtime
            .coordinator
            .submit(OperationIntent::Login {
                credentials: credentials.clone(),
                semester: semester.clone(),
            })
            .await;
        if report.is_success() {
            log_info!("[scheduler] pre-boot signed in on attempt {attempt}");
            return true;
        }
        log_warn!("[scheduler] pre-boot attempt {attempt}/{attempts} failed");

        if attempt < attempts {
            let process = runtime.coordinator.session().process().clone();
            if let Err(err) = process.terminate() {
                log_warn!("[scheduler] could not tear down terminal: {err:#}");
            }
            sleep(Duration::from_millis(runtime.config.relaunch_wait_ms)).await;
        }
    }
    false
}

/// Raise the terminal, wait out the veto, submit. Returns (success, detail).
async fn fire(runtime: &Runtime, plan: &EnrollmentPlan) -> (bool, String) {
    let session = runtime.coordinator.session().clone();
    log_info!("[scheduler] firing for {}", plan.semester);

    if let Err(err) = session.port().bring_to_front() {
        log_warn!("[scheduler] could not raise terminal: {err:#}");
    }
    sleep(Duration::from_millis(runtime.config.settle_ms)).await;

    reliability_gate(runtime).await;

    let intent = if session.is_logged_in() {
        OperationIntent::MultiSubmit {
            requests: plan.requests.clone(),
        }
    } else {
        let Some(source) = &runtime.credentials else {
            return (false, "not signed in and no stored credentials".into());
        };
        match source.credentials() {
            Ok(credentials) => OperationIntent::AutoEnroll {
                credentials,
                semester: plan.semester.clone(),
                requests: plan.requests.clone(),
            },
            Err(err) => return (false, format!("credentials unavailable: {err:#}")),
        }
    };

    let report = runtime.coordinator.submit(intent).await;
    match report.result {
        Ok(output) => (true, describe_output(&output)),
        Err(failure) => (false, failure.message),
    }
}

/// Hold while the host looks unhealthy, resampling, until the grace period
/// runs out. Then fire regardless.
async fn reliability_gate(runtime: &Runtime) {
    let grace = Duration::from_secs(runtime.config.veto_grace_secs);
    let started = Instant::now();

    while !runtime.reliability.is_responsive().await {
        if started.elapsed() >= grace {
            log_warn!("[scheduler] host still looks unhealthy after {grace:?}; firing anyway");
            return;
        }
        log_warn!(
            "[scheduler] holding fire, reliability {}",
            runtime.reliability.rating().await.as_str()
        );
        runtime.reliability.maybe_sample().await;
        sleep(Duration::from_secs(runtime.config.veto_recheck_secs.max(1))).await;
    }
}

fn describe_output(output: &OperationOutput) -> String {
    match output {
        OperationOutput::Courses { results } => results
            .iter()
            .map(|result| format!("{} {:?}", result.request, result.outcome))
            .collect::<Vec<_>>()
            .join(", "),
        other => format!("{other:?}"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
