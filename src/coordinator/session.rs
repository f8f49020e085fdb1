//! State shared by the coordinator, the scheduler and the session daemons.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use tokio::{sync::broadcast, time::Instant};

use crate::terminal::{Semester, TerminalPort, TerminalProcess};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The watchdog found the terminal process gone.
    TerminalVanished,
    IdleWarning { nudges: u32 },
}

struct SessionState {
    logged_in: bool,
    semester: Option<Semester>,
    last_activity: Instant,
    nudges: u32,
}

pub struct SessionContext {
    port: Arc<dyn TerminalPort>,
    process: Arc<dyn TerminalProcess>,
    state: Mutex<SessionState>,
    preboot_claimed: AtomicBool,
    transient_error: Mutex<Option<String>>,
    retries: AtomicU32,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionContext {
    pub fn new(port: Arc<dyn TerminalPort>, process: Arc<dyn TerminalProcess>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            port,
            process,
            state: Mutex::new(SessionState {
                logged_in: false,
                semester: None,
                last_activity: Instant::now(),
                nudges: 0,
            }),
            preboot_claimed: AtomicBool::new(false),
            transient_error: Mutex::new(None),
            retries: AtomicU32::new(0),
            events,
        })
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn port(&self) -> &Arc<dyn TerminalPort> {
        &self.port
    }

    pub fn process(&self) -> &Arc<dyn TerminalProcess> {
        &self.process
    }

    pub fn is_logged_in(&self) -> bool {
        self.state().logged_in
    }

    pub fn semester(&self) -> Option<Semester> {
        self.state().semester.clone()
    }

    pub fn mark_logged_in(&self, semester: Semester) {
        let mut state = self.state();
        state.logged_in = true;
        state.semester = Some(semester);
    }

    pub fn mark_signed_out(&self) {
        let mut state = self.state();
        state.logged_in = false;
        state.semester = None;
    }

    /// Record user-visible activity on the terminal.
    pub fn touch(&self) {
        let mut state = self.state();
        state.last_activity = Instant::now();
        state.nudges = 0;
    }

    pub fn idle_for(&self) -> Duration {
        self.state().last_activity.elapsed()
    }

    /// Count a keep-alive nudge. Nudges restart the idle clock but keep
    /// accumulating until real activity resets them.
    pub fn record_nudge(&self) -> u32 {
        let mut state = self.state();
        state.last_activity = Instant::now();
        state.nudges += 1;
        state.nudges
    }

    pub fn nudges(&self) -> u32 {
        self.state().nudges
    }

    /// Pre-boot takes ownership of relaunching the terminal; returns false if
    /// another pre-boot already holds it.
    pub fn claim_preboot(&self) -> bool {
        self.preboot_claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn release_preboot(&self) {
        self.preboot_claimed.store(false, Ordering::SeqCst);
    }

    pub fn preboot_claimed(&self) -> bool {
        self.preboot_claimed.load(Ordering::SeqCst)
    }

    pub fn set_transient_error(&self, message: impl Into<String>) {
        *lock(&self.transient_error) = Some(message.into());
    }

    pub fn transient_error(&self) -> Option<String> {
        lock(&self.transient_error).clone()
    }

    pub fn clear_transient_error(&self) {
        lock(&self.transient_error).take();
    }

    pub fn bump_retries(&self) -> u32 {
        self.retries.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn reset_retries(&self) {
        self.retries.store(0, Ordering::SeqCst);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
