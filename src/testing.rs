//! In-memory stand-ins for the desktop, used across unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::{
    error::AutomationResult,
    screen::{ScreenSnapshot, ScreenSource},
    terminal::{
        clipboard::COPY_SCREEN_KEYS,
        port::{describe_keys, ClipboardPort, Key, TerminalPort, TerminalProcess},
    },
};

fn snapshot(text: String) -> ScreenSnapshot {
    ScreenSnapshot {
        text,
        captured_at: Utc::now(),
        validated: true,
    }
}

/// Plays back a fixed list of screens, repeating the last one forever.
pub struct ScriptedScreen {
    texts: Mutex<VecDeque<String>>,
    captures: AtomicUsize,
}

impl ScriptedScreen {
    pub fn new(texts: &[&str]) -> Self {
        Self {
            texts: Mutex::new(texts.iter().map(|text| text.to_string()).collect()),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl ScreenSource for ScriptedScreen {
    fn capture(&self) -> AutomationResult<ScreenSnapshot> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let mut texts = self.texts.lock().unwrap();
        let text = if texts.len() > 1 {
            texts.pop_front().unwrap_or_default()
        } else {
            texts.front().cloned().unwrap_or_default()
        };
        Ok(snapshot(text))
    }
}

struct Rule {
    screen_contains: String,
    typed_contains: String,
    next: String,
}

#[derive(Default)]
struct TerminalState {
    screen: Mutex<String>,
    rules: Mutex<Vec<Rule>>,
    typed: Mutex<Vec<String>>,
    hidden: AtomicBool,
    front_calls: AtomicUsize,
    captures: AtomicUsize,
    clipboard: Mutex<Option<Arc<FakeClipboard>>>,
}

/// A terminal whose screen changes according to simple rules: when the
/// current screen contains one string and the typed batch contains another,
/// the screen becomes the rule's next text. The first matching rule wins.
#[derive(Clone, Default)]
pub struct FakeTerminal {
    state: Arc<TerminalState>,
}

impl FakeTerminal {
    pub fn new(initial: &str) -> Self {
        let terminal = Self::default();
        terminal.set_screen(initial);
        terminal
    }

    pub fn on(&self, screen_contains: &str, typed_contains: &str, next: &str) -> &Self {
        self.state.rules.lock().unwrap().push(Rule {
            screen_contains: screen_contains.into(),
            typed_contains: typed_contains.into(),
            next: next.into(),
        });
        self
    }

    pub fn set_screen(&self, text: &str) {
        *self.state.screen.lock().unwrap() = text.to_string();
    }

    pub fn screen(&self) -> String {
        self.state.screen.lock().unwrap().clone()
    }

    /// Every keystroke batch sent, rendered with [`describe_keys`]. Copy
    /// requests are left out.
    pub fn typed(&self) -> Vec<String> {
        self.state.typed.lock().unwrap().clone()
    }

    pub fn set_visible(&self, visible: bool) {
        self.state.hidden.store(!visible, Ordering::SeqCst);
    }

    pub fn front_calls(&self) -> usize {
        self.state.front_calls.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> usize {
        self.state.captures.load(Ordering::SeqCst)
    }
}

impl TerminalPort for FakeTerminal {
    fn send_keys(&self, keys: &[Key]) -> Result<()> {
        if keys == COPY_SCREEN_KEYS.as_slice() {
            if let Some(clipboard) = self.state.clipboard.lock().unwrap().as_ref() {
                clipboard.set(Some(self.screen()));
            }
            return Ok(());
        }

        let typed = describe_keys(keys);
        self.state.typed.lock().unwrap().push(typed.clone());

        let current = self.screen();
        let next = self
            .state
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|rule| current.contains(&rule.screen_contains) && typed.contains(&rule.typed_contains))
            .map(|rule| rule.next.clone());
        if let Some(next) = next {
            self.set_screen(&next);
        }
        Ok(())
    }

    fn is_window_visible(&self) -> bool {
        !self.state.hidden.load(Ordering::SeqCst)
    }

    fn bring_to_front(&self) -> Result<()> {
        self.state.front_calls.fetch_add(1, Ordering::SeqCst);
        self.state.hidden.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl ScreenSource for FakeTerminal {
    fn capture(&self) -> AutomationResult<ScreenSnapshot> {
        self.state.captures.fetch_add(1, Ordering::SeqCst);
        Ok(snapshot(self.screen()))
    }
}

#[derive(Default)]
pub struct FakeClipboard {
    text: Mutex<Option<String>>,
    broken: bool,
    failing_reads: AtomicUsize,
}

impl FakeClipboard {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: Mutex::new(Some(text.to_string())),
            ..Self::default()
        }
    }

    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    /// Fail the next `count` reads while writes keep working.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Make `terminal` answer the copy-screen keystrokes by placing its
    /// current screen on this clipboard.
    pub fn respond_to_copy(self: &Arc<Self>, terminal: &FakeTerminal) {
        *terminal.state.clipboard.lock().unwrap() = Some(self.clone());
    }

    pub fn current(&self) -> Option<String> {
        self.text.lock().unwrap().clone()
    }

    fn set(&self, text: Option<String>) {
        *self.text.lock().unwrap() = text;
    }
}

impl ClipboardPort for FakeClipboard {
    fn read_text(&self) -> Result<Option<String>> {
        if self.broken {
            return Err(anyhow!("clipboard unavailable"));
        }
        let failing = self.failing_reads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_reads.store(failing - 1, Ordering::SeqCst);
            return Err(anyhow!("clipboard busy"));
        }
        Ok(self.current())
    }

    fn write_text(&self, text: &str) -> Result<()> {
        if self.broken {
            return Err(anyhow!("clipboard unavailable"));
        }
        self.set(Some(text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProcess {
    alive: AtomicBool,
    launches: AtomicUsize,
    terminations: AtomicUsize,
    fail_launch: AtomicBool,
}

impl FakeProcess {
    pub fn running() -> Self {
        let process = Self::default();
        process.alive.store(true, Ordering::SeqCst);
        process
    }

    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn fail_launches(&self) {
        self.fail_launch.store(true, Ordering::SeqCst);
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

impl TerminalProcess for FakeProcess {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn launch(&self) -> Result<()> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(anyhow!("emulator refused to start"));
        }
        self.set_alive(true);
        Ok(())
    }

    fn terminate(&self) -> Result<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.set_alive(false);
        Ok(())
    }
}

/// A TCP listener on an ephemeral local port that accepts and drops every
/// connection. Returns the `host:port` to dial.
pub async fn accepting_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });
    address
}

/// An address nothing listens on: bind an ephemeral port, then release it.
pub async fn closed_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

/// Keeps every notice it is given.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<crate::notify::Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<crate::notify::Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl crate::notify::Notifier for RecordingNotifier {
    fn notify(&self, notice: crate::notify::Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Remembers everything the scheduler showed.
#[derive(Default)]
pub struct RecordingSurface {
    titles: Mutex<Vec<String>>,
    ratings: Mutex<Vec<String>>,
    countdowns: Mutex<Vec<String>>,
    cancel_states: Mutex<Vec<bool>>,
    closed: AtomicBool,
}

impl RecordingSurface {
    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }

    pub fn ratings(&self) -> Vec<String> {
        self.ratings.lock().unwrap().clone()
    }

    pub fn countdowns(&self) -> Vec<String> {
        self.countdowns.lock().unwrap().clone()
    }

    pub fn cancel_states(&self) -> Vec<bool> {
        self.cancel_states.lock().unwrap().clone()
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl crate::scheduler::CountdownSurface for RecordingSurface {
    fn show(&self, title: &str) {
        self.titles.lock().unwrap().push(title.to_string());
    }

    fn set_rating_line(&self, line: &str) {
        self.ratings.lock().unwrap().push(line.to_string());
    }

    fn set_countdown(&self, text: &str) {
        self.countdowns.lock().unwrap().push(text.to_string());
    }

    fn set_cancel_enabled(&self, enabled: bool) {
        self.cancel_states.lock().unwrap().push(enabled);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Wall clock that follows tokio's (possibly paused) timer.
pub struct TokioClock {
    base: chrono::NaiveDateTime,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(base: chrono::NaiveDateTime) -> Self {
        Self {
            base,
            start: tokio::time::Instant::now(),
        }
    }
}

impl crate::scheduler::Clock for TokioClock {
    fn now(&self) -> chrono::NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.start.elapsed()).unwrap();
        self.base + elapsed
    }
}

pub struct StaticCredentials(crate::vault::Credentials);

impl StaticCredentials {
    pub fn new(student_id: &str, pin: &str) -> Self {
        Self(crate::vault::Credentials::new(student_id, pin))
    }
}

impl crate::vault::CredentialSource for StaticCredentials {
    fn credentials(&self) -> Result<crate::vault::Credentials> {
        Ok(self.0.clone())
    }
}
