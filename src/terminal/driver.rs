use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::{
    error::{AutomationError, AutomationResult, CourseRejection},
    screen::{classify, classify_courses, CourseResult, Outcome, Outcomes, PromptState, ResponseWaiter},
    vault::Credentials,
};

use super::{
    clipboard::ClipboardTransfer,
    intent::{CourseRequest, MenuTarget, OperationIntent, OperationOutput, Semester},
    port::{describe_keys, text_keys, Key, TerminalPort},
};

/// Cancel whatever is open, then a blind arrow nudge to force a redraw.
pub const NAVIGATION_RESET: [Key; 3] = [Key::Escape, Key::Down, Key::Up];

/// Returns to the main menu from any sub-screen.
const BACK_TO_MENU: Key = Key::F(3);
const SIGN_OUT_OPTION: &str = "9";

const SCREENS: [Outcome; 5] = [
    Outcome::SignIn,
    Outcome::MainMenu,
    Outcome::EnrollmentScreen,
    Outcome::SearchScreen,
    Outcome::SectionListing,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Pause after each keystroke batch so the host can redraw.
    pub key_delay_ms: u64,
    /// Course rows on one enrollment screen.
    pub rows_per_screen: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            key_delay_ms: 150,
            rows_per_screen: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowAction {
    Add,
    Drop,
}

impl RowAction {
    fn done(&self) -> Outcome {
        match self {
            RowAction::Add => Outcome::Confirmed,
            RowAction::Drop => Outcome::Dropped,
        }
    }
}

/// Linear keystroke scripts over the terminal, one per top-level action.
pub struct TerminalDriver {
    port: Arc<dyn TerminalPort>,
    waiter: ResponseWaiter,
    clipboard: Option<ClipboardTransfer>,
    config: DriverConfig,
}

impl TerminalDriver {
    pub fn new(port: Arc<dyn TerminalPort>, waiter: ResponseWaiter, config: DriverConfig) -> Self {
        Self {
            port,
            waiter,
            clipboard: None,
            config,
        }
    }

    pub fn with_clipboard(mut self, clipboard: ClipboardTransfer) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn port(&self) -> &Arc<dyn TerminalPort> {
        &self.port
    }

    pub async fn execute(&self, intent: &OperationIntent) -> AutomationResult<OperationOutput> {
        match intent {
            OperationIntent::Login {
                credentials,
                semester,
            } => self.login(credentials, semester).await,
            OperationIntent::Search { course } => self.search(course).await,
            OperationIntent::Enroll { request } => {
                self.submit_rows(std::slice::from_ref(request), RowAction::Add)
                    .await
            }
            OperationIntent::Drop { request } => {
                self.submit_rows(std::slice::from_ref(request), RowAction::Drop)
                    .await
            }
            OperationIntent::MultiSubmit { requests } => self.multi_submit(requests).await,
            OperationIntent::AutoEnroll {
                credentials,
                semester,
                requests,
            } => {
                self.login(credentials, semester).await?;
                self.multi_submit(requests).await
            }
            OperationIntent::Menu { target } => {
                let text = self.navigate(*target).await?;
                Ok(OperationOutput::Navigated {
                    target: *target,
                    text,
                })
            }
            OperationIntent::SignOut => self.sign_out().await,
        }
    }

    async fn send(&self, keys: &[Key]) -> AutomationResult<()> {
        debug!("sending {}", redact_for_log(keys));
        self.port.send_keys(keys)?;
        sleep(Duration::from_millis(self.config.key_delay_ms)).await;
        Ok(())
    }

    /// Establish a known baseline before a script starts.
    ///
    /// When one of `expected` is already on screen nothing is sent, so running
    /// this on a normalized session never issues keystrokes. Otherwise a single
    /// navigation reset is attempted before reporting a desync.
    pub async fn wait_for_window(&self, expected: &[Outcome]) -> AutomationResult<(Outcome, String)> {
        if !self.port.is_window_visible() {
            info!("terminal window hidden; bringing it to the front");
            self.port
                .bring_to_front()
                .map_err(|err| AutomationError::TerminalUnavailable(format!("{err:#}")))?;
        }

        let snapshot = self.waiter.snapshot().await?;
        let outcomes = classify(&snapshot.text);
        check_maintenance(&outcomes, &snapshot.text)?;
        if let Some(outcome) = outcomes.any_of(expected) {
            return Ok((outcome, snapshot.text));
        }

        warn!("unexpected screen before script ({:?}); resetting navigation", outcomes);
        self.reset_navigation().await?;

        let result = self.waiter.wait_for(expected, None).await?;
        match result.matched_or_timeout("known screen") {
            Ok((outcome, outcomes, text)) => {
                check_maintenance(&outcomes, &text)?;
                Ok((outcome, text))
            }
            Err(AutomationError::Timeout { screen, .. }) => Err(AutomationError::SessionDesync { screen }),
            Err(err) => Err(err),
        }
    }

    pub async fn reset_navigation(&self) -> AutomationResult<()> {
        self.send(&NAVIGATION_RESET).await
    }

    pub async fn login(&self, credentials: &Credentials, semester: &Semester) -> AutomationResult<OperationOutput> {
        match self
            .waiter
            .wait_for_prompt(Outcome::SignIn, None)
            .await?
        {
            PromptState::Ready(_) => {}
            PromptState::Maintenance(screen) => return Err(AutomationError::RemoteMaintenance { screen }),
            PromptState::TimedOut(screen) => {
                if classify(&screen).contains(Outcome::MainMenu) {
                    info!("already signed in; skipping login");
                    return Ok(OperationOutput::LoggedIn {
                        semester: semester.clone(),
                    });
                }
                return Err(AutomationError::Timeout {
                    expected: "sign-in prompt".into(),
                    waited: self.waiter.prompt_timeout(),
                    screen,
                });
            }
        }

        let mut keys = text_keys(&credentials.student_id);
        keys.push(Key::Tab);
        keys.extend(text_keys(&credentials.pin));
        keys.push(Key::Tab);
        keys.extend(text_keys(semester.code()));
        keys.push(Key::Enter);
        self.send(&keys).await?;

        let (outcome, _, screen) = self
            .waiter
            .wait_for(
                &[
                    Outcome::Maintenance,
                    Outcome::InvalidCredentials,
                    Outcome::InvalidTerm,
                    Outcome::MainMenu,
                ],
                Some(self.waiter.prompt_timeout()),
            )
            .await?
            .matched_or_timeout("main menu after sign-in")?;

        match outcome {
            Outcome::MainMenu => {
                info!("signed in for term {semester}");
                Ok(OperationOutput::LoggedIn {
                    semester: semester.clone(),
                })
            }
            Outcome::InvalidCredentials => Err(AutomationError::InvalidCredentials { screen }),
            Outcome::InvalidTerm => Err(AutomationError::InvalidTerm { screen }),
            _ => Err(AutomationError::RemoteMaintenance { screen }),
        }
    }

    /// Move to `target`, returning the text of the screen reached.
    pub async fn navigate(&self, target: MenuTarget) -> AutomationResult<String> {
        let target_marker = target_outcome(target);
        let (current, text) = self
            .wait_for_window(&[
                Outcome::MainMenu,
                Outcome::EnrollmentScreen,
                Outcome::SearchScreen,
                Outcome::SectionListing,
            ])
            .await?;

        if current == target_marker || classify(&text).contains(target_marker) {
            return Ok(text);
        }

        if current != Outcome::MainMenu {
            self.send(&[BACK_TO_MENU]).await?;
            self.waiter
                .wait_for(&[Outcome::MainMenu], None)
                .await?
                .matched_or_timeout("main menu")?;
        }

        let Some(option) = target.menu_option() else {
            return self.waiter.snapshot().await.map(|snapshot| snapshot.text);
        };

        let mut keys = text_keys(option);
        keys.push(Key::Enter);
        self.send(&keys).await?;

        let (_, _, text) = self
            .waiter
            .wait_for(&[target_marker], None)
            .await?
            .matched_or_timeout(&format!("{target:?} screen"))?;
        Ok(text)
    }

    pub async fn search(&self, course: &str) -> AutomationResult<OperationOutput> {
        self.navigate(MenuTarget::SectionSearch).await?;

        let mut keys = text_keys(&course.to_uppercase());
        keys.push(Key::Enter);
        self.send(&keys).await?;

        let not_found = Outcome::Rejected(crate::screen::RejectionCode::CourseNotFound);
        let (outcome, _, screen) = self
            .waiter
            .wait_for(&[not_found, Outcome::SectionListing], None)
            .await?
            .matched_or_timeout("section listing")?;

        if outcome == not_found {
            return Err(AutomationError::RemoteRejection {
                rejections: vec![CourseRejection {
                    course: course.to_uppercase(),
                    section: String::new(),
                    code: crate::screen::RejectionCode::CourseNotFound,
                }],
                screen,
            });
        }

        let text = self.copy_screen().await.unwrap_or(screen);
        Ok(OperationOutput::Listing { text })
    }

    pub async fn multi_submit(&self, requests: &[CourseRequest]) -> AutomationResult<OperationOutput> {
        let mut results = Vec::with_capacity(requests.len());
        let mut last_error = None;

        for chunk in requests.chunks(self.config.rows_per_screen.max(1)) {
            match self.submit_rows(chunk, RowAction::Add).await {
                Ok(OperationOutput::Courses { results: chunk_results }) => results.extend(chunk_results),
                Ok(_) => {}
                Err(AutomationError::RemoteRejection { rejections, screen }) => {
                    results.extend(rejections.iter().map(|rejection| CourseResult {
                        request: CourseRequest {
                            course: rejection.course.clone(),
                            section: rejection.section.clone(),
                        },
                        outcome: Outcome::Rejected(rejection.code),
                    }));
                    last_error = Some(screen);
                }
                Err(err) => return Err(err),
            }
        }

        settle_results(results, RowAction::Add, last_error.unwrap_or_default())
    }

    async fn submit_rows(&self, requests: &[CourseRequest], action: RowAction) -> AutomationResult<OperationOutput> {
        let current = self.navigate(MenuTarget::Enrollment).await?;

        // A retried script must not resubmit rows the host already accepted.
        let already: Vec<CourseResult> = classify_courses(&current, requests);
        let pending: Vec<CourseRequest> = already
            .iter()
            .filter(|result| result.outcome != action.done())
            .map(|result| result.request.clone())
            .collect();

        if pending.is_empty() {
            info!("all {} row(s) already settled on screen; nothing to send", requests.len());
            return settle_results(already, action, current);
        }

        let mut keys = Vec::new();
        for request in &pending {
            if action == RowAction::Drop {
                keys.push(Key::Char('D'));
                keys.push(Key::Tab);
            }
            keys.extend(text_keys(&request.course));
            keys.push(Key::Tab);
            keys.extend(text_keys(&request.section));
            keys.push(Key::Tab);
        }
        keys.push(Key::Enter);
        self.send(&keys).await?;

        let done = action.done();
        let (_, _, screen) = self
            .waiter
            .wait_until(
                |outcomes: &Outcomes| {
                    if outcomes.contains(Outcome::Maintenance) {
                        Some(Outcome::Maintenance)
                    } else if outcomes.contains(done) {
                        Some(done)
                    } else {
                        outcomes.rejections().next().map(Outcome::Rejected)
                    }
                },
                None,
            )
            .await?
            .matched_or_timeout("enrollment result")?;

        check_maintenance(&classify(&screen), &screen)?;

        let text = self.copy_screen().await.unwrap_or(screen);
        let mut results = classify_courses(&text, requests);
        for result in &mut results {
            if !pending.contains(&result.request) {
                result.outcome = done;
            }
        }
        settle_results(results, action, text)
    }

    pub async fn sign_out(&self) -> AutomationResult<OperationOutput> {
        let (current, _) = self
            .wait_for_window(&SCREENS)
            .await?;
        if current == Outcome::SignIn {
            return Ok(OperationOutput::SignedOut);
        }

        self.navigate(MenuTarget::MainMenu).await?;
        let mut keys = text_keys(SIGN_OUT_OPTION);
        keys.push(Key::Enter);
        self.send(&keys).await?;

        self.waiter
            .wait_for(&[Outcome::SignIn], Some(self.waiter.prompt_timeout()))
            .await?
            .matched_or_timeout("sign-in prompt after sign-out")?;
        Ok(OperationOutput::SignedOut)
    }

    /// Exact terminal text via the clipboard, when a clipboard is configured.
    pub async fn copy_screen(&self) -> Option<String> {
        match &self.clipboard {
            Some(clipboard) => clipboard.copy_from(self.port.as_ref()).await,
            None => None,
        }
    }

    /// Current screen text without sending anything.
    pub async fn read_screen(&self) -> AutomationResult<String> {
        Ok(self.waiter.snapshot().await?.text)
    }
}

fn target_outcome(target: MenuTarget) -> Outcome {
    match target {
        MenuTarget::MainMenu => Outcome::MainMenu,
        MenuTarget::Enrollment => Outcome::EnrollmentScreen,
        MenuTarget::SectionSearch => Outcome::SearchScreen,
    }
}

fn check_maintenance(outcomes: &Outcomes, text: &str) -> AutomationResult<()> {
    if outcomes.contains(Outcome::Maintenance) {
        return Err(AutomationError::RemoteMaintenance {
            screen: text.to_string(),
        });
    }
    Ok(())
}

/// Succeed when at least one row went through; a screen of pure rejections is
/// reported as [`AutomationError::RemoteRejection`].
fn settle_results(results: Vec<CourseResult>, action: RowAction, screen: String) -> AutomationResult<OperationOutput> {
    let any_done = results.iter().any(|result| result.outcome == action.done());
    let rejections: Vec<CourseRejection> = results
        .iter()
        .filter_map(|result| match result.outcome {
            Outcome::Rejected(code) => Some(CourseRejection {
                course: result.request.course.clone(),
                section: result.request.section.clone(),
                code,
            }),
            _ => None,
        })
        .collect();

    if !any_done && !rejections.is_empty() {
        return Err(AutomationError::RemoteRejection { rejections, screen });
    }
    Ok(OperationOutput::Courses { results })
}

/// Keystroke batches may carry a PIN; only their length is logged.
fn redact_for_log(keys: &[Key]) -> String {
    if keys.iter().any(|key| *key == Key::Tab) && keys.len() > 12 {
        format!("<{} keys>", keys.len())
    } else {
        describe_keys(keys)
    }
}
