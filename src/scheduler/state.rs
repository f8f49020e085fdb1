//! Countdown transitions as a pure function of (phase, event, time).
//!
//! The controller feeds events into [`CountdownSession::step`] from one loop and
//! performs whatever actions come back; nothing here touches the terminal.

use chrono::{Duration, NaiveDateTime};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    db::Termination,
    error::{AutomationError, AutomationResult},
};

use super::deadline::{classify_window, WindowDecision};

/// Pre-boot happens somewhere between these many minutes before the deadline.
pub const PREBOOT_EARLIEST_MIN: i64 = 30;
pub const PREBOOT_LATEST_MIN: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CountdownPhase {
    Idle,
    Armed,
    PreBooting,
    Ready,
    Firing,
    Cancelled,
    Expired,
}

impl CountdownPhase {
    fn rank(&self) -> u8 {
        match self {
            CountdownPhase::Idle => 0,
            CountdownPhase::Armed => 1,
            CountdownPhase::PreBooting => 2,
            CountdownPhase::Ready => 3,
            CountdownPhase::Firing => 4,
            CountdownPhase::Expired => 5,
            CountdownPhase::Cancelled => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CountdownPhase::Cancelled | CountdownPhase::Expired)
    }

    /// Forward-only, except that any live phase may be cancelled.
    pub fn can_transition_to(&self, next: CountdownPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == CountdownPhase::Cancelled || next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Tick,
    PrebootFinished { ok: bool },
    FireCompleted { ok: bool, detail: String },
    UserCancel,
    TerminalVanished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerAction {
    Render { remaining: Duration },
    StartPreboot,
    BeginFire,
    Finish { termination: Termination, detail: String },
}

#[derive(Debug, Clone)]
pub struct CountdownSession {
    deadline: NaiveDateTime,
    phase: CountdownPhase,
    last_tick: Option<NaiveDateTime>,
    preboot_at: Option<NaiveDateTime>,
    termination: Option<Termination>,
}

impl CountdownSession {
    pub fn new(deadline: NaiveDateTime) -> Self {
        Self {
            deadline,
            phase: CountdownPhase::Idle,
            last_tick: None,
            preboot_at: None,
            termination: None,
        }
    }

    pub fn deadline(&self) -> NaiveDateTime {
        self.deadline
    }

    pub fn phase(&self) -> CountdownPhase {
        self.phase
    }

    pub fn last_tick(&self) -> Option<NaiveDateTime> {
        self.last_tick
    }

    pub fn preboot_at(&self) -> Option<NaiveDateTime> {
        self.preboot_at
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    pub fn remaining(&self, now: NaiveDateTime) -> Duration {
        self.deadline - now
    }

    /// Leave `Idle`. Inside the arm window the countdown starts; a deadline
    /// that passed less than a day ago fires straight away.
    pub fn arm(&mut self, now: NaiveDateTime, preboot_at: Option<NaiveDateTime>) -> AutomationResult<Vec<SchedulerAction>> {
        match classify_window(self.deadline, now) {
            WindowDecision::Arm { remaining } => {
                self.transition(CountdownPhase::Armed);
                self.preboot_at = preboot_at;
                self.last_tick = Some(now);
                Ok(vec![SchedulerAction::Render { remaining }])
            }
            WindowDecision::FireNow { .. } => {
                self.transition(CountdownPhase::Firing);
                self.last_tick = Some(now);
                Ok(vec![SchedulerAction::BeginFire])
            }
            WindowDecision::Reject { remaining } => Err(AutomationError::DeadlineOutOfWindow {
                remaining_secs: remaining.num_seconds(),
            }),
        }
    }

    pub fn step(&mut self, event: SchedulerEvent, now: NaiveDateTime) -> Vec<SchedulerAction> {
        if self.phase.is_terminal() {
            return Vec::new();
        }

        match event {
            SchedulerEvent::Tick => self.on_tick(now),
            SchedulerEvent::PrebootFinished { .. } => {
                if self.phase == CountdownPhase::PreBooting {
                    self.transition(CountdownPhase::Ready);
                }
                Vec::new()
            }
            SchedulerEvent::FireCompleted { ok, detail } => {
                if self.phase != CountdownPhase::Firing {
                    return Vec::new();
                }
                let termination = if ok { Termination::Success } else { Termination::Failed };
                self.finish(CountdownPhase::Expired, termination, detail)
            }
            // The cancel affordance is disabled once firing starts.
            SchedulerEvent::UserCancel if self.phase == CountdownPhase::Firing => Vec::new(),
            SchedulerEvent::UserCancel => {
                self.finish(CountdownPhase::Cancelled, Termination::Cancelled, "cancelled by user".into())
            }
            SchedulerEvent::TerminalVanished => match self.phase {
                // Pre-boot relaunches the terminal itself; a submit in flight
                // reports its own failure.
                CountdownPhase::PreBooting | CountdownPhase::Firing => Vec::new(),
                _ => self.finish(
                    CountdownPhase::Cancelled,
                    Termination::ForcedEnd,
                    "terminal closed before the deadline".into(),
                ),
            },
        }
    }

    fn on_tick(&mut self, now: NaiveDateTime) -> Vec<SchedulerAction> {
        if !matches!(
            self.phase,
            CountdownPhase::Armed | CountdownPhase::PreBooting | CountdownPhase::Ready
        ) {
            return Vec::new();
        }

        self.last_tick = Some(now);
        let remaining = self.remaining(now);
        let mut actions = vec![SchedulerAction::Render { remaining }];

        if remaining <= Duration::zero() {
            self.transition(CountdownPhase::Firing);
            self.preboot_at = None;
            actions.push(SchedulerAction::BeginFire);
            return actions;
        }

        if self.phase == CountdownPhase::Armed {
            if let Some(at) = self.preboot_at {
                if now >= at {
                    self.preboot_at = None;
                    self.transition(CountdownPhase::PreBooting);
                    actions.push(SchedulerAction::StartPreboot);
                }
            }
        }
        actions
    }

    fn finish(&mut self, phase: CountdownPhase, termination: Termination, detail: String) -> Vec<SchedulerAction> {
        self.transition(phase);
        self.termination = Some(termination);
        vec![SchedulerAction::Finish { termination, detail }]
    }

    fn transition(&mut self, next: CountdownPhase) {
        if self.phase.can_transition_to(next) {
            log::debug!("countdown {:?} -> {:?}", self.phase, next);
            self.phase = next;
        } else {
            log::warn!("ignored countdown transition {:?} -> {:?}", self.phase, next);
        }
    }
}

/// Pick the pre-boot instant, uniformly over whatever part of the
/// [30, 15] minutes-before window is still ahead. `None` without credentials
/// or when the window has already closed.
pub fn plan_preboot<R: Rng>(
    deadline: NaiveDateTime,
    now: NaiveDateTime,
    has_credentials: bool,
    rng: &mut R,
) -> Option<NaiveDateTime> {
    if !has_credentials {
        return None;
    }
    let window_start = deadline - Duration::minutes(PREBOOT_EARLIEST_MIN);
    let window_end = deadline - Duration::minutes(PREBOOT_LATEST_MIN);
    if now >= window_end {
        return None;
    }
    let from = window_start.max(now);
    let span = (window_end - from).num_milliseconds();
    let offset = rng.gen_range(0..=span.max(0));
    Some(from + Duration::milliseconds(offset))
}
