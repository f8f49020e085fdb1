//! Scheduled enrollment: find the opening time on screen, count down to it,
//! sign in ahead of time and submit the moment registration opens.

pub mod controller;
pub mod countdown;
pub mod deadline;
pub mod state;
pub mod surface;

pub use controller::{Clock, EnrollmentPlan, EnrollmentScheduler, SchedulerConfig, SystemClock};
pub use countdown::{render_remaining, tick_interval, Locale};
pub use deadline::{classify_window, parse_deadline, DeadlineConfidence, EnrollmentDeadline, WindowDecision};
pub use state::{plan_preboot, CountdownPhase, CountdownSession, SchedulerAction, SchedulerEvent};
pub use surface::{CountdownSurface, LogSurface};
