use std::time::Duration;

use log::{info, warn};

use crate::{db::Termination, error::ErrorKind};

/// Something the user should hear about even if they are not watching logs.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The session has been idle long enough that nudges alone may not keep it.
    IdleWarning { idle: Duration, nudges: u32 },
    TerminalVanished,
    OperationFailed {
        label: String,
        kind: ErrorKind,
        message: String,
    },
    EnrollmentFinished {
        termination: Termination,
        detail: String,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log; the headless default.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::IdleWarning { idle, nudges } => {
                warn!("[notice] session idle for {}s after {nudges} nudge(s); it may time out", idle.as_secs())
            }
            Notice::TerminalVanished => warn!("[notice] the terminal emulator is no longer running"),
            Notice::OperationFailed { label, kind, message } => {
                warn!("[notice] {label} failed ({kind:?}): {message}")
            }
            Notice::EnrollmentFinished { termination, detail } => {
                info!("[notice] scheduled enrollment {}: {detail}", termination.as_str())
            }
        }
    }
}
