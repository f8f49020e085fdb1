//! Error taxonomy for terminal automation and scheduled enrollment.
//!
//! Every failure that reaches the operation coordinator is mapped onto one of
//! these variants so callers can report it without inspecting strings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::screen::RejectionCode;

/// Which connectivity pre-flight check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectivityIssue {
    NoInternet,
    HostUnreachable,
}

/// A course the remote host refused, with the code it printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRejection {
    pub course: String,
    pub section: String,
    pub code: RejectionCode,
}

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("connectivity check failed: {0:?}")]
    Connectivity(ConnectivityIssue),

    #[error("OCR engine unavailable: {0}")]
    OcrUnavailable(String),

    #[error("deadline for term {term} is ambiguous (both % and * markers present)")]
    AmbiguousDeadline { term: String },

    #[error("no enrollment deadline found on screen")]
    DeadlineNotFound,

    #[error("deadline is outside the schedulable window ({remaining_secs}s remaining)")]
    DeadlineOutOfWindow { remaining_secs: i64 },

    #[error("terminal session out of sync")]
    SessionDesync { screen: String },

    #[error("remote host rejected {} course(s)", rejections.len())]
    RemoteRejection {
        rejections: Vec<CourseRejection>,
        screen: String,
    },

    #[error("remote host is under maintenance")]
    RemoteMaintenance { screen: String },

    #[error("student number or PIN rejected")]
    InvalidCredentials { screen: String },

    #[error("term not accepted by the remote host")]
    InvalidTerm { screen: String },

    #[error("terminal window or process unavailable: {0}")]
    TerminalUnavailable(String),

    #[error("timed out after {waited:?} waiting for {expected}")]
    Timeout {
        expected: String,
        waited: Duration,
        screen: String,
    },

    #[error("countdown force-ended: {0}")]
    ForcedEnd(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Flat classification used in reports and persisted run history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Connectivity,
    OcrUnavailable,
    AmbiguousDeadline,
    DeadlineNotFound,
    DeadlineOutOfWindow,
    SessionDesync,
    RemoteRejection,
    RemoteMaintenance,
    InvalidCredentials,
    InvalidTerm,
    TerminalUnavailable,
    Timeout,
    ForcedEnd,
    Cancelled,
    Internal,
}

impl AutomationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AutomationError::Connectivity(_) => ErrorKind::Connectivity,
            AutomationError::OcrUnavailable(_) => ErrorKind::OcrUnavailable,
            AutomationError::AmbiguousDeadline { .. } => ErrorKind::AmbiguousDeadline,
            AutomationError::DeadlineNotFound => ErrorKind::DeadlineNotFound,
            AutomationError::DeadlineOutOfWindow { .. } => ErrorKind::DeadlineOutOfWindow,
            AutomationError::SessionDesync { .. } => ErrorKind::SessionDesync,
            AutomationError::RemoteRejection { .. } => ErrorKind::RemoteRejection,
            AutomationError::RemoteMaintenance { .. } => ErrorKind::RemoteMaintenance,
            AutomationError::InvalidCredentials { .. } => ErrorKind::InvalidCredentials,
            AutomationError::InvalidTerm { .. } => ErrorKind::InvalidTerm,
            AutomationError::TerminalUnavailable(_) => ErrorKind::TerminalUnavailable,
            AutomationError::Timeout { .. } => ErrorKind::Timeout,
            AutomationError::ForcedEnd(_) => ErrorKind::ForcedEnd,
            AutomationError::Cancelled => ErrorKind::Cancelled,
            AutomationError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Screen text captured when the failure was detected, if any.
    pub fn screen_text(&self) -> Option<&str> {
        match self {
            AutomationError::SessionDesync { screen }
            | AutomationError::RemoteRejection { screen, .. }
            | AutomationError::RemoteMaintenance { screen }
            | AutomationError::InvalidCredentials { screen }
            | AutomationError::InvalidTerm { screen }
            | AutomationError::Timeout { screen, .. } => Some(screen.as_str()),
            _ => None,
        }
    }

    /// Fatal errors stop the scheduler from retrying on its own.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AutomationError::OcrUnavailable(_) | AutomationError::ForcedEnd(_)
        )
    }
}

pub type AutomationResult<T> = Result<T, AutomationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinct_from_rejection() {
        let timeout = AutomationError::Timeout {
            expected: "confirmation".into(),
            waited: Duration::from_secs(2),
            screen: "COURSE ENROLLMENT".into(),
        };
        let rejection = AutomationError::RemoteRejection {
            rejections: vec![CourseRejection {
                course: "CIIC3015".into(),
                section: "010".into(),
                code: RejectionCode::ClosedSection,
            }],
            screen: "CIIC3015 010 CLOSED SECTION".into(),
        };

        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(rejection.kind(), ErrorKind::RemoteRejection);
        assert_eq!(timeout.screen_text(), Some("COURSE ENROLLMENT"));
        assert_eq!(rejection.to_string(), "remote host rejected 1 course(s)");
    }

    #[test]
    fn internal_errors_wrap_anyhow() {
        let err: AutomationError = anyhow::anyhow!("db thread gone").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.screen_text().is_none());
        assert!(!err.is_fatal());
    }
}
