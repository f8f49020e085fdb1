use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::screen::{CourseResult, OperationFamily};
use crate::vault::Credentials;

/// Term code as the registration host prints it, e.g. `B25`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Semester(String);

impl Semester {
    pub fn new(code: impl AsRef<str>) -> anyhow::Result<Self> {
        let code = code.as_ref().trim().to_uppercase();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            bail!("invalid term code '{code}'");
        }
        Ok(Self(code))
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRequest {
    pub course: String,
    pub section: String,
}

impl fmt::Display for CourseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.course, self.section)
    }
}

impl FromStr for CourseRequest {
    type Err = anyhow::Error;

    /// Parses `CIIC3015-010` (a space also separates course and section).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (course, section) = value
            .trim()
            .split_once(['-', ' '])
            .ok_or_else(|| anyhow!("expected COURSE-SECTION, got '{value}'"))?;
        let course = course.trim().to_uppercase();
        let section = section.trim().to_uppercase();
        if course.is_empty() || section.is_empty() {
            bail!("expected COURSE-SECTION, got '{value}'");
        }
        Ok(Self { course, section })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MenuTarget {
    MainMenu,
    Enrollment,
    SectionSearch,
}

impl MenuTarget {
    /// Option typed at the main menu to reach this screen.
    pub fn menu_option(&self) -> Option<&'static str> {
        match self {
            MenuTarget::MainMenu => None,
            MenuTarget::Enrollment => Some("1"),
            MenuTarget::SectionSearch => Some("2"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum OperationIntent {
    Login {
        credentials: Credentials,
        semester: Semester,
    },
    Search {
        course: String,
    },
    Enroll {
        request: CourseRequest,
    },
    Drop {
        request: CourseRequest,
    },
    MultiSubmit {
        requests: Vec<CourseRequest>,
    },
    /// Log in if needed, then submit every course.
    AutoEnroll {
        credentials: Credentials,
        semester: Semester,
        requests: Vec<CourseRequest>,
    },
    Menu {
        target: MenuTarget,
    },
    SignOut,
}

impl OperationIntent {
    pub fn label(&self) -> &'static str {
        match self {
            OperationIntent::Login { .. } => "login",
            OperationIntent::Search { .. } => "search",
            OperationIntent::Enroll { .. } => "enroll",
            OperationIntent::Drop { .. } => "drop",
            OperationIntent::MultiSubmit { .. } => "multi-submit",
            OperationIntent::AutoEnroll { .. } => "auto-enroll",
            OperationIntent::Menu { .. } => "menu",
            OperationIntent::SignOut => "sign-out",
        }
    }

    pub fn family(&self) -> OperationFamily {
        match self {
            OperationIntent::Login { .. } | OperationIntent::SignOut => OperationFamily::Login,
            OperationIntent::Search { .. } => OperationFamily::Search,
            OperationIntent::Enroll { .. }
            | OperationIntent::Drop { .. }
            | OperationIntent::MultiSubmit { .. }
            | OperationIntent::AutoEnroll { .. } => OperationFamily::Enrollment,
            OperationIntent::Menu { .. } => OperationFamily::Menu,
        }
    }

    /// Whether the operation may start the terminal process itself.
    pub fn may_launch_terminal(&self) -> bool {
        matches!(
            self,
            OperationIntent::Login { .. } | OperationIntent::AutoEnroll { .. }
        )
    }
}

/// What a successful operation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum OperationOutput {
    LoggedIn { semester: Semester },
    Listing { text: String },
    Courses { results: Vec<CourseResult> },
    Navigated { target: MenuTarget, text: String },
    SignedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_course_requests() {
        let request: CourseRequest = "ciic3015-010".parse().unwrap();
        assert_eq!(request.course, "CIIC3015");
        assert_eq!(request.section, "010");
        assert_eq!(request.to_string(), "CIIC3015-010");

        let spaced: CourseRequest = "MATE3031 020".parse().unwrap();
        assert_eq!(spaced.section, "020");

        assert!("CIIC3015".parse::<CourseRequest>().is_err());
        assert!("-010".parse::<CourseRequest>().is_err());
    }

    #[test]
    fn semester_codes_are_normalized() {
        assert_eq!(Semester::new(" b25 ").unwrap().code(), "B25");
        assert!(Semester::new("B25%").is_err());
        assert!(Semester::new("").is_err());
    }
}
