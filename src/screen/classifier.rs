use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::terminal::CourseRequest;

/// Per-course refusal codes printed by the registration host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectionCode {
    ClosedSection,
    CourseNotFound,
    PrerequisiteMissing,
    TimeConflict,
    CreditLimit,
    RegistrationHold,
    AlreadyEnrolled,
    RestrictedSection,
    NotEnrolled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    SignIn,
    MainMenu,
    InvalidCredentials,
    InvalidTerm,
    SearchScreen,
    SectionListing,
    EnrollmentScreen,
    Confirmed,
    Dropped,
    Rejected(RejectionCode),
    Maintenance,
    SessionExpired,
    Timeout,
    Unknown,
}

impl Outcome {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }
}

/// Groups of markers; a classification for one family always includes `Common`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationFamily {
    Common,
    Login,
    Menu,
    Search,
    Enrollment,
}

struct Marker {
    pattern: &'static str,
    outcome: Outcome,
    family: OperationFamily,
}

const fn marker(pattern: &'static str, outcome: Outcome, family: OperationFamily) -> Marker {
    Marker {
        pattern,
        outcome,
        family,
    }
}

// Patterns are matched against upper-cased, whitespace-collapsed text.
const MARKERS: &[Marker] = &[
    marker("SYSTEM UNDER MAINTENANCE", Outcome::Maintenance, OperationFamily::Common),
    marker("SESSION EXPIRED", Outcome::SessionExpired, OperationFamily::Common),
    marker("SIGN IN", Outcome::SignIn, OperationFamily::Login),
    marker("INVALID STUDENT NUMBER", Outcome::InvalidCredentials, OperationFamily::Login),
    marker("INVALID PIN", Outcome::InvalidCredentials, OperationFamily::Login),
    marker("INVALID TERM", Outcome::InvalidTerm, OperationFamily::Login),
    marker("MAIN MENU", Outcome::MainMenu, OperationFamily::Menu),
    marker("SECTION SEARCH", Outcome::SearchScreen, OperationFamily::Search),
    marker("SECTIONS FOR", Outcome::SectionListing, OperationFamily::Search),
    marker(
        "COURSE NOT FOUND",
        Outcome::Rejected(RejectionCode::CourseNotFound),
        OperationFamily::Search,
    ),
    marker("COURSE ENROLLMENT", Outcome::EnrollmentScreen, OperationFamily::Enrollment),
    marker("CONFIRMED", Outcome::Confirmed, OperationFamily::Enrollment),
    marker("DROPPED", Outcome::Dropped, OperationFamily::Enrollment),
    marker(
        "CLOSED SECTION",
        Outcome::Rejected(RejectionCode::ClosedSection),
        OperationFamily::Enrollment,
    ),
    marker(
        "INVALID COURSE",
        Outcome::Rejected(RejectionCode::CourseNotFound),
        OperationFamily::Enrollment,
    ),
    marker(
        "PREREQUISITE",
        Outcome::Rejected(RejectionCode::PrerequisiteMissing),
        OperationFamily::Enrollment,
    ),
    marker(
        "TIME CONFLICT",
        Outcome::Rejected(RejectionCode::TimeConflict),
        OperationFamily::Enrollment,
    ),
    marker(
        "CREDIT LIMIT",
        Outcome::Rejected(RejectionCode::CreditLimit),
        OperationFamily::Enrollment,
    ),
    marker(
        "HOLD ON RECORD",
        Outcome::Rejected(RejectionCode::RegistrationHold),
        OperationFamily::Enrollment,
    ),
    marker(
        "ALREADY ENROLLED",
        Outcome::Rejected(RejectionCode::AlreadyEnrolled),
        OperationFamily::Enrollment,
    ),
    marker(
        "RESTRICTED SECTION",
        Outcome::Rejected(RejectionCode::RestrictedSection),
        OperationFamily::Enrollment,
    ),
    marker(
        "NOT ENROLLED",
        Outcome::Rejected(RejectionCode::NotEnrolled),
        OperationFamily::Enrollment,
    ),
];

/// The set of outcomes one piece of screen text carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcomes(BTreeSet<Outcome>);

impl Outcomes {
    pub fn contains(&self, outcome: Outcome) -> bool {
        self.0.contains(&outcome)
    }

    pub fn any_of(&self, wanted: &[Outcome]) -> Option<Outcome> {
        wanted.iter().copied().find(|outcome| self.contains(*outcome))
    }

    pub fn rejections(&self) -> impl Iterator<Item = RejectionCode> + '_ {
        self.0.iter().filter_map(|outcome| match outcome {
            Outcome::Rejected(code) => Some(*code),
            _ => None,
        })
    }

    pub fn has_rejection(&self) -> bool {
        self.rejections().next().is_some()
    }

    pub fn is_unknown(&self) -> bool {
        self.0.len() == 1 && self.contains(Outcome::Unknown)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outcome> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Outcome> for Outcomes {
    fn from_iter<I: IntoIterator<Item = Outcome>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Outcome of one course line on a submit/drop result screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseResult {
    pub request: CourseRequest,
    pub outcome: Outcome,
}

/// Upper-case and collapse runs of whitespace so OCR spacing noise does not
/// break multi-word markers.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Classify text against every marker family.
pub fn classify(text: &str) -> Outcomes {
    classify_with(text, |_| true)
}

/// Classify text against one family plus the common markers.
pub fn classify_family(text: &str, family: OperationFamily) -> Outcomes {
    classify_with(text, |marker_family| {
        marker_family == family || marker_family == OperationFamily::Common
    })
}

fn classify_with(text: &str, include: impl Fn(OperationFamily) -> bool) -> Outcomes {
    let normalized = normalize(text);
    let outcomes: BTreeSet<Outcome> = MARKERS
        .iter()
        .filter(|marker| include(marker.family))
        .filter(|marker| normalized.contains(marker.pattern))
        .map(|marker| marker.outcome)
        .collect();

    if outcomes.is_empty() {
        Outcomes([Outcome::Unknown].into_iter().collect())
    } else {
        Outcomes(outcomes)
    }
}

/// Classify each requested course against the line that mentions it.
///
/// A rejection on the line wins over a confirmation, so a line reading
/// "NOT CONFIRMED - CLOSED SECTION" is still reported as a rejection.
pub fn classify_courses(text: &str, requests: &[CourseRequest]) -> Vec<CourseResult> {
    let lines: Vec<String> = text.lines().map(normalize).collect();

    requests
        .iter()
        .map(|request| {
            let course = compact(&request.course);
            let section = request.section.to_uppercase();
            let line = lines.iter().find(|line| mentions(line, &course, &section));

            let outcome = match line {
                Some(line) => line_outcome(line),
                None => Outcome::Unknown,
            };

            CourseResult {
                request: request.clone(),
                outcome,
            }
        })
        .collect()
}

/// The course code, possibly split by OCR spacing, followed later on the line
/// by the section as a whole token.
fn mentions(line: &str, course: &str, section: &str) -> bool {
    let tokens: Vec<&str> = line
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();

    (0..tokens.len()).any(|start| {
        let mut joined = String::new();
        for (end, token) in tokens.iter().enumerate().skip(start) {
            joined.push_str(token);
            if joined == course {
                return tokens[end + 1..].contains(&section);
            }
            if !course.starts_with(joined.as_str()) {
                break;
            }
        }
        false
    })
}

fn line_outcome(line: &str) -> Outcome {
    let outcomes = classify_family(line, OperationFamily::Enrollment);
    if let Some(code) = outcomes.rejections().next() {
        return Outcome::Rejected(code);
    }
    outcomes
        .any_of(&[Outcome::Confirmed, Outcome::Dropped])
        .unwrap_or(Outcome::Unknown)
}

fn compact(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(course: &str, section: &str) -> CourseRequest {
        CourseRequest {
            course: course.into(),
            section: section.into(),
        }
    }

    #[test]
    fn unknown_when_nothing_matches() {
        let outcomes = classify("File Edit Setup Control Window Help\n\n   ");
        assert!(outcomes.is_unknown());
    }

    #[test]
    fn markers_survive_ocr_spacing_and_case() {
        let outcomes = classify("main    menu\n  1. Course   enrollment");
        assert!(outcomes.contains(Outcome::MainMenu));
        assert!(outcomes.contains(Outcome::EnrollmentScreen));
        assert_eq!(outcomes.len(), 2);
    }

    #[test]
    fn maintenance_is_visible_from_every_family() {
        let text = "SIGN IN\nSYSTEM UNDER MAINTENANCE";
        let login = classify_family(text, OperationFamily::Login);
        assert!(login.contains(Outcome::SignIn));
        assert!(login.contains(Outcome::Maintenance));

        let search = classify_family(text, OperationFamily::Search);
        assert!(search.contains(Outcome::Maintenance));
        assert!(!search.contains(Outcome::SignIn));
    }

    #[test]
    fn co_occurring_markers_are_all_reported() {
        let text = "COURSE ENROLLMENT\nCIIC3015 010 CONFIRMED\nMATE3031 020 CLOSED SECTION";
        let outcomes = classify_family(text, OperationFamily::Enrollment);
        assert!(outcomes.contains(Outcome::EnrollmentScreen));
        assert!(outcomes.contains(Outcome::Confirmed));
        assert_eq!(
            outcomes.rejections().collect::<Vec<_>>(),
            vec![RejectionCode::ClosedSection]
        );
        assert_eq!(
            outcomes.any_of(&[Outcome::Dropped, Outcome::Confirmed]),
            Some(Outcome::Confirmed)
        );
    }

    #[test]
    fn per_course_results_follow_their_own_lines() {
        let text = "COURSE ENROLLMENT\n\
                    CIIC 3015  010   CONFIRMED\n\
                    MATE3031   020   TIME CONFLICT\n\
                    INGL3101   001   NOT CONFIRMED - CLOSED SECTION\n";
        let results = classify_courses(
            text,
            &[
                request("CIIC3015", "010"),
                request("MATE3031", "020"),
                request("INGL3101", "001"),
                request("FISI3171", "030"),
            ],
        );

        let outcomes: Vec<Outcome> = results.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                Outcome::Confirmed,
                Outcome::Rejected(RejectionCode::TimeConflict),
                Outcome::Rejected(RejectionCode::ClosedSection),
                Outcome::Unknown,
            ]
        );
    }

    #[test]
    fn section_must_be_its_own_token() {
        let text = "COURSE ENROLLMENT\nINGL3101 001 CLOSED SECTION\nINGL3101 101 CONFIRMED";
        let results = classify_courses(text, &[request("INGL3101", "101")]);
        assert_eq!(results[0].outcome, Outcome::Confirmed);

        let split = classify_courses("INGL 3101-101 CONFIRMED", &[request("INGL3101", "101")]);
        assert_eq!(split[0].outcome, Outcome::Confirmed);

        let missing = classify_courses("INGL3101 001 CONFIRMED", &[request("INGL3101", "101")]);
        assert_eq!(missing[0].outcome, Outcome::Unknown);
    }
}
