//! Reading the registration opening time off the terminal screen.

use std::sync::OnceLock;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AutomationError, AutomationResult},
    terminal::Semester,
};

/// Latest deadline that can still be armed.
pub fn max_arm_ahead() -> Duration {
    Duration::hours(12) + Duration::minutes(55)
}

/// How far past the deadline a late arm still fires immediately.
pub fn max_catch_up() -> Duration {
    Duration::hours(24)
}

/// OCR confuses these with digits inside the date/time.
const DIGITISH: &str = "[0-9OoIl|]";

fn deadline_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let d = DIGITISH;
        let pattern = format!(
            r"(?i)OPEN\s*:\s*({d}{{1,2}})\s*/\s*({d}{{1,2}})\s*/\s*({d}{{4}})\s+({d}{{1,2}})\s*[:.]\s*({d}{{2}})(?:\s*([AP])\.?\s*M\.?)?"
        );
        Regex::new(&pattern).expect("deadline pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeadlineConfidence {
    /// Found after the term's own marker.
    Marked,
    /// No term marker on screen; the first label was used.
    Unmarked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentDeadline {
    /// Wall-clock time in the host's local zone.
    pub timestamp: NaiveDateTime,
    pub confidence: DeadlineConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    Arm { remaining: Duration },
    FireNow { overdue: Duration },
    Reject { remaining: Duration },
}

fn ocr_digits(raw: &str) -> Option<u32> {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            'O' | 'o' => '0',
            'I' | 'l' | '|' => '1',
            other => other,
        })
        .collect();
    cleaned.parse().ok()
}

/// Extract the opening time for `semester` from screen text.
///
/// The term is flagged on screen as `<term>%` or `<term>*`; when exactly one
/// of those appears, the label after it is used. Both at once is ambiguous.
pub fn parse_deadline(text: &str, semester: &Semester) -> AutomationResult<EnrollmentDeadline> {
    let upper = text.to_ascii_uppercase();
    let percent = upper.find(&format!("{}%", semester.code()));
    let star = upper.find(&format!("{}*", semester.code()));

    let (search_from, confidence) = match (percent, star) {
        (Some(_), Some(_)) => {
            return Err(AutomationError::AmbiguousDeadline {
                term: semester.code().to_string(),
            })
        }
        (Some(at), None) | (None, Some(at)) => (at, DeadlineConfidence::Marked),
        (None, None) => (0, DeadlineConfidence::Unmarked),
    };

    let captures = deadline_regex()
        .captures(&text[search_from..])
        .ok_or(AutomationError::DeadlineNotFound)?;
    let field = |index: usize| captures.get(index).and_then(|m| ocr_digits(m.as_str()));

    let (Some(month), Some(day), Some(year), Some(mut hour), Some(minute)) =
        (field(1), field(2), field(3), field(4), field(5))
    else {
        return Err(AutomationError::DeadlineNotFound);
    };

    if let Some(meridiem) = captures.get(6) {
        if hour == 0 || hour > 12 {
            return Err(AutomationError::DeadlineNotFound);
        }
        let pm = meridiem.as_str().eq_ignore_ascii_case("P");
        hour = match (pm, hour) {
            (false, 12) => 0,
            (true, 12) => 12,
            (true, h) => h + 12,
            (false, h) => h,
        };
    }

    let timestamp = NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .ok_or(AutomationError::DeadlineNotFound)?;

    Ok(EnrollmentDeadline {
        timestamp,
        confidence,
    })
}

pub fn classify_window(deadline: NaiveDateTime, now: NaiveDateTime) -> WindowDecision {
    let remaining = deadline - now;
    if remaining >= Duration::zero() && remaining <= max_arm_ahead() {
        WindowDecision::Arm { remaining }
    } else if remaining < Duration::zero() && remaining >= -max_catch_up() {
        WindowDecision::FireNow { overdue: -remaining }
    } else {
        WindowDecision::Reject { remaining }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b25() -> Semester {
        Semester::new("B25").unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 21)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn parses_plain_label() {
        let deadline = parse_deadline("TERM B25\nOPEN: 03/21/2025 08:00", &b25()).unwrap();
        assert_eq!(deadline.timestamp, at(8, 0, 0));
        assert_eq!(deadline.confidence, DeadlineConfidence::Unmarked);
    }

    #[test]
    fn honours_meridiem_and_ocr_noise() {
        let deadline = parse_deadline("B25% OPEN: O3/2l/2025 O1:3O PM", &b25()).unwrap();
        assert_eq!(deadline.timestamp, at(13, 30, 0));
        assert_eq!(deadline.confidence, DeadlineConfidence::Marked);

        let midnight = parse_deadline("OPEN: 03/21/2025 12:05 AM", &b25()).unwrap();
        assert_eq!(midnight.timestamp, at(0, 5, 0));
    }

    #[test]
    fn marker_selects_the_right_label() {
        let text = "A25 OPEN: 01/10/2025 07:00 AM\nB25* OPEN: 03/21/2025 08:00 AM";
        assert_eq!(parse_deadline(text, &b25()).unwrap().timestamp, at(8, 0, 0));
    }

    #[test]
    fn both_markers_are_ambiguous() {
        let err = parse_deadline("B25% OPEN: 03/21/2025 08:00\nB25* OPEN: 03/22/2025 08:00", &b25()).unwrap_err();
        assert!(matches!(err, AutomationError::AmbiguousDeadline { ref term } if term == "B25"));
    }

    #[test]
    fn missing_or_invalid_label() {
        assert!(matches!(
            parse_deadline("MAIN MENU", &b25()),
            Err(AutomationError::DeadlineNotFound)
        ));
        assert!(matches!(
            parse_deadline("OPEN: 13/45/2025 08:00", &b25()),
            Err(AutomationError::DeadlineNotFound)
        ));
    }

    #[test]
    fn window_boundaries() {
        let deadline = at(20, 0, 0);
        assert!(matches!(classify_window(deadline, at(20, 0, 0)), WindowDecision::Arm { .. }));
        assert!(matches!(classify_window(deadline, at(7, 5, 0)), WindowDecision::Arm { .. }));
        assert!(matches!(classify_window(deadline, at(7, 4, 59)), WindowDecision::Reject { .. }));
        assert!(matches!(classify_window(deadline, at(20, 0, 1)), WindowDecision::FireNow { .. }));
        assert!(matches!(
            classify_window(at(8, 0, 0), at(8, 0, 0) + Duration::hours(24)),
            WindowDecision::FireNow { .. }
        ));
        assert!(matches!(
            classify_window(at(8, 0, 0), at(8, 0, 1) + Duration::hours(24)),
            WindowDecision::Reject { .. }
        ));
    }
}
