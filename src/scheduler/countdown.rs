use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Locale {
    #[default]
    English,
    Spanish,
}

struct Unit {
    singular: &'static str,
    plural: &'static str,
}

fn units(locale: Locale) -> [Unit; 3] {
    match locale {
        Locale::English => [
            Unit { singular: "hour", plural: "hours" },
            Unit { singular: "minute", plural: "minutes" },
            Unit { singular: "second", plural: "seconds" },
        ],
        Locale::Spanish => [
            Unit { singular: "hora", plural: "horas" },
            Unit { singular: "minuto", plural: "minutos" },
            Unit { singular: "segundo", plural: "segundos" },
        ],
    }
}

/// Countdown line such as `1 hour, 2 minutes, 5 seconds remaining…`.
/// Zero components are left out; a negative remainder renders as zero.
pub fn render_remaining(remaining: chrono::Duration, locale: Locale) -> String {
    let total = remaining.num_seconds().max(0);
    let values = [total / 3600, (total % 3600) / 60, total % 60];
    let units = units(locale);

    let mut parts: Vec<String> = values
        .iter()
        .zip(units.iter())
        .filter(|(value, _)| **value > 0)
        .map(|(value, unit)| {
            let name = if *value == 1 { unit.singular } else { unit.plural };
            format!("{value} {name}")
        })
        .collect();
    if parts.is_empty() {
        parts.push(format!("0 {}", units[2].plural));
    }
    let joined = parts.join(", ");

    match locale {
        Locale::English => format!("{joined} remaining…"),
        Locale::Spanish => {
            let verb = if joined.starts_with("1 ") { "Queda" } else { "Quedan" };
            format!("{verb} {joined}…")
        }
    }
}

/// How long to sleep before the next countdown refresh.
pub fn tick_interval(remaining: chrono::Duration) -> Duration {
    let secs = remaining.num_seconds();
    if secs < 60 {
        Duration::from_secs(1)
    } else if secs < 600 {
        Duration::from_secs(2)
    } else {
        Duration::from_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Span;

    #[test]
    fn english_drops_zero_components() {
        assert_eq!(render_remaining(Span::minutes(59), Locale::English), "59 minutes remaining…");
        assert_eq!(
            render_remaining(Span::seconds(3_725), Locale::English),
            "1 hour, 2 minutes, 5 seconds remaining…"
        );
        assert_eq!(render_remaining(Span::seconds(-4), Locale::English), "0 seconds remaining…");
    }

    #[test]
    fn spanish_agrees_in_number() {
        assert_eq!(render_remaining(Span::minutes(59), Locale::Spanish), "Quedan 59 minutos…");
        assert_eq!(render_remaining(Span::seconds(61), Locale::Spanish), "Queda 1 minuto, 1 segundo…");
        assert_eq!(render_remaining(Span::hours(2), Locale::Spanish), "Quedan 2 horas…");
    }

    #[test]
    fn ticks_speed_up_near_the_deadline() {
        assert_eq!(tick_interval(Span::seconds(59)), Duration::from_secs(1));
        assert_eq!(tick_interval(Span::seconds(60)), Duration::from_secs(2));
        assert_eq!(tick_interval(Span::seconds(599)), Duration::from_secs(2));
        assert_eq!(tick_interval(Span::minutes(30)), Duration::from_secs(5));
    }
}
