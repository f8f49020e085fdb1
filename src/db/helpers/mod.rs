use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::db::models::Termination;

/// Column format for local deadlines, which carry no offset.
pub const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Stored in place of a latency when the probe failed.
const FAILED_PROBE: f64 = -1.0;

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_naive(value: &str, field: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, NAIVE_FORMAT).with_context(|| format!("failed to parse {field}"))
}

pub fn parse_termination(value: &str) -> Result<Termination> {
    match value {
        "Success" => Ok(Termination::Success),
        "Failed" => Ok(Termination::Failed),
        "Cancelled" => Ok(Termination::Cancelled),
        "ForcedEnd" => Ok(Termination::ForcedEnd),
        other => Err(anyhow!("unknown termination {other}")),
    }
}

pub fn encode_latencies(latencies: &[Option<f64>]) -> String {
    latencies
        .iter()
        .map(|value| format!("{:.3}", value.unwrap_or(FAILED_PROBE)))
        .collect::<Vec<_>>()
        .join(";")
}

/// Any negative entry decodes as a failure.
pub fn decode_latencies(value: &str) -> Result<Vec<Option<f64>>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let parsed: f64 = part
                .parse()
                .with_context(|| format!("invalid latency entry '{part}'"))?;
            Ok((parsed >= 0.0).then_some(parsed))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_stored_as_negative_one() {
        let encoded = encode_latencies(&[Some(41.5), None, Some(12.0)]);
        assert_eq!(encoded, "41.500;-1.000;12.000");
        assert_eq!(decode_latencies("41.5;-1;12").unwrap(), vec![Some(41.5), None, Some(12.0)]);
        assert!(decode_latencies("").unwrap().is_empty());
        assert!(decode_latencies("abc").is_err());
    }
}
