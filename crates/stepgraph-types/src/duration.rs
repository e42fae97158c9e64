//! Human-readable duration strings for workflow and config files.
//!
//! Accepts `"250ms"`, `"30s"`, `"5m"`, `"1h"` and bare integers (seconds).
//! Compound values such as `"1m30s"` are also accepted.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Error returned when a duration string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration '{input}': {reason}")]
pub struct DurationParseError {
    pub input: String,
    pub reason: String,
}

impl DurationParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse a duration string such as `"500ms"`, `"30s"`, `"2m"` or `"1h30m"`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::new(input, "empty string"));
    }

    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| DurationParseError::new(input, "missing unit"))?;
        if digits_end == 0 {
            return Err(DurationParseError::new(input, "expected a number"));
        }
        let amount: u64 = rest[..digits_end]
            .parse()
            .map_err(|_| DurationParseError::new(input, "number out of range"))?;
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        let part = match unit {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.saturating_mul(60)),
            "h" => Duration::from_secs(amount.saturating_mul(3600)),
            other => {
                return Err(DurationParseError::new(
                    input,
                    format!("unknown unit '{other}' (expected ms, s, m or h)"),
                ));
            }
        };
        total = total.saturating_add(part);
    }

    Ok(total)
}

/// Render a duration in the shortest exact form `parse_duration` accepts.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis % 1000 != 0 {
        return format!("{millis}ms");
    }
    let secs = millis / 1000;
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Seconds(u64),
    Text(String),
}

impl DurationRepr {
    fn into_duration(self) -> Result<Duration, DurationParseError> {
        match self {
            DurationRepr::Seconds(secs) => Ok(Duration::from_secs(secs)),
            DurationRepr::Text(text) => parse_duration(&text),
        }
    }
}

/// Serde adapter for `Duration` fields.
pub mod required {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        DurationRepr::deserialize(deserializer)?
            .into_duration()
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<Duration>` fields.
///
/// Use together with `#[serde(default)]` so a missing field becomes `None`.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&format_duration(*duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<DurationRepr>::deserialize(deserializer)?
            .map(DurationRepr::into_duration)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn bare_integer_is_seconds() {
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn parses_compound_values() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(
            parse_duration("1s500ms").unwrap(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10").is_ok());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("10s5").is_err());
    }

    #[test]
    fn formats_shortest_exact_unit() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn option_adapter_reads_strings_and_numbers() {
        #[derive(serde::Deserialize)]
        struct Holder {
            #[serde(default, with = "super::option")]
            timeout: Option<Duration>,
        }

        let h: Holder = serde_yaml_ng::from_str("timeout: 2s").unwrap();
        assert_eq!(h.timeout, Some(Duration::from_secs(2)));

        let h: Holder = serde_yaml_ng::from_str("timeout: 7").unwrap();
        assert_eq!(h.timeout, Some(Duration::from_secs(7)));

        let h: Holder = serde_yaml_ng::from_str("{}").unwrap();
        assert_eq!(h.timeout, None);

        assert!(serde_yaml_ng::from_str::<Holder>("timeout: soon").is_err());
    }
}
