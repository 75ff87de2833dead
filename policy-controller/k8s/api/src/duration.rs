use schemars::JsonSchema;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};

/// A non-negative duration in the Go `time.ParseDuration` format, as used by
/// `metav1.Duration` fields (e.g. `1h30m`, `90s`, `250ms`).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct K8sDuration(Duration);

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("negative durations are not supported")]
    Negative,

    #[error("invalid floating-point number: {}", .0)]
    NotANumber(#[from] std::num::ParseFloatError),
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

impl From<Duration> for K8sDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl From<K8sDuration> for Duration {
    fn from(K8sDuration(duration): K8sDuration) -> Self {
        duration
    }
}

impl fmt::Debug for K8sDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for K8sDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut secs = self.0.as_secs();
        let nanos = self.0.subsec_nanos();
        if secs == 0 && nanos == 0 {
            return f.write_str("0s");
        }
        let hours = secs / 3600;
        secs %= 3600;
        let mins = secs / 60;
        secs %= 60;
        if hours > 0 {
            write!(f, "{hours}h")?;
        }
        if mins > 0 {
            write!(f, "{mins}m")?;
        }
        match (secs, nanos) {
            (0, 0) => Ok(()),
            (s, 0) => write!(f, "{s}s"),
            (0, n) if n % 1_000_000 == 0 => write!(f, "{}ms", n / 1_000_000),
            (s, n) => write!(f, "{}s", s as f64 + f64::from(n) / 1e9),
        }
    }
}

fn unit_base(unit: &str) -> Result<Duration, ParseError> {
    match unit {
        "ns" => Ok(Duration::from_nanos(1)),
        // U+00B5 is the "micro sign" while U+03BC is "Greek letter mu"
        "us" | "\u{00b5}s" | "\u{03bc}s" => Ok(Duration::from_micros(1)),
        "ms" => Ok(Duration::from_millis(1)),
        "s" => Ok(Duration::from_secs(1)),
        "m" => Ok(Duration::from_secs(60)),
        "h" => Ok(Duration::from_secs(60 * 60)),
        _ => Err(ParseError::InvalidUnit),
    }
}

impl FromStr for K8sDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('-') {
            return Err(ParseError::Negative);
        }
        let mut rest = s.trim_start_matches('+');
        if rest == "0" {
            return Ok(Self::default());
        }

        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let unit_start = rest
                .find(|c: char| c.is_alphabetic())
                .ok_or(ParseError::NoUnit)?;
            let (value, tail) = rest.split_at(unit_start);
            let unit_end = tail
                .find(|c: char| !c.is_alphabetic())
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_end);
            total += unit_base(unit)?.mul_f64(value.parse::<f64>()?);
            rest = tail;
        }

        Ok(Self(total))
    }
}

impl Serialize for K8sDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for K8sDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl JsonSchema for K8sDuration {
    fn schema_name() -> String {
        "K8sDuration".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_durations() {
        let cases = [
            ("0", Duration::ZERO),
            ("90s", Duration::from_secs(90)),
            ("1h30m", Duration::from_secs(5400)),
            ("1.5h", Duration::from_secs(5400)),
            ("250ms", Duration::from_millis(250)),
            ("+2m", Duration::from_secs(120)),
        ];
        for (input, expected) in cases {
            assert_eq!(
                input.parse::<K8sDuration>().map(Duration::from),
                Ok(expected),
                "{input}"
            );
        }
    }

    #[test]
    fn rejects_invalid_durations() {
        assert_eq!("-1h".parse::<K8sDuration>(), Err(ParseError::Negative));
        assert_eq!("10".parse::<K8sDuration>(), Err(ParseError::NoUnit));
        assert_eq!("10d".parse::<K8sDuration>(), Err(ParseError::InvalidUnit));
        assert!(matches!(
            "h".parse::<K8sDuration>(),
            Err(ParseError::NotANumber(_))
        ));
    }

    #[test]
    fn displays_round_trippable_form() {
        for input in ["1h30m", "45s", "250ms", "0s"] {
            let d: K8sDuration = input.parse().unwrap();
            assert_eq!(d.to_string(), input);
            assert_eq!(d.to_string().parse::<K8sDuration>(), Ok(d));
        }
    }
}
