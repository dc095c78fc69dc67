//! Rate strings such as `"30/minute"`

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

static RATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*/\s*([a-zA-Z]+)\s*$").expect("rate pattern is valid")
});

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RateParseError {
    #[error("expected '<count>/<unit>', got '{0}'")]
    Format(String),

    #[error("unknown time unit '{0}' (use second, minute, hour or day)")]
    Unit(String),

    #[error("request count must be between 1 and {max}", max = u32::MAX)]
    Count,
}

/// Token-bucket rate: `capacity` requests per `period`, refilled continuously
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub capacity: u32,
    pub period: Duration,
}

impl Rate {
    pub fn new(capacity: u32, period: Duration) -> Self {
        Self { capacity, period }
    }

    /// Parse `N/unit` where unit is second, minute, hour or day
    /// (plural forms and `s`/`m`/`h`/`d` accepted)
    pub fn parse(s: &str) -> Result<Self, RateParseError> {
        let caps = RATE_RE
            .captures(s)
            .ok_or_else(|| RateParseError::Format(s.to_string()))?;

        let capacity: u32 = caps[1].parse().map_err(|_| RateParseError::Count)?;
        if capacity == 0 {
            return Err(RateParseError::Count);
        }

        let unit = caps[2].to_lowercase();
        let secs = match unit.as_str() {
            "s" | "sec" | "second" | "seconds" => 1,
            "m" | "min" | "minute" | "minutes" => 60,
            "h" | "hour" | "hours" => 3_600,
            "d" | "day" | "days" => 86_400,
            _ => return Err(RateParseError::Unit(caps[2].to_string())),
        };

        Ok(Self::new(capacity, Duration::from_secs(secs)))
    }
}

impl FromStr for Rate {
    type Err = RateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.period.as_secs() {
            1 => "second",
            60 => "minute",
            3_600 => "hour",
            86_400 => "day",
            other => return write!(f, "{}/{}s", self.capacity, other),
        };
        write!(f, "{}/{}", self.capacity, unit)
    }
}
