//! Sliding-window durations written as `<integer><unit>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

const MINUTE_MILLIS: i64 = 60 * 1000;
const HOUR_MILLIS: i64 = 60 * MINUTE_MILLIS;
const DAY_MILLIS: i64 = 24 * HOUR_MILLIS;
const MONTH_MILLIS: i64 = 30 * DAY_MILLIS;

/// Unit of a time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Month,
}

impl TimeUnit {
    /// Length of one unit in milliseconds. A month is 30 days.
    pub fn millis(&self) -> i64 {
        match self {
            TimeUnit::Minute => MINUTE_MILLIS,
            TimeUnit::Hour => HOUR_MILLIS,
            TimeUnit::Day => DAY_MILLIS,
            TimeUnit::Month => MONTH_MILLIS,
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            TimeUnit::Minute => "m",
            TimeUnit::Hour => "h",
            TimeUnit::Day => "d",
            TimeUnit::Month => "mo",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "m" | "min" | "mins" | "minute" | "minutes" => Ok(TimeUnit::Minute),
            "h" | "hr" | "hour" | "hours" => Ok(TimeUnit::Hour),
            "d" | "day" | "days" => Ok(TimeUnit::Day),
            "mo" | "month" | "months" => Ok(TimeUnit::Month),
            other => Err(Error::InvalidTimeWindow(format!("unknown time unit '{}'", other))),
        }
    }
}

/// A window such as `10m`, `1h` or `2months`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeWindow {
    pub magnitude: u64,
    pub unit: TimeUnit,
}

impl TimeWindow {
    pub fn new(magnitude: u64, unit: TimeUnit) -> Self {
        Self { magnitude, unit }
    }

    /// Window length in milliseconds, saturating on overflow.
    pub fn millis(&self) -> i64 {
        i64::try_from(self.magnitude)
            .unwrap_or(i64::MAX)
            .saturating_mul(self.unit.millis())
    }

    /// Inclusive lower bound of the window ending at `end`.
    pub fn start(&self, end: i64) -> i64 {
        end.saturating_sub(self.millis())
    }
}

impl FromStr for TimeWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| Error::InvalidTimeWindow(format!("'{}' has no unit", s)))?;
        let (digits, unit) = trimmed.split_at(split);

        if digits.is_empty() {
            return Err(Error::InvalidTimeWindow(format!("'{}' has no magnitude", s)));
        }

        let magnitude: u64 = digits
            .parse()
            .map_err(|e| Error::InvalidTimeWindow(format!("'{}': {}", s, e)))?;
        if magnitude == 0 {
            return Err(Error::InvalidTimeWindow(format!("'{}' must be positive", s)));
        }

        Ok(Self {
            magnitude,
            unit: unit.trim().parse()?,
        })
    }
}

impl TryFrom<String> for TimeWindow {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeWindow> for String {
    fn from(window: TimeWindow) -> Self {
        window.to_string()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!("10m".parse::<TimeWindow>().unwrap().millis(), 600_000);
        assert_eq!("1h".parse::<TimeWindow>().unwrap().millis(), 3_600_000);
        assert_eq!("2day".parse::<TimeWindow>().unwrap().millis(), 172_800_000);
        assert_eq!(
            "1month".parse::<TimeWindow>().unwrap(),
            TimeWindow::new(1, TimeUnit::Month)
        );
        assert_eq!("3 hours".parse::<TimeWindow>().unwrap().magnitude, 3);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("m".parse::<TimeWindow>().is_err());
        assert!("10".parse::<TimeWindow>().is_err());
        assert!("10w".parse::<TimeWindow>().is_err());
        assert!("0h".parse::<TimeWindow>().is_err());
        assert!("".parse::<TimeWindow>().is_err());
    }

    #[test]
    fn test_serde_roundtrip_uses_string_form() {
        let window: TimeWindow = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(window, TimeWindow::new(15, TimeUnit::Minute));
        assert_eq!(serde_json::to_string(&window).unwrap(), "\"15m\"");
        assert!(serde_json::from_str::<TimeWindow>("\"15x\"").is_err());
    }

    #[test]
    fn test_start_of_window() {
        let window = TimeWindow::new(1, TimeUnit::Minute);
        assert_eq!(window.start(100_000), 40_000);
    }
}
