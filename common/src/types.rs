use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    #[error("expected HH:MM, got {0:?}")]
    Format(String),
    #[error("time {0:?} out of range (00:00-23:59)")]
    OutOfRange(String),
}

/// Wall-clock time of day with minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    pub const MIDNIGHT: Self = Self { hour: 0, minute: 0 };

    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn minutes(self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ClockTime {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let Some((hour, minute)) = trimmed.split_once(':') else {
            return Err(TimeParseError::Format(s.to_string()));
        };
        let (Ok(hour), Ok(minute)) = (hour.parse::<u8>(), minute.parse::<u8>()) else {
            return Err(TimeParseError::Format(s.to_string()));
        };
        Self::new(hour, minute).ok_or_else(|| TimeParseError::OutOfRange(s.to_string()))
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A window boundary as written in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    At(ClockTime),
    Sunrise,
    Sunset,
}

impl TimeSpec {
    pub fn resolve(self, sun: SunTimes) -> ClockTime {
        match self {
            Self::At(time) => time,
            Self::Sunrise => sun.sunrise,
            Self::Sunset => sun.sunset,
        }
    }
}

impl FromStr for TimeSpec {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sunrise" => Ok(Self::Sunrise),
            "sunset" => Ok(Self::Sunset),
            _ => s.parse().map(Self::At),
        }
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(time) => time.fmt(f),
            Self::Sunrise => f.write_str("sunrise"),
            Self::Sunset => f.write_str("sunset"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SunTimes {
    pub sunrise: ClockTime,
    pub sunset: ClockTime,
}

impl SunTimes {
    /// Used whenever no solar table is available.
    pub const FALLBACK: Self = Self {
        sunrise: ClockTime { hour: 6, minute: 30 },
        sunset: ClockTime { hour: 18, minute: 30 },
    };

    pub fn from_parts(rise_h: u8, rise_m: u8, set_h: u8, set_m: u8) -> Option<Self> {
        Some(Self {
            sunrise: ClockTime::new(rise_h, rise_m)?,
            sunset: ClockTime::new(set_h, set_m)?,
        })
    }

    pub fn as_tuple(self) -> (u8, u8, u8, u8) {
        (
            self.sunrise.hour(),
            self.sunrise.minute(),
            self.sunset.hour(),
            self.sunset.minute(),
        )
    }
}

/// Local calendar time as reported by the clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// 1 = Monday .. 7 = Sunday
    pub weekday: u8,
}

impl LocalTime {
    pub fn from_chrono(now: DateTime<FixedOffset>) -> Self {
        Self {
            year: now.year(),
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
            weekday: now.weekday().number_from_monday() as u8,
        }
    }

    pub fn minutes_since_midnight(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }

    pub fn date_string(&self) -> String {
        format!("{:02}/{:02}/{}", self.day, self.month, self.year)
    }

    pub fn time_string(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        Self::Fatal,
        Self::Error,
        Self::Warn,
        Self::Info,
        Self::Debug,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fatal => "FATAL",
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == value)
    }
}

/// Outcome of one scheduling tick for a single channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedWindow {
    pub channel_key: String,
    pub channel_name: String,
    pub gpio_pin: Option<u8>,
    pub window_name: Option<String>,
    pub duty_cycle: u8,
    pub start: Option<ClockTime>,
    pub end: Option<ClockTime>,
}

impl ResolvedWindow {
    pub fn is_on(&self) -> bool {
        self.duty_cycle > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_clock_times() {
        assert_eq!("06:15".parse::<ClockTime>(), Ok(ClockTime::new(6, 15).unwrap()));
        assert_eq!("6:05".parse::<ClockTime>().unwrap().minutes(), 365);
        assert!(matches!(
            "24:00".parse::<ClockTime>(),
            Err(TimeParseError::OutOfRange(_))
        ));
        assert!(matches!(
            "12:60".parse::<ClockTime>(),
            Err(TimeParseError::OutOfRange(_))
        ));
        assert!(matches!(
            "noon".parse::<ClockTime>(),
            Err(TimeParseError::Format(_))
        ));
        assert!(matches!(
            "12-30".parse::<ClockTime>(),
            Err(TimeParseError::Format(_))
        ));
    }

    #[test]
    fn formats_with_leading_zeros() {
        assert_eq!(ClockTime::new(7, 5).unwrap().to_string(), "07:05");
        assert_eq!(
            serde_json::to_string(&ClockTime::new(18, 45).unwrap()).unwrap(),
            "\"18:45\""
        );
    }

    #[test]
    fn parses_symbolic_time_specs() {
        assert_eq!("sunrise".parse::<TimeSpec>(), Ok(TimeSpec::Sunrise));
        assert_eq!("Sunset".parse::<TimeSpec>(), Ok(TimeSpec::Sunset));
        assert_eq!(
            "22:00".parse::<TimeSpec>(),
            Ok(TimeSpec::At(ClockTime::new(22, 0).unwrap()))
        );
        assert!("dusk".parse::<TimeSpec>().is_err());
    }

    #[test]
    fn converts_chrono_time_with_iso_weekday() {
        let now = FixedOffset::east_opt(19_800)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 4, 23, 30, 12)
            .unwrap();
        let local = LocalTime::from_chrono(now);

        // Jan 4, 2026 is a Sunday.
        assert_eq!(local.weekday, 7);
        assert_eq!(local.minutes_since_midnight(), 23 * 60 + 30);
        assert_eq!(local.date_string(), "04/01/2026");
        assert_eq!(local.time_string(), "23:30:12");
    }

    #[test]
    fn log_levels_are_uppercase_only() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("warn"), None);
        assert_eq!(LogLevel::parse("TRACE"), None);
    }
}
