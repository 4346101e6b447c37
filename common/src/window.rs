use serde::Serialize;
use thiserror::Error;

use crate::{
    config::{TimeWindow, WindowSet, DAY_WINDOW},
    solar::SolarTimeTable,
    types::{ClockTime, LocalTime, SunTimes, TimeParseError, TimeSpec},
    validation::MAX_DUTY_CYCLE,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("window {window} has invalid {field} time: {source}")]
    Boundary {
        window: String,
        field: &'static str,
        #[source]
        source: TimeParseError,
    },
    #[error("window {window} has invalid duty cycle {value}")]
    DutyCycle { window: String, value: String },
}

/// A window with its boundaries resolved for one particular day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveWindow {
    pub name: String,
    pub start: ClockTime,
    pub end: ClockTime,
    pub duty_cycle: u8,
}

impl ActiveWindow {
    pub fn contains(&self, minutes: u16) -> bool {
        let start = self.start.minutes();
        let end = self.end.minutes();

        if start <= end {
            start <= minutes && minutes < end
        } else {
            // Crosses midnight.
            minutes >= start || minutes < end
        }
    }
}

/// Resolves every window of a channel for the given day, in precedence order.
///
/// The `day` window always spans sunrise to sunset; any other window may use
/// `sunrise`/`sunset` tokens or literal `HH:MM` boundaries. A single malformed
/// window fails the whole set, even if an earlier window would have matched.
pub fn resolve_day(windows: &WindowSet, sun: SunTimes) -> Result<Vec<ActiveWindow>, WindowError> {
    windows
        .iter()
        .map(|(name, window)| {
            let (start, end) = if name == DAY_WINDOW {
                (sun.sunrise, sun.sunset)
            } else {
                (
                    boundary(name, "start", &window.start, sun)?,
                    boundary(name, "end", &window.end, sun)?,
                )
            };

            Ok(ActiveWindow {
                name: name.to_string(),
                start,
                end,
                duty_cycle: duty_cycle(name, window)?,
            })
        })
        .collect()
}

/// The first window, in precedence order, that covers `now`.
pub fn resolve(
    windows: &WindowSet,
    now: &LocalTime,
    solar: &SolarTimeTable,
) -> Result<Option<ActiveWindow>, WindowError> {
    let sun = solar.lookup(now.month, now.day);
    let minutes = now.minutes_since_midnight();

    Ok(resolve_day(windows, sun)?
        .into_iter()
        .find(|window| window.contains(minutes)))
}

fn boundary(
    window: &str,
    field: &'static str,
    raw: &str,
    sun: SunTimes,
) -> Result<ClockTime, WindowError> {
    raw.parse::<TimeSpec>()
        .map(|spec| spec.resolve(sun))
        .map_err(|source| WindowError::Boundary {
            window: window.to_string(),
            field,
            source,
        })
}

fn duty_cycle(name: &str, window: &TimeWindow) -> Result<u8, WindowError> {
    window
        .duty_cycle
        .as_u8()
        .filter(|duty| *duty <= MAX_DUTY_CYCLE)
        .ok_or_else(|| WindowError::DutyCycle {
            window: name.to_string(),
            value: window.duty_cycle.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solar::SolarEntry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn at(hour: u8, minute: u8) -> LocalTime {
        LocalTime {
            year: 2026,
            month: 1,
            day: 1,
            hour,
            minute,
            second: 0,
            weekday: 4,
        }
    }

    fn time(hour: u8, minute: u8) -> ClockTime {
        ClockTime::new(hour, minute).unwrap()
    }

    fn solar(rise_h: u8, rise_m: u8, set_h: u8, set_m: u8) -> SolarTimeTable {
        SolarTimeTable::from_entries(vec![SolarEntry {
            month: 1,
            day: 1,
            sun: SunTimes::from_parts(rise_h, rise_m, set_h, set_m).unwrap(),
        }])
        .unwrap()
    }

    fn windows(entries: Vec<(&str, TimeWindow)>) -> WindowSet {
        entries
            .into_iter()
            .map(|(name, window)| (name.to_string(), window))
            .collect()
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let set = windows(vec![("night", TimeWindow::new("22:00", "06:00", 40))]);
        let table = SolarTimeTable::default();

        let late = resolve(&set, &at(23, 30), &table).unwrap().unwrap();
        assert_eq!(late.name, "night");
        assert_eq!(late.duty_cycle, 40);

        assert!(resolve(&set, &at(5, 0), &table).unwrap().is_some());
        assert!(resolve(&set, &at(6, 0), &table).unwrap().is_none());
        assert!(resolve(&set, &at(12, 0), &table).unwrap().is_none());
    }

    #[test]
    fn day_window_uses_solar_boundaries() {
        let set = windows(vec![
            ("day", TimeWindow::new("00:00", "00:01", 0)),
            ("night", TimeWindow::new("20:00", "05:00", 30)),
        ]);

        let active = resolve(&set, &at(12, 0), &solar(6, 15, 18, 45))
            .unwrap()
            .unwrap();

        assert_eq!(
            active,
            ActiveWindow {
                name: "day".to_string(),
                start: time(6, 15),
                end: time(18, 45),
                duty_cycle: 0,
            }
        );
    }

    #[test]
    fn day_window_end_is_exclusive() {
        let set = windows(vec![
            ("day", TimeWindow::new("sunrise", "sunset", 0)),
            ("evening", TimeWindow::new("sunset", "22:00", 70)),
        ]);
        let table = solar(6, 15, 18, 45);

        let at_sunset = resolve(&set, &at(18, 45), &table).unwrap().unwrap();
        assert_eq!(at_sunset.name, "evening");
        assert_eq!(at_sunset.start, time(18, 45));
        assert_eq!(at_sunset.end, time(22, 0));

        let before_sunrise = resolve(&set, &at(6, 14), &table).unwrap();
        assert_eq!(before_sunrise, None);
    }

    #[test]
    fn first_matching_window_wins() {
        let set = windows(vec![
            ("day", TimeWindow::new("sunrise", "sunset", 0)),
            ("reading", TimeWindow::new("19:00", "21:00", 80)),
            ("evening", TimeWindow::new("18:00", "23:00", 50)),
        ]);

        let active = resolve(&set, &at(20, 0), &solar(6, 0, 18, 0))
            .unwrap()
            .unwrap();
        assert_eq!(active.name, "reading");

        let reordered = windows(vec![
            ("evening", TimeWindow::new("18:00", "23:00", 50)),
            ("reading", TimeWindow::new("19:00", "21:00", 80)),
            ("day", TimeWindow::new("sunrise", "sunset", 0)),
        ]);
        let active = resolve(&reordered, &at(20, 0), &solar(6, 0, 18, 0))
            .unwrap()
            .unwrap();
        assert_eq!(active.name, "evening");
    }

    #[test]
    fn end_at_midnight_takes_overnight_branch() {
        let window = ActiveWindow {
            name: "late".to_string(),
            start: time(20, 0),
            end: ClockTime::MIDNIGHT,
            duty_cycle: 20,
        };

        assert!(window.contains(20 * 60));
        assert!(window.contains(23 * 60 + 59));
        assert!(!window.contains(0));
        assert!(!window.contains(12 * 60));
    }

    #[test]
    fn empty_window_never_matches() {
        let window = ActiveWindow {
            name: "none".to_string(),
            start: time(8, 0),
            end: time(8, 0),
            duty_cycle: 20,
        };

        assert!(!window.contains(8 * 60));
    }

    #[test]
    fn bad_later_window_fails_even_when_an_earlier_one_matches() {
        let valid = windows(vec![("day", TimeWindow::new("sunrise", "sunset", 0))]);
        let table = SolarTimeTable::default();
        assert!(resolve(&valid, &at(12, 0), &table).unwrap().is_some());

        let set = windows(vec![
            ("day", TimeWindow::new("sunrise", "sunset", 0)),
            ("night", TimeWindow::new("22:00", "6am", 30)),
        ]);

        assert_eq!(
            resolve(&set, &at(12, 0), &table),
            Err(WindowError::Boundary {
                window: "night".to_string(),
                field: "end",
                source: TimeParseError::Format("6am".to_string()),
            })
        );
    }

    #[test]
    fn out_of_range_duty_cycle_is_an_error() {
        let set: WindowSet = serde_json::from_value(json!({
            "day": {"start": "sunrise", "end": "sunset", "duty_cycle": 0},
            "night": {"start": "22:00", "end": "06:00", "duty_cycle": 300}
        }))
        .unwrap();

        assert_eq!(
            resolve(&set, &at(23, 0), &SolarTimeTable::default()),
            Err(WindowError::DutyCycle {
                window: "night".to_string(),
                value: "300".to_string(),
            })
        );
    }
}
