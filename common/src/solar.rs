//! Sunrise/sunset lookup backed by a precomputed per-date table.
//!
//! Three source shapes are tolerated and normalised into one sorted list:
//!
//! * day map: `{"days": {"dd-mm": {"rise": "HH:MM", "set": "HH:MM"}}}`
//! * flat keys: `{"dd,mm->rise": "HH:MM", "dd,mm->set": "HH:MM"}`
//! * records: `[{"dd": 1, "mm": 1, "rise": "07:12", "set": "17:42"}]`, optionally
//!   wrapped as `{"entries": [...]}`
//!
//! Lookups never fail: a missing date falls back to the closest prior date,
//! wrapping to the end of the table, and an empty table yields
//! [`SunTimes::FALLBACK`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{ClockTime, SunTimes};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("solar data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unrecognized solar data format")]
    UnrecognizedFormat,
    #[error("invalid solar entry {key}: {reason}")]
    InvalidEntry { key: String, reason: String },
    #[error("solar data contains no entries")]
    Empty,
}

impl LoadError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEntry {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SolarEntry {
    pub month: u8,
    pub day: u8,
    pub sun: SunTimes,
}

impl SolarEntry {
    fn date_key(&self) -> (u8, u8) {
        (self.month, self.day)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SolarMeta {
    pub location: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl SolarMeta {
    fn from_value(value: &Value) -> Self {
        Self {
            location: value
                .get("location")
                .and_then(Value::as_str)
                .map(str::to_string),
            lat: value.get("lat").and_then(Value::as_f64),
            lon: value.get("lon").and_then(Value::as_f64),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiseSet {
    pub rise: Option<String>,
    pub set: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolarRecord {
    pub dd: u8,
    pub mm: u8,
    pub rise: String,
    pub set: String,
}

/// The tolerated input shapes, before normalisation.
#[derive(Debug, Clone)]
pub enum SolarSource {
    DayMap(BTreeMap<String, RiseSet>),
    FlatKeys(BTreeMap<String, String>),
    Records(Vec<SolarRecord>),
}

impl SolarSource {
    pub fn detect(value: &Value) -> Result<Self, LoadError> {
        match value {
            Value::Object(map) => {
                if let Some(Value::Object(days)) = map.get("days") {
                    let days = days
                        .iter()
                        .filter(|(_, entry)| entry.is_object())
                        .map(|(key, entry)| {
                            RiseSet::deserialize(entry)
                                .map(|rise_set| (key.clone(), rise_set))
                                .map_err(|err| LoadError::invalid(key, err.to_string()))
                        })
                        .collect::<Result<_, _>>()?;
                    return Ok(Self::DayMap(days));
                }

                if map.keys().any(|key| key.contains("->rise")) {
                    let flat = map
                        .iter()
                        .filter(|(key, _)| key.contains("->rise") || key.contains("->set"))
                        .map(|(key, entry)| match entry.as_str() {
                            Some(time) => Ok((key.clone(), time.to_string())),
                            None => Err(LoadError::invalid(key, "expected an HH:MM string")),
                        })
                        .collect::<Result<_, _>>()?;
                    return Ok(Self::FlatKeys(flat));
                }

                match map.get("entries") {
                    Some(entries @ Value::Array(_)) => Self::records(entries),
                    _ => Err(LoadError::UnrecognizedFormat),
                }
            }
            Value::Array(_) => Self::records(value),
            _ => Err(LoadError::UnrecognizedFormat),
        }
    }

    fn records(value: &Value) -> Result<Self, LoadError> {
        Vec::<SolarRecord>::deserialize(value)
            .map(Self::Records)
            .map_err(|err| LoadError::invalid("entries", err.to_string()))
    }

    pub fn into_entries(self) -> Result<Vec<SolarEntry>, LoadError> {
        match self {
            Self::DayMap(days) => {
                let mut entries = Vec::with_capacity(days.len());
                for (key, rise_set) in days {
                    let normalized = key.replace(['/', ','], "-");
                    let Some((day, month)) = split_date(&normalized, '-') else {
                        continue;
                    };
                    let (rise, set) = match (rise_set.rise, rise_set.set) {
                        (Some(rise), Some(set)) => (rise, set),
                        _ => return Err(LoadError::invalid(key, "missing rise or set")),
                    };
                    entries.push(entry(&key, day, month, &rise, &set)?);
                }
                Ok(entries)
            }
            Self::FlatKeys(flat) => {
                let mut pending: BTreeMap<(String, String), (Option<String>, Option<String>)> =
                    BTreeMap::new();
                for (key, time) in flat {
                    let Some((date, kind)) = key.split_once("->") else {
                        continue;
                    };
                    let normalized = date.trim().replace('/', ",");
                    let Some((day, month)) = split_date(&normalized, ',') else {
                        continue;
                    };
                    let slot = pending
                        .entry((day.to_string(), month.to_string()))
                        .or_default();
                    if kind.contains("rise") {
                        slot.0 = Some(time);
                    } else {
                        slot.1 = Some(time);
                    }
                }

                pending
                    .into_iter()
                    .map(|((day, month), times)| {
                        let key = format!("{day},{month}");
                        match times {
                            (Some(rise), Some(set)) => entry(&key, &day, &month, &rise, &set),
                            _ => Err(LoadError::invalid(key, "missing rise or set")),
                        }
                    })
                    .collect()
            }
            Self::Records(records) => records
                .into_iter()
                .map(|record| {
                    let key = format!("{}-{}", record.dd, record.mm);
                    entry(
                        &key,
                        &record.dd.to_string(),
                        &record.mm.to_string(),
                        &record.rise,
                        &record.set,
                    )
                })
                .collect(),
        }
    }
}

fn split_date(value: &str, separator: char) -> Option<(&str, &str)> {
    let mut parts = value.split(separator);
    let day = parts.next()?;
    let month = parts.next()?;
    parts.next().is_none().then_some((day.trim(), month.trim()))
}

fn entry(key: &str, day: &str, month: &str, rise: &str, set: &str) -> Result<SolarEntry, LoadError> {
    let day: u8 = day
        .parse()
        .map_err(|_| LoadError::invalid(key, format!("invalid day {day:?}")))?;
    let month: u8 = month
        .parse()
        .map_err(|_| LoadError::invalid(key, format!("invalid month {month:?}")))?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(LoadError::invalid(key, "date out of range"));
    }

    let sunrise: ClockTime = rise
        .parse()
        .map_err(|err| LoadError::invalid(key, format!("sunrise: {err}")))?;
    let sunset: ClockTime = set
        .parse()
        .map_err(|err| LoadError::invalid(key, format!("sunset: {err}")))?;

    Ok(SolarEntry {
        month,
        day,
        sun: SunTimes { sunrise, sunset },
    })
}

#[derive(Debug, Clone, Default)]
pub struct SolarTimeTable {
    entries: Vec<SolarEntry>,
    meta: SolarMeta,
}

impl SolarTimeTable {
    pub fn load(raw: &[u8]) -> Result<Self, LoadError> {
        let value: Value = serde_json::from_slice(raw)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, LoadError> {
        let source = SolarSource::detect(value)?;
        let mut table = Self::from_entries(source.into_entries()?)?;
        table.meta = SolarMeta::from_value(value);
        Ok(table)
    }

    pub fn from_entries(mut entries: Vec<SolarEntry>) -> Result<Self, LoadError> {
        if entries.is_empty() {
            return Err(LoadError::Empty);
        }
        // Stable: duplicate dates keep their source order.
        entries.sort_by_key(SolarEntry::date_key);
        Ok(Self {
            entries,
            meta: SolarMeta::default(),
        })
    }

    pub fn entries(&self) -> &[SolarEntry] {
        &self.entries
    }

    pub fn meta(&self) -> &SolarMeta {
        &self.meta
    }

    pub fn is_loaded(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Sun times of the last entry on or before `(month, day)`.
    pub fn lookup(&self, month: u8, day: u8) -> SunTimes {
        let Some(last) = self.entries.last() else {
            return SunTimes::FALLBACK;
        };

        let target = (month, day);
        let after = self
            .entries
            .partition_point(|entry| entry.date_key() <= target);

        match after.checked_sub(1) {
            Some(index) => self.entries[index].sun,
            // Earlier than every entry: belongs to the previous year's tail.
            None => last.sun,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sun(rise_h: u8, rise_m: u8, set_h: u8, set_m: u8) -> SunTimes {
        SunTimes::from_parts(rise_h, rise_m, set_h, set_m).unwrap()
    }

    #[test]
    fn empty_table_uses_fallback_for_every_date() {
        let table = SolarTimeTable::default();
        for (month, day) in [(1, 1), (6, 21), (12, 31), (0, 0), (13, 40)] {
            assert_eq!(table.lookup(month, day).as_tuple(), (6, 30, 18, 30));
        }
    }

    #[test]
    fn malformed_sources_fail_to_load() {
        assert!(matches!(
            SolarTimeTable::load(b"not json"),
            Err(LoadError::Json(_))
        ));
        assert!(matches!(
            SolarTimeTable::from_value(&json!({"foo": "bar"})),
            Err(LoadError::UnrecognizedFormat)
        ));
        assert!(matches!(
            SolarTimeTable::from_value(&json!(42)),
            Err(LoadError::UnrecognizedFormat)
        ));
        assert!(matches!(
            SolarTimeTable::from_value(&json!([])),
            Err(LoadError::Empty)
        ));
        assert!(matches!(
            SolarTimeTable::from_value(&json!({"days": {"xx-01": {"rise": "07:00", "set": "17:00"}}})),
            Err(LoadError::InvalidEntry { .. })
        ));
        assert!(matches!(
            SolarTimeTable::from_value(&json!([{"dd": 1, "mm": 13, "rise": "07:00", "set": "17:00"}])),
            Err(LoadError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn finds_nearest_prior_date() {
        let table = SolarTimeTable::from_value(&json!([
            {"dd": 6, "mm": 1, "rise": "07:10", "set": "17:40"},
            {"dd": 1, "mm": 1, "rise": "07:15", "set": "17:35"}
        ]))
        .unwrap();

        assert_eq!(table.lookup(1, 3), sun(7, 15, 17, 35));
        assert_eq!(table.lookup(1, 6), sun(7, 10, 17, 40));
        assert_eq!(table.lookup(1, 10), sun(7, 10, 17, 40));
    }

    #[test]
    fn wraps_to_last_entry_before_first_date() {
        let table = SolarTimeTable::from_value(&json!({"entries": [
            {"dd": 1, "mm": 3, "rise": "06:40", "set": "18:20"},
            {"dd": 1, "mm": 11, "rise": "06:55", "set": "17:30"}
        ]}))
        .unwrap();

        assert_eq!(table.lookup(1, 15), sun(6, 55, 17, 30));
        assert_eq!(table.lookup(12, 31), sun(6, 55, 17, 30));
        assert_eq!(table.lookup(3, 1), sun(6, 40, 18, 20));
    }

    #[test]
    fn compares_month_before_day() {
        let table = SolarTimeTable::from_value(&json!([
            {"dd": 28, "mm": 1, "rise": "07:05", "set": "17:55"},
            {"dd": 2, "mm": 2, "rise": "07:00", "set": "18:00"}
        ]))
        .unwrap();

        assert_eq!(table.lookup(2, 1), sun(7, 5, 17, 55));
        assert_eq!(table.lookup(2, 2), sun(7, 0, 18, 0));
    }

    #[test]
    fn parses_day_map_with_metadata() {
        let table = SolarTimeTable::from_value(&json!({
            "location": "Leh",
            "lat": 34.15,
            "lon": 77.58,
            "days": {
                "15-06": {"rise": "04:58", "set": "19:29"},
                "01/01": {"rise": "07:36", "set": "17:20"},
                "bogus": {"rise": "00:00", "set": "00:00"},
                "note": "ignored"
            }
        }))
        .unwrap();

        assert_eq!(
            table
                .entries()
                .iter()
                .map(|entry| (entry.month, entry.day))
                .collect::<Vec<_>>(),
            vec![(1, 1), (6, 15)]
        );
        assert_eq!(table.meta().location.as_deref(), Some("Leh"));
        assert_eq!(table.meta().lat, Some(34.15));
        assert_eq!(table.lookup(7, 1), sun(4, 58, 19, 29));
    }

    #[test]
    fn parses_flat_keys() {
        let table = SolarTimeTable::from_value(&json!({
            "1,1->rise": "07:36",
            "1,1->set": "17:20",
            "8,1->rise": "07:37",
            "8,1->set": "17:27",
            "location": "Leh"
        }))
        .unwrap();

        assert_eq!(table.entries().len(), 2);
        assert_eq!(table.lookup(1, 9), sun(7, 37, 17, 27));
    }

    #[test]
    fn flat_key_without_set_is_rejected() {
        let result = SolarTimeTable::from_value(&json!({"1,1->rise": "07:36"}));
        assert!(matches!(result, Err(LoadError::InvalidEntry { .. })));
    }

    #[test]
    fn duplicate_dates_keep_source_order() {
        let table = SolarTimeTable::from_value(&json!([
            {"dd": 1, "mm": 1, "rise": "07:00", "set": "17:00"},
            {"dd": 1, "mm": 1, "rise": "08:00", "set": "16:00"}
        ]))
        .unwrap();

        assert_eq!(table.entries()[0].sun, sun(7, 0, 17, 0));
        assert_eq!(table.entries()[1].sun, sun(8, 0, 16, 0));
        assert_eq!(table.lookup(1, 1), sun(8, 0, 16, 0));
        assert_eq!(table.lookup(1, 2), sun(8, 0, 16, 0));
    }
}
