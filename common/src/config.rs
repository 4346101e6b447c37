use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value;

use crate::validation::{validate, Violation};

pub const DAY_WINDOW: &str = "day";

/// An integer setting kept exactly as written, so that negative, oversized or
/// fractional values reach validation instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawInt(Value);

impl RawInt {
    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }

    pub fn as_u8(&self) -> Option<u8> {
        self.as_i64().and_then(|value| u8::try_from(value).ok())
    }
}

impl From<u8> for RawInt {
    fn from(value: u8) -> Self {
        Self(Value::from(value))
    }
}

impl fmt::Display for RawInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
    pub duty_cycle: RawInt,
}

impl TimeWindow {
    pub fn new(start: &str, end: &str, duty_cycle: u8) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
            duty_cycle: duty_cycle.into(),
        }
    }
}

/// Named windows in precedence order.
///
/// Serialized as a JSON object; document order is kept so the first matching
/// window wins during resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSet(Vec<(String, TimeWindow)>);

impl WindowSet {
    pub fn new(windows: Vec<(String, TimeWindow)>) -> Self {
        Self(windows)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TimeWindow> {
        self.0
            .iter()
            .find(|(window_name, _)| window_name == name)
            .map(|(_, window)| window)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TimeWindow)> {
        self.0.iter().map(|(name, window)| (name.as_str(), window))
    }
}

impl FromIterator<(String, TimeWindow)> for WindowSet {
    fn from_iter<I: IntoIterator<Item = (String, TimeWindow)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for WindowSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, window) in &self.0 {
            map.serialize_entry(name, window)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for WindowSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct WindowSetVisitor;

        impl<'de> Visitor<'de> for WindowSetVisitor {
            type Value = WindowSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of window name to time window")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<WindowSet, A::Error> {
                let mut windows: Vec<(String, TimeWindow)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, window)) = access.next_entry::<String, TimeWindow>()? {
                    // Later duplicates replace earlier ones but keep the first position.
                    if let Some(slot) = windows.iter_mut().find(|(existing, _)| *existing == name)
                    {
                        slot.1 = window;
                    } else {
                        windows.push((name, window));
                    }
                }
                Ok(WindowSet(windows))
            }
        }

        deserializer.deserialize_map(WindowSetVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub gpio_pin: RawInt,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub time_windows: WindowSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimezoneConfig {
    pub name: String,
    /// Hours east of UTC.
    pub offset: f32,
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            name: "UTC".to_string(),
            offset: 0.0,
        }
    }
}

impl TimezoneConfig {
    pub fn offset_seconds(&self) -> i32 {
        (self.offset * 3600.0).round() as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub rtc_i2c_sda_pin: u8,
    pub rtc_i2c_scl_pin: u8,
    pub pwm_frequency: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            rtc_i2c_sda_pin: 20,
            rtc_i2c_scl_pin: 21,
            pwm_frequency: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub log_level: String,
    /// Seconds between scheduling ticks.
    pub update_interval: u64,
    pub server_idle_sleep_ms: u64,
    pub client_read_sleep_ms: u64,
    pub network_check_interval: u64,
    pub ram_telemetry_enabled: bool,
    pub ram_telemetry_interval: u64,
    pub web_title: String,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            update_interval: 120,
            server_idle_sleep_ms: 300,
            client_read_sleep_ms: 50,
            network_check_interval: 120,
            ram_telemetry_enabled: false,
            ram_telemetry_interval: 300,
            web_title: "PagodaLightPico".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
    pub notify_on_window_change: bool,
    pub notify_on_errors: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mqtt_broker: "broker.hivemq.com".to_string(),
            mqtt_port: 1883,
            mqtt_topic: "PagodaLightPico/notifications".to_string(),
            mqtt_client_id: "PagodaLightPico".to_string(),
            notify_on_window_change: true,
            notify_on_errors: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub timezone: TimezoneConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub system: SystemSettings,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(rename = "pwm_pins", default)]
    pub channels: BTreeMap<String, ChannelConfig>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let windows = WindowSet::new(vec![
            (
                DAY_WINDOW.to_string(),
                TimeWindow::new("sunrise", "sunset", 0),
            ),
            ("evening".to_string(), TimeWindow::new("18:00", "22:00", 60)),
            ("night".to_string(), TimeWindow::new("22:00", "05:00", 10)),
        ]);

        let mut channels = BTreeMap::new();
        channels.insert(
            "pin1".to_string(),
            ChannelConfig {
                gpio_pin: 16.into(),
                name: "Main Light".to_string(),
                enabled: true,
                time_windows: windows,
            },
        );

        Self {
            timezone: TimezoneConfig::default(),
            hardware: HardwareConfig::default(),
            system: SystemSettings::default(),
            notifications: NotificationConfig::default(),
            channels,
        }
    }
}

impl SystemConfig {
    pub fn enabled_channels(&self) -> impl Iterator<Item = (&str, &ChannelConfig)> {
        self.channels
            .iter()
            .filter(|(_, channel)| channel.enabled)
            .map(|(key, channel)| (key.as_str(), channel))
    }

    pub fn i2c_pins(&self) -> [u8; 2] {
        [self.hardware.rtc_i2c_sda_pin, self.hardware.rtc_i2c_scl_pin]
    }
}

/// Deep-merges a partial JSON update into a copy of `base`.
///
/// Objects merge key by key; any other value replaces what was there. A
/// channel's `time_windows` is replaced as a whole so windows can be removed.
/// The result is a candidate only and still has to pass validation.
pub fn merge_update(base: &SystemConfig, update: &Value) -> Result<SystemConfig, serde_json::Error> {
    let mut merged = serde_json::to_value(base)?;
    deep_merge(&mut merged, update);
    serde_json::from_value(merged)
}

fn deep_merge(base: &mut Value, update: &Value) {
    match (base, update) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                match base_map.get_mut(key) {
                    Some(existing)
                        if key != "time_windows" && existing.is_object() && value.is_object() =>
                    {
                        deep_merge(existing, value)
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, update) => *base = update.clone(),
    }
}

/// The authoritative configuration, swapped wholesale.
///
/// Readers take an `Arc` snapshot and keep it for the whole tick, so a
/// replacement never mixes two versions inside one tick.
#[derive(Debug)]
pub struct ActiveConfig {
    current: RwLock<Arc<SystemConfig>>,
}

impl ActiveConfig {
    pub fn new(initial: SystemConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<SystemConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validates `candidate` and makes it active only if no violation is found.
    pub fn replace(&self, candidate: SystemConfig) -> Result<Arc<SystemConfig>, Vec<Violation>> {
        let violations = validate(&candidate);
        if !violations.is_empty() {
            return Err(violations);
        }

        let next = Arc::new(candidate);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
        Ok(next)
    }
}
