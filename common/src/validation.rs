//! Structural and range checks a configuration must pass before it may drive
//! the scheduler. `validate` never short-circuits: every problem is reported
//! so an operator can fix them in one pass.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::{
    config::{ChannelConfig, SystemConfig, TimeWindow, DAY_WINDOW},
    types::{LogLevel, TimeSpec},
};

pub const MAX_GPIO_PIN: u8 = 28;
pub const MIN_WINDOWS: usize = 2;
pub const MAX_WINDOWS: usize = 5;
pub const MIN_ENABLED_CHANNELS: usize = 1;
pub const MAX_ENABLED_CHANNELS: usize = 5;
pub const MAX_DUTY_CYCLE: u8 = 100;
pub const MAX_PWM_FREQUENCY: u32 = 40_000_000;

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    #[error("PWM pin {channel} gpio_pin must be an integer, found {value}")]
    GpioNotInteger { channel: String, value: String },

    #[error("PWM pin {channel} gpio_pin {pin} must be between 0 and 28")]
    GpioOutOfRange { channel: String, pin: i64 },

    #[error("GPIO pin {pin} used multiple times (channel {channel})")]
    DuplicateGpio { channel: String, pin: u8 },

    #[error("GPIO pin {pin} of channel {channel} conflicts with I2C pins")]
    GpioConflictsWithI2c { channel: String, pin: u8 },

    #[error("PWM pin {channel} missing name")]
    MissingName { channel: String },

    #[error("PWM pin {channel} must have 2-5 time windows, found {count}")]
    WindowCount { channel: String, count: usize },

    #[error("PWM pin {channel} must have 'day' time window")]
    MissingDayWindow { channel: String },

    #[error("Invalid time format for {channel}.{window}.{field}: {value:?}")]
    InvalidTime {
        channel: String,
        window: String,
        field: &'static str,
        value: String,
    },

    #[error("Duty cycle for {channel}.{window} must be an integer, found {value}")]
    DutyCycleNotInteger {
        channel: String,
        window: String,
        value: String,
    },

    #[error("Duty cycle for {channel}.{window} must be between 0 and 100, found {value}")]
    DutyCycleOutOfRange {
        channel: String,
        window: String,
        value: i64,
    },

    #[error("Between 1 and 5 PWM pins must be enabled, found {count}")]
    EnabledChannelCount { count: usize },

    #[error("{name} must be between 0 and 28, found {pin}")]
    I2cPinOutOfRange { name: &'static str, pin: u8 },

    #[error("Timezone offset must be between -12 and +14 hours, found {offset}")]
    TimezoneOffset { offset: f32 },

    #[error("Update interval must be a positive integer")]
    UpdateInterval { value: u64 },

    #[error("PWM frequency must be between 1 Hz and 40 MHz, found {value}")]
    PwmFrequency { value: u32 },

    #[error("Log level must be one of: FATAL, ERROR, WARN, INFO, DEBUG (found {value:?})")]
    LogLevel { value: String },

    #[error("system.{field} must be {min}..{max}, found {value}")]
    SettingOutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

pub fn validate(config: &SystemConfig) -> Vec<Violation> {
    let mut violations = Vec::new();

    validate_channels(config, &mut violations);
    validate_settings(config, &mut violations);

    violations
}

fn validate_channels(config: &SystemConfig, violations: &mut Vec<Violation>) {
    let i2c_pins = config.i2c_pins();
    let mut used_pins = BTreeSet::new();
    let mut enabled = 0usize;

    for (key, channel) in config.enabled_channels() {
        enabled += 1;

        match channel.gpio_pin.as_i64() {
            None => violations.push(Violation::GpioNotInteger {
                channel: key.to_string(),
                value: channel.gpio_pin.to_string(),
            }),
            Some(pin) if !(0..=i64::from(MAX_GPIO_PIN)).contains(&pin) => {
                violations.push(Violation::GpioOutOfRange {
                    channel: key.to_string(),
                    pin,
                })
            }
            Some(_) => {}
        }
        if let Some(pin) = channel.gpio_pin.as_u8() {
            if !used_pins.insert(pin) {
                violations.push(Violation::DuplicateGpio {
                    channel: key.to_string(),
                    pin,
                });
            }
            if i2c_pins.contains(&pin) {
                violations.push(Violation::GpioConflictsWithI2c {
                    channel: key.to_string(),
                    pin,
                });
            }
        }
        if channel.name.trim().is_empty() {
            violations.push(Violation::MissingName {
                channel: key.to_string(),
            });
        }

        validate_windows(key, channel, violations);
    }

    if !(MIN_ENABLED_CHANNELS..=MAX_ENABLED_CHANNELS).contains(&enabled) {
        violations.push(Violation::EnabledChannelCount { count: enabled });
    }
}

fn validate_windows(key: &str, channel: &ChannelConfig, violations: &mut Vec<Violation>) {
    let windows = &channel.time_windows;

    if !(MIN_WINDOWS..=MAX_WINDOWS).contains(&windows.len()) {
        violations.push(Violation::WindowCount {
            channel: key.to_string(),
            count: windows.len(),
        });
    }
    if !windows.contains(DAY_WINDOW) {
        violations.push(Violation::MissingDayWindow {
            channel: key.to_string(),
        });
    }

    for (name, window) in windows.iter() {
        check_boundary(key, name, "start", &window.start, violations);
        check_boundary(key, name, "end", &window.end, violations);
        check_duty_cycle(key, name, window, violations);
    }
}

fn check_boundary(
    channel: &str,
    window: &str,
    field: &'static str,
    value: &str,
    violations: &mut Vec<Violation>,
) {
    if value.parse::<TimeSpec>().is_err() {
        violations.push(Violation::InvalidTime {
            channel: channel.to_string(),
            window: window.to_string(),
            field,
            value: value.to_string(),
        });
    }
}

fn check_duty_cycle(
    channel: &str,
    name: &str,
    window: &TimeWindow,
    violations: &mut Vec<Violation>,
) {
    match window.duty_cycle.as_i64() {
        None => violations.push(Violation::DutyCycleNotInteger {
            channel: channel.to_string(),
            window: name.to_string(),
            value: window.duty_cycle.to_string(),
        }),
        Some(value) if !(0..=i64::from(MAX_DUTY_CYCLE)).contains(&value) => {
            violations.push(Violation::DutyCycleOutOfRange {
                channel: channel.to_string(),
                window: name.to_string(),
                value,
            })
        }
        Some(_) => {}
    }
}

fn validate_settings(config: &SystemConfig, violations: &mut Vec<Violation>) {
    let hardware = &config.hardware;
    for (name, pin) in [
        ("rtc_i2c_sda_pin", hardware.rtc_i2c_sda_pin),
        ("rtc_i2c_scl_pin", hardware.rtc_i2c_scl_pin),
    ] {
        if pin > MAX_GPIO_PIN {
            violations.push(Violation::I2cPinOutOfRange { name, pin });
        }
    }

    let offset = config.timezone.offset;
    if !offset.is_finite() || !(-12.0..=14.0).contains(&offset) {
        violations.push(Violation::TimezoneOffset { offset });
    }

    if !(1..=MAX_PWM_FREQUENCY).contains(&hardware.pwm_frequency) {
        violations.push(Violation::PwmFrequency {
            value: hardware.pwm_frequency,
        });
    }

    let system = &config.system;
    if LogLevel::parse(&system.log_level).is_none() {
        violations.push(Violation::LogLevel {
            value: system.log_level.clone(),
        });
    }
    if system.update_interval == 0 {
        violations.push(Violation::UpdateInterval {
            value: system.update_interval,
        });
    }

    for (field, value, min, max) in [
        ("network_check_interval", system.network_check_interval, 10, 3_600),
        ("server_idle_sleep_ms", system.server_idle_sleep_ms, 50, 5_000),
        ("client_read_sleep_ms", system.client_read_sleep_ms, 10, 2_000),
        ("ram_telemetry_interval", system.ram_telemetry_interval, 10, 86_400),
    ] {
        if !(min..=max).contains(&value) {
            violations.push(Violation::SettingOutOfRange {
                field,
                value,
                min,
                max,
            });
        }
    }
}
