//! RP2040 (Pico W) pin facts used when choosing PWM outputs.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::SystemConfig;

pub const MAX_PIN: u8 = 28;

/// Pins wired to board functions on the Pico W.
pub const RESTRICTED_PINS: [(u8, &str); 2] = [
    (23, "SMPS mode control"),
    (24, "VBUS sense"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PwmPin {
    pub pin: u8,
    pub channel: String,
}

pub fn pin_exists(pin: u8) -> bool {
    pin <= MAX_PIN
}

pub fn restriction(pin: u8) -> Option<&'static str> {
    RESTRICTED_PINS
        .iter()
        .find(|(restricted, _)| *restricted == pin)
        .map(|(_, reason)| *reason)
}

/// Hardware PWM slice and output for a pin, e.g. `PWM0A` for GPIO 16.
pub fn pwm_channel(pin: u8) -> Option<String> {
    if !pin_exists(pin) || restriction(pin).is_some() {
        return None;
    }
    let slice = (pin / 2) % 8;
    let output = if pin % 2 == 0 { 'A' } else { 'B' };
    Some(format!("PWM{slice}{output}"))
}

/// Pins still free for a new PWM channel: not restricted, not an I2C line,
/// and not driven by an enabled channel.
pub fn available_pwm_pins(config: &SystemConfig) -> Vec<PwmPin> {
    let used: BTreeSet<u8> = config
        .i2c_pins()
        .into_iter()
        .chain(config.enabled_channels().filter_map(|(_, channel)| channel.gpio_pin.as_u8()))
        .collect();

    (0..=MAX_PIN)
        .filter(|pin| !used.contains(pin))
        .filter_map(|pin| pwm_channel(pin).map(|channel| PwmPin { pin, channel }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn maps_pins_to_pwm_slices() {
        assert_eq!(pwm_channel(0).as_deref(), Some("PWM0A"));
        assert_eq!(pwm_channel(15).as_deref(), Some("PWM7B"));
        assert_eq!(pwm_channel(16).as_deref(), Some("PWM0A"));
        assert_eq!(pwm_channel(25).as_deref(), Some("PWM4B"));
        assert_eq!(pwm_channel(28).as_deref(), Some("PWM6A"));
        assert_eq!(pwm_channel(23), None);
        assert_eq!(pwm_channel(29), None);
    }

    #[test]
    fn excludes_used_and_restricted_pins() {
        let config = SystemConfig::default();
        let pins: Vec<u8> = available_pwm_pins(&config).iter().map(|p| p.pin).collect();

        for taken in [16, 20, 21, 23, 24] {
            assert!(!pins.contains(&taken), "GPIO {taken} should not be offered");
        }
        assert!(pins.contains(&15));
        assert_eq!(pins.len(), 29 - 5);
    }

    #[test]
    fn disabled_channels_free_their_pin() {
        let mut config = SystemConfig::default();
        for channel in config.channels.values_mut() {
            channel.enabled = false;
        }

        let pins: Vec<u8> = available_pwm_pins(&config).iter().map(|p| p.pin).collect();
        assert!(pins.contains(&16));
    }
}
