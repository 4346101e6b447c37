use thiserror::Error;

use crate::{
    config::{ChannelConfig, SystemConfig},
    ports::{PwmError, PwmSink},
    solar::SolarTimeTable,
    types::{LocalTime, ResolvedWindow},
    validation::MAX_GPIO_PIN,
    window::{resolve, ActiveWindow, WindowError},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelSchedulingError {
    #[error("channel {channel}: {source}")]
    InvalidWindow {
        channel: String,
        #[source]
        source: WindowError,
    },
    #[error("channel {channel}: invalid gpio_pin {value}")]
    InvalidPin { channel: String, value: String },
    #[error("channel {channel}: {source}")]
    Output {
        channel: String,
        #[source]
        source: PwmError,
    },
}

impl ChannelSchedulingError {
    pub fn channel(&self) -> &str {
        match self {
            Self::InvalidWindow { channel, .. }
            | Self::InvalidPin { channel, .. }
            | Self::Output { channel, .. } => channel,
        }
    }
}

/// Result of one tick across every enabled channel.
///
/// A failing channel still gets an assignment (forced off) and its error is
/// listed separately, so sibling channels are never affected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub assignments: Vec<ResolvedWindow>,
    pub errors: Vec<ChannelSchedulingError>,
}

impl TickOutcome {
    pub fn active_count(&self) -> usize {
        self.assignments.iter().filter(|a| a.is_on()).count()
    }
}

pub struct ChannelScheduler;

impl ChannelScheduler {
    pub fn tick(config: &SystemConfig, now: &LocalTime, solar: &SolarTimeTable) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        for (key, channel) in config.enabled_channels() {
            match Self::schedule_channel(key, channel, now, solar) {
                Ok(assignment) => outcome.assignments.push(assignment),
                Err(err) => {
                    outcome.assignments.push(off(key, channel));
                    outcome.errors.push(err);
                }
            }
        }

        outcome
    }

    pub fn schedule_channel(
        key: &str,
        channel: &ChannelConfig,
        now: &LocalTime,
        solar: &SolarTimeTable,
    ) -> Result<ResolvedWindow, ChannelSchedulingError> {
        let pin = channel
            .gpio_pin
            .as_u8()
            .filter(|pin| *pin <= MAX_GPIO_PIN)
            .ok_or_else(|| ChannelSchedulingError::InvalidPin {
                channel: key.to_string(),
                value: channel.gpio_pin.to_string(),
            })?;
        let active = resolve(&channel.time_windows, now, solar).map_err(|source| {
            ChannelSchedulingError::InvalidWindow {
                channel: key.to_string(),
                source,
            }
        })?;

        Ok(match active {
            Some(window) => within(key, channel, pin, window),
            None => off(key, channel),
        })
    }

    /// Pushes every assignment to the sink.
    ///
    /// A channel whose write fails is driven to 0% (best effort) and the
    /// failure is appended to `outcome.errors`.
    pub fn apply<S: PwmSink>(sink: &mut S, outcome: &mut TickOutcome) {
        for assignment in &mut outcome.assignments {
            let key = assignment.channel_key.as_str();
            if let Err(source) = sink.set_duty_percent(key, assignment.duty_cycle) {
                let _ = sink.set_duty_percent(key, 0);
                outcome.errors.push(ChannelSchedulingError::Output {
                    channel: key.to_string(),
                    source,
                });
                *assignment = ResolvedWindow {
                    window_name: None,
                    duty_cycle: 0,
                    start: None,
                    end: None,
                    ..assignment.clone()
                };
            }
        }
    }
}

fn within(key: &str, channel: &ChannelConfig, pin: u8, window: ActiveWindow) -> ResolvedWindow {
    ResolvedWindow {
        channel_key: key.to_string(),
        channel_name: channel.name.clone(),
        gpio_pin: Some(pin),
        window_name: Some(window.name),
        duty_cycle: window.duty_cycle,
        start: Some(window.start),
        end: Some(window.end),
    }
}

fn off(key: &str, channel: &ChannelConfig) -> ResolvedWindow {
    ResolvedWindow {
        channel_key: key.to_string(),
        channel_name: channel.name.clone(),
        gpio_pin: channel.gpio_pin.as_u8(),
        window_name: None,
        duty_cycle: 0,
        start: None,
        end: None,
    }
}
