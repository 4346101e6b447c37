use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    config::{NotificationConfig, DAY_WINDOW},
    schedule::TickOutcome,
    topics::{CATEGORY_CONFIG, CATEGORY_ERROR, CATEGORY_SYSTEM, CATEGORY_WINDOW_CHANGE},
    types::{ClockTime, LocalTime, ResolvedWindow},
};

/// An event worth telling the operator about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    WindowChange {
        channel: String,
        channel_name: String,
        window: Option<String>,
        duty_cycle: u8,
        start_time: Option<ClockTime>,
        end_time: Option<ClockTime>,
        message: String,
    },
    Error {
        channel: Option<String>,
        message: String,
        severity: &'static str,
    },
    ConfigUpdate {
        message: String,
    },
    SystemStartup {
        message: String,
    },
}

impl Notification {
    pub fn window_change(assignment: &ResolvedWindow) -> Self {
        let description = match (assignment.window_name.as_deref(), assignment.duty_cycle) {
            (Some(DAY_WINDOW), _) => "Day (sunrise to sunset)",
            (_, 0) => "Lights off",
            _ => "Lighting",
        };

        Self::WindowChange {
            channel: assignment.channel_key.clone(),
            channel_name: assignment.channel_name.clone(),
            window: assignment.window_name.clone(),
            duty_cycle: assignment.duty_cycle,
            start_time: assignment.start,
            end_time: assignment.end,
            message: format!(
                "{}: {description} - {}% brightness",
                assignment.channel_name, assignment.duty_cycle
            ),
        }
    }

    pub fn error(channel: Option<&str>, detail: impl std::fmt::Display) -> Self {
        Self::Error {
            channel: channel.map(str::to_string),
            message: format!("PagodaLight error: {detail}"),
            severity: "error",
        }
    }

    pub fn config_update() -> Self {
        Self::ConfigUpdate {
            message: "Configuration updated via web interface".to_string(),
        }
    }

    pub fn system_startup() -> Self {
        Self::SystemStartup {
            message: "PagodaLight system started".to_string(),
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::WindowChange { .. } => CATEGORY_WINDOW_CHANGE,
            Self::Error { .. } => CATEGORY_ERROR,
            Self::ConfigUpdate { .. } => CATEGORY_CONFIG,
            Self::SystemStartup { .. } => CATEGORY_SYSTEM,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::WindowChange { message, .. }
            | Self::Error { message, .. }
            | Self::ConfigUpdate { message }
            | Self::SystemStartup { message } => message,
        }
    }
}

/// Wire form of a notification: the event fields plus sender metadata.
#[derive(Debug, Serialize)]
pub struct NotificationPayload<'a> {
    #[serde(flatten)]
    pub notification: &'a Notification,
    pub timestamp: i64,
    pub device: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub uptime_seconds: u64,
    pub uptime: String,
    pub total_updates: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_update: Option<LocalTime>,
    pub active_channels: usize,
    pub channels: Vec<ResolvedWindow>,
}

/// Remembers what the previous tick decided so that only changes are
/// reported.
#[derive(Debug, Default)]
pub struct StatusTracker {
    channels: BTreeMap<String, ResolvedWindow>,
    total_updates: u64,
    error_count: u64,
    last_error: Option<String>,
    last_update: Option<LocalTime>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(
        &mut self,
        outcome: &TickOutcome,
        now: &LocalTime,
        prefs: &NotificationConfig,
    ) -> Vec<Notification> {
        let mut notifications = Vec::new();

        self.total_updates += 1;
        self.last_update = Some(*now);
        self.channels
            .retain(|key, _| outcome.assignments.iter().any(|a| &a.channel_key == key));

        for assignment in &outcome.assignments {
            let changed = self
                .channels
                .get(&assignment.channel_key)
                .map_or(true, |previous| previous.window_name != assignment.window_name);

            if changed && prefs.notify_on_window_change {
                notifications.push(Notification::window_change(assignment));
            }
            self.channels
                .insert(assignment.channel_key.clone(), assignment.clone());
        }

        for err in &outcome.errors {
            self.record_error(err.to_string());
            if prefs.notify_on_errors {
                notifications.push(Notification::error(Some(err.channel()), err));
            }
        }

        notifications
    }

    pub fn record_error(&mut self, message: String) {
        self.error_count += 1;
        self.last_error = Some(message);
    }

    pub fn channel(&self, key: &str) -> Option<&ResolvedWindow> {
        self.channels.get(key)
    }

    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn report(&self, uptime_seconds: u64) -> StatusReport {
        let channels: Vec<ResolvedWindow> = self.channels.values().cloned().collect();
        StatusReport {
            uptime_seconds,
            uptime: format_uptime(uptime_seconds),
            total_updates: self.total_updates,
            error_count: self.error_count,
            last_error: self.last_error.clone(),
            last_update: self.last_update,
            active_channels: channels.iter().filter(|c| c.is_on()).count(),
            channels,
        }
    }
}

/// `"1d 2h 3m 4s"`, dropping leading zero units.
pub fn format_uptime(total_seconds: u64) -> String {
    let days = total_seconds / 86_400;
    let hours = total_seconds % 86_400 / 3_600;
    let minutes = total_seconds % 3_600 / 60;
    let seconds = total_seconds % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
