pub mod config;
pub mod gpio;
pub mod ports;
pub mod schedule;
pub mod solar;
pub mod status;
pub mod topics;
pub mod types;
pub mod validation;
pub mod window;

pub use config::{
    merge_update, ActiveConfig, ChannelConfig, NotificationConfig, RawInt, SystemConfig,
    TimeWindow, WindowSet, DAY_WINDOW,
};
pub use ports::{duty_u16, Clock, PwmError, PwmSink};
pub use schedule::{ChannelScheduler, ChannelSchedulingError, TickOutcome};
pub use solar::{LoadError, SolarTimeTable};
pub use status::{format_uptime, Notification, NotificationPayload, StatusReport, StatusTracker};
pub use topics::*;
pub use types::{ClockTime, LocalTime, LogLevel, ResolvedWindow, SunTimes, TimeSpec};
pub use validation::{validate, Violation};
