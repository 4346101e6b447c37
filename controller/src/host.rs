use std::{
    collections::BTreeMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{FixedOffset, Offset, Utc};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions, QoS,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    net::TcpListener,
    sync::{Mutex, Notify},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pagoda_common::{
    duty_u16, gpio::available_pwm_pins, merge_update, notification_topic, validate, ActiveConfig,
    ChannelScheduler, Clock, LocalTime, LogLevel, Notification, NotificationConfig,
    NotificationPayload, PwmError, PwmSink, SolarTimeTable, StatusReport, StatusTracker, SunTimes,
    SystemConfig, Violation,
};

#[derive(Clone)]
struct AppState {
    config: Arc<ActiveConfig>,
    solar: Arc<SolarTimeTable>,
    status: Arc<Mutex<StatusTracker>>,
    wake: Arc<Notify>,
    notifier: Option<Notifier>,
    store: AppStore,
    update_lock: Arc<Mutex<()>>,
    started: Instant,
}

#[derive(Clone)]
struct AppStore {
    config_path: Arc<PathBuf>,
    solar_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Clone)]
struct Notifier {
    mqtt: AsyncClient,
    topic: String,
    device: String,
    connected: Arc<AtomicBool>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct ViolationView {
    message: String,
    #[serde(flatten)]
    violation: Violation,
}

#[derive(Debug, Serialize)]
struct RejectedBody {
    error: String,
    violations: Vec<ViolationView>,
}

#[derive(Debug, Serialize)]
struct ValidationResponse {
    valid: bool,
    violations: Vec<ViolationView>,
}

#[derive(Debug, Serialize)]
struct StatusView {
    date: String,
    time: String,
    sun: SunTimes,
    solar_table_loaded: bool,
    notifications_enabled: bool,
    notifications_connected: bool,
    #[serde(flatten)]
    report: StatusReport,
}

#[derive(Debug, Deserialize)]
struct SunQuery {
    month: Option<u8>,
    day: Option<u8>,
}

#[derive(Debug, Serialize)]
struct SunResponse {
    month: u8,
    day: u8,
    sunrise: String,
    sunset: String,
    location: Option<String>,
    table_loaded: bool,
}

/// Wall clock shifted by the configured UTC offset.
struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    fn new(offset_seconds: i32) -> Self {
        Self {
            offset: FixedOffset::east_opt(offset_seconds).unwrap_or_else(|| Utc.fix()),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> LocalTime {
        LocalTime::from_chrono(Utc::now().with_timezone(&self.offset))
    }
}

/// Host stand-in for the PWM hardware: records and logs the duty per channel.
#[derive(Debug, Default)]
struct LoggingPwm {
    pins: BTreeMap<String, u8>,
    duty: BTreeMap<String, u16>,
}

impl LoggingPwm {
    /// Tracks the enabled channels of `config`; channels that went away or
    /// moved to another pin are driven to 0 on their old pin first.
    fn sync_channels(&mut self, config: &SystemConfig) {
        let pins: BTreeMap<String, u8> = config
            .enabled_channels()
            .filter_map(|(key, channel)| channel.gpio_pin.as_u8().map(|pin| (key.to_string(), pin)))
            .collect();

        let removed: Vec<String> = self
            .pins
            .iter()
            .filter(|(key, pin)| pins.get(*key) != Some(*pin))
            .map(|(key, _)| key.clone())
            .collect();
        for key in removed {
            if let Err(err) = self.set_duty_percent(&key, 0) {
                warn!("failed to switch off {key}: {err}");
            }
            if let Some(pin) = self.pins.get(&key) {
                info!(channel = %key, gpio = pin, "releasing PWM output");
            }
        }

        self.pins = pins;
    }

    fn all_off(&mut self) {
        let keys: Vec<String> = self.pins.keys().cloned().collect();
        for key in keys {
            if let Err(err) = self.set_duty_percent(&key, 0) {
                warn!("failed to switch off {key}: {err}");
            }
        }
    }
}

impl PwmSink for LoggingPwm {
    fn set_duty_percent(&mut self, channel: &str, percent: u8) -> Result<(), PwmError> {
        if percent > 100 {
            return Err(PwmError::DutyOutOfRange(percent));
        }
        let Some(pin) = self.pins.get(channel).copied() else {
            return Err(PwmError::UnknownChannel(channel.to_string()));
        };

        let duty = duty_u16(percent);
        if self.duty.insert(channel.to_string(), duty) != Some(duty) {
            info!(channel, gpio = pin, percent, duty, "PWM duty set");
        }
        Ok(())
    }
}

impl Notifier {
    fn connect(config: &NotificationConfig) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_broker.clone(),
            config.mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(60));

        let (mqtt, eventloop) = AsyncClient::new(options, 64);
        let notifier = Self {
            mqtt,
            topic: config.mqtt_topic.clone(),
            device: config.mqtt_client_id.clone(),
            connected: Arc::new(AtomicBool::new(false)),
        };
        (notifier, eventloop)
    }

    async fn publish(&self, notification: &Notification) -> anyhow::Result<()> {
        let payload = NotificationPayload {
            notification,
            timestamp: Utc::now().timestamp(),
            device: &self.device,
        };
        let body = serde_json::to_vec(&payload)?;
        let topic = notification_topic(&self.topic, notification.category());

        self.mqtt
            .publish(topic.clone(), QoS::AtLeastOnce, false, body)
            .await
            .with_context(|| format!("failed to publish to {topic}"))?;
        debug!("published notification to {topic}");
        Ok(())
    }
}

pub async fn run() -> anyhow::Result<()> {
    let store = AppStore::new();
    let loaded = store.load_config().await;

    let log_level = loaded
        .as_ref()
        .map(|config| config.system.log_level.clone())
        .unwrap_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(&log_level))
        .init();

    let mut boot_errors = Vec::new();
    let config = match loaded {
        Ok(config) => {
            let violations = validate(&config);
            if violations.is_empty() {
                config
            } else {
                for violation in &violations {
                    error!("config: {violation}");
                }
                boot_errors.push(format!(
                    "configuration has {} violation(s), using defaults",
                    violations.len()
                ));
                SystemConfig::default()
            }
        }
        Err(err) => {
            error!("failed to load config from store: {err:#}");
            boot_errors.push("configuration unreadable, using defaults".to_string());
            SystemConfig::default()
        }
    };

    let solar = store.load_solar().await.unwrap_or_else(|err| {
        warn!("failed to load solar table, using fixed sunrise/sunset: {err:#}");
        SolarTimeTable::default()
    });
    if let Some(location) = &solar.meta().location {
        info!("solar table for {location} ({} entries)", solar.entries().len());
    }

    let notifier = if config.notifications.enabled {
        let (notifier, eventloop) = Notifier::connect(&config.notifications);
        spawn_mqtt_loop(eventloop, notifier.connected.clone());
        Some(notifier)
    } else {
        info!("notifications disabled");
        None
    };

    let app_state = AppState {
        config: Arc::new(ActiveConfig::new(config.clone())),
        solar: Arc::new(solar),
        status: Arc::new(Mutex::new(StatusTracker::new())),
        wake: Arc::new(Notify::new()),
        notifier,
        store,
        update_lock: Arc::new(Mutex::new(())),
        started: Instant::now(),
    };

    let mut notifications = vec![Notification::system_startup()];
    {
        let mut status = app_state.status.lock().await;
        for message in boot_errors {
            status.record_error(message.clone());
            if config.notifications.notify_on_errors {
                notifications.push(Notification::error(None, message));
            }
        }
    }
    publish_all(&app_state, &notifications).await;

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/config", get(handle_get_config).put(handle_put_config))
        .route("/api/config/validate", post(handle_validate_config))
        .route("/api/sun", get(handle_get_sun))
        .route("/api/gpio/available", get(handle_get_available_pins))
        .with_state(app_state.clone());

    let port = std::env::var("PAGODA_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    run_scheduler(app_state).await;
    server.abort();
    Ok(())
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)))
}

fn filter_directive(log_level: &str) -> &'static str {
    match LogLevel::parse(log_level) {
        Some(LogLevel::Fatal | LogLevel::Error) => "error",
        Some(LogLevel::Warn) => "warn",
        Some(LogLevel::Debug) => "debug",
        Some(LogLevel::Info) | None => "info",
    }
}

fn spawn_mqtt_loop(mut eventloop: EventLoop, connected: Arc<AtomicBool>) {
    tokio::spawn(async move {
        loop {
            let event = eventloop.poll().await;
            if let Some(state) = connection_state(&event) {
                if connected.swap(state, Ordering::Relaxed) != state {
                    info!(connected = state, "mqtt connection changed");
                }
            }
            if let Err(err) = event {
                warn!("mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });
}

/// Broker connection state implied by one event-loop result, if any.
fn connection_state(event: &Result<Event, ConnectionError>) -> Option<bool> {
    match event {
        Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
            Some(ack.code == ConnectReturnCode::Success)
        }
        Ok(_) => None,
        Err(_) => Some(false),
    }
}

/// Runs ticks until ctrl-c. A configuration change wakes the loop early.
async fn run_scheduler(app_state: AppState) {
    let mut pwm = LoggingPwm::default();

    loop {
        let config = app_state.config.snapshot();
        run_tick(&app_state, &config, &mut pwm).await;

        let interval = Duration::from_secs(config.system.update_interval.max(1));
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = app_state.wake.notified() => {
                debug!("configuration changed, re-evaluating channels");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!("failed to listen for shutdown signal: {err}");
                }
                info!("shutting down, switching all channels off");
                pwm.all_off();
                return;
            }
        }
    }
}

async fn run_tick(app_state: &AppState, config: &SystemConfig, pwm: &mut LoggingPwm) {
    let now = SystemClock::new(config.timezone.offset_seconds()).now();

    pwm.sync_channels(config);
    let mut outcome = ChannelScheduler::tick(config, &now, &app_state.solar);
    ChannelScheduler::apply(pwm, &mut outcome);

    for err in &outcome.errors {
        warn!("scheduling error: {err}");
    }
    debug!(
        time = %now.time_string(),
        active = outcome.active_count(),
        channels = outcome.assignments.len(),
        "tick complete"
    );

    let notifications =
        app_state
            .status
            .lock()
            .await
            .record_tick(&outcome, &now, &config.notifications);
    publish_all(app_state, &notifications).await;
}

async fn publish_all(app_state: &AppState, notifications: &[Notification]) {
    for notification in notifications {
        info!("{}", notification.message());
        let Some(notifier) = &app_state.notifier else {
            continue;
        };
        if let Err(err) = notifier.publish(notification).await {
            warn!("notification failed: {err:#}");
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.snapshot();
    let now = SystemClock::new(config.timezone.offset_seconds()).now();
    let report = state
        .status
        .lock()
        .await
        .report(state.started.elapsed().as_secs());

    Json(StatusView {
        date: now.date_string(),
        time: now.time_string(),
        sun: state.solar.lookup(now.month, now.day),
        solar_table_loaded: state.solar.is_loaded(),
        notifications_enabled: state.notifier.is_some(),
        notifications_connected: state
            .notifier
            .as_ref()
            .is_some_and(|notifier| notifier.connected.load(Ordering::Relaxed)),
        report,
    })
}

async fn handle_get_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.snapshot();
    Json(config.as_ref().clone())
}

async fn handle_put_config(
    State(state): State<AppState>,
    Json(update): Json<Value>,
) -> impl IntoResponse {
    let _guard = state.update_lock.lock().await;

    let current = state.config.snapshot();
    let candidate = match merge_update(&current, &update) {
        Ok(candidate) => candidate,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid configuration: {err}"),
            )
        }
    };

    let next = match state.config.replace(candidate) {
        Ok(next) => next,
        Err(violations) => {
            warn!("rejected configuration update with {} violation(s)", violations.len());
            return (
                StatusCode::BAD_REQUEST,
                Json(RejectedBody {
                    error: "Configuration rejected".to_string(),
                    violations: violation_views(violations),
                }),
            )
                .into_response();
        }
    };

    state.wake.notify_one();
    info!("configuration updated");

    if let Err(err) = state.store.save_config(&next).await {
        warn!("failed to persist configuration update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Configuration applied but could not be saved",
        );
    }

    publish_all(&state, &[Notification::config_update()]).await;
    Json(next.as_ref().clone()).into_response()
}

async fn handle_validate_config(
    State(state): State<AppState>,
    Json(update): Json<Value>,
) -> impl IntoResponse {
    let current = state.config.snapshot();
    let candidate = match merge_update(&current, &update) {
        Ok(candidate) => candidate,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid configuration: {err}"),
            )
        }
    };

    let violations = validate(&candidate);
    Json(ValidationResponse {
        valid: violations.is_empty(),
        violations: violation_views(violations),
    })
    .into_response()
}

async fn handle_get_sun(
    State(state): State<AppState>,
    Query(query): Query<SunQuery>,
) -> impl IntoResponse {
    let config = state.config.snapshot();
    let today = SystemClock::new(config.timezone.offset_seconds()).now();
    let month = query.month.unwrap_or(today.month);
    let day = query.day.unwrap_or(today.day);

    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return error_response(StatusCode::BAD_REQUEST, "month must be 1-12 and day 1-31");
    }

    let sun = state.solar.lookup(month, day);
    Json(SunResponse {
        month,
        day,
        sunrise: sun.sunrise.to_string(),
        sunset: sun.sunset.to_string(),
        location: state.solar.meta().location.clone(),
        table_loaded: state.solar.is_loaded(),
    })
    .into_response()
}

async fn handle_get_available_pins(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.snapshot();
    Json(available_pwm_pins(&config))
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("PAGODA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.pagoda"));

        Self {
            config_path: Arc::new(data_dir.join("config.json")),
            solar_path: Arc::new(data_dir.join("sun_times.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_config(&self) -> anyhow::Result<SystemConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.config_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<SystemConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(SystemConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_config(&self, config: &SystemConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.config_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(config)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }

    async fn load_solar(&self) -> anyhow::Result<SolarTimeTable> {
        let raw = tokio::fs::read(self.solar_path.as_ref())
            .await
            .with_context(|| format!("failed to read {}", self.solar_path.display()))?;
        Ok(SolarTimeTable::load(&raw)?)
    }
}

fn violation_views(violations: Vec<Violation>) -> Vec<ViolationView> {
    violations
        .into_iter()
        .map(|violation| ViolationView {
            message: violation.to_string(),
            violation,
        })
        .collect()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rumqttc::{ConnAck, Outgoing};

    #[test]
    fn maps_configured_log_level_to_filter() {
        assert_eq!(filter_directive("FATAL"), "error");
        assert_eq!(filter_directive("ERROR"), "error");
        assert_eq!(filter_directive("WARN"), "warn");
        assert_eq!(filter_directive("DEBUG"), "debug");
        assert_eq!(filter_directive("verbose"), "info");
    }

    #[test]
    fn logging_pwm_rejects_unknown_channels() {
        let mut pwm = LoggingPwm::default();
        pwm.sync_channels(&SystemConfig::default());

        assert_eq!(pwm.set_duty_percent("pin1", 50), Ok(()));
        assert_eq!(pwm.duty.get("pin1"), Some(&32_767));
        assert_eq!(
            pwm.set_duty_percent("pin9", 50),
            Err(PwmError::UnknownChannel("pin9".to_string()))
        );
        assert_eq!(
            pwm.set_duty_percent("pin1", 101),
            Err(PwmError::DutyOutOfRange(101))
        );
    }

    #[test]
    fn logging_pwm_switches_off_disabled_channels() {
        let mut pwm = LoggingPwm::default();
        let mut config = SystemConfig::default();
        pwm.sync_channels(&config);
        pwm.set_duty_percent("pin1", 10).unwrap();

        for channel in config.channels.values_mut() {
            channel.enabled = false;
        }
        pwm.sync_channels(&config);

        assert_eq!(pwm.duty.get("pin1"), Some(&0));
        assert!(pwm.pins.is_empty());
        assert!(pwm.set_duty_percent("pin1", 10).is_err());
    }

    #[test]
    fn logging_pwm_switches_off_moved_channels() {
        let mut pwm = LoggingPwm::default();
        let mut config = SystemConfig::default();
        pwm.sync_channels(&config);
        pwm.set_duty_percent("pin1", 80).unwrap();

        if let Some(channel) = config.channels.get_mut("pin1") {
            channel.gpio_pin = 17.into();
        }
        pwm.sync_channels(&config);

        assert_eq!(pwm.duty.get("pin1"), Some(&0));
        assert_eq!(pwm.pins.get("pin1"), Some(&17));
    }

    #[test]
    fn tracks_mqtt_connection_from_events() {
        let accepted = ConnAck::new(ConnectReturnCode::Success, false);
        let refused = ConnAck::new(ConnectReturnCode::NotAuthorized, false);

        assert_eq!(
            connection_state(&Ok(Event::Incoming(Incoming::ConnAck(accepted)))),
            Some(true)
        );
        assert_eq!(
            connection_state(&Ok(Event::Incoming(Incoming::ConnAck(refused)))),
            Some(false)
        );
        assert_eq!(connection_state(&Err(ConnectionError::RequestsDone)), Some(false));
        assert_eq!(connection_state(&Ok(Event::Outgoing(Outgoing::PingReq))), None);
    }

    #[test]
    fn clock_applies_fixed_offset() {
        let clock = SystemClock::new(5 * 3600 + 1800);
        assert_eq!(clock.offset.local_minus_utc(), 19_800);

        let invalid = SystemClock::new(100 * 3600);
        assert_eq!(invalid.offset.local_minus_utc(), 0);
    }

    #[test]
    fn violation_view_carries_rule_and_message() {
        let views = violation_views(vec![Violation::UpdateInterval { value: 0 }]);
        let value = serde_json::to_value(&views).unwrap();

        assert_eq!(value[0]["rule"], "update_interval");
        assert_eq!(value[0]["message"], views[0].message.as_str());
    }
}
