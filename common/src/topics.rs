pub const CATEGORY_WINDOW_CHANGE: &str = "window_change";
pub const CATEGORY_ERROR: &str = "error";
pub const CATEGORY_CONFIG: &str = "config";
pub const CATEGORY_SYSTEM: &str = "system";

/// Notifications are published under `<base>/<category>`.
pub fn notification_topic(base: &str, category: &str) -> String {
    format!("{}/{category}", base.trim_end_matches('/'))
}
