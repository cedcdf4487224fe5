//! Desktop notifications for proxy failures.
//!
//! Failures from the proxy controller and out-of-band errors reported by the
//! host proxy service are surfaced to the user as desktop notifications.
//!
//! ## Features
//!
//! - At most one notification per cooldown window (5 seconds by default),
//!   measured from the last notification actually shown
//! - Bursts of failures inside the window are suppressed
//! - Can be enabled/disabled at runtime
//! - Cross-platform via `notify-rust`, with a log-only fallback

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Default minimum time between notifications.
pub const NOTIFICATION_COOLDOWN: Duration = Duration::from_millis(5000);

/// Title used for every proxy failure notification.
pub const ALERT_TITLE: &str = "SOCKS5 proxy error";

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Whether notifications are enabled.
    pub enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl NotificationSettings {
    pub fn enabled() -> Self {
        Self { enabled: true }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }
}

/// A user-visible alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }

    /// The host refused or failed to install a configuration.
    pub fn apply_failed() -> Self {
        Self::new(
            ALERT_TITLE,
            "Failed to apply proxy settings, check that the proxy server is running",
        )
    }

    /// Traffic could not reach the upstream proxy.
    pub fn connection_failed() -> Self {
        Self::new(
            ALERT_TITLE,
            "Cannot reach the proxy server, check proxy settings and server status",
        )
    }

    /// The host proxy layer reported an error.
    pub fn proxy_error(detail: &str) -> Self {
        Self::new(ALERT_TITLE, format!("Proxy connection failed: {}", detail))
    }

    /// Settings could not be read or written.
    pub fn storage_failed(detail: &str) -> Self {
        Self::new(ALERT_TITLE, format!("Could not save proxy settings: {}", detail))
    }
}

/// Somewhere alerts can be shown.
pub trait AlertSink: Send + Sync {
    /// Shows an alert. Best effort.
    fn show(&self, alert: &Alert) -> Result<(), String>;
}

/// Shows alerts as desktop notifications.
#[cfg(feature = "notifications")]
#[derive(Debug, Clone, Default)]
pub struct DesktopAlertSink;

#[cfg(feature = "notifications")]
impl AlertSink for DesktopAlertSink {
    fn show(&self, alert: &Alert) -> Result<(), String> {
        use notify_rust::Notification;

        Notification::new()
            .summary(&alert.title)
            .body(&alert.message)
            .appname("SocksGate")
            .timeout(notify_rust::Timeout::Milliseconds(5000))
            .show()
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Writes alerts to the log. Used when desktop notifications are compiled out
/// or unavailable (headless sessions).
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn show(&self, alert: &Alert) -> Result<(), String> {
        tracing::warn!(title = %alert.title, "{}", alert.message);
        Ok(())
    }
}

/// The sink appropriate for this build.
pub fn default_sink() -> Arc<dyn AlertSink> {
    #[cfg(feature = "notifications")]
    {
        Arc::new(DesktopAlertSink)
    }

    #[cfg(not(feature = "notifications"))]
    {
        Arc::new(LogAlertSink)
    }
}

/// Result of attempting to send a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationResult {
    /// Notification was shown.
    Sent,
    /// Suppressed, too soon after the last one.
    RateLimited,
    /// Notifications are disabled.
    Disabled,
    /// The sink failed to show it.
    Failed(String),
}

impl NotificationResult {
    pub fn was_sent(&self) -> bool {
        matches!(self, NotificationResult::Sent)
    }

    pub fn was_rate_limited(&self) -> bool {
        matches!(self, NotificationResult::RateLimited)
    }

    pub fn was_disabled(&self) -> bool {
        matches!(self, NotificationResult::Disabled)
    }
}

#[derive(Debug, Default)]
struct RateLimitState {
    last_notification: Option<Instant>,
}

/// Shows alerts through a sink, at most once per cooldown window.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn AlertSink>,
    cooldown: Duration,
    settings: Arc<RwLock<NotificationSettings>>,
    rate_limit: Arc<RwLock<RateLimitState>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("cooldown", &self.cooldown)
            .field("settings", &*self.settings.read())
            .field("rate_limit", &*self.rate_limit.read())
            .finish()
    }
}

impl Notifier {
    /// Creates a notifier with the default cooldown.
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self::with_cooldown(sink, NOTIFICATION_COOLDOWN)
    }

    pub fn with_cooldown(sink: Arc<dyn AlertSink>, cooldown: Duration) -> Self {
        Self {
            sink,
            cooldown,
            settings: Arc::new(RwLock::new(NotificationSettings::default())),
            rate_limit: Arc::new(RwLock::new(RateLimitState::default())),
        }
    }

    pub fn with_settings(self, settings: NotificationSettings) -> Self {
        *self.settings.write() = settings;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.read().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.settings.write().enabled = enabled;
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Time until the next notification may be shown; `None` if now.
    pub fn time_until_next(&self) -> Option<Duration> {
        let state = self.rate_limit.read();
        let last = state.last_notification?;
        let elapsed = last.elapsed();
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.time_until_next().is_some()
    }

    /// Shows an alert unless disabled or inside the cooldown window.
    pub fn notify(&self, alert: &Alert) -> NotificationResult {
        if !self.is_enabled() {
            return NotificationResult::Disabled;
        }

        // Check and claim the window under one lock so concurrent callers
        // cannot both pass.
        let now = Instant::now();
        let previous = {
            let mut state = self.rate_limit.write();
            if let Some(last) = state.last_notification {
                if now.duration_since(last) < self.cooldown {
                    tracing::debug!(message = %alert.message, "notification suppressed by cooldown");
                    return NotificationResult::RateLimited;
                }
            }
            state.last_notification.replace(now)
        };

        match self.sink.show(alert) {
            Ok(()) => NotificationResult::Sent,
            Err(e) => {
                tracing::warn!("Failed to show notification: {}", e);
                // Nothing was shown, so give the window back.
                let mut state = self.rate_limit.write();
                if state.last_notification == Some(now) {
                    state.last_notification = previous;
                }
                NotificationResult::Failed(e)
            }
        }
    }

    #[cfg(test)]
    pub fn reset_rate_limit(&self) {
        self.rate_limit.write().last_notification = None;
    }
}
