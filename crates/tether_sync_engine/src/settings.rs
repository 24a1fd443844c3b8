//! Reactive sync settings.
//!
//! The host application publishes [`SyncSettings`] on a
//! [`tokio::sync::watch`] channel. The sync loop owns a [`SettingsWatcher`]
//! that turns each new value into a [`SettingsChange`] and reconfigures
//! itself between cycles.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;

/// Default periodic sync interval, in seconds.
const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Proxy used for remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy URL, e.g. `http://proxy.local:3128`.
    pub url: String,
    /// Optional user name.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Creates a proxy configuration without credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }
}

/// User-facing sync settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    /// Whether synchronization runs at all.
    pub enabled: bool,
    /// Period of the sync timer in seconds; `0` disables the timer.
    pub interval_seconds: u64,
    /// Configured proxy.
    pub proxy: Option<ProxyConfig>,
    /// Whether the proxy applies to sync traffic.
    pub use_proxy_for_sync: bool,
}

impl SyncSettings {
    /// Returns the sync interval, or `None` if the timer is off.
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_seconds > 0).then(|| Duration::from_secs(self.interval_seconds))
    }

    /// Returns the proxy sync traffic should use.
    pub fn effective_proxy(&self) -> Option<&ProxyConfig> {
        if self.use_proxy_for_sync {
            self.proxy.as_ref()
        } else {
            None
        }
    }

    /// Returns settings with sync disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the interval.
    pub fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval_seconds = seconds;
        self
    }

    /// Sets the proxy and whether sync traffic uses it.
    pub fn with_proxy(mut self, proxy: ProxyConfig, use_for_sync: bool) -> Self {
        self.proxy = Some(proxy);
        self.use_proxy_for_sync = use_for_sync;
        self
    }

    /// Parses settings from JSON. Missing fields take default values.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SyncError::Config(format!("invalid settings JSON: {e}")))
    }

    /// Loads settings from a JSON file.
    pub fn from_json_file(path: &Path) -> SyncResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read settings file {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: DEFAULT_INTERVAL_SECS,
            proxy: None,
            use_proxy_for_sync: false,
        }
    }
}

/// The difference between two successive settings values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChange {
    /// Sync went from disabled to enabled.
    pub re_enabled: bool,
    /// Sync went from enabled to disabled.
    pub disabled: bool,
    /// The timer interval changed.
    pub interval_changed: bool,
    /// The effective sync proxy changed.
    pub proxy_changed: bool,
}

impl SettingsChange {
    /// Computes the change from `old` to `new`.
    pub fn between(old: &SyncSettings, new: &SyncSettings) -> Self {
        Self {
            re_enabled: !old.enabled && new.enabled,
            disabled: old.enabled && !new.enabled,
            interval_changed: old.interval_seconds != new.interval_seconds,
            proxy_changed: old.effective_proxy() != new.effective_proxy(),
        }
    }

    /// Returns true if nothing the loop cares about changed.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Observes a settings channel and reports changes.
#[derive(Debug)]
pub struct SettingsWatcher {
    rx: watch::Receiver<SyncSettings>,
    current: SyncSettings,
    closed: bool,
}

impl SettingsWatcher {
    /// Creates a watcher starting from the channel's current value.
    pub fn new(mut rx: watch::Receiver<SyncSettings>) -> Self {
        let current = rx.borrow_and_update().clone();
        Self {
            rx,
            current,
            closed: false,
        }
    }

    /// Creates a watcher over settings that never change.
    pub fn fixed(settings: SyncSettings) -> Self {
        let (_tx, rx) = watch::channel(settings);
        Self::new(rx)
    }

    /// Returns the latest settings.
    pub fn current(&self) -> &SyncSettings {
        &self.current
    }

    /// Takes a settings update that has already arrived, without waiting.
    pub fn poll_change(&mut self) -> Option<SettingsChange> {
        if self.closed || !self.rx.has_changed().unwrap_or(false) {
            return None;
        }
        let next = self.rx.borrow_and_update().clone();
        let change = SettingsChange::between(&self.current, &next);
        self.current = next;
        (!change.is_empty()).then_some(change)
    }

    /// Waits for the next settings value and returns what changed.
    ///
    /// Once the publishing side is gone this never resolves, so it can sit in
    /// a `select!` loop without spinning.
    pub async fn changed(&mut self) -> SettingsChange {
        loop {
            if self.closed || self.rx.changed().await.is_err() {
                self.closed = true;
                std::future::pending::<()>().await;
            }
            let next = self.rx.borrow_and_update().clone();
            let change = SettingsChange::between(&self.current, &next);
            self.current = next;
            if !change.is_empty() {
                return change;
            }
        }
    }
}
