//! BidHouse Settings
//!
//! Runtime configuration for the auction core. Values come from defaults,
//! then an optional TOML file, then environment variables, last one wins.

use std::env;
use std::path::Path;

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Complete settings for the auction core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Live state store connection string (`redis://...`, or `memory:` for
    /// the in-process store)
    pub live_store_url: String,

    /// Durable store connection string (`postgres://...`, or `memory:`)
    pub durable_store_url: String,

    /// Address the HTTP/WebSocket facade binds to
    pub http_listen_addr: String,

    /// Lifecycle scheduler period in milliseconds
    pub scheduler_tick_ms: u64,

    /// Minutes a provisional winner has to settle the guarantee payment
    pub payment_window_minutes: i64,

    /// Increment rule applied when an auction row does not carry its own
    pub default_min_increment_percent: Decimal,

    /// Grace added to the live-state TTL beyond the auction end time
    pub live_state_ttl_grace_seconds: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            live_store_url: "redis://127.0.0.1:6379".to_string(),
            durable_store_url: "postgres://localhost/bidhouse".to_string(),
            http_listen_addr: "0.0.0.0:8080".to_string(),
            scheduler_tick_ms: 2000,
            payment_window_minutes: 5,
            default_min_increment_percent: dec!(10.00),
            live_state_ttl_grace_seconds: 3600,
        }
    }
}

impl Settings {
    /// Load settings: defaults, overlaid by the TOML file named in
    /// `BIDHOUSE_CONFIG` (if any), overlaid by environment variables.
    pub fn load() -> Self {
        let mut settings = match env::var("BIDHOUSE_CONFIG") {
            Ok(path) => Self::from_file(&path).unwrap_or_default(),
            Err(_) => Self::default(),
        };
        settings.apply_env();
        settings
    }

    /// Parse settings from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        toml::from_str(&raw).ok()
    }

    /// Overlay recognized environment variables
    fn apply_env(&mut self) {
        if let Ok(v) = env::var("LIVE_STORE_URL") {
            self.live_store_url = v;
        }
        if let Ok(v) = env::var("DURABLE_STORE_URL") {
            self.durable_store_url = v;
        }
        if let Ok(v) = env::var("HTTP_LISTEN_ADDR") {
            self.http_listen_addr = v;
        }
        if let Ok(v) = env::var("SCHEDULER_TICK_MS") {
            if let Ok(ms) = v.parse() {
                self.scheduler_tick_ms = ms;
            }
        }
        if let Ok(v) = env::var("PAYMENT_WINDOW_MINUTES") {
            if let Ok(minutes) = v.parse() {
                self.payment_window_minutes = minutes;
            }
        }
        if let Ok(v) = env::var("DEFAULT_MIN_INCREMENT_PERCENT") {
            if let Ok(pct) = v.parse() {
                self.default_min_increment_percent = pct;
            }
        }
        if let Ok(v) = env::var("LIVE_STATE_TTL_GRACE_SECONDS") {
            if let Ok(seconds) = v.parse() {
                self.live_state_ttl_grace_seconds = seconds;
            }
        }
    }

    pub fn payment_window(&self) -> Duration {
        Duration::minutes(self.payment_window_minutes)
    }

    pub fn ttl_grace(&self) -> Duration {
        Duration::seconds(self.live_state_ttl_grace_seconds)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scheduler_tick_ms)
    }
}
