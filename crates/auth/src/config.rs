// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::origin::{self, OriginPolicy};

/// What the frame does when the sign-in popup could not be opened.
///
/// - `Confirm`: ask the visitor to allow popups (and offer in-place sign-in).
/// - `Navigate`: navigate the frame to the sign-in page without asking.
/// - `Off`: do nothing; the sign-in affordance stays on screen.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopupFallback {
    #[default]
    Confirm,
    Navigate,
    Off,
}

impl std::fmt::Display for PopupFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confirm => f.write_str("confirm"),
            Self::Navigate => f.write_str("navigate"),
            Self::Off => f.write_str("off"),
        }
    }
}

impl std::str::FromStr for PopupFallback {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "confirm" => Ok(Self::Confirm),
            "navigate" => Ok(Self::Navigate),
            "off" => Ok(Self::Off),
            other => anyhow::bail!("invalid popup fallback: {other}"),
        }
    }
}

/// Configuration shared by the host, frame and popup contexts.
#[derive(Debug, Clone, clap::Args)]
pub struct AuthConfig {
    /// Origin of the merchant page embedding the widget.
    #[arg(long, default_value = "https://shop.example", env = "TRYON_HOST_ORIGIN")]
    pub host_origin: String,

    /// Origin serving the widget frame and the sign-in popup.
    #[arg(long, default_value = "https://widget.example", env = "TRYON_WIDGET_ORIGIN")]
    pub widget_origin: String,

    /// How long the frame waits for a cached token before showing sign-in.
    #[arg(long, default_value_t = 1500, env = "TRYON_CACHE_WAIT_MS")]
    pub cache_wait_ms: u64,

    /// Lead time before expiry at which the host refreshes.
    #[arg(long, default_value_t = 300, env = "TRYON_REFRESH_BUFFER_SECS")]
    pub refresh_buffer_secs: u64,

    /// Token endpoint for `refresh_token` grants. Without it tokens are not
    /// refreshed and the visitor is signed out at expiry.
    #[arg(long, env = "TRYON_REFRESH_URL")]
    pub refresh_url: Option<String>,

    /// OAuth client id sent with refresh requests.
    #[arg(long, env = "TRYON_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Blocked-popup policy (confirm, navigate, off).
    #[arg(long, default_value = "confirm", env = "TRYON_POPUP_FALLBACK")]
    pub popup_fallback: String,

    /// Number of recent event ids each context remembers for deduplication.
    #[arg(long, default_value_t = 128, env = "TRYON_DEDUPE_WINDOW")]
    pub dedupe_window: usize,

    /// Broadcast channel name.
    #[arg(long, default_value = "tryon-auth", env = "TRYON_CHANNEL")]
    pub channel: String,

    /// Directory for persisted context storage.
    #[arg(long, env = "TRYON_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "TRYON_LOG_FORMAT")]
    pub log_format: String,

    /// Log level filter (overridden by RUST_LOG).
    #[arg(long, default_value = "info", env = "TRYON_LOG_LEVEL")]
    pub log_level: String,
}

impl AuthConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if origin::normalize(&self.host_origin).is_none() {
            anyhow::bail!("invalid host origin: {}", self.host_origin);
        }
        if origin::normalize(&self.widget_origin).is_none() {
            anyhow::bail!("invalid widget origin: {}", self.widget_origin);
        }
        if self.cache_wait_ms == 0 {
            anyhow::bail!("cache wait must be positive");
        }
        if self.dedupe_window == 0 {
            anyhow::bail!("dedupe window must be positive");
        }
        if let Some(url) = self.refresh_url.as_deref() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("refresh url must be http(s): {url}");
            }
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        self.popup_fallback_policy()?;
        Ok(())
    }

    pub fn cache_wait(&self) -> Duration {
        Duration::from_millis(self.cache_wait_ms)
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }

    /// Parse the popup fallback string into an enum.
    pub fn popup_fallback_policy(&self) -> anyhow::Result<PopupFallback> {
        self.popup_fallback.parse()
    }

    /// Senders the host page listens to.
    pub fn host_policy(&self) -> OriginPolicy {
        OriginPolicy::new([&self.widget_origin])
    }

    /// Senders the widget frame listens to: the embedding page and the
    /// widget's own popup.
    pub fn frame_policy(&self) -> OriginPolicy {
        OriginPolicy::new([&self.host_origin, &self.widget_origin])
    }

    /// Resolved state directory: flag/env, then `$XDG_STATE_HOME`, then
    /// `$HOME/.local/state`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = self.state_dir.as_ref() {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("tryon-auth");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/tryon-auth");
        }
        PathBuf::from(".tryon-auth")
    }

    /// Build a config with defaults and short waits for tests.
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            host_origin: "https://shop.example".into(),
            widget_origin: "https://widget.example".into(),
            cache_wait_ms: 1500,
            refresh_buffer_secs: 300,
            refresh_url: None,
            client_id: None,
            popup_fallback: "confirm".into(),
            dedupe_window: 128,
            channel: "tryon-auth".into(),
            state_dir: None,
            log_format: "text".into(),
            log_level: "debug".into(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
