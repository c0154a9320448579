//! Session configuration
//!
//! A [`SessionConfig`] is resolved from defaults, an optional TOML file,
//! and CLI/env overrides. The file is a partial overlay: every field is
//! optional and only present values override.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::session::RetryPolicy;
use crate::{Error, Result};

/// Default handshake window: socket upgrade plus `setupComplete`
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default connectivity probe window
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default interface language
const DEFAULT_LANGUAGE: &str = "hi";

/// Resolved configuration for one voice session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Speech service WebSocket endpoint
    pub service_url: Url,
    /// Interface language code (e.g. "hi", "pa", "en")
    pub language: String,
    /// Opaque profile payload forwarded at session setup
    pub user_profile: serde_json::Value,
    /// Reconnection policy
    pub retry: RetryPolicy,
    /// Handshake must complete within this window
    pub handshake_timeout: Duration,
    /// Connectivity probe window
    pub probe_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration with defaults for everything but the URL.
    #[must_use]
    pub fn new(service_url: Url) -> Self {
        Self {
            service_url,
            language: DEFAULT_LANGUAGE.to_string(),
            user_profile: serde_json::Value::Null,
            retry: RetryPolicy::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Top-level TOML configuration file schema.
///
/// All fields are optional; the file overlays [`SessionConfig`] defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Speech service connection
    #[serde(default)]
    pub service: ServiceFileConfig,

    /// Session parameters forwarded to the service
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Reconnection policy overrides
    #[serde(default)]
    pub retry: RetryFileConfig,
}

/// Service connection settings
#[derive(Debug, Default, Deserialize)]
pub struct ServiceFileConfig {
    /// WebSocket endpoint URL
    pub url: Option<String>,

    /// Handshake timeout in seconds
    pub handshake_timeout_secs: Option<u64>,
}

/// Session parameters
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Interface language code
    pub language: Option<String>,

    /// Profile payload forwarded verbatim at setup
    pub user_profile: Option<toml::Value>,
}

/// Reconnection policy overrides
#[derive(Debug, Default, Deserialize)]
pub struct RetryFileConfig {
    /// Maximum automatic retries
    pub max_attempts: Option<u32>,

    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: Option<u64>,

    /// Delay cap, in milliseconds
    pub max_delay_ms: Option<u64>,
}

impl ConfigFile {
    /// Default config file location for this platform.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("app", "kisanmitra", "kisan-voice")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the file at `path`. A missing file yields the empty overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Resolve a [`SessionConfig`] from this overlay and overrides.
    ///
    /// Precedence: explicit override, then file value, then default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no service URL is available from any
    /// source, if the URL does not parse, or if the profile payload
    /// cannot be represented as JSON.
    pub fn resolve(
        &self,
        url_override: Option<&str>,
        language_override: Option<&str>,
    ) -> Result<SessionConfig> {
        let url_str = url_override
            .or(self.service.url.as_deref())
            .ok_or_else(|| {
                Error::Config(
                    "no service URL configured; pass --url or set service.url".to_string(),
                )
            })?;
        let service_url = Url::parse(url_str)
            .map_err(|e| Error::Config(format!("invalid service URL {url_str:?}: {e}")))?;
        if !matches!(service_url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "service URL must be ws:// or wss://, got {}",
                service_url.scheme()
            )));
        }

        let mut config = SessionConfig::new(service_url);

        if let Some(language) = language_override.or(self.session.language.as_deref()) {
            config.language = language.to_string();
        }

        if let Some(profile) = &self.session.user_profile {
            config.user_profile = serde_json::to_value(profile)
                .map_err(|e| Error::Config(format!("user_profile is not valid JSON: {e}")))?;
        }

        if let Some(secs) = self.service.handshake_timeout_secs {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(max_attempts) = self.retry.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(ms) = self.retry.base_delay_ms {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.retry.max_delay_ms {
            config.retry.max_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_overlay_uses_defaults() {
        let file = ConfigFile::default();
        let config = file.resolve(Some("wss://speech.example.com/live"), None).unwrap();

        assert_eq!(config.language, "hi");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.handshake_timeout, Duration::from_secs(15));
        assert!(config.user_profile.is_null());
    }

    #[test]
    fn file_values_apply_when_no_override() {
        let file: ConfigFile = toml::from_str(
            r#"
            [service]
            url = "wss://speech.example.com/live"
            handshake_timeout_secs = 30

            [session]
            language = "pa"

            [session.user_profile]
            name = "Ramesh"
            district = "Ludhiana"
            crops = ["wheat", "mustard"]

            [retry]
            max_attempts = 3
            base_delay_ms = 500
            "#,
        )
        .unwrap();

        let config = file.resolve(None, None).unwrap();
        assert_eq!(config.service_url.as_str(), "wss://speech.example.com/live");
        assert_eq!(config.language, "pa");
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.user_profile["district"], "Ludhiana");
        assert_eq!(config.user_profile["crops"][0], "wheat");
    }

    #[test]
    fn overrides_beat_file_values() {
        let file: ConfigFile = toml::from_str(
            r#"
            [service]
            url = "wss://old.example.com/"
            [session]
            language = "hi"
            "#,
        )
        .unwrap();

        let config = file
            .resolve(Some("wss://new.example.com/"), Some("en"))
            .unwrap();
        assert_eq!(config.service_url.host_str(), Some("new.example.com"));
        assert_eq!(config.language, "en");
    }

    #[test]
    fn missing_url_is_a_config_error() {
        let file = ConfigFile::default();
        assert!(matches!(
            file.resolve(None, None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn non_websocket_scheme_is_rejected() {
        let file = ConfigFile::default();
        assert!(matches!(
            file.resolve(Some("https://speech.example.com/"), None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_file_yields_empty_overlay() {
        let overlay = ConfigFile::load(std::path::Path::new("/nonexistent/config.toml")).unwrap();
        assert!(overlay.service.url.is_none());
    }
}
