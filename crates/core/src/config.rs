use serde::Deserialize;

use crate::error::{TrackerError, TrackerResult};

/// Root configuration for the `funnelcube` binary. Loaded from environment
/// variables with the prefix `FUNNELCUBE__` and an optional TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default = "default_page_url")]
    pub page_url: String,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Options recognised by `init`. The stub snippet passes these as camelCase
/// JSON; config files and env vars use snake_case.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TrackerConfig {
    #[serde(default, alias = "clientId")]
    pub client_id: String,
    #[serde(default, alias = "clientSecret")]
    pub client_secret: String,
    #[serde(default, alias = "apiUrl")]
    pub api_url: String,
    #[serde(default = "default_true", alias = "autoTrackPageViews")]
    pub auto_track_page_views: bool,
    #[serde(default, alias = "autoTrackOutgoing")]
    pub auto_track_outgoing: bool,
}

/// Batching and transport tuning. The defaults are the SDK's fixed
/// behaviour; overriding them is meant for tests and the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_beacon_queue_capacity")]
    pub beacon_queue_capacity: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5000;

fn default_true() -> bool {
    true
}
fn default_page_url() -> String {
    "app://funnelcube-cli/".to_string()
}
fn default_shutdown_grace_ms() -> u64 {
    1500
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}
fn default_beacon_queue_capacity() -> usize {
    256
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl TrackerConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_url: api_url.into(),
            auto_track_page_views: true,
            auto_track_outgoing: false,
        }
    }

    pub fn with_auto_track_page_views(mut self, enabled: bool) -> Self {
        self.auto_track_page_views = enabled;
        self
    }

    pub fn with_auto_track_outgoing(mut self, enabled: bool) -> Self {
        self.auto_track_outgoing = enabled;
        self
    }

    /// Reject configs missing any of `clientId`, `clientSecret`, `apiUrl`.
    pub fn validate(&self) -> TrackerResult<()> {
        let missing: Vec<&str> = [
            ("clientId", &self.client_id),
            ("clientSecret", &self.client_secret),
            ("apiUrl", &self.api_url),
        ]
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(TrackerError::Config(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }

    /// `{apiUrl}/track/`, tolerating a trailing slash on `apiUrl`.
    pub fn track_endpoint(&self) -> String {
        format!("{}/track/", self.api_url.trim_end_matches('/'))
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new(String::new(), String::new(), String::new())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            beacon_queue_capacity: default_beacon_queue_capacity(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            dispatch: DispatchConfig::default(),
            page_url: default_page_url(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then environment
    /// variables (`FUNNELCUBE__TRACKER__CLIENT_ID`, ...), later sources winning.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("FUNNELCUBE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
