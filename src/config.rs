// =============================================================================
// Quote Stream Configuration — endpoints, timings and feed mode
// =============================================================================
//
// Every tunable of the streaming layer lives here: where the WebSocket feeds
// live, how aggressively to reconnect, and whether to run against the mock
// generator instead of a live feed.
//
// A config file only has to name what differs from the defaults; loading
// rejects files whose endpoint overrides cannot be resolved.
// =============================================================================

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::types::StreamType;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_stream_url() -> String {
    "ws://localhost:5000".to_string()
}

fn default_symbols() -> Vec<String> {
    vec![
        "EUR/USD".to_string(),
        "GBP/USD".to_string(),
        "USD/JPY".to_string(),
    ]
}

fn default_reconnect_interval_ms() -> u64 {
    5_000
}

fn default_keepalive_interval_ms() -> u64 {
    30_000
}

fn default_stream_switch_delay_ms() -> u64 {
    1_000
}

fn default_mock_tick_interval_ms() -> u64 {
    1_000
}

// =============================================================================
// Errors
// =============================================================================

/// Failure to turn configuration into a connectable URL.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("relative endpoint {path} needs a page origin to resolve against")]
    MissingOrigin { path: String },

    #[error("unsupported origin scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid endpoint URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

// =============================================================================
// QuoteConfig
// =============================================================================

/// Top-level configuration for the quote streaming layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteConfig {
    // --- Endpoints ----------------------------------------------------------

    /// Base WebSocket URL; the per-stream path `/ws_{stream}` is appended.
    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    /// Explicit ESP endpoint. Absolute, or a path relative to `page_origin`.
    #[serde(default)]
    pub ws_esp: Option<String>,

    /// Explicit RFS endpoint.
    #[serde(default)]
    pub ws_rfs: Option<String>,

    /// Explicit EXEC endpoint.
    #[serde(default)]
    pub ws_exec: Option<String>,

    /// Origin (e.g. `https://dash.example.com`) used to resolve relative
    /// endpoint overrides.
    #[serde(default)]
    pub page_origin: Option<String>,

    // --- Connection behaviour -----------------------------------------------

    /// Connect on start and reconnect after abnormal closures.
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// Fixed delay before a reconnect attempt.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Consecutive reconnect attempts before giving up. 0 means unlimited.
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    /// Interval between `{"type":"ping"}` keepalive frames.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Settle delay between tearing down the old stream and opening the new
    /// one on a stream-type switch.
    #[serde(default = "default_stream_switch_delay_ms")]
    pub stream_switch_delay_ms: u64,

    /// Feed selected at startup.
    #[serde(default)]
    pub default_stream_type: StreamType,

    // --- Mock feed ----------------------------------------------------------

    /// Serve synthetic quotes instead of connecting to a live feed.
    #[serde(default)]
    pub mock_mode: bool,

    #[serde(default = "default_mock_tick_interval_ms")]
    pub mock_tick_interval_ms: u64,

    // --- Symbols ------------------------------------------------------------

    /// Symbols the binary subscribes to on startup.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            stream_url: default_stream_url(),
            ws_esp: None,
            ws_rfs: None,
            ws_exec: None,
            page_origin: None,
            auto_connect: true,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_attempts: 0,
            keepalive_interval_ms: default_keepalive_interval_ms(),
            stream_switch_delay_ms: default_stream_switch_delay_ms(),
            default_stream_type: StreamType::Esp,
            mock_mode: false,
            mock_tick_interval_ms: default_mock_tick_interval_ms(),
            symbols: default_symbols(),
        }
    }
}

impl QuoteConfig {
    /// Read a config file and check that every stream endpoint resolves.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("cannot open quote config {}", path.display()))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("{} is not a valid quote config", path.display()))?;

        for stream in StreamType::ALL {
            config
                .endpoint_for(stream)
                .with_context(|| format!("{} declares an unusable {stream} endpoint", path.display()))?;
        }

        info!(
            path = %path.display(),
            stream_url = %config.stream_url,
            mock_mode = config.mock_mode,
            "quote config loaded"
        );
        Ok(config)
    }

    /// Write the config next to `path` as `<path>.tmp` and rename it into
    /// place, so readers never see a half-written file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_vec_pretty(self).context("quote config is not serialisable")?;
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, path))
            .with_context(|| format!("cannot write quote config {}", path.display()))?;

        info!(path = %path.display(), "quote config written");
        Ok(())
    }

    /// Apply `QUOTE_*` environment variables on top of the loaded values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("QUOTE_STREAM_URL") {
            self.stream_url = url;
        }
        if let Some(v) = non_empty("QUOTE_WS_ESP") {
            self.ws_esp = Some(v);
        }
        if let Some(v) = non_empty("QUOTE_WS_RFS") {
            self.ws_rfs = Some(v);
        }
        if let Some(v) = non_empty("QUOTE_WS_EXEC") {
            self.ws_exec = Some(v);
        }
        if let Some(v) = non_empty("QUOTE_PAGE_ORIGIN") {
            self.page_origin = Some(v);
        }
        if let Some(v) = non_empty("QUOTE_MOCK_MODE") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.mock_mode = true,
                "0" | "false" | "no" | "off" => self.mock_mode = false,
                other => warn!(value = %other, "ignoring unrecognised QUOTE_MOCK_MODE"),
            }
        }
        if let Some(v) = non_empty("QUOTE_STREAM_TYPE") {
            match v.parse::<StreamType>() {
                Ok(stream) => self.default_stream_type = stream,
                Err(e) => warn!(error = %e, "ignoring QUOTE_STREAM_TYPE"),
            }
        }
        if let Some(v) = non_empty("QUOTE_SYMBOLS") {
            self.symbols = v
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn stream_switch_delay(&self) -> Duration {
        Duration::from_millis(self.stream_switch_delay_ms)
    }

    pub fn mock_tick_interval(&self) -> Duration {
        Duration::from_millis(self.mock_tick_interval_ms)
    }

    fn override_for(&self, stream: StreamType) -> Option<&str> {
        let specific = match stream {
            StreamType::Esp => self.ws_esp.as_deref(),
            StreamType::Rfs => self.ws_rfs.as_deref(),
            StreamType::Exec => self.ws_exec.as_deref(),
        };
        specific.filter(|s| !s.trim().is_empty())
    }

    /// Resolve the WebSocket endpoint for `stream`.
    ///
    /// An explicit override wins. Overrides starting with `/` are resolved
    /// against `page_origin`, mapping `http` to `ws` and `https` to `wss`.
    /// Without an override the URL is `{stream_url}/ws_{stream}`.
    pub fn endpoint_for(&self, stream: StreamType) -> Result<String, EndpointError> {
        if let Some(specific) = self.override_for(stream) {
            if !specific.starts_with('/') {
                return Ok(specific.to_string());
            }

            let origin = self
                .page_origin
                .as_deref()
                .ok_or_else(|| EndpointError::MissingOrigin {
                    path: specific.to_string(),
                })?;
            let origin = Url::parse(origin).map_err(|source| EndpointError::InvalidUrl {
                url: origin.to_string(),
                source,
            })?;

            let scheme = match origin.scheme() {
                "https" | "wss" => "wss",
                "http" | "ws" => "ws",
                other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
            };
            let host = origin.host_str().unwrap_or("localhost");
            let authority = match origin.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            return Ok(format!("{scheme}://{authority}{specific}"));
        }

        let base = self.stream_url.trim_end_matches('/');
        Ok(format!("{base}/ws_{stream}"))
    }

    /// Endpoint for `stream` with the access token attached as the
    /// `access_token` query parameter.
    pub fn authenticated_url(&self, stream: StreamType, token: &str) -> Result<Url, EndpointError> {
        let endpoint = self.endpoint_for(stream)?;
        let mut url = Url::parse(&endpoint).map_err(|source| EndpointError::InvalidUrl {
            url: endpoint.clone(),
            source,
        })?;
        url.query_pairs_mut().append_pair("access_token", token);
        Ok(url)
    }
}
