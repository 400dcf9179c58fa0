use crate::constants::*;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TCP port accepting inbound wire links
    #[serde(default = "default_wire_port")]
    pub port: u16,
    /// Wire targets to dial at startup (`host:port`), reconnected on loss
    pub targets: Option<Vec<String>>,
    pub app_name: Option<String>,
    /// Logging / events configuration
    pub logging: Option<LoggingConfig>,
    /// Hub routing behaviour
    pub hub: Option<HubConfig>,
    /// Periodic description discovery
    pub discovery: Option<DiscoveryConfig>,
    /// Outbound link tuning
    pub link: Option<LinkConfig>,
    /// HTTP front-end
    pub http: Option<HttpConfig>,
}

fn default_wire_port() -> u16 {
    DEFAULT_WIRE_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_WIRE_PORT,
            targets: None,
            app_name: None,
            logging: None,
            hub: Some(HubConfig::default()),
            discovery: Some(DiscoveryConfig::default()),
            link: Some(LinkConfig::default()),
            http: Some(HttpConfig::default()),
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    /// Resolved hub settings with defaults applied.
    pub fn hub_settings(&self) -> HubSettings {
        let hub = self.hub.as_ref();
        HubSettings {
            forward: hub.and_then(|h| h.forward).unwrap_or(true),
            forward_to_sender: hub.and_then(|h| h.forward_to_sender).unwrap_or(false),
            dump: hub.and_then(|h| h.dump).unwrap_or(false),
            link_queue: self
                .link
                .as_ref()
                .and_then(|l| l.queue_capacity)
                .unwrap_or(DEFAULT_LINK_QUEUE),
        }
    }

    /// Interval between discovery broadcasts; `None` when disabled.
    pub fn discovery_interval(&self) -> Option<Duration> {
        let secs = self
            .discovery
            .as_ref()
            .and_then(|d| d.interval_secs)
            .unwrap_or(DEFAULT_DISCOVERY_INTERVAL_SECS);
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(
            self.link
                .as_ref()
                .and_then(|l| l.reconnect_secs)
                .unwrap_or(DEFAULT_RECONNECT_SECS),
        )
    }

    pub fn http_enabled(&self) -> bool {
        self.http.as_ref().and_then(|h| h.enabled).unwrap_or(true)
    }

    pub fn http_port(&self) -> u16 {
        self.http
            .as_ref()
            .and_then(|h| h.port)
            .unwrap_or(DEFAULT_HTTP_PORT)
    }

    /// Bound on an HTTP variable read; `None` waits for the node indefinitely.
    pub fn http_read_timeout(&self) -> Option<Duration> {
        match self.http.as_ref().and_then(|h| h.read_timeout_ms) {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Path to JSON line event log (rotated). If unset, defaults to logs/nodebridge.jsonl
    pub json_path: Option<String>,
    /// Max size in bytes before rotation (default 5MB)
    pub json_max_bytes: Option<usize>,
    /// Number of rotated files to retain (default 3)
    pub json_rotate: Option<u32>,
    /// Disable console sink (default false)
    pub disable_console: Option<bool>,
    /// Minimum level printed on the console (trace|debug|info|warn|error)
    pub console_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Rebroadcast every inbound message to the other links (default true)
    pub forward: Option<bool>,
    /// Also echo inbound messages back to the originating link (default false)
    pub forward_to_sender: Option<bool>,
    /// Log every wire message (default false)
    pub dump: Option<bool>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            forward: Some(true),
            forward_to_sender: Some(false),
            dump: Some(false),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Seconds between description broadcasts; 0 disables the periodic broadcast
    pub interval_secs: Option<u64>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: Some(DEFAULT_DISCOVERY_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Outbound message queue per link
    pub queue_capacity: Option<usize>,
    /// Delay between reconnect attempts to configured targets
    pub reconnect_secs: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Some(DEFAULT_LINK_QUEUE),
            reconnect_secs: Some(DEFAULT_RECONNECT_SECS),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Serve the HTTP front-end (default true)
    pub enabled: Option<bool>,
    pub port: Option<u16>,
    /// Upper bound on variable reads in milliseconds (0 or unset: wait indefinitely)
    pub read_timeout_ms: Option<u64>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: Some(true),
            port: Some(DEFAULT_HTTP_PORT),
            read_timeout_ms: None,
        }
    }
}

/// Hub behaviour after defaults are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    pub forward: bool,
    pub forward_to_sender: bool,
    pub dump: bool,
    pub link_queue: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Config::default().hub_settings()
    }
}
