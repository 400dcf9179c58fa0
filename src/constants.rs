//! Central place for application-wide constants and default values.

/// Default application name (can be overridden in config)
pub const DEFAULT_APP_NAME: &str = "nodebridge";

/// Left padding used to align log lines with those that include emoji prefixes.
/// Keep this to a fixed width matching the emoji prefix you use elsewhere.
pub const ICON_PLACEHOLDER: &str = "   "; // Three spaces for alignment

/// Protocol branding shown in logs and introspection output
pub const PROTOCOL_NAME: &str = "nodebridge-wire";
/// Wire protocol version reported by this bridge (bump when wire format changes)
pub const PROTOCOL_VERSION: u16 = 5;

/// Application / crate version (populated from Cargo.toml via env! macro)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default TCP port accepting wire links
pub const DEFAULT_WIRE_PORT: u16 = 33333;
/// Default HTTP front-end port
pub const DEFAULT_HTTP_PORT: u16 = 3000;
/// Default seconds between discovery broadcasts
pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 30;
/// Per-link outbound queue depth
pub const DEFAULT_LINK_QUEUE: usize = 256;
/// Seconds between reconnect attempts for configured targets
pub const DEFAULT_RECONNECT_SECS: u64 = 5;

/// Node id used as `source` for messages originated by the bridge itself.
pub const BRIDGE_SOURCE_ID: u16 = 0;
/// Maximum number of bytecode words per BytecodeChunk message.
pub const BYTECODE_CHUNK_WORDS: usize = 256;
/// Local (node-scoped) event ids count down from here.
pub const LOCAL_EVENT_BASE: u16 = 0xfffe;
/// Name reported for events whose id has no known definition.
pub const UNKNOWN_EVENT_NAME: &str = "?";
/// Name of the event fired after a reset, if the network defines it.
pub const RESET_EVENT_NAME: &str = "reset";

/// Optional short git commit hash (set via build script or cargo:rustc-env). Falls back to "unknown".
pub fn git_commit() -> &'static str {
    option_env!("GIT_COMMIT").unwrap_or("unknown")
}

/// Optional build timestamp in RFC3339 (set via build script). Falls back to "unknown".
pub fn build_timestamp() -> &'static str {
    option_env!("BUILD_TIMESTAMP").unwrap_or("unknown")
}

/// Human friendly composite version string used in prompts / logs.
pub fn full_version() -> String {
    format!("v{} (protocol={} {})", APP_VERSION, PROTOCOL_NAME, PROTOCOL_VERSION)
}
