use serde::Deserialize;

/// Listener settings for the probe and tracking endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// e.g. `[::]:8080` or `127.0.0.1:8080`
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Readiness fails while the live queue holds at least this many items.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u64,

    /// Requests taking longer than this are answered with 408
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

const fn default_enabled() -> bool {
    true
}

fn default_listen_address() -> String {
    "[::]:8080".to_string()
}

const fn default_max_queue_size() -> u64 {
    10_000
}

const fn default_request_timeout_ms() -> u64 {
    2_000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen_address: default_listen_address(),
            max_queue_size: default_max_queue_size(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}
