use std::env;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::session::{ConnectionSettings, Session};

/// Hostname the portfolio front-end is served from. Traffic for it is
/// rewritten to the API hostname below before dialing.
pub const DEFAULT_HOST: &str = "aouichou.me";

const HOST_REWRITES: &[(&str, &str)] = &[
    ("aouichou.me", "api.aouichou.me"),
    ("www.aouichou.me", "api.aouichou.me"),
];

#[derive(Debug, Clone)]
pub struct Config {
    /// Host (optionally `host:port`) of the demo terminal service.
    pub host: String,
    /// Force TLS on or off; `None` infers it (plain ws for local hosts).
    pub secure: Option<bool>,
    /// Front-end hostname to API hostname mapping.
    pub host_rewrites: Vec<(String, String)>,
    pub connection: ConnectionSettings,
    pub resize_debounce: Duration,
    /// Ping /healthz before dialing to wake a cold-started service.
    pub warmup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            secure: None,
            host_rewrites: HOST_REWRITES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            connection: ConnectionSettings::default(),
            resize_debounce: Duration::from_millis(100),
            warmup: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid url for host {host:?}: {source}")]
    InvalidUrl {
        host: String,
        source: url::ParseError,
    },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = env::var("DEMOTERM_HOST") {
            if !host.trim().is_empty() {
                config.host = host.trim().to_string();
            }
        }
        config
    }

    /// The host actually dialed: the front-end rewrite rule first, then
    /// localhost pinned to IPv4 so resolvers preferring `::1` do not
    /// miss a v4-only dev server. Every host source (default, env,
    /// flag) funnels through here.
    pub fn effective_host(&self) -> String {
        let host = self
            .host_rewrites
            .iter()
            .find(|(from, _)| self.host == *from)
            .map(|(_, to)| to.as_str())
            .unwrap_or(&self.host);
        if host == "localhost" {
            "127.0.0.1".to_string()
        } else if let Some(port) = host.strip_prefix("localhost:") {
            format!("127.0.0.1:{port}")
        } else {
            host.to_string()
        }
    }

    fn is_local(&self) -> bool {
        let host = self.effective_host();
        host.starts_with("127.") || host == "::1"
    }

    pub fn use_tls(&self) -> bool {
        self.secure.unwrap_or(!self.is_local())
    }

    /// WebSocket endpoint for one session: `{ws|wss}://host/ws/terminal/{slug}/`.
    pub fn terminal_url(&self, session: &Session) -> Result<Url, ConfigError> {
        let scheme = if self.use_tls() { "wss" } else { "ws" };
        let host = self.effective_host();
        let raw = format!("{scheme}://{host}/ws/terminal/{}/", session.slug);
        Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { host, source })
    }

    /// HTTP base of the service, for the warmup ping.
    pub fn service_url(&self) -> Result<Url, ConfigError> {
        let scheme = if self.use_tls() { "https" } else { "http" };
        let host = self.effective_host();
        let raw = format!("{scheme}://{host}/");
        Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { host, source })
    }
}
