//! Daemon configuration.
//!
//! A single TOML file with these sections:
//! - `[server]`: listen address and the optional admin token
//! - `[storage]`: directory of the durable state store
//! - `[logging]`: default level and output format
//! - `[router]`: queue capacity and worker timing
//! - `[chat]` / `[email]`: transport settings
//! - `[[routes]]`: route definitions

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use alert_router::config::{
    DEFAULT_FAILURE_BACKOFF, DEFAULT_FLUSH_FLOOR, DEFAULT_QUEUE_CAPACITY, DEFAULT_REAPER_INTERVAL,
};
use alert_router::{RouteConfig, RouterSettings};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DaemonError, DaemonResult};

/// Default HTTP listen address.
pub const DEFAULT_LISTEN_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 8080);

/// Default per-send transport timeout in seconds.
pub const DEFAULT_TRANSPORT_TIMEOUT_SECS: u64 = 10;

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    pub listen_addr: SocketAddr,
    /// Bearer token required on `/admin/*`; unset leaves them open.
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR,
            auth_token: None,
        }
    }
}

/// State store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file. Its parent directory is created on open.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/alert-router.db"),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Router runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// Capacity of each route's queue.
    pub queue_capacity: usize,
    /// Minimum flush interval in seconds.
    pub flush_floor_secs: u64,
    /// Pause after a failed flush in seconds.
    pub failure_backoff_secs: u64,
    /// Silence reaper period in seconds.
    pub reaper_interval_secs: u64,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_floor_secs: DEFAULT_FLUSH_FLOOR.as_secs(),
            failure_backoff_secs: DEFAULT_FAILURE_BACKOFF.as_secs(),
            reaper_interval_secs: DEFAULT_REAPER_INTERVAL.as_secs(),
        }
    }
}

/// Chat webhook transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TRANSPORT_TIMEOUT_SECS,
        }
    }
}

/// SMTP transport settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// SMTP relay host; empty disables email delivery.
    pub smtp_host: String,
    /// SMTP port.
    pub smtp_port: u16,
    /// Upgrade a plain connection with STARTTLS instead of connecting
    /// over implicit TLS.
    pub starttls: bool,
    /// SMTP username.
    pub username: String,
    /// SMTP password.
    pub password: String,
    /// Sender address.
    pub from: String,
    /// Connection timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: 465,
            starttls: false,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            timeout_secs: DEFAULT_TRANSPORT_TIMEOUT_SECS,
        }
    }
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("starttls", &self.starttls)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl EmailConfig {
    /// Returns `true` when an SMTP host is set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.smtp_host.trim().is_empty()
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP server.
    pub server: ServerConfig,
    /// State store.
    pub storage: StorageConfig,
    /// Logging.
    pub logging: LoggingConfig,
    /// Router runtime.
    pub router: RouterSection,
    /// Chat transport.
    pub chat: ChatConfig,
    /// Email transport.
    pub email: EmailConfig,
    /// Route definitions, in evaluation order.
    pub routes: Vec<RouteConfig>,
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> DaemonResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DaemonError::Config {
            reason: format!("failed to read config file '{}': {e}", path.display()),
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> DaemonResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| DaemonError::Config {
            reason: format!("invalid TOML: {e}"),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate process-level settings.
    ///
    /// Individual routes are not validated here; invalid routes are omitted
    /// with a warning when they are compiled.
    ///
    /// # Errors
    ///
    /// Returns an error if any process-level value is invalid.
    pub fn validate(&self) -> DaemonResult<()> {
        let invalid = |reason: &str| {
            Err(DaemonError::Config {
                reason: reason.to_string(),
            })
        };

        if self
            .server
            .auth_token
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            return invalid("server.auth_token cannot be empty when set");
        }
        if self.storage.path.as_os_str().is_empty() {
            return invalid("storage.path cannot be empty");
        }
        if self.router.queue_capacity == 0 {
            return invalid("router.queue_capacity must be greater than 0");
        }
        if self.router.flush_floor_secs == 0 {
            return invalid("router.flush_floor_secs must be greater than 0");
        }
        if self.router.reaper_interval_secs == 0 {
            return invalid("router.reaper_interval_secs must be greater than 0");
        }
        if self.chat.timeout_secs == 0 {
            return invalid("chat.timeout_secs must be greater than 0");
        }
        if self.email.timeout_secs == 0 {
            return invalid("email.timeout_secs must be greater than 0");
        }
        if self.email.is_configured() && self.email.from.trim().is_empty() {
            return invalid("email.from is required when email.smtp_host is set");
        }

        let mut names = HashSet::new();
        for route in &self.routes {
            if !names.insert(route.name.as_str()) {
                warn!(route = %route.name, "duplicate route name; later definition is ignored");
            }
            if !route.email_to.is_empty() && !self.email.is_configured() {
                warn!(
                    route = %route.name,
                    "route has email recipients but no SMTP host is configured"
                );
            }
        }

        Ok(())
    }

    /// Router settings derived from the `[router]` section.
    #[must_use]
    pub const fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            queue_capacity: self.router.queue_capacity,
            flush_floor: Duration::from_secs(self.router.flush_floor_secs),
            failure_backoff: Duration::from_secs(self.router.failure_backoff_secs),
            reaper_interval: Duration::from_secs(self.router.reaper_interval_secs),
        }
    }
}
