//! # Configuration Management
//!
//! Centralized configuration for the master, the nodes and the edge proxy.
//!
//! One TOML file carries every section; each binary reads the sections it
//! needs and ignores the rest.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - `WIRED_*` environment overrides via `from_env()` / `apply_env()`
//!
//! ## Example
//! ```toml
//! [master]
//! control_address = "0.0.0.0:37420"
//! bootstrap_address = "127.0.0.1:37421"
//!
//! [[master.routes]]
//! id = "lobby"
//! server_host = "10.0.0.5"
//! server_port = 25565
//! proxy_domain = "play.example.net"
//! proxy_port = 25565
//!
//! [node]
//! key = "node-a1b2c3d4"
//! master_address = "10.0.0.1:37420"
//! ```

use crate::error::{ProtocolError, Result};
use crate::registry::Route;
use crate::utils::timeout;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Version string nodes report in Hello
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Max allowed frame size on the control channel (2 MiB)
pub const MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Default control plane port
pub const DEFAULT_CONTROL_PORT: u16 = 37420;

/// Default bootstrap (public key) HTTP port
pub const DEFAULT_BOOTSTRAP_PORT: u16 = 37421;

/// Default data plane port
pub const DEFAULT_PROXY_PORT: u16 = 25565;

/// Default transfer MTU used to size binary chunks
pub const DEFAULT_MTU: usize = 1460;

/// HTTP path serving the master public key
pub const PUBLIC_KEY_ROUTE: &str = "/api/connect/publickey";

/// SRV service label used to locate the master
pub const SRV_SERVICE: &str = "_wired._tcp";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WiredConfig {
    /// Master-specific configuration
    #[serde(default)]
    pub master: MasterConfig,

    /// Node (control plane client) configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Edge proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WiredConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `WIRED_*` environment variables.
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("WIRED_CONTROL_ADDRESS") {
            self.master.control_address = addr;
        }

        if let Ok(addr) = std::env::var("WIRED_BOOTSTRAP_ADDRESS") {
            self.master.bootstrap_address = addr;
        }

        if let Ok(key) = std::env::var("WIRED_NODE_KEY") {
            self.node.key = key;
        }

        if let Ok(passphrase) = std::env::var("WIRED_NODE_PASSPHRASE") {
            self.node.passphrase = Some(passphrase);
        }

        if let Ok(addr) = std::env::var("WIRED_MASTER_ADDRESS") {
            self.node.master_address = addr;
        }

        if let Ok(url) = std::env::var("WIRED_BOOTSTRAP_URL") {
            self.node.bootstrap_url = url;
        }

        if let Ok(addr) = std::env::var("WIRED_PROXY_ADDRESS") {
            self.proxy.listen_address = addr;
        }

        if let Ok(attempts) = std::env::var("WIRED_MAX_CONNECT_ATTEMPTS") {
            if let Ok(val) = attempts.parse::<u32>() {
                self.node.max_connect_attempts = val;
            }
        }

        if let Ok(heartbeat) = std::env::var("WIRED_HEARTBEAT_INTERVAL_MS") {
            if let Ok(val) = heartbeat.parse::<u64>() {
                self.node.heartbeat_interval = Duration::from_millis(val);
            }
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.master.validate());
        errors.extend(self.node.validate());
        errors.extend(self.proxy.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// A node identity the master accepts
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RegisteredNode {
    pub key: String,
    pub passphrase: String,
}

/// Node binary served to nodes of one architecture
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BuildConfig {
    /// Architecture as reported by nodes (`x86_64`, `aarch64`, ...)
    pub arch: String,
    pub binary_path: PathBuf,
}

/// Master-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Control plane listen address
    pub control_address: String,

    /// Bootstrap HTTP listen address
    pub bootstrap_address: String,

    /// PKCS#1 PEM private key, generated when missing
    pub key_path: PathBuf,

    /// PEM public key as served by the bootstrap endpoint
    pub public_key_path: PathBuf,

    /// Modulus size for generated keys
    pub rsa_bits: usize,

    /// Time allowed for the first packet of a control connection
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Per-connection outbound queue depth
    pub send_queue: usize,

    /// Transfer MTU used to size binary chunks
    pub mtu: usize,

    /// Refuse nodes whose key is not in `nodes`
    pub require_registration: bool,

    /// Initial route list
    pub routes: Vec<Route>,

    /// Known node identities
    pub nodes: Vec<RegisteredNode>,

    /// Expected node builds per architecture
    pub builds: Vec<BuildConfig>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            control_address: format!("0.0.0.0:{DEFAULT_CONTROL_PORT}"),
            bootstrap_address: format!("127.0.0.1:{DEFAULT_BOOTSTRAP_PORT}"),
            key_path: PathBuf::from("wired.key"),
            public_key_path: PathBuf::from("wired.pub"),
            rsa_bits: crate::utils::crypto::DEFAULT_RSA_BITS,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            send_queue: 64,
            mtu: DEFAULT_MTU,
            require_registration: false,
            routes: Vec::new(),
            nodes: Vec::new(),
            builds: Vec::new(),
        }
    }
}

impl MasterConfig {
    /// Validate master configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_socket_addr(&mut errors, "Control", &self.control_address);
        validate_socket_addr(&mut errors, "Bootstrap", &self.bootstrap_address);

        if self.rsa_bits < 1024 {
            errors.push(format!("RSA key size too small: {} (minimum: 1024)", self.rsa_bits));
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.send_queue == 0 {
            errors.push("Send queue must be greater than 0".to_string());
        }

        // A label must still leave room for data in each chunk
        if self.mtu < 64 {
            errors.push(format!("MTU too small: {} (minimum: 64)", self.mtu));
        } else if self.mtu > MAX_FRAME_SIZE {
            errors.push(format!("MTU larger than the maximum frame: {}", self.mtu));
        }

        for route in &self.routes {
            if route.id.is_empty() {
                errors.push(format!("Route for '{}' has an empty id", route.proxy_domain));
            }
            if route.proxy_domain.is_empty() {
                errors.push(format!("Route '{}' has an empty proxy_domain", route.id));
            }
            if route.server_host.is_empty() {
                errors.push(format!("Route '{}' has an empty server_host", route.id));
            }
        }

        if self.require_registration && self.nodes.is_empty() {
            errors.push(
                "require_registration is enabled but no nodes are registered".to_string(),
            );
        }

        for build in &self.builds {
            if build.arch.is_empty() {
                errors.push(format!(
                    "Build {} has an empty arch",
                    build.binary_path.display()
                ));
            }
        }

        errors
    }
}

/// Node (control plane client) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity announced in Hello
    pub key: String,

    /// Secret matched against the master's node table
    pub passphrase: Option<String>,

    /// Fleet domain; the SRV record `_wired._tcp.<wired_host>` names the master
    pub wired_host: String,

    /// Locate the master through SRV before falling back to `master_address`
    pub use_srv: bool,

    /// DNS server queried for the SRV record
    pub srv_nameserver: String,

    /// Fixed master control address
    pub master_address: String,

    /// URL of the master public key
    pub bootstrap_url: String,

    /// Timeout for dialing the master and fetching its key
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Delay between connection attempts
    #[serde(with = "duration_serde")]
    pub retry_delay: Duration,

    /// Consecutive failed attempts before the node gives up
    pub max_connect_attempts: u32,

    /// Interval between Ping packets
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// Per-connection outbound queue depth
    pub send_queue: usize,

    /// Where non-upgrade transfers are written
    pub download_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            key: generate_node_key(),
            passphrase: None,
            wired_host: String::from("wired.rip"),
            use_srv: false,
            srv_nameserver: String::from("1.1.1.1:53"),
            master_address: format!("127.0.0.1:{DEFAULT_CONTROL_PORT}"),
            bootstrap_url: format!("http://127.0.0.1:{DEFAULT_BOOTSTRAP_PORT}{PUBLIC_KEY_ROUTE}"),
            connect_timeout: timeout::DEFAULT_TIMEOUT,
            retry_delay: timeout::RETRY_DELAY,
            max_connect_attempts: 10,
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
            send_queue: 64,
            download_dir: PathBuf::from("."),
        }
    }
}

impl NodeConfig {
    /// Validate node configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.key.is_empty() {
            errors.push("Node key cannot be empty".to_string());
        }

        if self.master_address.is_empty() {
            errors.push("Master address cannot be empty".to_string());
        }

        if self.use_srv {
            if self.wired_host.is_empty() {
                errors.push("wired_host must be set when use_srv is enabled".to_string());
            }
            if self.srv_nameserver.parse::<std::net::SocketAddr>().is_err() {
                errors.push(format!(
                    "Invalid SRV nameserver: '{}' (expected format: '1.1.1.1:53')",
                    self.srv_nameserver
                ));
            }
        }

        if !self.bootstrap_url.starts_with("http://") && !self.bootstrap_url.starts_with("https://")
        {
            errors.push(format!(
                "Bootstrap URL must be http(s): '{}'",
                self.bootstrap_url
            ));
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        }

        if self.retry_delay.as_millis() < 10 {
            errors.push("Retry delay too short (minimum: 10ms)".to_string());
        } else if self.retry_delay.as_secs() > 300 {
            errors.push("Retry delay too long (maximum: 300s)".to_string());
        }

        if self.max_connect_attempts == 0 {
            errors.push("Max connect attempts must be greater than 0".to_string());
        }

        if self.heartbeat_interval.as_millis() < 100 {
            errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.send_queue == 0 {
            errors.push("Send queue must be greater than 0".to_string());
        }

        errors
    }
}

/// Edge proxy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Data plane listen address
    pub listen_address: String,

    /// Time allowed for the client handshake and login start
    #[serde(with = "duration_serde")]
    pub client_timeout: Duration,

    /// Time allowed for dialing a backend
    #[serde(with = "duration_serde")]
    pub backend_timeout: Duration,

    /// Delay before PlayerRemove is reported after a session ends
    #[serde(with = "duration_serde")]
    pub session_removal_delay: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_address: format!("0.0.0.0:{DEFAULT_PROXY_PORT}"),
            client_timeout: timeout::DEFAULT_TIMEOUT,
            backend_timeout: Duration::from_secs(5),
            session_removal_delay: Duration::from_millis(500),
        }
    }
}

impl ProxyConfig {
    /// Validate proxy configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_socket_addr(&mut errors, "Proxy", &self.listen_address);

        if self.client_timeout.as_millis() < 100 {
            errors.push("Client timeout too short (minimum: 100ms)".to_string());
        }

        if self.backend_timeout.as_millis() < 100 {
            errors.push("Backend timeout too short (minimum: 100ms)".to_string());
        }

        if self.session_removal_delay.as_secs() > 60 {
            errors.push("Session removal delay too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("wired"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// `node-` followed by eight random alphanumerics
pub fn generate_node_key() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("node-{suffix}")
}

fn validate_socket_addr(errors: &mut Vec<String>, what: &str, addr: &str) {
    if addr.is_empty() {
        errors.push(format!("{what} address cannot be empty"));
    } else if addr.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "Invalid {} address format: '{addr}' (expected format: '0.0.0.0:8080')",
            what.to_lowercase()
        ));
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
