//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::util::time::{tick_interval, UPDATE_HZ};

/// Default remote consumer port (and inbound listener port)
pub const DEFAULT_PORT: u16 = 9999;

/// Which bridge workers to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeMode {
    /// Stream snapshots to the remote consumer only
    Stream,
    /// Answer commands and queries only
    Listen,
    /// Both workers, on independent sockets
    Duplex,
}

impl BridgeMode {
    pub fn streams(self) -> bool {
        matches!(self, Self::Stream | Self::Duplex)
    }

    pub fn listens(self) -> bool {
        matches!(self, Self::Listen | Self::Duplex)
    }
}

impl FromStr for BridgeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(Self::Stream),
            "listen" => Ok(Self::Listen),
            "duplex" => Ok(Self::Duplex),
            _ => Err(ConfigError::Invalid("BRIDGE_MODE")),
        }
    }
}

/// Role played by the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Host side driving a synthetic world through the bridge
    Demo,
    /// External consumer answering the handshake and receiving snapshots
    Peer,
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demo" => Ok(Self::Demo),
            "peer" => Ok(Self::Peer),
            _ => Err(ConfigError::Invalid("BRIDGE_ROLE")),
        }
    }
}

/// Bridge settings. Timings default to the values the consumer side expects.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub mode: BridgeMode,
    /// Remote consumer host, resolved when the bridge starts
    pub remote_host: String,
    pub remote_port: u16,
    /// Local endpoint for the inbound listener
    pub listen_addr: SocketAddr,
    /// Streaming cadence
    pub tick_interval: Duration,
    /// Delay between unanswered pings
    pub handshake_interval: Duration,
    /// How long to wait for a pong after each ping
    pub handshake_timeout: Duration,
    /// Pause after a failed transmission
    pub send_backoff: Duration,
    /// Upper bound on waiting for a worker during shutdown
    pub join_timeout: Duration,
    /// How long the listener waits for the simulation to answer a request
    pub request_timeout: Duration,
    pub queue_capacity: usize,
    /// Max inbound commands per second
    pub command_rate_limit: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: BridgeMode::Stream,
            remote_host: "localhost".to_string(),
            remote_port: DEFAULT_PORT,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            tick_interval: tick_interval(UPDATE_HZ),
            handshake_interval: Duration::from_millis(500),
            handshake_timeout: Duration::from_secs(1),
            send_backoff: Duration::from_secs(1),
            join_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            queue_capacity: 256,
            command_rate_limit: 60,
        }
    }
}

impl BridgeConfig {
    /// `host:port` string handed to the resolver
    pub fn remote(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}

/// Consumer-side settings
#[derive(Clone, Debug)]
pub struct PeerConfig {
    pub bind_addr: SocketAddr,
    /// Bridge listener to send commands and queries to
    pub bridge_addr: Option<SocketAddr>,
    /// JSON-lines file receiving every snapshot
    pub record_path: Option<String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            bridge_addr: None,
            record_path: None,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub role: Role,
    pub bridge: BridgeConfig,
    pub peer: PeerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = BridgeConfig::default();

        let update_hz: u32 = parse_or("BRIDGE_UPDATE_HZ", UPDATE_HZ)?;
        if update_hz == 0 {
            return Err(ConfigError::Invalid("BRIDGE_UPDATE_HZ"));
        }

        let bridge = BridgeConfig {
            mode: parse_or("BRIDGE_MODE", defaults.mode)?,
            remote_host: env::var("BRIDGE_REMOTE_HOST").unwrap_or(defaults.remote_host),
            remote_port: parse_or("BRIDGE_REMOTE_PORT", defaults.remote_port)?,
            listen_addr: parse_addr_or("BRIDGE_LISTEN_ADDR", defaults.listen_addr)?,
            tick_interval: tick_interval(update_hz),
            queue_capacity: parse_or("BRIDGE_QUEUE_CAPACITY", defaults.queue_capacity)?,
            command_rate_limit: parse_or("BRIDGE_COMMAND_RATE", defaults.command_rate_limit)?,
            ..defaults
        };

        let peer = PeerConfig {
            bind_addr: parse_addr_or("PEER_BIND_ADDR", PeerConfig::default().bind_addr)?,
            bridge_addr: match env::var("PEER_BRIDGE_ADDR") {
                Ok(addr) => Some(
                    addr.parse()
                        .map_err(|_| ConfigError::InvalidAddress("PEER_BRIDGE_ADDR"))?,
                ),
                Err(_) => None,
            },
            record_path: env::var("PEER_RECORD_PATH").ok(),
        };

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            role: parse_or("BRIDGE_ROLE", Role::Demo)?,
            bridge,
            peer,
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

fn parse_addr_or(key: &'static str, default: SocketAddr) -> Result<SocketAddr, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidAddress(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid socket address in environment variable: {0}")]
    InvalidAddress(&'static str),
}
