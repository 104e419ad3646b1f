use alloy::primitives::Address;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::alert::Severity;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub chain: ChainConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// WebSocket RPC endpoint (ws:// or wss://). Overridden by DUSTWATCH_RPC_URL.
    #[serde(default)]
    pub rpc_url: String,
    /// The trap contract: getStatus() and the detection events.
    #[serde(default)]
    pub trap_address: String,
    /// Contract holding the transaction log (getEntryCount / getLast).
    /// Falls back to the trap address when unset.
    #[serde(default)]
    pub recorder_address: Option<String>,
    /// Contract emitting EmergencyPause, if separate from the trap.
    #[serde(default)]
    pub responder_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// getStatus() poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Timeout for any single contract call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Reconnect attempts before giving up. Unset = retry forever.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// How long in-flight polls and notifications get to finish on shutdown.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Number of recorded transactions to report at startup (0 disables).
    #[serde(default = "default_recent_entries")]
    pub recent_entries_on_startup: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Print notifications to stdout.
    #[serde(default = "default_true")]
    pub console: bool,
    /// Optional webhook receiving JSON notifications.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Minimum severity forwarded to the webhook.
    #[serde(default = "default_webhook_min_severity")]
    pub webhook_min_severity: Severity,
    /// Upper bound on a single sink delivery.
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// Parsed contract addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    pub trap: Address,
    pub recorder: Address,
    pub responder: Option<Address>,
}

impl ContractAddresses {
    /// Every distinct address the log subscription should cover.
    pub fn watched(&self) -> Vec<Address> {
        let mut out = vec![self.trap];
        if !out.contains(&self.recorder) {
            out.push(self.recorder);
        }
        if let Some(r) = self.responder {
            if !out.contains(&r) {
                out.push(r);
            }
        }
        out
    }
}

fn default_poll_interval_ms() -> u64 {
    30_000
}
fn default_call_timeout_ms() -> u64 {
    10_000
}
fn default_reconnect_initial_ms() -> u64 {
    1_000
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_shutdown_grace_ms() -> u64 {
    5_000
}
fn default_recent_entries() -> u64 {
    5
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_true() -> bool {
    true
}
fn default_webhook_min_severity() -> Severity {
    Severity::Critical
}
fn default_notify_timeout_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            max_reconnect_attempts: None,
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            recent_entries_on_startup: default_recent_entries(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            console: true,
            webhook_url: None,
            webhook_min_severity: default_webhook_min_severity(),
            notify_timeout_ms: default_notify_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        Ok(config.with_env_overrides())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Build a config purely from environment variables (no file needed).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut monitor = MonitorConfig::default();
        if let Some(ms) = env_parse::<u64>("DUSTWATCH_POLL_INTERVAL_MS")? {
            monitor.poll_interval_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("DUSTWATCH_CALL_TIMEOUT_MS")? {
            monitor.call_timeout_ms = ms;
        }
        monitor.max_reconnect_attempts = env_parse::<u32>("DUSTWATCH_MAX_RECONNECT_ATTEMPTS")?;

        let config = Config {
            chain: ChainConfig {
                rpc_url: String::new(),
                trap_address: String::new(),
                recorder_address: None,
                responder_address: None,
            },
            monitor,
            alerts: AlertConfig::default(),
            logging: LoggingConfig {
                level: std::env::var("DUSTWATCH_LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
                json: false,
            },
        };
        Ok(config.with_env_overrides())
    }

    /// Endpoint and addresses may live in the environment rather than the
    /// file (RPC URLs commonly embed an API key).
    fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DUSTWATCH_RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Ok(addr) = std::env::var("DUSTWATCH_TRAP_ADDRESS") {
            self.chain.trap_address = addr;
        }
        if let Ok(addr) = std::env::var("DUSTWATCH_RECORDER_ADDRESS") {
            self.chain.recorder_address = Some(addr);
        }
        if let Ok(addr) = std::env::var("DUSTWATCH_RESPONDER_ADDRESS") {
            self.chain.responder_address = Some(addr);
        }
        if let Ok(url) = std::env::var("DUSTWATCH_WEBHOOK_URL") {
            self.alerts.webhook_url = Some(url);
        }
        self
    }

    /// Check everything the monitor needs before it starts connecting.
    pub fn validate(&self) -> Result<ContractAddresses, ConfigError> {
        let url = self.chain.rpc_url.trim();
        if url.is_empty() {
            return Err(ConfigError::Missing("chain.rpc_url"));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                field: "chain.rpc_url",
                reason: "event subscriptions need a ws:// or wss:// endpoint".to_string(),
            });
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "monitor.poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.monitor.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "monitor.call_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.monitor.reconnect_initial_ms == 0
            || self.monitor.reconnect_max_ms < self.monitor.reconnect_initial_ms
        {
            return Err(ConfigError::Invalid {
                field: "monitor.reconnect_max_ms",
                reason: "backoff bounds must satisfy 0 < initial <= max".to_string(),
            });
        }
        if self.monitor.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "monitor.channel_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.addresses()
    }

    pub fn addresses(&self) -> Result<ContractAddresses, ConfigError> {
        if self.chain.trap_address.trim().is_empty() {
            return Err(ConfigError::Missing("chain.trap_address"));
        }
        let trap = parse_address("chain.trap_address", &self.chain.trap_address)?;
        let recorder = match self.chain.recorder_address.as_deref() {
            Some(s) if !s.trim().is_empty() => parse_address("chain.recorder_address", s)?,
            _ => trap,
        };
        let responder = match self.chain.responder_address.as_deref() {
            Some(s) if !s.trim().is_empty() => Some(parse_address("chain.responder_address", s)?),
            _ => None,
        };
        Ok(ContractAddresses {
            trap,
            recorder,
            responder,
        })
    }
}

fn parse_address(field: &'static str, raw: &str) -> Result<Address, ConfigError> {
    Address::from_str(raw.trim()).map_err(|e| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                field: key,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAP: &str = "0x1111111111111111111111111111111111111111";
    const RECORDER: &str = "0x2222222222222222222222222222222222222222";

    fn sample(extra: &str) -> Config {
        let toml = format!(
            r#"
[chain]
rpc_url = "wss://node.example/ws"
trap_address = "{TRAP}"
{extra}
"#
        );
        Config::from_toml_str(&toml).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = sample("");
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.monitor.call_timeout(), Duration::from_secs(10));
        assert_eq!(config.monitor.max_reconnect_attempts, None);
        assert_eq!(config.monitor.reconnect_initial_ms, 1_000);
        assert_eq!(config.monitor.reconnect_max_ms, 30_000);
        assert!(config.alerts.console);
        assert_eq!(config.alerts.webhook_min_severity, Severity::Critical);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_recorder_falls_back_to_trap() {
        let addrs = sample("").validate().unwrap();
        assert_eq!(addrs.trap, addrs.recorder);
        assert_eq!(addrs.responder, None);
        assert_eq!(addrs.watched().len(), 1);
    }

    #[test]
    fn test_watched_addresses_are_distinct() {
        let config = sample(&format!(
            "recorder_address = \"{RECORDER}\"\nresponder_address = \"{TRAP}\""
        ));
        let addrs = config.validate().unwrap();
        assert_eq!(addrs.watched().len(), 2);
    }

    #[test]
    fn test_monitor_section_overrides() {
        let config = sample("\n[monitor]\npoll_interval_ms = 5000\nmax_reconnect_attempts = 5\n");
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.monitor.max_reconnect_attempts, Some(5));
        assert_eq!(config.monitor.call_timeout_ms, 10_000);
    }

    #[test]
    fn test_rejects_http_endpoint() {
        let mut config = sample("");
        config.chain.rpc_url = "https://node.example".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "chain.rpc_url", .. })
        ));
    }

    #[test]
    fn test_rejects_bad_address() {
        let mut config = sample("");
        config.chain.trap_address = "YOUR_DEPLOYED_CONTRACT_ADDRESS".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "chain.trap_address", .. })
        ));
    }

    #[test]
    fn test_missing_trap_address() {
        let mut config = sample("");
        config.chain.trap_address.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("chain.trap_address"))
        ));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let config = sample("\n[monitor]\npoll_interval_ms = 0\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_webhook_severity_parses_lowercase() {
        let config = sample("\n[alerts]\nwebhook_url = \"https://hooks.example/x\"\nwebhook_min_severity = \"warning\"\n");
        assert_eq!(config.alerts.webhook_min_severity, Severity::Warning);
    }
}
