//! Outstation configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via DNPWIRE_CONFIG)
//! 3. Environment variables

use dnpwire_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Highest number of points a single point type may hold.
pub const MAX_POINTS: usize = 65536;

/// First link address reserved for broadcast and self-addressing.
pub const RESERVED_ADDRESS_START: u16 = 0xFFF0;

/// Outstation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Station identity and control behaviour.
    pub station: StationConfig,
    /// Initial point values.
    pub points: PointsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DNPWIRE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.station.apply_env_overrides();
    }

    /// Checks values that serde accepts but the outstation cannot use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.station.address >= RESERVED_ADDRESS_START {
            return Err(ConfigError::ValidationError(format!(
                "station address {:#06x} is reserved",
                self.station.address
            )));
        }
        if !self.station.accept_any_master && self.station.master_address >= RESERVED_ADDRESS_START
        {
            return Err(ConfigError::ValidationError(format!(
                "master address {:#06x} is reserved",
                self.station.master_address
            )));
        }
        if self.network.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        self.points.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,
    /// Maximum concurrent masters.
    pub max_connections: usize,
    /// Time allowed to write one response.
    pub response_timeout_ms: u64,
    /// Noise tolerated on a connection before it is dropped.
    pub max_resync_bytes: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout_secs: 300,
            max_connections: 16,
            response_timeout_ms: 5000,
            max_resync_bytes: 4096,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("DNPWIRE_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("DNPWIRE_IDLE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.idle_timeout_secs = secs;
            }
        }

        if let Ok(max) = std::env::var("DNPWIRE_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }

        if let Ok(timeout) = std::env::var("DNPWIRE_RESPONSE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.response_timeout_ms = ms;
            }
        }

        if let Ok(bytes) = std::env::var("DNPWIRE_MAX_RESYNC_BYTES") {
            if let Ok(n) = bytes.parse() {
                self.max_resync_bytes = n;
            }
        }
    }

    /// Returns idle timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Station identity and control behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// This outstation's link address.
    pub address: u16,
    /// Answer requests from any source address.
    pub accept_any_master: bool,
    /// The only master answered when `accept_any_master` is off.
    pub master_address: u16,
    /// How long a select stays armed waiting for its operate.
    pub select_timeout_ms: u64,
    /// Reported as device attribute 252.
    pub vendor_name: String,
    /// Reported as device attribute 250.
    pub product_name: String,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            address: 10,
            accept_any_master: true,
            master_address: 1,
            select_timeout_ms: 5000,
            vendor_name: "dnpwire".to_string(),
            product_name: "dnpwire outstation".to_string(),
        }
    }
}

impl StationConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("DNPWIRE_STATION_ADDRESS") {
            if let Ok(n) = addr.parse() {
                self.address = n;
            }
        }

        if let Ok(addr) = std::env::var("DNPWIRE_MASTER_ADDRESS") {
            if let Ok(n) = addr.parse() {
                self.master_address = n;
                self.accept_any_master = false;
            }
        }

        if let Ok(any) = std::env::var("DNPWIRE_ACCEPT_ANY_MASTER") {
            self.accept_any_master = any == "1" || any.to_lowercase() == "true";
        }

        if let Ok(timeout) = std::env::var("DNPWIRE_SELECT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.select_timeout_ms = ms;
            }
        }
    }

    pub fn select_timeout(&self) -> Duration {
        Duration::from_millis(self.select_timeout_ms)
    }
}

/// Initial point values, indexed from zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    pub binary_inputs: Vec<bool>,
    pub binary_outputs: Vec<bool>,
    pub counters: Vec<u32>,
    pub analog_inputs: Vec<i32>,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            binary_inputs: vec![false; 8],
            binary_outputs: vec![false; 8],
            counters: vec![0; 4],
            analog_inputs: vec![0; 4],
        }
    }
}

impl PointsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("binary_inputs", self.binary_inputs.len()),
            ("binary_outputs", self.binary_outputs.len()),
            ("counters", self.counters.len()),
            ("analog_inputs", self.analog_inputs.len()),
        ];
        for (name, len) in sizes {
            if len > MAX_POINTS {
                return Err(ConfigError::ValidationError(format!(
                    "{name} has {len} points (max {MAX_POINTS})"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// SocketAddr as a plain string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.station.address, 10);
        assert!(config.station.accept_any_master);
        assert_eq!(config.points.binary_outputs.len(), 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(parsed.points, config.points);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "network:\n  bind_addr: \"0.0.0.0:20001\"\nstation:\n  address: 4\npoints:\n  counters: [7, 8]"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr.port(), 20001);
        assert_eq!(config.network.max_connections, 16);
        assert_eq!(config.station.address, 4);
        assert_eq!(config.station.select_timeout_ms, 5000);
        assert_eq!(config.points.counters, vec![7, 8]);
        assert_eq!(config.points.binary_inputs.len(), 8);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/dnpwire.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
    }

    #[test]
    fn test_bad_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "network:\n  bind_addr: \"not an address\"").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outstation.yaml");
        let mut config = Config::default();
        config.station.product_name = "feeder-3".to_string();
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.station.product_name, "feeder-3");
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.station.address = 0xFFFF;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.points.counters = vec![0; MAX_POINTS + 1];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("counters"));

        let mut config = Config::default();
        config.network.max_connections = 0;
        assert!(config.validate().is_err());
    }
}
