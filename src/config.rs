//! Configuration file support
//!
//! Loaded from TOML; every section has defaults so an empty file is valid.
//! Environment variables override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AnalyzerError, Result};
use crate::wireless::MacAddr;

/// Root configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Entity registry backend
    pub store: StoreConfig,

    /// Capture sources and output files
    pub capture: CaptureConfig,

    /// Frame handling
    pub analyzer: AnalyzerSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AnalyzerError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut config = Self::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AnalyzerError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to a TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AnalyzerError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Generate default config file content with comments
    pub fn default_with_comments() -> &'static str {
        DEFAULT_CONFIG
    }

    /// Reject address lists that do not parse
    pub fn validate(&self) -> Result<()> {
        self.analyzer.ignore_macs()?;
        self.analyzer.allow_list()?;
        Ok(())
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - WIFI_ANALYZER_STORE_BACKEND (`sqlite` or `memory`)
    /// - WIFI_ANALYZER_STORE_PATH
    /// - WIFI_ANALYZER_DUMP_DIR, WIFI_ANALYZER_HANDSHAKE_DIR
    /// - WIFI_ANALYZER_LOG_LEVEL
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WIFI_ANALYZER_STORE_BACKEND") {
            match v.to_lowercase().as_str() {
                "sqlite" => self.store.backend = StoreBackend::Sqlite,
                "memory" => self.store.backend = StoreBackend::Memory,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("WIFI_ANALYZER_STORE_PATH") {
            self.store.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WIFI_ANALYZER_DUMP_DIR") {
            self.capture.dump_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WIFI_ANALYZER_HANDSHAKE_DIR") {
            self.capture.handshake_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WIFI_ANALYZER_LOG_LEVEL") {
            self.logging.level = v;
        }
    }
}

/// Which store holds the registry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared database file; required when several loops or the CLI cooperate
    Sqlite,
    /// Process-local, lost on exit
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Database file for the sqlite backend
    pub path: PathBuf,

    /// How long a writer waits on a locked database
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("/var/lib/wifi-analyzer/registry.db"),
            busy_timeout_ms: 5000,
        }
    }
}

/// Capture configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Run directories with per-channel pcap files are created here
    pub dump_dir: PathBuf,

    /// Replayed captures that contained handshakes are copied here
    pub handshake_dir: PathBuf,

    /// Snapshot length
    pub snaplen: u32,

    /// Read timeout in milliseconds
    pub timeout_ms: u32,

    /// Kernel buffer size in bytes
    pub buffer_size: u32,

    pub promiscuous: bool,

    /// Write every frame to a pcap file
    pub write_pcap: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from("/var/lib/wifi-analyzer/dumps"),
            handshake_dir: PathBuf::from("/var/lib/wifi-analyzer/handshakes"),
            snaplen: 65535,
            timeout_ms: 100,
            buffer_size: 4 * 1024 * 1024,
            promiscuous: true,
            write_pcap: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettings {
    /// Accept channels 12 and 13
    pub world_channels: bool,

    /// Frames between throughput log lines (0 disables)
    pub stats_interval: u64,

    /// Per-BSSID handshake log bound
    pub max_handshake_frames: usize,

    /// Extra addresses never stored as access points or clients
    pub ignore_macs: Vec<String>,

    /// BSSIDs never handed to the attack hook
    pub allow_list: Vec<String>,
}

impl AnalyzerSettings {
    pub fn ignore_macs(&self) -> Result<Vec<MacAddr>> {
        self.ignore_macs.iter().map(|m| m.parse()).collect()
    }

    pub fn allow_list(&self) -> Result<Vec<MacAddr>> {
        self.allow_list.iter().map(|m| m.parse()).collect()
    }
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            world_channels: false,
            stats_interval: 1000,
            max_handshake_frames: 64,
            ignore_macs: Vec::new(),
            allow_list: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# wifi-analyzer configuration

[store]
# "sqlite" shares the registry between processes; "memory" is process-local
backend = "sqlite"
path = "/var/lib/wifi-analyzer/registry.db"
busy_timeout_ms = 5000

[capture]
dump_dir = "/var/lib/wifi-analyzer/dumps"
handshake_dir = "/var/lib/wifi-analyzer/handshakes"
snaplen = 65535
timeout_ms = 100
buffer_size = 4194304
promiscuous = true
write_pcap = true

[analyzer]
# Accept channels 12 and 13 as well as 1-11
world_channels = false
stats_interval = 1000
max_handshake_frames = 64
# Addresses never recorded, e.g. your own adapters
ignore_macs = []
# BSSIDs never handed to the attack hook
allow_list = []

[logging]
level = "info"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert!(config.capture.write_pcap);
        assert!(!config.analyzer.world_channels);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_default_file() {
        let config = Config::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.store.busy_timeout(), Duration::from_secs(5));
        assert_eq!(config.capture.buffer_size, 4194304);
        assert_eq!(config.analyzer.stats_interval, 1000);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::from_str(
            r#"
            [store]
            backend = "memory"

            [analyzer]
            world_channels = true
            allow_list = ["AA:BB:CC:DD:EE:FF"]
            "#,
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.analyzer.world_channels);
        assert_eq!(config.analyzer.max_handshake_frames, 64);
        assert_eq!(
            config.analyzer.allow_list().unwrap(),
            vec!["aa:bb:cc:dd:ee:ff".parse::<MacAddr>().unwrap()]
        );
    }

    #[test]
    fn test_rejects_bad_mac() {
        let err = Config::from_str("[analyzer]\nignore_macs = [\"not-a-mac\"]\n");
        assert!(matches!(err, Err(AnalyzerError::InvalidMac(_))));
    }

    #[test]
    fn test_roundtrip() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        let parsed = Config::from_str(&toml).unwrap();
        assert_eq!(config.capture.dump_dir, parsed.capture.dump_dir);
        assert_eq!(config.store.path, parsed.store.path);
    }
}
