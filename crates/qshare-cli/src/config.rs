//! Configuration system for the QShare CLI.

use qshare_core::{DriverConfig, Endpoint, TransferConfig};
use qshare_discovery::{MdnsConfig, ResolverConfig, SERVICE_TYPE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// QShare configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// DNS-SD service type to browse
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// Fixed peer (`host:port`); skips mDNS when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    /// Seconds to wait for a single advertisement to resolve
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: u64,
    /// Seconds to wait for any peer before giving up
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: u64,
    /// Reset the session when the peer withdraws its advertisement
    #[serde(default)]
    pub forget_lost_peer: bool,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
    /// Where downloads are written
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

// Default values

fn default_service_type() -> String {
    SERVICE_TYPE.to_string()
}

fn default_resolve_timeout() -> u64 {
    10
}

fn default_discovery_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_response_timeout() -> u64 {
    60
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("qshare")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            peer: None,
            resolve_timeout_secs: default_resolve_timeout(),
            discovery_timeout_secs: default_discovery_timeout(),
            forget_lost_peer: false,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            response_timeout_secs: default_response_timeout(),
            download_dir: default_download_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("qshare/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Statically configured peer, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is not `host:port`.
    pub fn peer(&self) -> anyhow::Result<Option<Endpoint>> {
        self.discovery
            .peer
            .as_deref()
            .map(|p| p.parse::<Endpoint>().map_err(anyhow::Error::from))
            .transpose()
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        let service_type = &self.discovery.service_type;
        if !service_type.starts_with('_')
            || !(service_type.contains("._tcp") || service_type.contains("._udp"))
        {
            anyhow::bail!(
                "Invalid service type: {}. Expected _name._tcp or _name._udp",
                service_type
            );
        }

        self.peer()?;

        if self.discovery.resolve_timeout_secs == 0 || self.discovery.discovery_timeout_secs == 0
        {
            anyhow::bail!("Discovery timeouts must be at least 1 second");
        }

        if self.transfer.connect_timeout_secs == 0 || self.transfer.connect_timeout_secs > 300 {
            anyhow::bail!("Connect timeout must be between 1 and 300 seconds");
        }

        if self.transfer.response_timeout_secs < self.transfer.connect_timeout_secs {
            anyhow::bail!("Response timeout must not be shorter than the connect timeout");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Resolver settings
    #[must_use]
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            service_type: self.discovery.service_type.clone(),
        }
    }

    /// mDNS backend settings
    #[must_use]
    pub fn mdns_config(&self) -> MdnsConfig {
        MdnsConfig {
            resolve_timeout: Duration::from_secs(self.discovery.resolve_timeout_secs),
        }
    }

    /// Session driver settings
    #[must_use]
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            forget_lost_peer: self.discovery.forget_lost_peer,
        }
    }

    /// Transfer client settings
    #[must_use]
    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            connect_timeout: Duration::from_secs(self.transfer.connect_timeout_secs),
            response_timeout: Duration::from_secs(self.transfer.response_timeout_secs),
            ..TransferConfig::default()
        }
    }

    /// How long to wait for discovery
    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.discovery_timeout_secs)
    }
}
