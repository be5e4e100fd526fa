//! Configuration module for the edgeplane coordinator.

use crate::error::{EdgeError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeplaneConfig {
    /// Coordinator identity and served area.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// HTTP API configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Edge grouping configuration.
    #[serde(default)]
    pub grouping: GroupingConfig,
    /// Replication configuration.
    #[serde(default)]
    pub replication: ReplicationConfig,
    /// Validator election configuration.
    #[serde(default)]
    pub election: ElectionConfig,
    /// Spot check configuration.
    #[serde(default)]
    pub spot_check: SpotCheckConfig,
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl EdgeplaneConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EdgeError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| EdgeError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.name.is_empty() {
            return Err(EdgeError::InvalidConfig {
                field: "coordinator.name".to_string(),
                reason: "Coordinator name must not be empty".to_string(),
            });
        }

        self.grouping.validate()?;

        if self.replication.dispatch_timeout.is_zero() {
            return Err(EdgeError::InvalidConfig {
                field: "replication.dispatch_timeout".to_string(),
                reason: "Dispatch timeout must be non-zero".to_string(),
            });
        }

        if self.replication.content_cache_capacity == 0 {
            return Err(EdgeError::InvalidConfig {
                field: "replication.content_cache_capacity".to_string(),
                reason: "Content cache capacity must be non-zero".to_string(),
            });
        }

        if self.election.enabled && self.election.interval.is_zero() {
            return Err(EdgeError::InvalidConfig {
                field: "election.interval".to_string(),
                reason: "Election interval must be non-zero".to_string(),
            });
        }

        if self.spot_check.enabled && self.spot_check.interval.is_zero() {
            return Err(EdgeError::InvalidConfig {
                field: "spot_check.interval".to_string(),
                reason: "Spot check interval must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            coordinator: CoordinatorConfig {
                name: "dev-coordinator".to_string(),
                area: String::new(),
            },
            server: ServerConfig {
                bind_addr: "127.0.0.1:3456".parse().expect("valid socket address"),
            },
            grouping: GroupingConfig::default(),
            replication: ReplicationConfig {
                dispatch_timeout: Duration::from_secs(5),
                content_cache_capacity: 256,
            },
            election: ElectionConfig {
                enabled: true,
                interval: Duration::from_secs(60),
            },
            spot_check: SpotCheckConfig {
                enabled: true,
                interval: Duration::from_secs(120),
                verify_timeout: Duration::from_secs(10),
            },
            network: NetworkConfig::default(),
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                data_dir: PathBuf::from("/tmp/edgeplane/data"),
            },
            observability: ObservabilityConfig {
                metrics_enabled: false,
                log_level: "debug".to_string(),
                ..ObservabilityConfig::default()
            },
        }
    }
}

/// Coordinator identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Human-readable coordinator name.
    pub name: String,
    /// Geographic key of the area served by this coordinator. Content items are
    /// replicated into it. Empty means the whole fleet.
    #[serde(default)]
    pub area: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "edgeplane".to_string(),
            area: String::new(),
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the coordinator API.
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3456".parse().expect("valid socket address"),
        }
    }
}

/// Edge grouping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Groups accept joins only while their bandwidth total is below this mark.
    pub low_water_mark: u64,
    /// A join never pushes a group's bandwidth total above this mark.
    pub high_water_mark: u64,
}

impl GroupingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.high_water_mark == 0 {
            return Err(EdgeError::InvalidConfig {
                field: "grouping.high_water_mark".to_string(),
                reason: "High-water mark must be non-zero".to_string(),
            });
        }
        if self.low_water_mark > self.high_water_mark {
            return Err(EdgeError::InvalidConfig {
                field: "grouping.low_water_mark".to_string(),
                reason: "Low-water mark must not exceed the high-water mark".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            low_water_mark: 900,
            high_water_mark: 1024,
        }
    }
}

/// Replication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Deadline for one cache request to a worker.
    #[serde(with = "humantime_serde")]
    pub dispatch_timeout: Duration,
    /// Maximum number of content items kept in memory.
    pub content_cache_capacity: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(10),
            content_cache_capacity: 4096,
        }
    }
}

/// Validator election configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Run elections periodically.
    pub enabled: bool,
    /// Time between elections.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Spot check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotCheckConfig {
    /// Run spot checks periodically.
    pub enabled: bool,
    /// Time between spot check cycles.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Deadline for one verification request to a validator.
    #[serde(with = "humantime_serde")]
    pub verify_timeout: Duration,
}

impl Default for SpotCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10 * 60),
            verify_timeout: Duration::from_secs(30),
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Request timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// URL scheme used to build worker addresses.
    pub worker_scheme: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            worker_scheme: "http".to_string(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Everything in process memory.
    Memory,
    /// Replication records in RocksDB (requires the `rocksdb` feature).
    Rocksdb,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for persistent records.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: PathBuf::from("/var/lib/edgeplane/data"),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: "0.0.0.0:9090".parse().expect("valid socket address"),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else if let Some(h) = s.strip_suffix('h') {
            h.parse::<u64>()
                .map(|v| Duration::from_secs(v * 3600))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
