//! TOML configuration for the pipeline demo binary, loaded once at
//! startup. Follows the same raw-struct/validate split the workspace's
//! teacher uses for its own `forwarder` service config.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    schema_version: Option<u32>,
    queues_root: Option<String>,
    input_device: Option<String>,
    output_device: Option<String>,
    read_timeout_ms: Option<u64>,
    max_batch_read_count: Option<usize>,
    use_transactions: Option<bool>,
    store: Option<RawStoreConfig>,
    supervisor: Option<RawSupervisorConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct RawStoreConfig {
    root: Option<String>,
    size_threshold_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSupervisorConfig {
    instance_count: Option<u32>,
    shutdown_timeout_ms: Option<u64>,
    live_check_interval_ms: Option<u64>,
    live_check_timeout_ms: Option<u64>,
    restart_on_failure: Option<bool>,
}

/// Offloads large message bodies to a content-addressed store instead of
/// writing them inline into the output queue. Absent from the config
/// means every message is written inline.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub root: String,
    pub size_threshold_bytes: u64,
}

/// Runs the pipeline as `instance_count` supervised worker processes
/// instead of a single in-process loop.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub instance_count: u32,
    pub shutdown_timeout: Duration,
    pub live_check_interval: Duration,
    pub live_check_timeout: Duration,
    pub restart_on_failure: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineDemoConfig {
    pub queues_root: String,
    pub input_device: String,
    pub output_device: String,
    pub read_timeout: Duration,
    pub max_batch_read_count: usize,
    pub use_transactions: bool,
    pub store: Option<StoreConfig>,
    pub supervisor: Option<SupervisorConfig>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

const SUPPORTED_SCHEMA_VERSION: u32 = 1;

pub fn load_config(path: impl AsRef<Path>) -> Result<PipelineDemoConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config '{}': {}", path.display(), e)))?;
    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<PipelineDemoConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(raw)
}

fn validate(raw: RawConfig) -> Result<PipelineDemoConfig, ConfigError> {
    let schema_version = raw.schema_version.unwrap_or(SUPPORTED_SCHEMA_VERSION);
    if schema_version != SUPPORTED_SCHEMA_VERSION {
        return Err(ConfigError::InvalidValue(format!(
            "unsupported schema_version {schema_version}, expected {SUPPORTED_SCHEMA_VERSION}"
        )));
    }

    let queues_root = raw.queues_root.ok_or_else(|| ConfigError::MissingField("queues_root".to_owned()))?;
    let input_device = raw.input_device.ok_or_else(|| ConfigError::MissingField("input_device".to_owned()))?;
    let output_device = raw.output_device.ok_or_else(|| ConfigError::MissingField("output_device".to_owned()))?;

    if input_device.is_empty() || output_device.is_empty() {
        return Err(ConfigError::InvalidValue("input_device and output_device must be non-empty".to_owned()));
    }

    let store = match raw.store {
        Some(s) => Some(StoreConfig {
            root: s.root.ok_or_else(|| ConfigError::MissingField("store.root".to_owned()))?,
            size_threshold_bytes: s.size_threshold_bytes.unwrap_or(1_048_576),
        }),
        None => None,
    };

    let supervisor = match raw.supervisor {
        Some(s) => {
            let instance_count = s.instance_count.unwrap_or(1);
            if instance_count == 0 {
                return Err(ConfigError::InvalidValue("supervisor.instance_count must be at least 1".to_owned()));
            }
            Some(SupervisorConfig {
                instance_count,
                shutdown_timeout: Duration::from_millis(s.shutdown_timeout_ms.unwrap_or(5_000)),
                live_check_interval: Duration::from_millis(s.live_check_interval_ms.unwrap_or(5_000)),
                live_check_timeout: Duration::from_millis(s.live_check_timeout_ms.unwrap_or(2_000)),
                restart_on_failure: s.restart_on_failure.unwrap_or(true),
            })
        }
        None => None,
    };

    Ok(PipelineDemoConfig {
        queues_root,
        input_device,
        output_device,
        read_timeout: Duration::from_millis(raw.read_timeout_ms.unwrap_or(1_000)),
        max_batch_read_count: raw.max_batch_read_count.unwrap_or(10),
        use_transactions: raw.use_transactions.unwrap_or(true),
        store,
        supervisor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let config = load_config_from_str(
            r#"
            queues_root = "/tmp/queues"
            input_device = "in"
            output_device = "out"
            "#,
        )
        .unwrap();

        assert_eq!(config.queues_root, "/tmp/queues");
        assert_eq!(config.max_batch_read_count, 10);
        assert!(config.use_transactions);
        assert!(config.store.is_none());
        assert!(config.supervisor.is_none());
    }

    #[test]
    fn rejects_unsupported_schema_version() {
        let err = load_config_from_str(
            r#"
            schema_version = 2
            queues_root = "/tmp/queues"
            input_device = "in"
            output_device = "out"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = load_config_from_str(r#"queues_root = "/tmp/queues""#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn parses_store_and_supervisor_sections() {
        let config = load_config_from_str(
            r#"
            queues_root = "/tmp/queues"
            input_device = "in"
            output_device = "out"

            [store]
            root = "/tmp/store"
            size_threshold_bytes = 4096

            [supervisor]
            instance_count = 3
            restart_on_failure = false
            "#,
        )
        .unwrap();

        let store = config.store.unwrap();
        assert_eq!(store.root, "/tmp/store");
        assert_eq!(store.size_threshold_bytes, 4096);

        let supervisor = config.supervisor.unwrap();
        assert_eq!(supervisor.instance_count, 3);
        assert!(!supervisor.restart_on_failure);
    }
}
