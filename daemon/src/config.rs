use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Name recorded in claims and results. Falls back to the host name.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_root() -> PathBuf { PathBuf::from(common::DEFAULT_SHARE_ROOT) }
fn default_timezone() -> String { common::DEFAULT_TIMEZONE.to_string() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_jitter")]
    pub poll_jitter_ms: u64,
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub translate_timeout_secs: Option<u64>,
    #[serde(default = "default_reap")]
    pub reap: bool,
}

fn default_poll_interval() -> u64 { 3000 }
fn default_poll_jitter() -> u64 { 1000 }
fn default_lease_timeout() -> u64 { 300 }
fn default_heartbeat_interval() -> u64 { 30 }
fn default_reap() -> bool { true }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            poll_jitter_ms: default_poll_jitter(),
            lease_timeout_secs: default_lease_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            translate_timeout_secs: None,
            reap: default_reap(),
        }
    }
}

impl WorkerConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn translate_timeout(&self) -> Option<Duration> {
        self.translate_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// `{src}` and `{tgt}` are replaced with the normalized language codes.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Searched before `PATH`.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

fn default_program() -> String { "trans".to_string() }
fn default_args() -> Vec<String> {
    ["-b", "-no-auto", "-s", "{src}", "-t", "{tgt}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            search_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    pub output: Option<PathBuf>,
    /// Translator diagnostics go here instead of the main log.
    pub jobs_output: Option<PathBuf>,
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: None,
            jobs_output: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub translator: TranslatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Detect file type by extension and load
    pub fn from_file(path: &Path) -> Result<Self> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "toml" => Self::from_toml_file(path),
            _ => Err(anyhow::anyhow!("Unsupported config file format. Use .yaml, .yml, or .toml")),
        }
    }

    /// Explicit path if given, else the system config if it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let system = Path::new(common::DEFAULT_CONFIG_PATH);
                if system.exists() {
                    Self::from_file(system)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn timezone(&self) -> Result<Tz> {
        common::time::parse_tz(&self.store.timezone)
            .ok_or_else(|| anyhow::anyhow!("Unknown timezone: {}", self.store.timezone))
    }

    pub fn node_name(&self) -> Result<String> {
        if let Some(name) = self.node.name.as_ref().filter(|n| !n.trim().is_empty()) {
            return Ok(name.trim().to_string());
        }
        let host = nix::unistd::gethostname().context("Failed to read host name")?;
        host.into_string()
            .map_err(|_| anyhow::anyhow!("Host name is not valid UTF-8"))
    }
}
