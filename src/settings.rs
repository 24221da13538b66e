use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use config::{Config, ConfigError, Environment, File};
use reqwest::Url;
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};
use crate::gateway::{DocumentPolicy, GatewayConfig, InstallPolicy};
use crate::store::{StoreLimits, validate_store_name};

fn default_cache_name() -> String {
    "cachegate-v1".to_string()
}

fn default_client_timeout() -> u64 {
    30
}

fn default_upstream_timeout() -> u64 {
    60
}

fn default_max_header_size() -> usize {
    32 * 1024
}

fn default_max_request_body_size() -> usize {
    16 * 1024 * 1024
}

fn default_max_response_body_size() -> usize {
    64 * 1024 * 1024
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub listen: SocketAddr,
    pub origin: String,
    pub cache_dir: PathBuf,
    #[serde(default = "default_cache_name")]
    pub cache_name: String,
    #[serde(default)]
    pub precache: Vec<String>,
    #[serde(default)]
    pub install_policy: InstallPolicy,
    #[serde(default)]
    pub document_policy: DocumentPolicy,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size: usize,
    #[serde(default = "default_max_response_body_size")]
    pub max_response_body_size: usize,
    #[serde(default = "default_cache_max_entry_size")]
    pub cache_max_entry_size: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "default_cache_total_capacity")]
    pub cache_total_capacity: u64,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli)?;

        builder = builder.add_source(File::from(config_path.clone()).required(true));

        builder = builder.add_source(
            Environment::with_prefix("CACHEGATE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.apply_base_dir(&config_path);
        settings.validate()?;
        Ok(settings)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_entries: self.cache_max_entries,
            max_entry_size: self.cache_max_entry_size,
            max_bytes: self.cache_total_capacity,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            store_name: self.cache_name.clone(),
            precache: self.precache.clone(),
            install_policy: self.install_policy,
            document_policy: self.document_policy,
        }
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

fn resolve_config_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = cli.config_path() {
        return Ok(path.to_path_buf());
    }

    for candidate in default_config_candidates() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    bail!(
        "no configuration file provided via --config and none found in default locations: {}",
        default_config_candidates()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/cachegate/cachegate.toml"),
        PathBuf::from("cachegate.toml"),
    ]
}

impl Settings {
    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        self.cache_dir = absolutize(&self.cache_dir, base_dir);
    }

    pub fn validate(&self) -> Result<()> {
        let origin = Url::parse(&self.origin)
            .with_context(|| format!("origin '{}' is not a valid url", self.origin))?;
        ensure!(
            matches!(origin.scheme(), "http" | "https"),
            "origin must use http or https (got '{}')",
            origin.scheme()
        );
        ensure!(
            origin.host_str().is_some(),
            "origin '{}' has no host",
            self.origin
        );
        validate_store_name(&self.cache_name)
            .with_context(|| format!("invalid cache_name '{}'", self.cache_name))?;
        for path in &self.precache {
            ensure!(
                path.starts_with('/'),
                "precache entries must be absolute paths (got '{path}')"
            );
        }
        ensure!(
            self.max_header_size > 0,
            "max_header_size must be greater than 0 (got {})",
            self.max_header_size
        );
        ensure!(
            self.max_request_body_size > 0,
            "max_request_body_size must be greater than 0 (got {})",
            self.max_request_body_size
        );
        ensure!(
            self.max_response_body_size > 0,
            "max_response_body_size must be greater than 0 (got {})",
            self.max_response_body_size
        );
        ensure!(
            self.client_timeout > 0,
            "client_timeout must be greater than 0 seconds (got {})",
            self.client_timeout
        );
        ensure!(
            self.upstream_timeout > 0,
            "upstream_timeout must be greater than 0 seconds (got {})",
            self.upstream_timeout
        );
        ensure!(
            self.cache_max_entry_size > 0,
            "cache_max_entry_size must be greater than 0 (got {})",
            self.cache_max_entry_size
        );
        ensure!(
            self.cache_max_entries > 0,
            "cache_max_entries must be greater than 0 (got {})",
            self.cache_max_entries
        );
        ensure!(
            self.cache_total_capacity > 0,
            "cache_total_capacity must be greater than 0 (got {})",
            self.cache_total_capacity
        );
        if let Some(metrics) = self.metrics_listen {
            ensure!(
                metrics != self.listen || metrics.port() == 0,
                "metrics_listen must differ from listen ({metrics})"
            );
        }
        Ok(())
    }
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn default_cache_max_entry_size() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_cache_total_capacity() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}
