// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tonic::transport::Endpoint;
use tracebuffer_core::config::parse_duration;
use tracebuffer_core::{BufferConfig, BufferSettings, ConfigError, StoreBackend};

/// Tracebuffer Server Configuration
///
/// The buffer keys (`expire`, `redis_url`, `db_name`, `host`, `port`,
/// `limit`, `rate`, `store`, `store_timeout`) sit at the top level of the
/// file; the OTLP legs and logging have their own tables.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub receiver: ReceiverConfig,

    #[serde(default)]
    pub exporter: ExporterConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReceiverConfig {
    /// OTLP/gRPC listen address (e.g., "127.0.0.1:4317")
    #[serde(default = "default_receiver_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExporterConfig {
    /// Downstream OTLP/gRPC endpoint (e.g., "http://127.0.0.1:4319")
    #[serde(default = "default_exporter_endpoint")]
    pub endpoint: String,

    /// Per-export deadline
    #[serde(default = "default_exporter_timeout")]
    pub timeout: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogConfig {
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

// Default values
fn default_receiver_addr() -> String {
    "127.0.0.1:4317".to_string()
}

fn default_exporter_endpoint() -> String {
    "http://127.0.0.1:4319".to_string()
}

fn default_exporter_timeout() -> String {
    "10s".to_string()
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_receiver_addr(),
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: default_exporter_endpoint(),
            timeout: default_exporter_timeout(),
        }
    }
}

/// Validated server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub buffer: BufferSettings,
    pub receiver_addr: SocketAddr,
    pub exporter_endpoint: String,
    pub exporter_timeout: Duration,
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - TRACEBUFFER_EXPIRE: payload TTL / validity window (default: 1m)
    /// - TRACEBUFFER_REDIS_URL: Redis address (default: localhost:6379)
    /// - TRACEBUFFER_DB_NAME: Redis database (default: 0)
    /// - TRACEBUFFER_HOST / TRACEBUFFER_PORT: replay listener (default: localhost:8080)
    /// - TRACEBUFFER_LIMIT: index capacity (default: 1000)
    /// - TRACEBUFFER_RATE: head sampling percentage (default: 0)
    /// - TRACEBUFFER_STORE: `redis` or `memory` (default: redis)
    /// - TRACEBUFFER_OTLP_ADDR: OTLP/gRPC receiver address (default: 127.0.0.1:4317)
    /// - TRACEBUFFER_EXPORTER_ENDPOINT: downstream OTLP endpoint
    ///
    /// A variable that is set but cannot be parsed is an error.
    pub fn merge_env(&mut self) -> Result<()> {
        if let Some(v) = env_var("TRACEBUFFER_EXPIRE") {
            self.buffer.expire = v;
        }
        if let Some(v) = env_var("TRACEBUFFER_REDIS_URL") {
            self.buffer.redis_url = v;
        }
        if let Some(v) = env_var("TRACEBUFFER_DB_NAME") {
            self.buffer.db_name = parse_env("TRACEBUFFER_DB_NAME", &v)?;
        }
        if let Some(v) = env_var("TRACEBUFFER_HOST") {
            self.buffer.host = v;
        }
        if let Some(v) = env_var("TRACEBUFFER_PORT") {
            self.buffer.port = parse_env("TRACEBUFFER_PORT", &v)?;
        }
        if let Some(v) = env_var("TRACEBUFFER_LIMIT") {
            self.buffer.limit = parse_env("TRACEBUFFER_LIMIT", &v)?;
        }
        if let Some(v) = env_var("TRACEBUFFER_RATE") {
            self.buffer.rate = parse_env("TRACEBUFFER_RATE", &v)?;
        }
        if let Some(v) = env_var("TRACEBUFFER_STORE") {
            self.buffer.store = parse_backend(&v)?;
        }
        if let Some(v) = env_var("TRACEBUFFER_OTLP_ADDR") {
            self.receiver.listen_addr = v;
        }
        if let Some(v) = env_var("TRACEBUFFER_EXPORTER_ENDPOINT") {
            self.exporter.endpoint = v;
        }
        Ok(())
    }

    /// Load configuration with priority: env > file > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        config.merge_env()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<ServerSettings, ConfigError> {
        let buffer = self.buffer.validate()?;

        let receiver_addr = self.receiver.listen_addr.parse().map_err(|e| {
            ConfigError::InvalidAddress {
                field: "receiver.listen_addr",
                reason: format!("{e}"),
            }
        })?;

        Endpoint::from_shared(self.exporter.endpoint.clone()).map_err(|e| {
            ConfigError::InvalidAddress {
                field: "exporter.endpoint",
                reason: format!("{e}"),
            }
        })?;

        let exporter_timeout = parse_duration(&self.exporter.timeout)
            .and_then(|d| {
                if d.is_zero() {
                    Err("must be greater than zero".to_string())
                } else {
                    Ok(d)
                }
            })
            .map_err(|reason| ConfigError::InvalidDuration {
                field: "exporter.timeout",
                reason,
            })?;

        Ok(ServerSettings {
            buffer,
            receiver_addr,
            exporter_endpoint: self.exporter.endpoint.clone(),
            exporter_timeout,
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{name}={value:?} is not a valid number"))
}

pub(crate) fn parse_backend(value: &str) -> Result<StoreBackend> {
    match value.trim().to_ascii_lowercase().as_str() {
        "redis" => Ok(StoreBackend::Redis),
        "memory" => Ok(StoreBackend::Memory),
        other => anyhow::bail!("unknown store backend {other:?} (expected redis or memory)"),
    }
}
