// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Buffer configuration
//!
//! [`BufferConfig`] is the raw, user-facing surface. [`BufferConfig::validate`]
//! turns it into immutable [`BufferSettings`] or refuses with a
//! [`ConfigError`]; nothing is corrected silently.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// TTL of cached payloads and width of the validity window (e.g. "1m")
    #[serde(default = "default_expire")]
    pub expire: String,

    /// Redis address, `host:port` or `redis://...`
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Redis logical database
    #[serde(default)]
    pub db_name: i64,

    /// Replay endpoint bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Replay endpoint bind port
    #[serde(default = "default_port")]
    pub port: u32,

    /// Index capacity
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Head sampling percentage, 0..=100
    #[serde(default)]
    pub rate: u32,

    #[serde(default)]
    pub store: StoreBackend,

    /// Deadline for a single store call
    #[serde(default = "default_store_timeout")]
    pub store_timeout: String,
}

fn default_expire() -> String {
    "1m".to_string()
}

fn default_redis_url() -> String {
    "localhost:6379".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u32 {
    8080
}

fn default_limit() -> usize {
    1000
}

fn default_store_timeout() -> String {
    "5s".to_string()
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            expire: default_expire(),
            redis_url: default_redis_url(),
            db_name: 0,
            host: default_host(),
            port: default_port(),
            limit: default_limit(),
            rate: 0,
            store: StoreBackend::default(),
            store_timeout: default_store_timeout(),
        }
    }
}

/// Validated, immutable settings consumed by [`crate::TraceBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSettings {
    pub expire: Duration,
    pub limit: usize,
    pub rate: u32,
    pub store_timeout: Duration,
}

impl BufferConfig {
    pub fn validate(&self) -> Result<BufferSettings, ConfigError> {
        let expire = positive_duration("expire", &self.expire)?;
        let store_timeout = positive_duration("store_timeout", &self.store_timeout)?;

        if self.redis_url.trim().is_empty() {
            return Err(ConfigError::EmptyRedisUrl);
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port > u32::from(u16::MAX) {
            return Err(ConfigError::PortOutOfRange(self.port));
        }
        if self.limit == 0 {
            return Err(ConfigError::ZeroLimit);
        }
        if self.rate > 100 {
            return Err(ConfigError::RateOutOfRange(self.rate));
        }

        Ok(BufferSettings {
            expire,
            limit: self.limit,
            rate: self.rate,
            store_timeout,
        })
    }

    /// `host:port` of the replay listener.
    pub fn replay_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn positive_duration(field: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let value =
        parse_duration(raw).map_err(|reason| ConfigError::InvalidDuration { field, reason })?;
    if value.is_zero() {
        return Err(ConfigError::InvalidDuration {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// Parse a Go-style duration such as "1m", "1h30m", "250ms" or "1.5s".
///
/// Units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`. A bare number is rejected
/// unless it is `0`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut total_nanos = 0f64;
    let mut rest = s;

    while !rest.is_empty() {
        let num_len = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        if num_len == 0 {
            return Err(format!("expected a number in {s:?}"));
        }
        let literal = &rest[..num_len];
        let value: f64 = literal
            .parse()
            .map_err(|_| format!("invalid number {literal:?} in {s:?}"))?;
        rest = &rest[num_len..];

        let unit_len = rest.find(is_number).unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3_600e9,
            "" => return Err(format!("missing unit in {s:?}")),
            other => return Err(format!("unknown unit {other:?} in {s:?}")),
        };
        total_nanos += value * scale;
        rest = &rest[unit_len..];
    }

    if !total_nanos.is_finite() || total_nanos >= u64::MAX as f64 {
        return Err(format!("duration {s:?} out of range"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
