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

//! Error types for the buffering subsystem
//!
//! Only [`ConfigError`] and [`WindowError`] ever reach a caller. Store, codec
//! and sink failures are absorbed per entry by [`crate::TraceBuffer`] and
//! only show up in logs and in [`crate::IngestOutcome`].

use std::time::Duration;
use thiserror::Error;

/// Invalid configuration detected at startup. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} invalid: {reason}")]
    InvalidDuration { field: &'static str, reason: String },

    #[error("redis_url invalid: must not be empty")]
    EmptyRedisUrl,

    #[error("host invalid: must not be empty")]
    EmptyHost,

    #[error("port invalid: {0} is outside 0..=65535")]
    PortOutOfRange(u32),

    #[error("limit invalid: must be greater than 0")]
    ZeroLimit,

    #[error("rate invalid: {0} is outside 0..=100")]
    RateOutOfRange(u32),

    #[error("{field} invalid: {reason}")]
    InvalidAddress { field: &'static str, reason: String },
}

/// Failure talking to the backing key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store call cancelled")]
    Cancelled,
}

/// Failure encoding or decoding a trace batch.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("decode failed: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Failure forwarding a batch downstream.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("downstream rejected batch: {0}")]
    Rejected(String),

    #[error("downstream unavailable: {0}")]
    Unavailable(String),
}

/// Malformed replay window parameter.
#[derive(Debug, Error)]
pub enum WindowError {
    #[error("{param} is not an RFC 3339 timestamp: {value:?} ({source})")]
    InvalidTimestamp {
        param: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}
