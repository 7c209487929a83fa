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

//! Batch metadata and store keys

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// One incoming batch of spans, exactly as received over OTLP.
pub type TraceBatch =
    opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;

/// Prefix of every key written to the backing store.
pub const KEY_PREFIX: &str = "trace:";

/// 16-byte OTLP trace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TraceId([u8; 16]);

impl TraceId {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Build an id from the raw `trace_id` field of a span.
    ///
    /// An empty field is the OTLP "empty" id and maps to all zeros. Any
    /// other length than 16 cannot be keyed.
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        match raw.len() {
            0 => Some(Self::default()),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(raw);
                Some(Self(bytes))
            }
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The representative identity and start instant of one cached batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceMetadata {
    pub time: DateTime<Utc>,
    pub id: TraceId,
}

impl TraceMetadata {
    pub fn new(time: DateTime<Utc>, id: TraceId) -> Self {
        Self { time, id }
    }

    /// Store key under which the batch for this entry lives.
    pub fn key(&self) -> String {
        make_key(&self.id)
    }
}

/// `trace:` followed by the lowercase hex rendering of the id.
pub fn make_key(id: &TraceId) -> String {
    format!("{KEY_PREFIX}{id}")
}
