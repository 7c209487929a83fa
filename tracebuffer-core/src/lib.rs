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

//! Retroactive trace buffering
//!
//! Incoming OTLP batches are optionally head-sampled straight to the next
//! hop and otherwise held in a TTL key-value store, tracked by a bounded
//! in-memory index. A later replay request drains the index and forwards
//! the batches inside a time window, giving tail sampling decided after
//! the fact.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod extract;
pub mod index;
pub mod model;
pub mod replay;
pub mod sampler;
pub mod sink;
pub mod store;

pub use buffer::{Disposition, IngestOutcome, TraceBuffer};
pub use codec::{ProtobufCodec, TraceCodec};
pub use config::{BufferConfig, BufferSettings, StoreBackend};
pub use error::{CodecError, ConfigError, SinkError, StoreError, WindowError};
pub use extract::extract_metadata;
pub use index::TraceIndex;
pub use model::{make_key, TraceBatch, TraceId, TraceMetadata, KEY_PREFIX};
pub use replay::ReplayWindow;
pub use sampler::HeadSampler;
pub use sink::TraceSink;
pub use store::{MemoryStore, RedisStore, TraceStore};
