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

//! Wire codec for cached batches

use prost::Message;

use crate::error::CodecError;
use crate::model::TraceBatch;

pub trait TraceCodec: Send + Sync {
    fn encode(&self, batch: &TraceBatch) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<TraceBatch, CodecError>;
}

/// OTLP protobuf encoding, identical to what travels over the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufCodec;

impl TraceCodec for ProtobufCodec {
    fn encode(&self, batch: &TraceBatch) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(batch.encoded_len());
        batch.encode(&mut buf)?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<TraceBatch, CodecError> {
        Ok(TraceBatch::decode(bytes)?)
    }
}
