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

//! OTLP/gRPC exporter: the next hop for sampled and replayed batches.

use async_trait::async_trait;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::warn;

use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use tracebuffer_core::{SinkError, TraceBatch, TraceSink};

/// Forwards batches to a downstream OTLP collector.
///
/// The channel connects lazily, so a collector that is down at startup
/// only shows up as failed forwards.
#[derive(Clone)]
pub struct OtlpExporter {
    client: TraceServiceClient<Channel>,
}

impl OtlpExporter {
    /// Must be called from within a tokio runtime.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(endpoint.to_string())?
            .timeout(timeout)
            .connect_lazy();

        Ok(Self {
            client: TraceServiceClient::new(channel),
        })
    }
}

#[async_trait]
impl TraceSink for OtlpExporter {
    async fn forward(&self, batch: TraceBatch) -> Result<(), SinkError> {
        let mut client = self.client.clone();
        let response = client.export(batch).await.map_err(|status| match status.code() {
            Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
                SinkError::Unavailable(status.message().to_string())
            }
            _ => SinkError::Rejected(format!("{}: {}", status.code(), status.message())),
        })?;

        if let Some(partial) = response.into_inner().partial_success {
            if partial.rejected_spans > 0 {
                warn!(
                    rejected_spans = partial.rejected_spans,
                    message = %partial.error_message,
                    "Collector rejected part of a forwarded batch"
                );
            }
        }

        Ok(())
    }
}
