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

//! OTLP gRPC Service for receiving OpenTelemetry traces
//!
//! Every export is handed to the buffer and acknowledged. Buffering is a
//! side channel, so store or sink trouble never turns into an error for the
//! sending pipeline.

use anyhow::Result;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_server::{TraceService, TraceServiceServer},
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};

use tracebuffer_core::TraceBuffer;

/// OTLP trace service implementation
pub struct OtlpTraceService {
    buffer: Arc<TraceBuffer>,
}

impl OtlpTraceService {
    pub fn new(buffer: Arc<TraceBuffer>) -> Self {
        Self { buffer }
    }
}

#[tonic::async_trait]
impl TraceService for OtlpTraceService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let batch = request.into_inner();

        let span_count: usize = batch
            .resource_spans
            .iter()
            .map(|rs| {
                rs.scope_spans
                    .iter()
                    .map(|ss| ss.spans.len())
                    .sum::<usize>()
            })
            .sum();

        let outcome = self.buffer.ingest(batch, Utc::now()).await;
        debug!(
            span_count,
            sampled = outcome.sampled,
            disposition = ?outcome.disposition,
            "OTLP: batch buffered"
        );

        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

/// Serve the OTLP/gRPC receiver until `shutdown` fires.
pub async fn start_otlp_server(
    addr: SocketAddr,
    buffer: Arc<TraceBuffer>,
    shutdown: CancellationToken,
) -> Result<()> {
    let service = OtlpTraceService::new(buffer);

    info!("OTLP gRPC receiver listening on {}", addr);

    tonic::transport::Server::builder()
        .add_service(TraceServiceServer::new(service))
        .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
        .await?;

    info!("OTLP gRPC receiver stopped");
    Ok(())
}
