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

//! End-to-end tests for the replay endpoint and the OTLP legs.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::TraceServiceServer;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};
use tracebuffer_core::{
    BufferSettings, HeadSampler, MemoryStore, ProtobufCodec, SinkError, TraceBatch, TraceBuffer,
    TraceSink,
};
use tracebuffer_server::api::AppState;
use tracebuffer_server::build_router;
use tracebuffer_server::exporter::OtlpExporter;
use tracebuffer_server::otlp_service::OtlpTraceService;

#[derive(Default)]
struct RecordingSink {
    forwarded: Mutex<Vec<TraceBatch>>,
}

#[async_trait]
impl TraceSink for RecordingSink {
    async fn forward(&self, batch: TraceBatch) -> Result<(), SinkError> {
        self.forwarded.lock().push(batch);
        Ok(())
    }
}

fn settings() -> BufferSettings {
    BufferSettings {
        expire: StdDuration::from_secs(60),
        limit: 100,
        rate: 0,
        store_timeout: StdDuration::from_secs(1),
    }
}

fn batch_at(id: u8, start: DateTime<Utc>) -> TraceBatch {
    TraceBatch {
        resource_spans: vec![ResourceSpans {
            scope_spans: vec![ScopeSpans {
                spans: vec![Span {
                    trace_id: vec![id; 16],
                    span_id: vec![id; 8],
                    name: format!("span-{id}"),
                    start_time_unix_nano: start.timestamp_nanos_opt().unwrap() as u64,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn setup() -> (Arc<TraceBuffer>, Arc<RecordingSink>, axum::Router) {
    let sink = Arc::new(RecordingSink::default());
    // Head sampling off so the sink only records replayed batches
    let buffer = Arc::new(
        TraceBuffer::new(
            settings(),
            Arc::new(MemoryStore::default()),
            Arc::new(ProtobufCodec),
            sink.clone(),
        )
        .with_sampler(HeadSampler::disabled()),
    );
    let router = build_router(AppState::new(buffer.clone(), CancellationToken::new()));
    (buffer, sink, router)
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

async fn get(router: axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_flash_replays_window() {
    let (buffer, sink, router) = setup();
    let now = Utc::now();

    buffer.ingest(batch_at(1, now - Duration::seconds(5)), now).await;
    buffer.ingest(batch_at(2, now - Duration::seconds(40)), now).await;

    let uri = format!(
        "/flash?start={}&end={}",
        rfc3339(now - Duration::seconds(20)),
        rfc3339(now + Duration::seconds(20))
    );
    let (status, body) = get(router, &uri).await;
    assert_eq!(status, StatusCode::OK);

    let replayed: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0]["id"], "01".repeat(16));
    assert!(replayed[0]["time"].is_string());

    let forwarded = sink.forwarded.lock();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0], batch_at(1, now - Duration::seconds(5)));

    // The entry outside the window was drained as well
    assert_eq!(buffer.buffered(), 0);
}

#[tokio::test]
async fn test_flash_without_bounds_replays_everything() {
    let (buffer, sink, router) = setup();
    let now = Utc::now();

    for id in 1..=3 {
        buffer
            .ingest(batch_at(id, now - Duration::seconds(i64::from(id))), now)
            .await;
    }

    let (status, body) = get(router, "/flash?start=&end=").await;
    assert_eq!(status, StatusCode::OK);

    let replayed: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(replayed.len(), 3);
    // Index order: oldest first
    assert_eq!(replayed[0]["id"], "03".repeat(16));
    assert_eq!(sink.forwarded.lock().len(), 3);
}

#[tokio::test]
async fn test_flash_end_bounds_earliest_span_start() {
    let (buffer, sink, router) = setup();
    let now = Utc::now();

    // Starts before `end` but is still running long after it
    let mut long_running = batch_at(1, now - Duration::seconds(30));
    long_running.resource_spans[0].scope_spans[0].spans[0].end_time_unix_nano =
        now.timestamp_nanos_opt().unwrap() as u64;
    buffer.ingest(long_running.clone(), now).await;
    buffer.ingest(batch_at(2, now - Duration::seconds(10)), now).await;

    let uri = format!("/flash?end={}", rfc3339(now - Duration::seconds(20)));
    let (status, body) = get(router, &uri).await;
    assert_eq!(status, StatusCode::OK);

    let replayed: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0]["id"], "01".repeat(16));
    assert_eq!(sink.forwarded.lock().as_slice(), &[long_running]);
}

#[tokio::test]
async fn test_flash_empty_index() {
    let (_buffer, sink, router) = setup();

    let (status, body) = get(router, "/flash").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"[]");
    assert!(sink.forwarded.lock().is_empty());
}

#[tokio::test]
async fn test_flash_bad_timestamp_leaves_index_alone() {
    let (buffer, sink, router) = setup();
    let now = Utc::now();
    buffer.ingest(batch_at(1, now - Duration::seconds(5)), now).await;

    let (status, body) = get(router, "/flash?start=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(error["error"].as_str().unwrap().contains("start"));

    assert_eq!(buffer.buffered(), 1);
    assert!(sink.forwarded.lock().is_empty());
}

#[tokio::test]
async fn test_health_reports_occupancy() {
    let (buffer, _sink, router) = setup();
    let now = Utc::now();
    buffer.ingest(batch_at(1, now - Duration::seconds(5)), now).await;

    let (status, body) = get(router, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["buffered"], 1);
    assert_eq!(health["capacity"], 100);
}

#[tokio::test]
async fn test_otlp_receiver_buffers_exports() {
    let (buffer, sink, router) = setup();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let service = OtlpTraceService::new(buffer.clone());
    let server = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(TraceServiceServer::new(service))
            .serve_with_incoming_shutdown(
                tokio_stream::wrappers::TcpListenerStream::new(listener),
                async move { server_shutdown.cancelled().await },
            )
            .await
    });

    let exporter =
        OtlpExporter::new(&format!("http://{addr}"), StdDuration::from_secs(5)).unwrap();
    let batch = batch_at(7, Utc::now() - Duration::seconds(2));
    exporter.forward(batch.clone()).await.unwrap();

    assert_eq!(buffer.buffered(), 1);

    let (status, _) = get(router, "/flash").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sink.forwarded.lock().as_slice(), &[batch]);

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_exporter_reports_unreachable_collector() {
    let exporter =
        OtlpExporter::new("http://127.0.0.1:1", StdDuration::from_millis(500)).unwrap();
    let result = exporter.forward(batch_at(1, Utc::now())).await;
    assert!(result.is_err());
}
