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

pub mod api;
pub mod config;
pub mod exporter;
pub mod otlp_service;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{flash_traces, health_check, AppState};
use config::ServerConfig;
use exporter::OtlpExporter;
use tracebuffer_core::{
    BufferConfig, MemoryStore, ProtobufCodec, RedisStore, StoreBackend, TraceBuffer, TraceStore,
};

const DEFAULT_LOG_FILTER: &str = "tracebuffer_server=info,tracebuffer_core=info,tower_http=info";

/// Replay and health routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/flash", get(flash_traces))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_store(config: &BufferConfig) -> Result<Arc<dyn TraceStore>> {
    let store: Arc<dyn TraceStore> = match config.store {
        StoreBackend::Redis => {
            tracing::info!("Using Redis store at {}", config.redis_url);
            Arc::new(
                RedisStore::new(&config.redis_url, config.db_name)
                    .context("invalid redis_url")?,
            )
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-process memory store; buffered payloads do not survive restarts");
            Arc::new(MemoryStore::default())
        }
    };
    Ok(store)
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    init_tracing(config.log.json);

    tracing::info!("Starting tracebuffer");
    tracing::info!("Configuration: {:#?}", config);

    // Invalid configuration is fatal, nothing is corrected
    let settings = config.validate()?;

    let shutdown = CancellationToken::new();
    let store = build_store(&config.buffer)?;
    let sink = OtlpExporter::new(&settings.exporter_endpoint, settings.exporter_timeout)
        .context("invalid exporter endpoint")?;
    tracing::info!("Forwarding to {}", settings.exporter_endpoint);

    let buffer = Arc::new(
        TraceBuffer::new(settings.buffer, store, Arc::new(ProtobufCodec), Arc::new(sink))
            .with_shutdown(shutdown.clone()),
    );

    let app = build_router(AppState::new(buffer.clone(), shutdown.clone()));

    let replay_addr = config.buffer.replay_addr();
    let listener = tokio::net::TcpListener::bind(&replay_addr)
        .await
        .with_context(|| format!("failed to bind replay listener on {replay_addr}"))?;
    tracing::info!("Replay endpoint listening on http://{}", listener.local_addr()?);

    let http_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    let otlp_shutdown = shutdown.clone();
    let otlp_handle = tokio::spawn(async move {
        if let Err(e) =
            otlp_service::start_otlp_server(settings.receiver_addr, buffer, otlp_shutdown).await
        {
            tracing::error!("OTLP gRPC server error: {}", e);
        }
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    // Either server stopping takes the other one down with it
    tokio::select! {
        _ = server_handle => {
            tracing::info!("HTTP server stopped");
        }
        _ = otlp_handle => {
            tracing::info!("OTLP gRPC server stopped");
        }
    }
    shutdown.cancel();

    Ok(())
}
