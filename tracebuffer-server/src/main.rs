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

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracebuffer_core::StoreBackend;
use tracebuffer_server::{config::ServerConfig, run_server};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How long payloads stay in the store, e.g. "1m" (overrides config file)
    #[arg(long)]
    expire: Option<String>,

    /// Redis address (overrides config file)
    #[arg(long)]
    redis_url: Option<String>,

    /// Redis database number (overrides config file)
    #[arg(long)]
    db_name: Option<i64>,

    /// Replay listener host (overrides config file)
    #[arg(long)]
    host: Option<String>,

    /// Replay listener port (overrides config file)
    #[arg(long)]
    port: Option<u32>,

    /// Index capacity (overrides config file)
    #[arg(long)]
    limit: Option<usize>,

    /// Head sampling percentage, 0-100 (overrides config file)
    #[arg(long)]
    rate: Option<u32>,

    /// Payload store backend (overrides config file)
    #[arg(long, value_enum)]
    store: Option<StoreArg>,

    /// OTLP/gRPC receiver address (overrides config file)
    #[arg(long)]
    otlp_addr: Option<String>,

    /// Downstream OTLP/gRPC endpoint (overrides config file)
    #[arg(long)]
    exporter_endpoint: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "TRACEBUFFER_LOG_JSON")]
    log_json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreArg {
    Redis,
    Memory,
}

impl From<StoreArg> for StoreBackend {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Redis => StoreBackend::Redis,
            StoreArg::Memory => StoreBackend::Memory,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = ServerConfig::load(args.config)?;

    // Apply CLI overrides
    if let Some(expire) = args.expire {
        config.buffer.expire = expire;
    }
    if let Some(url) = args.redis_url {
        config.buffer.redis_url = url;
    }
    if let Some(db) = args.db_name {
        config.buffer.db_name = db;
    }
    if let Some(host) = args.host {
        config.buffer.host = host;
    }
    if let Some(port) = args.port {
        config.buffer.port = port;
    }
    if let Some(limit) = args.limit {
        config.buffer.limit = limit;
    }
    if let Some(rate) = args.rate {
        config.buffer.rate = rate;
    }
    if let Some(store) = args.store {
        config.buffer.store = store.into();
    }
    if let Some(addr) = args.otlp_addr {
        config.receiver.listen_addr = addr;
    }
    if let Some(endpoint) = args.exporter_endpoint {
        config.exporter.endpoint = endpoint;
    }
    if args.log_json {
        config.log.json = true;
    }

    // Run server
    run_server(config).await
}
