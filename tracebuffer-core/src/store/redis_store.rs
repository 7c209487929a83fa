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

//! Redis-backed store
//!
//! The connection is established on first use so that an unreachable Redis
//! degrades individual calls instead of refusing startup.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

use super::TraceStore;
use crate::error::StoreError;

pub struct RedisStore {
    client: Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisStore {
    /// `url` is either `host:port` or a full `redis://` URL; `db` selects
    /// the logical database and overrides any database in the URL.
    pub fn new(url: &str, db: i64) -> Result<Self, StoreError> {
        let url = if url.contains("://") {
            url.to_string()
        } else {
            format!("redis://{url}")
        };
        let mut info = url.as_str().into_connection_info()?;
        info.redis.db = db;

        Ok(Self {
            client: Client::open(info)?,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let manager = self.client.get_connection_manager().await?;
                info!(db = self.client.get_connection_info().redis.db, "connected to redis");
                Ok::<_, StoreError>(manager)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl TraceStore for RedisStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        // PX keeps sub-second expiries intact.
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }
}
