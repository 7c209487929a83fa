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

//! Backing key-value store
//!
//! The store owns payload lifetime through its TTL. An index entry whose
//! payload already expired is an ordinary miss (`Ok(None)`), never an error.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Write `value` under `key`, expiring after `ttl`.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Read `key`. Expired or never-written keys are `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Run a store call under a deadline and a cancellation signal.
///
/// A cancelled token always wins, even over a call that is already ready.
pub(crate) async fn bounded<T, F>(
    call: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        res = tokio::time::timeout(timeout, call) => match res {
            Ok(inner) => inner,
            Err(_) => Err(StoreError::Timeout(timeout)),
        },
    }
}
