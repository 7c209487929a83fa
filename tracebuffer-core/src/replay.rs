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

//! Replay and Drain
//!
//! A replay takes the entire index (leaving it empty), keeps the entries
//! inside the requested window that are not yet stale, fetches their
//! payloads concurrently and forwards them downstream one by one in index
//! order.
//!
//! Semantics are exactly-once drain, at-most-once forward: every entry
//! present when the index is taken leaves it, whether it is matched,
//! fetched, forwarded or none of these. Nothing is retried and nothing is
//! put back.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{cutoff, TraceBuffer};
use crate::error::WindowError;
use crate::model::{TraceBatch, TraceMetadata};
use crate::store::bounded;

/// Optional time bounds of a replay request, both inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ReplayWindow {
    /// Parse RFC 3339 bounds. Absent and empty values mean unbounded.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, WindowError> {
        Ok(Self {
            start: parse_bound("start", start)?,
            end: parse_bound("end", end)?,
        })
    }

    /// Whether `meta` should be replayed given the staleness `cutoff`.
    pub fn admits(&self, meta: &TraceMetadata, cutoff: DateTime<Utc>) -> bool {
        if meta.time < cutoff {
            return false;
        }
        if self.start.is_some_and(|start| start > meta.time) {
            return false;
        }
        if self.end.is_some_and(|end| end < meta.time) {
            return false;
        }
        true
    }
}

fn parse_bound(
    param: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, WindowError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|source| WindowError::InvalidTimestamp {
                param,
                value: value.to_string(),
                source,
            }),
    }
}

impl TraceBuffer {
    /// Drain the index and forward the cached batches inside `window`.
    ///
    /// Returns the entries whose forward succeeded, in index order. Store
    /// calls are bounded by the configured store timeout and by `cancel`.
    pub async fn replay(
        &self,
        window: ReplayWindow,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<TraceMetadata> {
        let cutoff = cutoff(now, self.settings().expire);
        let drained = self.drain();
        let drained_count = drained.len();

        let selected: Vec<TraceMetadata> = drained
            .into_iter()
            .filter(|meta| {
                if meta.time < cutoff {
                    debug!(trace_id = %meta.id, time = %meta.time, "expired, skipped");
                }
                window.admits(meta, cutoff)
            })
            .collect();

        let fetched = join_all(selected.iter().map(|meta| self.fetch(meta, cancel))).await;

        let mut forwarded = Vec::with_capacity(selected.len());
        for (meta, batch) in selected.iter().zip(fetched) {
            let Some(batch) = batch else {
                continue;
            };
            match self.sink().forward(batch).await {
                Ok(()) => {
                    info!(trace_id = %meta.id, time = %meta.time, "replayed");
                    forwarded.push(*meta);
                }
                Err(e) => {
                    warn!(trace_id = %meta.id, error = %e, "failed to forward replayed batch")
                }
            }
        }

        info!(
            drained = drained_count,
            selected = selected.len(),
            forwarded = forwarded.len(),
            "replay finished"
        );
        forwarded
    }

    async fn fetch(
        &self,
        meta: &TraceMetadata,
        cancel: &CancellationToken,
    ) -> Option<TraceBatch> {
        let key = meta.key();
        let timeout = self.settings().store_timeout;

        let bytes = match bounded(self.store().get(&key), timeout, cancel).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(key = %key, "cached batch not found, probably expired");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read cached batch");
                return None;
            }
        };

        match self.codec().decode(&bytes) {
            Ok(batch) => Some(batch),
            Err(e) => {
                warn!(key = %key, error = %e, "failed to decode cached batch");
                None
            }
        }
    }
}
