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

//! Representative identity extraction
//!
//! A whole batch is cached under a single key: the trace id of its
//! earliest-starting span. Batches that carry several traces are therefore
//! only retrievable under that one id.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{TraceBatch, TraceId, TraceMetadata};

/// Pick the span with the smallest start instant strictly before `now`.
///
/// Traversal is resource → scope → span in wire order; on equal start
/// instants the first span seen wins. Returns `None` when no span qualifies.
pub fn extract_metadata(batch: &TraceBatch, now: DateTime<Utc>) -> Option<TraceMetadata> {
    let mut earliest: Option<TraceMetadata> = None;

    for resource_spans in &batch.resource_spans {
        for scope_spans in &resource_spans.scope_spans {
            for span in &scope_spans.spans {
                let Some(start) = start_instant(span.start_time_unix_nano) else {
                    continue;
                };
                if start >= now {
                    continue;
                }
                if earliest.is_some_and(|current| current.time <= start) {
                    continue;
                }
                match TraceId::from_slice(&span.trace_id) {
                    Some(id) => earliest = Some(TraceMetadata::new(start, id)),
                    None => debug!(
                        trace_id_len = span.trace_id.len(),
                        "skipping span with malformed trace id"
                    ),
                }
            }
        }
    }

    earliest
}

fn start_instant(unix_nanos: u64) -> Option<DateTime<Utc>> {
    i64::try_from(unix_nanos)
        .ok()
        .map(DateTime::from_timestamp_nanos)
}
