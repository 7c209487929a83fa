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

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tracebuffer_core::{ReplayWindow, TraceMetadata};
use tracing::{info, warn};

use crate::api::{ApiError, AppState};

/// Body sent when the replayed list cannot be rendered as JSON.
pub const SERIALIZE_FALLBACK: &str = "exported. can not serialize.";

/// Query parameters for a replay
#[derive(Debug, Default, Deserialize)]
pub struct FlashParams {
    /// RFC 3339 lower bound on a batch's earliest span start
    pub start: Option<String>,
    /// RFC 3339 upper bound on the same instant
    pub end: Option<String>,
}

/// GET /flash - Replay buffered batches inside a time window
///
/// Every call drains the whole index, not just the window. Entries outside
/// the window, stale entries and entries whose payload has expired are
/// discarded without being forwarded. A bad timestamp is rejected before
/// the index is touched.
///
/// Responds with the `{time, id}` pairs that were forwarded, in index order.
pub async fn flash_traces(
    State(state): State<AppState>,
    Query(params): Query<FlashParams>,
) -> Result<Response, ApiError> {
    let window = ReplayWindow::parse(params.start.as_deref(), params.end.as_deref())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let now = Utc::now();
    let buffer = state.buffer.clone();
    let cancel = state.shutdown.child_token();

    // Runs detached so a client hanging up cannot stop forwarding after the drain
    let replayed = tokio::spawn(async move { buffer.replay(window, now, &cancel).await })
        .await
        .map_err(|e| ApiError::Internal(format!("replay task failed: {e}")))?;

    Ok(render(&replayed))
}

fn render(replayed: &[TraceMetadata]) -> Response {
    match serde_json::to_vec(replayed) {
        Ok(body) => {
            info!(count = replayed.len(), "Replay finished");
            ([(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(e) => {
            warn!(error = %e, count = replayed.len(), "Replay finished, response not serializable");
            SERIALIZE_FALLBACK.into_response()
        }
    }
}
