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

//! Trace Buffer - Ingestion, Head Sampling and Write-Through Caching
//!
//! Every batch handed to [`TraceBuffer::ingest`] goes through:
//!
//! ```text
//! batch ─► extract ─┬─► head sample ─► sink (immediate)
//!                   │
//!                   └─► staleness check ─► index.push ─► encode ─► store.put
//! ```
//!
//! Buffering is a best-effort side channel: `ingest` never fails. Store and
//! codec failures are logged and reported in the returned [`IngestOutcome`]
//! only. The in-memory index is updated before the store write, so a failed
//! write leaves an entry whose replay will simply miss.
//!
//! ## Locking
//!
//! The index lives behind one mutex. `push` and the drain in
//! [`TraceBuffer::replay`] each hold it for their whole mutation and never
//! across I/O. A push racing a drain lands either in the drained snapshot or
//! in the fresh index, never in between.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::TraceCodec;
use crate::config::BufferSettings;
use crate::extract::extract_metadata;
use crate::index::TraceIndex;
use crate::model::{TraceBatch, TraceMetadata};
use crate::sampler::HeadSampler;
use crate::sink::TraceSink;
use crate::store::{bounded, TraceStore};

/// What buffering did with a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No span started before the ingestion instant
    NoMetadata,
    /// Representative span already outside the validity window
    Stale(TraceMetadata),
    /// Indexed and written to the store
    Cached(TraceMetadata),
    /// Indexed, but the batch could not be encoded
    EncodeFailed(TraceMetadata),
    /// Indexed, but the store write failed
    StoreFailed(TraceMetadata),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Whether the batch was head-sampled to the sink
    pub sampled: bool,
    pub disposition: Disposition,
}

pub struct TraceBuffer {
    settings: BufferSettings,
    index: Mutex<TraceIndex>,
    sampler: HeadSampler,
    store: Arc<dyn TraceStore>,
    codec: Arc<dyn TraceCodec>,
    sink: Arc<dyn TraceSink>,
    /// Cancels in-flight store calls on shutdown
    shutdown: CancellationToken,
}

impl TraceBuffer {
    pub fn new(
        settings: BufferSettings,
        store: Arc<dyn TraceStore>,
        codec: Arc<dyn TraceCodec>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            index: Mutex::new(TraceIndex::new(settings.limit)),
            sampler: HeadSampler::new(settings.rate),
            settings,
            store,
            codec,
            sink,
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the rate-based head sampler, e.g. with [`HeadSampler::disabled`].
    pub fn with_sampler(mut self, sampler: HeadSampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Tie store calls made by `ingest` to an external shutdown signal.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn settings(&self) -> &BufferSettings {
        &self.settings
    }

    pub(crate) fn store(&self) -> &Arc<dyn TraceStore> {
        &self.store
    }

    pub(crate) fn codec(&self) -> &Arc<dyn TraceCodec> {
        &self.codec
    }

    pub(crate) fn sink(&self) -> &Arc<dyn TraceSink> {
        &self.sink
    }

    /// Number of entries currently indexed.
    pub fn buffered(&self) -> usize {
        self.index.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.settings.limit
    }

    /// Take the whole index, leaving it empty.
    pub(crate) fn drain(&self) -> Vec<TraceMetadata> {
        self.index.lock().snapshot_and_reset()
    }

    /// Sample and buffer one batch. Never fails.
    pub async fn ingest(&self, batch: TraceBatch, now: DateTime<Utc>) -> IngestOutcome {
        let Some(meta) = extract_metadata(&batch, now) else {
            debug!("no span started before ingestion time, batch not buffered");
            return IngestOutcome {
                sampled: false,
                disposition: Disposition::NoMetadata,
            };
        };

        let sampled = self.sampler.sample();
        if sampled {
            info!(trace_id = %meta.id, time = %meta.time, "sampled");
            if let Err(e) = self.sink.forward(batch.clone()).await {
                warn!(trace_id = %meta.id, error = %e, "failed to forward sampled batch");
            }
        }

        let disposition = self.cache(&batch, meta, now).await;
        IngestOutcome {
            sampled,
            disposition,
        }
    }

    async fn cache(
        &self,
        batch: &TraceBatch,
        meta: TraceMetadata,
        now: DateTime<Utc>,
    ) -> Disposition {
        if meta.time < cutoff(now, self.settings.expire) {
            debug!(trace_id = %meta.id, time = %meta.time, "batch already expired, not cached");
            return Disposition::Stale(meta);
        }

        if let Some(evicted) = self.index.lock().push(meta) {
            debug!(trace_id = %evicted.id, time = %evicted.time, "evicted from index");
        }

        let bytes = match self.codec.encode(batch) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(trace_id = %meta.id, error = %e, "failed to encode batch");
                return Disposition::EncodeFailed(meta);
            }
        };

        let key = meta.key();
        let put = self.store.put(&key, bytes, self.settings.expire);
        match bounded(put, self.settings.store_timeout, &self.shutdown).await {
            Ok(()) => {
                info!(trace_id = %meta.id, time = %meta.time, "cached");
                Disposition::Cached(meta)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "failed to write batch to store");
                Disposition::StoreFailed(meta)
            }
        }
    }
}

/// Oldest instant still inside the validity window at `now`.
pub(crate) fn cutoff(now: DateTime<Utc>, expire: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(expire)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::ProtobufCodec;
    use crate::error::{SinkError, StoreError};
    use crate::model::TraceId;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};
    use std::time::Duration as StdDuration;

    /// Sink that records every forwarded batch and can be told to fail.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) forwarded: Mutex<Vec<TraceBatch>>,
        pub(crate) fail: bool,
    }

    impl RecordingSink {
        pub(crate) fn count(&self) -> usize {
            self.forwarded.lock().len()
        }
    }

    #[async_trait]
    impl TraceSink for RecordingSink {
        async fn forward(&self, batch: TraceBatch) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Unavailable("down".into()));
            }
            self.forwarded.lock().push(batch);
            Ok(())
        }
    }

    /// Store whose writes and reads always fail.
    pub(crate) struct BrokenStore;

    #[async_trait]
    impl TraceStore for BrokenStore {
        async fn put(&self, _: &str, _: Vec<u8>, _: StdDuration) -> Result<(), StoreError> {
            Err(StoreError::Timeout(StdDuration::from_millis(1)))
        }

        async fn get(&self, _: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Timeout(StdDuration::from_millis(1)))
        }
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 26, 3, 14, 45).unwrap()
    }

    pub(crate) fn settings(rate: u32, limit: usize) -> BufferSettings {
        BufferSettings {
            expire: StdDuration::from_secs(60),
            limit,
            rate,
            store_timeout: StdDuration::from_secs(1),
        }
    }

    /// Single-span batch with trace id `[id; 16]` starting at `start`.
    pub(crate) fn batch_at(id: u8, start: DateTime<Utc>) -> TraceBatch {
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

    pub(crate) fn buffer_with(
        settings: BufferSettings,
        store: Arc<dyn TraceStore>,
        sink: Arc<RecordingSink>,
    ) -> TraceBuffer {
        TraceBuffer::new(settings, store, Arc::new(ProtobufCodec), sink)
    }

    /// Like [`buffer_with`] but with head sampling switched off, so the sink
    /// only ever sees replayed batches.
    pub(crate) fn quiet_buffer(
        settings: BufferSettings,
        store: Arc<dyn TraceStore>,
        sink: Arc<RecordingSink>,
    ) -> TraceBuffer {
        buffer_with(settings, store, sink).with_sampler(HeadSampler::disabled())
    }

    #[tokio::test]
    async fn test_fresh_batch_is_cached() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let buffer = quiet_buffer(settings(0, 10), store.clone(), sink.clone());

        let now = t0();
        let batch = batch_at(1, now - Duration::seconds(5));
        let outcome = buffer.ingest(batch.clone(), now).await;

        let meta = TraceMetadata::new(now - Duration::seconds(5), TraceId::new([1; 16]));
        assert_eq!(outcome.disposition, Disposition::Cached(meta));
        assert!(!outcome.sampled);
        assert_eq!(buffer.buffered(), 1);
        assert_eq!(sink.count(), 0);

        let stored = store.get(&meta.key()).await.unwrap().unwrap();
        assert_eq!(ProtobufCodec.decode(&stored).unwrap(), batch);
    }

    #[tokio::test]
    async fn test_batch_without_metadata_is_ignored() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(settings(100, 10), store.clone(), sink.clone());

        let now = t0();
        let outcome = buffer.ingest(batch_at(1, now + Duration::seconds(1)), now).await;

        assert_eq!(outcome.disposition, Disposition::NoMetadata);
        assert!(!outcome.sampled);
        assert_eq!(sink.count(), 0);
        assert_eq!(buffer.buffered(), 0);
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_batch_never_written() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let buffer = quiet_buffer(settings(0, 10), store.clone(), sink);

        let now = t0();
        let outcome = buffer.ingest(batch_at(1, now - Duration::minutes(2)), now).await;

        assert!(matches!(outcome.disposition, Disposition::Stale(_)));
        assert_eq!(buffer.buffered(), 0);
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_sampled_stale_batch_still_forwarded() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(settings(100, 10), store, sink.clone());

        let now = t0();
        let outcome = buffer.ingest(batch_at(1, now - Duration::minutes(2)), now).await;

        assert!(outcome.sampled);
        assert!(matches!(outcome.disposition, Disposition::Stale(_)));
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_sampled_batch_is_also_cached() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(settings(100, 10), store, sink.clone());

        let now = t0();
        let outcome = buffer.ingest(batch_at(1, now - Duration::seconds(1)), now).await;

        assert!(outcome.sampled);
        assert!(matches!(outcome.disposition, Disposition::Cached(_)));
        assert_eq!(sink.count(), 1);
        assert_eq!(buffer.buffered(), 1);
    }

    #[tokio::test]
    async fn test_disabled_sampler_never_forwards() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(settings(100, 10), Arc::new(MemoryStore::default()), sink.clone())
            .with_sampler(HeadSampler::disabled());

        let now = t0();
        for i in 0..50u8 {
            let outcome = buffer.ingest(batch_at(i, now - Duration::seconds(1)), now).await;
            assert!(!outcome.sampled);
        }
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_index_entry() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = quiet_buffer(settings(0, 10), Arc::new(BrokenStore), sink);

        let now = t0();
        let outcome = buffer.ingest(batch_at(1, now - Duration::seconds(1)), now).await;

        assert!(matches!(outcome.disposition, Disposition::StoreFailed(_)));
        assert_eq!(buffer.buffered(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_block_caching() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let buffer = buffer_with(settings(100, 10), Arc::new(MemoryStore::default()), sink);

        let now = t0();
        let outcome = buffer.ingest(batch_at(1, now - Duration::seconds(1)), now).await;

        assert!(outcome.sampled);
        assert!(matches!(outcome.disposition, Disposition::Cached(_)));
    }

    #[tokio::test]
    async fn test_index_respects_limit() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = quiet_buffer(settings(0, 3), Arc::new(MemoryStore::default()), sink);

        let now = t0();
        for i in 0..10u8 {
            buffer
                .ingest(batch_at(i, now - Duration::seconds(i64::from(i) + 1)), now)
                .await;
            assert!(buffer.buffered() <= 3);
        }
        assert_eq!(buffer.buffered(), 3);
    }

    #[tokio::test]
    async fn test_sampling_distribution() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = buffer_with(settings(30, 10), Arc::new(MemoryStore::default()), sink.clone());

        let now = t0();
        let runs = 10_000;
        let mut sampled = 0;
        for _ in 0..runs {
            if buffer.ingest(batch_at(1, now - Duration::minutes(5)), now).await.sampled {
                sampled += 1;
            }
        }

        let fraction = f64::from(sampled) / f64::from(runs);
        assert!((fraction - 0.30).abs() < 0.03, "fraction was {fraction}");
        assert_eq!(sink.count(), sampled as usize);
    }

    #[test]
    fn test_cutoff_saturates() {
        let far = StdDuration::from_secs(u64::MAX);
        assert_eq!(cutoff(t0(), far), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            cutoff(t0(), StdDuration::from_secs(60)),
            t0() - Duration::minutes(1)
        );
    }
}
