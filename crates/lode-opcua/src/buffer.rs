// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Telemetry buffer and flush loop.
//!
//! Notification callbacks append records from many tasks; one timer drains
//! the buffer and hands whole batches to the host pipeline. Draining swaps
//! the backing vector under the lock, so records arriving while a batch is
//! in flight land in the next one and nothing is lost or sent twice.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lode_core::link::HostLink;
use lode_core::types::TelemetryRecord;

// =============================================================================
// TelemetryBuffer
// =============================================================================

/// Accumulator of outbound telemetry records.
#[derive(Debug, Default)]
pub struct TelemetryBuffer {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl TelemetryBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record.
    pub fn push(&self, record: TelemetryRecord) {
        self.records.lock().push(record);
    }

    /// Appends a batch of records.
    pub fn extend(&self, records: impl IntoIterator<Item = TelemetryRecord>) {
        self.records.lock().extend(records);
    }

    /// Takes the current contents, leaving the buffer empty.
    pub fn drain(&self) -> Vec<TelemetryRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Number of records currently queued.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

// =============================================================================
// Flush loop
// =============================================================================

/// Handle to a running flush loop.
#[derive(Debug)]
pub struct FlusherHandle {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl FlusherHandle {
    /// Stops the loop after one final drain and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

/// Spawns the periodic flush loop.
///
/// Every `period` the buffer's full contents go to the host pipeline as
/// one batch; an empty buffer produces no call. On shutdown the loop
/// drains one last time before exiting.
pub fn spawn_flusher(
    buffer: Arc<TelemetryBuffer>,
    link: Arc<dyn HostLink>,
    period: std::time::Duration,
) -> FlusherHandle {
    let shutdown = Arc::new(Notify::new());
    let shutdown_rx = shutdown.clone();

    let handle = tokio::spawn(async move {
        info!(period_ms = period.as_millis() as u64, "Telemetry flush loop started");
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    flush_once(&buffer, &link).await;
                }
                _ = shutdown_rx.notified() => {
                    flush_once(&buffer, &link).await;
                    break;
                }
            }
        }
        info!("Telemetry flush loop stopped");
    });

    FlusherHandle { shutdown, handle }
}

async fn flush_once(buffer: &Arc<TelemetryBuffer>, link: &Arc<dyn HostLink>) {
    let batch = buffer.drain();
    if batch.is_empty() {
        return;
    }
    debug!(records = batch.len(), "Flushing telemetry batch");
    if let Err(e) = link.send_data(batch).await {
        warn!(error = %e, "Host pipeline rejected telemetry batch");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lode_core::link::RecordingLink;
    use lode_core::types::{Quality, Value};

    use super::*;

    fn record(id: &str, v: i64) -> TelemetryRecord {
        TelemetryRecord::new(id, Value::Int(v), Quality::GOOD, v)
    }

    #[test]
    fn drain_swaps_the_backing_storage() {
        let buffer = TelemetryBuffer::new();
        buffer.push(record("a", 1));
        buffer.push(record("b", 2));

        let first = buffer.drain();
        assert_eq!(first.len(), 2);
        assert!(buffer.is_empty());

        buffer.push(record("c", 3));
        let second = buffer.drain();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn records_appear_in_exactly_one_flush() {
        let buffer = Arc::new(TelemetryBuffer::new());
        let link = Arc::new(RecordingLink::new());
        let flusher = spawn_flusher(
            buffer.clone(),
            link.clone() as Arc<dyn HostLink>,
            Duration::from_millis(500),
        );

        buffer.push(record("a", 1));
        tokio::time::sleep(Duration::from_millis(600)).await;

        buffer.push(record("b", 2));
        buffer.push(record("c", 3));
        tokio::time::sleep(Duration::from_millis(500)).await;

        flusher.stop().await;

        let batches = link.data_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1].len(), 2);

        let mut all: Vec<String> = batches.concat().into_iter().map(|r| r.id).collect();
        all.sort();
        assert_eq!(all, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_buffer_never_sends() {
        let buffer = Arc::new(TelemetryBuffer::new());
        let link = Arc::new(RecordingLink::new());
        let flusher = spawn_flusher(
            buffer.clone(),
            link.clone() as Arc<dyn HostLink>,
            Duration::from_millis(100),
        );

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        flusher.stop().await;

        assert!(link.data_batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn final_drain_runs_on_shutdown() {
        let buffer = Arc::new(TelemetryBuffer::new());
        let link = Arc::new(RecordingLink::new());
        let flusher = spawn_flusher(
            buffer.clone(),
            link.clone() as Arc<dyn HostLink>,
            Duration::from_secs(3600),
        );

        buffer.push(record("last", 9));
        flusher.stop().await;

        let batches = link.data_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].id, "last");
    }
}
