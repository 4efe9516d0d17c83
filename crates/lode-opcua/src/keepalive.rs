// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Application-level keepalive watchdog.
//!
//! The transport's protocol machinery already times out individual
//! requests; this watchdog covers the silent-server case where the
//! connection stays up but subscription publishes stop arriving. Every
//! subscription keepalive or data change touches the clock; the watchdog
//! polls it and declares a stall once the computed threshold is exceeded.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use lode_core::config::GatewayConfig;

use crate::state::{FailoverState, FailoverTrigger, ServerRole, TriggerEnvelope};

// =============================================================================
// KeepaliveClock
// =============================================================================

/// Timestamp of the last protocol-level liveness signal.
#[derive(Debug)]
pub struct KeepaliveClock {
    last: Mutex<Instant>,
}

impl KeepaliveClock {
    /// Creates a clock touched now.
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Records a liveness signal.
    pub fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    /// Time since the last liveness signal.
    pub fn elapsed(&self) -> std::time::Duration {
        self.last.lock().elapsed()
    }
}

impl Default for KeepaliveClock {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Watchdog
// =============================================================================

/// Handle to a running watchdog task.
#[derive(Debug)]
pub struct WatchdogHandle {
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl WatchdogHandle {
    /// Stops the watchdog without waiting for the task to finish.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Stops the watchdog and waits for the task to finish.
    pub async fn stop_and_join(self) {
        self.stop.notify_one();
        let _ = self.handle.await;
    }
}

/// Spawns the keepalive watchdog.
///
/// The stall threshold is the larger of the configured floor and
/// `1.5 x max_keepalive_count x publishing_interval`; the floor protects
/// against very short publishing intervals that would otherwise produce
/// false stalls.
///
/// On a stall with redundancy available on the primary, the watchdog
/// reports a [`FailoverTrigger::KeepAliveTimeout`] once and stops itself;
/// the next successful connect starts a fresh watchdog. Without a
/// redundancy path the stall is a recoverable warning: the clock resets
/// and polling continues. A stall observed mid-switch is ignored.
pub fn spawn_watchdog(
    clock: Arc<KeepaliveClock>,
    state: Arc<FailoverState>,
    config: Arc<GatewayConfig>,
    trigger_tx: mpsc::Sender<TriggerEnvelope>,
) -> WatchdogHandle {
    let stop = Arc::new(Notify::new());
    let stop_rx = stop.clone();

    let handle = tokio::spawn(async move {
        let threshold = config.keepalive_stall_threshold();
        debug!(
            threshold_ms = threshold.as_millis() as u64,
            poll_ms = config.keepalive_poll_period.as_millis() as u64,
            "Keepalive watchdog started"
        );

        let mut interval = tokio::time::interval(config.keepalive_poll_period);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if state.is_switching() {
                        continue;
                    }
                    let elapsed = clock.elapsed();
                    if elapsed <= threshold {
                        continue;
                    }

                    if state.role() == ServerRole::Primary && config.use_redundancy {
                        warn!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            threshold_ms = threshold.as_millis() as u64,
                            "Keepalive stall, requesting failover"
                        );
                        let envelope = state.envelope(FailoverTrigger::KeepAliveTimeout);
                        let _ = trigger_tx.send(envelope).await;
                        break;
                    }

                    warn!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        threshold_ms = threshold.as_millis() as u64,
                        role = %state.role(),
                        "Keepalive stall with no redundancy path, continuing"
                    );
                    clock.touch();
                }
                _ = stop_rx.notified() => break,
            }
        }
        debug!("Keepalive watchdog stopped");
    });

    WatchdogHandle { stop, handle }
}

// =============================================================================
// Tests
// =============================================================================
