// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Redundancy controller.
//!
//! One decision point receives every failover trigger. Triggers stamped
//! with a superseded connection generation are discarded; the switching
//! guard admits exactly one transition at a time. While the gateway runs
//! on the redundant endpoint, a disposable probe client checks the primary
//! on a timer and a successful probe switches the gateway back. The probe
//! only ever connects and disconnects its own transport; the active
//! session is never touched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use lode_core::channel::Channel;
use lode_core::config::GatewayConfig;
use lode_core::link::{
    HostLink, STATUS_CURRENT_ENDPOINT, STATUS_CURRENT_SERVER, STATUS_REDUNDANCY_STATE,
};

use crate::connection::ConnectionManager;
use crate::keepalive::KeepaliveClock;
use crate::monitor::MonitorDriver;
use crate::state::{
    FailoverState, FailoverTrigger, GatewayHealth, ServerRole, TriggerEnvelope,
};
use crate::transport::TransportFactory;

// =============================================================================
// RedundancyController
// =============================================================================

struct ProbeHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Orchestrates transitions between the primary and redundant endpoints.
pub struct RedundancyController {
    config: Arc<GatewayConfig>,
    state: Arc<FailoverState>,
    conn: Arc<ConnectionManager>,
    monitor: Arc<MonitorDriver>,
    channels: Arc<RwLock<Vec<Channel>>>,
    link: Arc<dyn HostLink>,
    factory: Arc<dyn TransportFactory>,
    clock: Arc<KeepaliveClock>,
    health_tx: watch::Sender<GatewayHealth>,
    shutting_down: Arc<AtomicBool>,
    probe: Mutex<Option<ProbeHandle>>,
}

impl RedundancyController {
    /// Creates a controller. `shutting_down` is shared with the gateway so
    /// no transition starts once teardown has begun.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<GatewayConfig>,
        state: Arc<FailoverState>,
        conn: Arc<ConnectionManager>,
        monitor: Arc<MonitorDriver>,
        channels: Arc<RwLock<Vec<Channel>>>,
        link: Arc<dyn HostLink>,
        factory: Arc<dyn TransportFactory>,
        clock: Arc<KeepaliveClock>,
        health_tx: watch::Sender<GatewayHealth>,
        shutting_down: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            state,
            conn,
            monitor,
            channels,
            link,
            factory,
            clock,
            health_tx,
            shutting_down,
            probe: Mutex::new(None),
        }
    }

    /// Spawns the trigger-processing loop.
    pub fn spawn(self: &Arc<Self>, mut rx: mpsc::Receiver<TriggerEnvelope>) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if controller.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                controller.handle_trigger(envelope).await;
            }
        })
    }

    /// The single failover decision point.
    ///
    /// Whichever detector fires first wins; later triggers either carry a
    /// stale generation or find the switching guard held.
    pub async fn handle_trigger(self: &Arc<Self>, envelope: TriggerEnvelope) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        if envelope.generation != self.state.generation() {
            debug!(
                trigger = %envelope.trigger,
                stamped = envelope.generation,
                current = self.state.generation(),
                "Discarding trigger from a superseded connection"
            );
            return;
        }

        let role = self.state.role();
        let can_fail_over = self.config.use_redundancy && role == ServerRole::Primary;

        match envelope.trigger {
            FailoverTrigger::BackoffExhausted if can_fail_over => {
                self.fail_over(envelope.trigger).await;
            }
            FailoverTrigger::BackoffExhausted => {
                self.declare_lost("retry budget exhausted with no redundancy left");
            }
            FailoverTrigger::ConnectionLost if can_fail_over => {
                self.fail_over(envelope.trigger).await;
            }
            FailoverTrigger::ConnectionLost => {
                warn!(role = %role, "Connection lost; the client library may recover on its own");
            }
            FailoverTrigger::KeepAliveTimeout if can_fail_over => {
                self.fail_over(envelope.trigger).await;
            }
            FailoverTrigger::KeepAliveTimeout => {
                warn!(role = %role, "Keepalive stall with no redundancy path, resetting the clock");
                self.clock.touch();
            }
        }
    }

    /// Switches to the redundant endpoint, guarded for exclusivity.
    async fn fail_over(self: &Arc<Self>, trigger: FailoverTrigger) {
        if !self.state.begin_switch() {
            debug!(trigger = %trigger, "Switch already in progress");
            return;
        }
        info!(trigger = %trigger, "Switching to redundant server");
        self.update_status(STATUS_REDUNDANCY_STATE, "switching").await;

        self.conn.disconnect().await;
        let switched = self.connect_redundant().await;
        self.state.end_switch();

        if switched {
            self.update_status(STATUS_REDUNDANCY_STATE, "stable").await;
            info!("Switch to redundant server complete");
        } else {
            self.declare_lost("redundant path unavailable");
        }
    }

    /// Connects the redundant endpoint and rebuilds monitoring.
    async fn connect_redundant(self: &Arc<Self>) -> bool {
        // Validated at startup: redundancy implies the endpoint is set.
        let endpoint = self
            .config
            .redundancy_endpoint_url
            .clone()
            .unwrap_or_default();

        self.state.set_role(ServerRole::Redundant);
        self.update_status(STATUS_CURRENT_SERVER, "redundant").await;
        self.update_status(STATUS_CURRENT_ENDPOINT, &endpoint).await;

        if let Err(e) = self.conn.connect(&endpoint).await {
            warn!(endpoint = %endpoint, error = %e, "Redundant server refused the connection");
            return false;
        }
        self.resubscribe().await;
        self.start_probe();
        true
    }

    /// Switches back to the primary endpoint after a successful probe.
    pub async fn switch_to_primary(self: &Arc<Self>) {
        if !self.state.begin_switch() {
            debug!("Switch already in progress, not switching back");
            return;
        }
        info!("Switching back to primary server");
        self.update_status(STATUS_REDUNDANCY_STATE, "switching").await;
        self.detach_probe();

        self.conn.disconnect().await;
        info!("Disconnected from redundant server");

        self.state.set_role(ServerRole::Primary);
        let endpoint = self.config.endpoint_url.clone();
        self.update_status(STATUS_CURRENT_SERVER, "primary").await;
        self.update_status(STATUS_CURRENT_ENDPOINT, &endpoint).await;

        if self.conn.connect(&endpoint).await.is_ok() {
            self.resubscribe().await;
            self.state.end_switch();
            self.update_status(STATUS_REDUNDANCY_STATE, "stable").await;
            info!("Switch back to primary complete");
            return;
        }

        warn!("Primary refused the switch back, returning to the redundant server");
        let recovered = self.connect_redundant().await;
        self.state.end_switch();
        if recovered {
            self.update_status(STATUS_REDUNDANCY_STATE, "stable").await;
        } else {
            self.declare_lost("redundant path unavailable after a failed switch back");
        }
    }

    async fn resubscribe(&self) {
        let channels = self.channels.read().await.clone();
        if let Err(e) = self.monitor.monitor(&channels).await {
            warn!(error = %e, "Monitoring rebuild failed after endpoint switch");
        }
    }

    // =========================================================================
    // Primary recovery probe
    // =========================================================================

    /// Starts the periodic primary recovery probe.
    ///
    /// Each round builds a fresh disposable transport, attempts a bare
    /// connect against the primary endpoint and disconnects again. A
    /// successful round triggers the switch back.
    fn start_probe(self: &Arc<Self>) {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let controller = self.clone();

        let handle = tokio::spawn(async move {
            debug!(
                interval_ms = controller.config.primary_check_interval.as_millis() as u64,
                "Primary recovery probe started"
            );
            let mut interval = tokio::time::interval(controller.config.primary_check_interval);
            interval.tick().await;

            loop {
                interval.tick().await;
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                if controller.state.role() != ServerRole::Redundant
                    || controller.state.is_switching()
                {
                    continue;
                }

                let probe = controller.factory.create();
                match probe.connect(&controller.config.endpoint_url).await {
                    Ok(()) => {
                        let _ = probe.disconnect().await;
                        info!("Primary server reachable again");
                        controller.switch_to_primary().await;
                        if stop_flag.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Primary server still unavailable");
                    }
                }
            }
            debug!("Primary recovery probe stopped");
        });

        let mut slot = self.probe.lock();
        if let Some(old) = slot.take() {
            // The old loop exits on its own; it may be the task running
            // this very call, so it is never aborted here.
            old.stop.store(true, Ordering::SeqCst);
        }
        *slot = Some(ProbeHandle { stop, handle });
    }

    /// Flags the probe loop to exit without aborting it; used from inside
    /// the probe task itself during the switch back.
    fn detach_probe(&self) {
        if let Some(probe) = self.probe.lock().take() {
            probe.stop.store(true, Ordering::SeqCst);
        }
    }

    /// Stops the probe for good; used at gateway shutdown.
    pub fn stop_probe(&self) {
        if let Some(probe) = self.probe.lock().take() {
            probe.stop.store(true, Ordering::SeqCst);
            probe.handle.abort();
        }
    }

    fn declare_lost(&self, reason: &str) {
        error!(reason, "Connection lost with no recovery path");
        self.health_tx
            .send_replace(GatewayHealth::Failed(reason.to_string()));
    }

    async fn update_status(&self, key: &str, value: &str) {
        if let Err(e) = self.link.update_status(key, value).await {
            warn!(key, value, error = %e, "Host pipeline rejected status update");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
