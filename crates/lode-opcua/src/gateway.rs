// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Top-level gateway assembly.
//!
//! [`Gateway::start`] wires the whole pipeline: connection manager with
//! its lifecycle event pump, redundancy controller with its trigger loop,
//! monitor driver with its notification pump, and the telemetry flush
//! loop. Shutdown stops every periodic task before the client is
//! released, and no reconnection logic runs once teardown has begun.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use lode_core::channel::{Channel, HostCommand, WriteTarget};
use lode_core::config::GatewayConfig;
use lode_core::link::{
    CommandResponse, HostLink, STATUS_CURRENT_ENDPOINT, STATUS_CURRENT_SERVER,
    STATUS_REDUNDANCY_STATE,
};

use crate::buffer::{spawn_flusher, FlusherHandle, TelemetryBuffer};
use crate::connection::ConnectionManager;
use crate::dispatch::WriteDispatcher;
use crate::error::{UaError, UaResult};
use crate::history::HistoryForwarder;
use crate::keepalive::KeepaliveClock;
use crate::monitor::MonitorDriver;
use crate::redundancy::RedundancyController;
use crate::state::{FailoverState, FailoverTrigger, ServerRole};
use crate::transport::{SessionHandle, TransportFactory};

pub use crate::state::GatewayHealth;

// =============================================================================
// Gateway
// =============================================================================

/// The assembled OPC UA client pipeline.
pub struct Gateway {
    config: Arc<GatewayConfig>,
    state: Arc<FailoverState>,
    conn: Arc<ConnectionManager>,
    monitor: Arc<MonitorDriver>,
    controller: Arc<RedundancyController>,
    buffer: Arc<TelemetryBuffer>,
    dispatcher: WriteDispatcher,
    history: HistoryForwarder,
    link: Arc<dyn HostLink>,
    channels: Arc<RwLock<Vec<Channel>>>,
    health_rx: watch::Receiver<GatewayHealth>,
    shutting_down: Arc<AtomicBool>,
    flusher: Mutex<Option<FlusherHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Validates the configuration, wires the pipeline and connects.
    ///
    /// A failed initial connect with redundancy enabled runs the same
    /// failover path the runtime detectors use; without redundancy it is
    /// returned as an error after the pipeline is torn down again.
    pub async fn start(
        config: GatewayConfig,
        initial_channels: Vec<Channel>,
        link: Arc<dyn HostLink>,
        factory: Arc<dyn TransportFactory>,
    ) -> UaResult<Arc<Self>> {
        config.validate()?;
        let config = Arc::new(config);

        let state = Arc::new(FailoverState::new());
        let clock = Arc::new(KeepaliveClock::new());
        let (trigger_tx, trigger_rx) = mpsc::channel(32);

        let transport = factory.create();
        let conn = Arc::new(ConnectionManager::new(
            transport.clone(),
            config.clone(),
            state.clone(),
            clock.clone(),
            trigger_tx.clone(),
        ));
        let monitor = Arc::new(MonitorDriver::new(transport.clone(), config.clone()));
        let buffer = Arc::new(TelemetryBuffer::new());
        let channels = Arc::new(RwLock::new(initial_channels));
        let (health_tx, health_rx) = watch::channel(GatewayHealth::Running);
        let shutting_down = Arc::new(AtomicBool::new(false));

        let controller = Arc::new(RedundancyController::new(
            config.clone(),
            state.clone(),
            conn.clone(),
            monitor.clone(),
            channels.clone(),
            link.clone(),
            factory,
            clock.clone(),
            health_tx,
            shutting_down.clone(),
        ));

        let mut tasks = Vec::new();
        tasks.push(conn.spawn_event_pump());
        tasks.push(monitor.spawn_pump(buffer.clone(), clock.clone()));
        tasks.push(controller.spawn(trigger_rx));
        let flusher = spawn_flusher(buffer.clone(), link.clone(), config.buffer_time);

        let gateway = Arc::new(Self {
            config: config.clone(),
            state: state.clone(),
            conn: conn.clone(),
            monitor: monitor.clone(),
            controller,
            buffer: buffer.clone(),
            dispatcher: WriteDispatcher::new(transport.clone(), buffer),
            history: HistoryForwarder::new(transport, link.clone()),
            link: link.clone(),
            channels: channels.clone(),
            health_rx,
            shutting_down,
            flusher: Mutex::new(Some(flusher)),
            tasks: Mutex::new(tasks),
        });

        match conn.connect(&config.endpoint_url).await {
            Ok(()) => {
                gateway.publish_endpoint_status().await;
                let snapshot = channels.read().await.clone();
                if let Err(e) = monitor.monitor(&snapshot).await {
                    warn!(error = %e, "Initial monitoring setup failed");
                }
                info!(endpoint = %config.endpoint_url, "Gateway started on primary");
            }
            Err(e) if config.use_redundancy => {
                info!(error = %e, "Primary refused the initial connect, failing over");
                let envelope = state.envelope(FailoverTrigger::BackoffExhausted);
                let _ = trigger_tx.send(envelope).await;
                gateway.await_initial_failover().await?;
            }
            Err(e) => {
                gateway.shutdown().await;
                return Err(e);
            }
        }

        Ok(gateway)
    }

    /// Waits for the startup failover to settle one way or the other.
    async fn await_initial_failover(self: &Arc<Self>) -> UaResult<()> {
        let mut connected = self.conn.connected_watch();
        let mut health = self.health_rx.clone();
        loop {
            if *connected.borrow() {
                return Ok(());
            }
            if let GatewayHealth::Failed(reason) = &*health.borrow() {
                let reason = reason.clone();
                self.shutdown().await;
                return Err(UaError::connect(&self.config.endpoint_url, reason));
            }
            tokio::select! {
                changed = connected.changed() => {
                    if changed.is_err() {
                        return Err(UaError::ConnectionLost);
                    }
                }
                changed = health.changed() => {
                    if changed.is_err() {
                        return Err(UaError::ConnectionLost);
                    }
                }
            }
        }
    }

    async fn publish_endpoint_status(&self) {
        let role = self.state.role().to_string();
        let endpoint = self.conn.active_endpoint();
        for (key, value) in [
            (STATUS_REDUNDANCY_STATE, "stable"),
            (STATUS_CURRENT_SERVER, role.as_str()),
            (STATUS_CURRENT_ENDPOINT, endpoint.as_str()),
        ] {
            if let Err(e) = self.link.update_status(key, value).await {
                warn!(key, error = %e, "Host pipeline rejected status update");
            }
        }
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Replaces the channel list and rebuilds monitoring.
    pub async fn update_channels(&self, channels: Vec<Channel>) {
        *self.channels.write().await = channels.clone();
        if self.conn.is_connected() {
            if let Err(e) = self.monitor.monitor(&channels).await {
                warn!(error = %e, "Monitoring rebuild failed after channel change");
            }
        } else {
            // The next successful (re)connect picks up the new list.
            info!(channels = channels.len(), "Channel list stored while disconnected");
        }
    }

    /// Processes one write/act request.
    pub async fn write(&self, batch: &[WriteTarget]) {
        self.dispatcher.dispatch(batch).await;
    }

    /// Processes one host command.
    pub async fn command(&self, command: HostCommand) {
        match command {
            HostCommand::SyncHistory { points, start, end } => {
                self.history.sync_history(&points, start, end).await;
            }
            HostCommand::Unknown => {
                warn!("Unsupported host command");
                let response = CommandResponse::failure("unknown", "unsupported command");
                if let Err(e) = self.link.send_response(response).await {
                    warn!(error = %e, "Host pipeline rejected command response");
                }
            }
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Watch over the gateway health.
    pub fn health(&self) -> watch::Receiver<GatewayHealth> {
        self.health_rx.clone()
    }

    /// The live session handle, for external session consumers.
    pub fn session(&self) -> Option<SessionHandle> {
        self.conn.session()
    }

    /// The currently active server role.
    pub fn server_role(&self) -> ServerRole {
        self.state.role()
    }

    /// The currently active endpoint URL.
    pub fn active_endpoint(&self) -> String {
        self.conn.active_endpoint()
    }

    /// Number of records waiting in the telemetry buffer.
    pub fn buffered_records(&self) -> usize {
        self.buffer.len()
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stops every periodic task, flushes the buffer one last time and
    /// releases the client. Idempotent; no reconnection logic runs once
    /// this has begun.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Gateway shutting down");

        self.controller.stop_probe();

        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher {
            flusher.stop().await;
        }

        self.monitor.stop().await;
        self.conn.disconnect().await;

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("Gateway stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use lode_core::link::RecordingLink;

    use crate::mock::MockFactory;
    use crate::transport::UaTransport;

    use super::*;

    const PRIMARY: &str = "opc.tcp://plc:4840";
    const STANDBY: &str = "opc.tcp://standby:4840";

    fn channels(n: usize) -> Vec<Channel> {
        (0..n)
            .map(|i| Channel::new(format!("tag{}", i), format!("ns=2;s=Var{}", i)))
            .collect()
    }

    #[tokio::test]
    async fn start_connects_monitors_and_publishes_status() {
        let link = Arc::new(RecordingLink::new());
        let factory = Arc::new(MockFactory::new(Default::default()));

        let gateway = Gateway::start(
            GatewayConfig::for_endpoint(PRIMARY),
            channels(5),
            link.clone(),
            factory.clone(),
        )
        .await
        .unwrap();

        assert_eq!(gateway.server_role(), ServerRole::Primary);
        assert!(gateway.session().is_some());
        assert_eq!(link.status_value(STATUS_CURRENT_SERVER).as_deref(), Some("primary"));
        assert_eq!(link.status_value(STATUS_CURRENT_ENDPOINT).as_deref(), Some(PRIMARY));

        let transport = factory.primary_transport().unwrap();
        assert_eq!(transport.live_monitored_nodes().len(), 5);

        gateway.shutdown().await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn startup_failure_without_redundancy_is_an_error() {
        let link = Arc::new(RecordingLink::new());
        let factory = Arc::new(MockFactory::new(Default::default()));
        factory.set_unreachable(PRIMARY);

        let result = Gateway::start(
            GatewayConfig::for_endpoint(PRIMARY),
            channels(1),
            link,
            factory,
        )
        .await;

        assert!(matches!(result, Err(UaError::ConnectFailure { .. })));
    }

    #[tokio::test]
    async fn startup_failure_with_redundancy_fails_over_once() {
        let link = Arc::new(RecordingLink::new());
        let factory = Arc::new(MockFactory::new(Default::default()));
        factory.set_unreachable(PRIMARY);

        let gateway = Gateway::start(
            GatewayConfig::for_endpoint(PRIMARY).with_redundancy(STANDBY),
            channels(3),
            link.clone(),
            factory.clone(),
        )
        .await
        .unwrap();

        assert_eq!(gateway.server_role(), ServerRole::Redundant);
        assert_eq!(gateway.active_endpoint(), STANDBY);
        assert_eq!(link.status_count(STATUS_CURRENT_SERVER, "redundant"), 1);

        let transport = factory.primary_transport().unwrap();
        assert_eq!(transport.live_monitored_nodes().len(), 3);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn startup_failure_on_both_endpoints_is_an_error() {
        let link = Arc::new(RecordingLink::new());
        let factory = Arc::new(MockFactory::new(Default::default()));
        factory.set_unreachable(PRIMARY);
        factory.set_unreachable(STANDBY);

        let result = Gateway::start(
            GatewayConfig::for_endpoint(PRIMARY).with_redundancy(STANDBY),
            channels(1),
            link,
            factory,
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_connect() {
        let link = Arc::new(RecordingLink::new());
        let factory = Arc::new(MockFactory::new(Default::default()));

        let mut config = GatewayConfig::for_endpoint(PRIMARY);
        config.use_redundancy = true;
        let result = Gateway::start(config, channels(1), link, factory.clone()).await;

        assert!(matches!(result, Err(UaError::Config(_))));
        assert!(factory.created().is_empty());
    }

    #[tokio::test]
    async fn channel_change_rebuilds_monitoring() {
        let link = Arc::new(RecordingLink::new());
        let factory = Arc::new(MockFactory::new(Default::default()));

        let gateway = Gateway::start(
            GatewayConfig::for_endpoint(PRIMARY),
            channels(5),
            link,
            factory.clone(),
        )
        .await
        .unwrap();

        gateway.update_channels(channels(2)).await;

        let transport = factory.primary_transport().unwrap();
        assert_eq!(transport.live_monitored_nodes().len(), 2);
        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let link = Arc::new(RecordingLink::new());
        let factory = Arc::new(MockFactory::new(Default::default()));

        let gateway = Gateway::start(
            GatewayConfig::for_endpoint(PRIMARY),
            channels(1),
            link,
            factory,
        )
        .await
        .unwrap();

        gateway.shutdown().await;
        gateway.shutdown().await;
        assert!(gateway.session().is_none());
    }
}
