// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection and session lifecycle.
//!
//! The [`ConnectionManager`] owns the active transport, the session handle
//! and the keepalive watchdog. Connect failures come back as values, never
//! as panics: the redundancy controller treats them as decision signals.
//! Library lifecycle events are pumped into [`FailoverTrigger`]s here; the
//! decision about what a trigger means happens in one place, the
//! redundancy controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use lode_core::config::GatewayConfig;

use crate::error::{UaError, UaResult};
use crate::keepalive::{spawn_watchdog, KeepaliveClock, WatchdogHandle};
use crate::state::{FailoverState, FailoverTrigger, TriggerEnvelope};
use crate::transport::{SessionHandle, TransportEvent, UaTransport};

// =============================================================================
// ConnectionManager
// =============================================================================

/// Owns the client/session lifecycle against the currently active
/// endpoint.
pub struct ConnectionManager {
    transport: Arc<dyn UaTransport>,
    config: Arc<GatewayConfig>,
    state: Arc<FailoverState>,
    clock: Arc<KeepaliveClock>,
    trigger_tx: mpsc::Sender<TriggerEnvelope>,

    session: Mutex<Option<SessionHandle>>,
    active_endpoint: Mutex<String>,
    watchdog: Mutex<Option<WatchdogHandle>>,
    connecting: AtomicBool,
    connected_tx: watch::Sender<bool>,
}

impl ConnectionManager {
    /// Creates a manager over the given transport.
    pub fn new(
        transport: Arc<dyn UaTransport>,
        config: Arc<GatewayConfig>,
        state: Arc<FailoverState>,
        clock: Arc<KeepaliveClock>,
        trigger_tx: mpsc::Sender<TriggerEnvelope>,
    ) -> Self {
        let endpoint = config.endpoint_url.clone();
        Self {
            transport,
            config,
            state,
            clock,
            trigger_tx,
            session: Mutex::new(None),
            active_endpoint: Mutex::new(endpoint),
            watchdog: Mutex::new(None),
            connecting: AtomicBool::new(false),
            connected_tx: watch::channel(false).0,
        }
    }

    /// The transport this manager drives.
    pub fn transport(&self) -> &Arc<dyn UaTransport> {
        &self.transport
    }

    /// The live session handle, if any.
    ///
    /// External features (such as an address-space scanner) consume the
    /// session through this accessor.
    pub fn session(&self) -> Option<SessionHandle> {
        self.session.lock().clone()
    }

    /// Returns `true` while a session is established and the transport is
    /// up.
    pub fn is_connected(&self) -> bool {
        self.session.lock().is_some() && self.transport.is_connected()
    }

    /// The endpoint the manager is currently bound to.
    pub fn active_endpoint(&self) -> String {
        self.active_endpoint.lock().clone()
    }

    /// Watch that flips with session establishment and teardown.
    pub fn connected_watch(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    /// Connects the transport and creates a session on `endpoint`.
    ///
    /// On success the keepalive clock resets, the connection generation
    /// advances and a fresh watchdog starts. On any failure the partial
    /// client state is torn down and the failure is returned as a value
    /// for the caller to act on.
    ///
    /// A second call while one is in flight is rejected with
    /// [`UaError::ConnectInProgress`].
    pub async fn connect(&self, endpoint: &str) -> UaResult<()> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(UaError::ConnectInProgress);
        }
        let result = self.connect_inner(endpoint).await;
        self.connecting.store(false, Ordering::Release);
        result
    }

    async fn connect_inner(&self, endpoint: &str) -> UaResult<()> {
        *self.active_endpoint.lock() = endpoint.to_string();
        info!(endpoint, role = %self.state.role(), "Connecting");

        if let Err(e) = self.transport.connect(endpoint).await {
            warn!(endpoint, error = %e, "Connect failed");
            let _ = self.transport.disconnect().await;
            return Err(e);
        }

        match self
            .transport
            .create_session(&self.config.security.credentials)
            .await
        {
            Ok(handle) => {
                info!(endpoint, session_id = %handle.session_id, "Session created");
                *self.session.lock() = Some(handle);
            }
            Err(e) => {
                warn!(endpoint, error = %e, "Session creation failed");
                let _ = self.transport.disconnect().await;
                return Err(e);
            }
        }

        self.clock.touch();
        self.state.bump_generation();
        self.restart_watchdog();
        self.connected_tx.send_replace(true);
        Ok(())
    }

    /// Tears down the session and watchdog. Idempotent.
    pub async fn disconnect(&self) {
        self.stop_watchdog();
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Disconnect reported an error");
        }
        *self.session.lock() = None;
        self.connected_tx.send_replace(false);
        info!("Client disconnected");
    }

    fn restart_watchdog(&self) {
        let mut slot = self.watchdog.lock();
        if let Some(old) = slot.take() {
            old.stop();
        }
        *slot = Some(spawn_watchdog(
            self.clock.clone(),
            self.state.clone(),
            self.config.clone(),
            self.trigger_tx.clone(),
        ));
    }

    fn stop_watchdog(&self) {
        if let Some(watchdog) = self.watchdog.lock().take() {
            watchdog.stop();
        }
    }

    // =========================================================================
    // Lifecycle event pump
    // =========================================================================

    /// Spawns the task mapping transport lifecycle events to failover
    /// triggers.
    ///
    /// Spawn this before the first connect so that backoff events of the
    /// initial attempt are observed.
    pub fn spawn_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
        // Subscribe before spawning so no event emitted between this call
        // and the task's first poll is missed.
        let mut events = self.transport.events();
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => manager.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Lifecycle event pump lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Backoff { retry, delay } => {
                warn!(
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    role = %self.state.role(),
                    "Connect backoff"
                );
                let max_retry = self.transport.retry_policy().max_retry;
                if retry + 1 >= max_retry {
                    warn!(
                        max_retry,
                        role = %self.state.role(),
                        "Retry budget exhausted"
                    );
                    let envelope = self.state.envelope(FailoverTrigger::BackoffExhausted);
                    let _ = self.trigger_tx.send(envelope).await;
                }
            }
            TransportEvent::ConnectionLost => {
                warn!(role = %self.state.role(), "Connection lost");
                let envelope = self.state.envelope(FailoverTrigger::ConnectionLost);
                let _ = self.trigger_tx.send(envelope).await;
            }
            TransportEvent::ConnectionReestablished => {
                info!("Connection re-established by the client library");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
