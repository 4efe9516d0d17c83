// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Scripted in-memory transport.
//!
//! Implements [`UaTransport`] without any network I/O: endpoints can be
//! marked unreachable, notifications and lifecycle events are injected by
//! hand, and every operation is recorded for inspection. Used by this
//! crate's own tests and useful for driving the gateway in demos.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use lode_core::config::{Credentials, RetryPolicy, SubscriptionSettings};

use crate::error::{UaError, UaResult};
use crate::transport::{
    DataChange, HistorySample, HistorySeries, MonitoringSettings, Notification, SessionHandle,
    TransportEvent, TransportFactory, UaTransport, WireValue, WriteValue,
};
use crate::types::{BuiltInType, NodeId};

// =============================================================================
// MockTransport
// =============================================================================

/// In-memory [`UaTransport`] with scripted reachability.
pub struct MockTransport {
    retry: RetryPolicy,
    unreachable: Arc<Mutex<HashSet<String>>>,

    connected: AtomicBool,
    endpoint: Mutex<Option<String>>,
    session: Mutex<Option<SessionHandle>>,

    fail_session: AtomicBool,
    fail_writes: AtomicBool,
    fail_methods: AtomicBool,
    fail_history: AtomicBool,
    fail_subscriptions: AtomicU32,

    next_sub_id: AtomicU32,
    next_item_id: AtomicU32,
    subscriptions: Mutex<BTreeMap<u32, Vec<NodeId>>>,

    connect_attempts: Mutex<Vec<String>>,
    disconnects: AtomicU32,
    write_batches: Mutex<Vec<Vec<WriteValue>>>,
    method_calls: Mutex<Vec<(NodeId, NodeId)>>,
    monitored_batch_sizes: Mutex<Vec<usize>>,

    history: Mutex<HashMap<String, Vec<HistorySample>>>,
    data_types: Mutex<HashMap<String, BuiltInType>>,

    event_tx: broadcast::Sender<TransportEvent>,
    notif_tx: broadcast::Sender<Notification>,
}

impl MockTransport {
    /// Creates a transport where every endpoint is reachable.
    pub fn new(retry: RetryPolicy) -> Self {
        Self::with_reachability(retry, Arc::new(Mutex::new(HashSet::new())))
    }

    /// Creates a transport sharing a reachability table with others.
    ///
    /// Probe transports built by a factory share the table, so marking the
    /// primary reachable again is visible to every instance.
    pub fn with_reachability(retry: RetryPolicy, unreachable: Arc<Mutex<HashSet<String>>>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (notif_tx, _) = broadcast::channel(1024);
        Self {
            retry,
            unreachable,
            connected: AtomicBool::new(false),
            endpoint: Mutex::new(None),
            session: Mutex::new(None),
            fail_session: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_methods: AtomicBool::new(false),
            fail_history: AtomicBool::new(false),
            fail_subscriptions: AtomicU32::new(0),
            next_sub_id: AtomicU32::new(1),
            next_item_id: AtomicU32::new(1),
            subscriptions: Mutex::new(BTreeMap::new()),
            connect_attempts: Mutex::new(Vec::new()),
            disconnects: AtomicU32::new(0),
            write_batches: Mutex::new(Vec::new()),
            method_calls: Mutex::new(Vec::new()),
            monitored_batch_sizes: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            data_types: Mutex::new(HashMap::new()),
            event_tx,
            notif_tx,
        }
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Marks an endpoint unreachable.
    pub fn set_unreachable(&self, endpoint: &str) {
        self.unreachable.lock().insert(endpoint.to_string());
    }

    /// Marks an endpoint reachable again.
    pub fn set_reachable(&self, endpoint: &str) {
        self.unreachable.lock().remove(endpoint);
    }

    /// Makes the next session creations fail.
    pub fn set_session_failure(&self, fail: bool) {
        self.fail_session.store(fail, Ordering::SeqCst);
    }

    /// Makes batched writes fail.
    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes method calls fail.
    pub fn set_method_failure(&self, fail: bool) {
        self.fail_methods.store(fail, Ordering::SeqCst);
    }

    /// Makes history reads fail.
    pub fn set_history_failure(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` subscription creations fail.
    pub fn fail_next_subscriptions(&self, count: u32) {
        self.fail_subscriptions.store(count, Ordering::SeqCst);
    }

    /// Seeds the history store for one node.
    pub fn set_history(&self, node: &NodeId, samples: Vec<HistorySample>) {
        self.history.lock().insert(node.to_canonical(), samples);
    }

    /// Seeds the type store for one node.
    pub fn set_data_type(&self, node: &NodeId, data_type: BuiltInType) {
        self.data_types.lock().insert(node.to_canonical(), data_type);
    }

    /// Injects a data change notification.
    pub fn push_data_change(
        &self,
        node: NodeId,
        value: WireValue,
        status: u32,
        source_ts: Option<DateTime<Utc>>,
    ) {
        let _ = self.notif_tx.send(Notification::DataChange(DataChange {
            node,
            value,
            status,
            source_ts,
        }));
    }

    /// Injects a subscription keepalive.
    pub fn push_keepalive(&self) {
        let _ = self.notif_tx.send(Notification::KeepAlive);
    }

    /// Injects a monitored-item error notification.
    pub fn push_item_error(&self, node: &NodeId, message: &str) {
        let _ = self.notif_tx.send(Notification::ItemError {
            node: node.to_canonical(),
            message: message.to_string(),
        });
    }

    /// Emits a connection-lost lifecycle event.
    pub fn emit_connection_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.event_tx.send(TransportEvent::ConnectionLost);
    }

    /// Emits a connection-reestablished lifecycle event.
    pub fn emit_connection_reestablished(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.event_tx.send(TransportEvent::ConnectionReestablished);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Endpoints passed to `connect`, in call order.
    pub fn connect_attempts(&self) -> Vec<String> {
        self.connect_attempts.lock().clone()
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Write batches committed so far.
    pub fn write_batches(&self) -> Vec<Vec<WriteValue>> {
        self.write_batches.lock().clone()
    }

    /// Method calls dispatched so far, as `(object, method)` pairs.
    pub fn method_calls(&self) -> Vec<(NodeId, NodeId)> {
        self.method_calls.lock().clone()
    }

    /// Sizes of every monitored-item batch ever created.
    pub fn monitored_batch_sizes(&self) -> Vec<usize> {
        self.monitored_batch_sizes.lock().clone()
    }

    /// Number of currently live subscriptions.
    pub fn live_subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Nodes across all currently live subscriptions.
    pub fn live_monitored_nodes(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .values()
            .flatten()
            .map(|n| n.to_canonical())
            .collect()
    }

    fn ensure_connected(&self) -> UaResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(UaError::NoSession)
        }
    }
}

#[async_trait]
impl UaTransport for MockTransport {
    async fn connect(&self, endpoint: &str) -> UaResult<()> {
        self.connect_attempts.lock().push(endpoint.to_string());

        if self.unreachable.lock().contains(endpoint) {
            // The retry loop a real client library runs internally,
            // surfaced as one backoff event per failed attempt.
            for retry in 0..self.retry.max_retry {
                let _ = self.event_tx.send(TransportEvent::Backoff {
                    retry,
                    delay: self.retry.initial_delay,
                });
            }
            return Err(UaError::connect(endpoint, "endpoint unreachable"));
        }

        self.connected.store(true, Ordering::SeqCst);
        *self.endpoint.lock() = Some(endpoint.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> UaResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        *self.session.lock() = None;
        self.subscriptions.lock().clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn create_session(&self, _credentials: &Credentials) -> UaResult<SessionHandle> {
        self.ensure_connected()
            .map_err(|_| UaError::SessionCreateFailure("transport not connected".into()))?;
        if self.fail_session.load(Ordering::SeqCst) {
            return Err(UaError::SessionCreateFailure("identity rejected".into()));
        }
        let handle = SessionHandle::new(uuid::Uuid::new_v4().to_string());
        *self.session.lock() = Some(handle.clone());
        Ok(handle)
    }

    async fn create_subscription(&self, _settings: &SubscriptionSettings) -> UaResult<u32> {
        self.ensure_connected()
            .map_err(|_| UaError::SubscriptionCreateFailure("transport not connected".into()))?;
        if self
            .fail_subscriptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(UaError::SubscriptionCreateFailure("server rejected subscription".into()));
        }
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().insert(id, Vec::new());
        Ok(id)
    }

    async fn delete_subscription(&self, subscription_id: u32) -> UaResult<()> {
        self.subscriptions.lock().remove(&subscription_id);
        Ok(())
    }

    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: &[NodeId],
        _settings: &MonitoringSettings,
    ) -> UaResult<Vec<u32>> {
        let mut subscriptions = self.subscriptions.lock();
        let slot = subscriptions.get_mut(&subscription_id).ok_or_else(|| {
            UaError::SubscriptionCreateFailure(format!("no subscription {}", subscription_id))
        })?;
        slot.extend_from_slice(items);
        self.monitored_batch_sizes.lock().push(items.len());
        Ok(items
            .iter()
            .map(|_| self.next_item_id.fetch_add(1, Ordering::SeqCst))
            .collect())
    }

    async fn write(&self, batch: &[WriteValue]) -> UaResult<()> {
        self.ensure_connected()
            .map_err(|_| UaError::WriteFailure("transport not connected".into()))?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(UaError::WriteFailure("server rejected batch".into()));
        }
        self.write_batches.lock().push(batch.to_vec());
        Ok(())
    }

    async fn call_method(&self, object: &NodeId, method: &NodeId) -> UaResult<()> {
        self.ensure_connected()
            .map_err(|_| UaError::method_call(method.to_canonical(), "transport not connected"))?;
        if self.fail_methods.load(Ordering::SeqCst) {
            return Err(UaError::method_call(method.to_canonical(), "server rejected call"));
        }
        self.method_calls.lock().push((object.clone(), method.clone()));
        Ok(())
    }

    async fn read_history(
        &self,
        nodes: &[NodeId],
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> UaResult<Vec<HistorySeries>> {
        self.ensure_connected()
            .map_err(|_| UaError::HistoryReadFailure("transport not connected".into()))?;
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(UaError::HistoryReadFailure("history service unavailable".into()));
        }
        let store = self.history.lock();
        Ok(nodes
            .iter()
            .map(|node| HistorySeries {
                node: node.clone(),
                samples: store.get(&node.to_canonical()).cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn get_built_in_data_type(&self, node: &NodeId) -> UaResult<BuiltInType> {
        self.data_types
            .lock()
            .get(&node.to_canonical())
            .cloned()
            .ok_or_else(|| UaError::UnknownDataType(node.to_canonical()))
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }

    fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notif_tx.subscribe()
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

// =============================================================================
// MockFactory
// =============================================================================

/// [`TransportFactory`] producing [`MockTransport`]s that share one
/// reachability table.
pub struct MockFactory {
    retry: RetryPolicy,
    unreachable: Arc<Mutex<HashSet<String>>>,
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockFactory {
    /// Creates a factory with the given retry policy.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            unreachable: Arc::new(Mutex::new(HashSet::new())),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Marks an endpoint unreachable for every transport of this factory.
    pub fn set_unreachable(&self, endpoint: &str) {
        self.unreachable.lock().insert(endpoint.to_string());
    }

    /// Marks an endpoint reachable again.
    pub fn set_reachable(&self, endpoint: &str) {
        self.unreachable.lock().remove(endpoint);
    }

    /// Transports created so far, in creation order.
    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().clone()
    }

    /// The first transport created, which the gateway uses as its active
    /// client.
    pub fn primary_transport(&self) -> Option<Arc<MockTransport>> {
        self.created.lock().first().cloned()
    }
}

impl TransportFactory for MockFactory {
    fn create(&self) -> Arc<dyn UaTransport> {
        let transport = Arc::new(MockTransport::with_reachability(
            self.retry.clone(),
            self.unreachable.clone(),
        ));
        self.created.lock().push(transport.clone());
        transport
    }
}

// =============================================================================
// Tests
// =============================================================================
