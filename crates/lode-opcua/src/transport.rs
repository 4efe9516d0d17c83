// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport abstraction over the external OPC UA client library.
//!
//! Everything protocol-shaped (framing, security channel, session RPC,
//! subscription publish machinery) lives behind [`UaTransport`].
//! Implementations wrap a concrete client library; the bundled
//! [`crate::mock::MockTransport`] implements the trait in memory.
//!
//! Lifecycle events and subscription notifications arrive over broadcast
//! channels so that pump tasks can subscribe before the first connect and
//! survive subscription rebuilds.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use lode_core::config::{MonitoringDefaults, RetryPolicy, SubscriptionSettings};
use lode_core::channel::DeadbandFilter;

use crate::error::UaResult;
use crate::types::{BuiltInType, NodeId};

// =============================================================================
// Wire values
// =============================================================================

/// A wire-level variant value as delivered by the client library.
///
/// 64-bit integers from servers that split them across two 32-bit words
/// arrive as `Array([UInt32, UInt32])`; the codec reassembles them using
/// the channel's declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Boolean.
    Boolean(bool),
    /// Signed 8-bit integer.
    SByte(i8),
    /// Unsigned 8-bit integer.
    Byte(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Timestamp.
    DateTime(DateTime<Utc>),
    /// GUID.
    Guid(uuid::Uuid),
    /// Raw bytes.
    ByteString(Vec<u8>),
    /// Array of variants.
    Array(Vec<WireValue>),
    /// Absent value.
    Null,
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::SByte(v) => write!(f, "{}", v),
            Self::Byte(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Guid(v) => write!(f, "{}", v),
            Self::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Self::Array(v) => write!(f, "[{} items]", v.len()),
            Self::Null => write!(f, "null"),
        }
    }
}

/// One entry of a batched write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteValue {
    /// Target node.
    pub node: NodeId,

    /// Concrete wire type the value is committed as.
    pub data_type: BuiltInType,

    /// The value itself.
    pub value: WireValue,
}

// =============================================================================
// Session
// =============================================================================

/// Handle to a live authenticated session.
///
/// Replaced, never mutated, on reconnect or failover. External features
/// (such as an address-space scanner) obtain it through the connection
/// manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Server-assigned session identifier.
    pub session_id: String,
}

impl SessionHandle {
    /// Creates a handle with the given id.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

// =============================================================================
// Events and notifications
// =============================================================================

/// Connection lifecycle event emitted by the client library.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One failed connect attempt inside the library's retry loop.
    Backoff {
        /// Zero-based retry counter.
        retry: u32,

        /// Delay before the next attempt.
        delay: Duration,
    },

    /// An established connection dropped.
    ConnectionLost,

    /// The library restored the transport on its own.
    ConnectionReestablished,
}

/// A single data-change delivery for one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    /// Originating node.
    pub node: NodeId,

    /// New value.
    pub value: WireValue,

    /// Status word delivered with the value.
    pub status: u32,

    /// Source timestamp, if the server provided one.
    pub source_ts: Option<DateTime<Utc>>,
}

/// Subscription-level notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A monitored item changed value.
    DataChange(DataChange),

    /// Subscription keepalive: the server is alive, nothing changed.
    KeepAlive,

    /// A monitored item reported an error; siblings keep running.
    ItemError {
        /// Canonical node string of the failed item.
        node: String,

        /// Error detail.
        message: String,
    },
}

// =============================================================================
// History
// =============================================================================

/// One historical sample.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySample {
    /// Stored value.
    pub value: WireValue,

    /// Source timestamp of the sample.
    pub source_ts: DateTime<Utc>,
}

/// History-read result for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySeries {
    /// The node the series belongs to.
    pub node: NodeId,

    /// Samples in source-time order.
    pub samples: Vec<HistorySample>,
}

// =============================================================================
// UaTransport
// =============================================================================

/// Monitored-item creation parameters for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringSettings {
    /// Sampling interval.
    pub sampling_interval: Duration,

    /// Discard oldest queued value on overflow.
    pub discard_oldest: bool,

    /// Server-side queue size.
    pub queue_size: u32,

    /// Optional deadband filter.
    pub deadband: Option<DeadbandFilter>,
}

impl MonitoringSettings {
    /// Builds settings from the global defaults.
    pub fn from_defaults(defaults: &MonitoringDefaults) -> Self {
        Self {
            sampling_interval: defaults.sampling_interval,
            discard_oldest: defaults.discard_oldest,
            queue_size: defaults.queue_size,
            deadband: None,
        }
    }
}

/// Abstract client-library boundary.
///
/// Implementations carry their own interior state (socket, secure channel,
/// session token) and must be safe to share across tasks. A connect retry
/// policy is part of construction, not of `connect`: the library performs
/// its own backoff internally and reports each attempt as a
/// [`TransportEvent::Backoff`].
#[async_trait]
pub trait UaTransport: Send + Sync {
    /// Connects to the given endpoint, retrying per the configured policy.
    ///
    /// # Errors
    ///
    /// Returns an error once the retry budget is exhausted or the endpoint
    /// rejects the secure-channel handshake.
    async fn connect(&self, endpoint: &str) -> UaResult<()>;

    /// Closes the session (if any) and drops the connection. Idempotent.
    async fn disconnect(&self) -> UaResult<()>;

    /// Returns `true` while the transport holds a live connection.
    fn is_connected(&self) -> bool;

    /// Creates an authenticated session on the connected transport.
    async fn create_session(
        &self,
        credentials: &lode_core::config::Credentials,
    ) -> UaResult<SessionHandle>;

    /// Creates a subscription and returns its server-assigned id.
    async fn create_subscription(&self, settings: &SubscriptionSettings) -> UaResult<u32>;

    /// Deletes a subscription and all its monitored items.
    async fn delete_subscription(&self, subscription_id: u32) -> UaResult<()>;

    /// Registers a batch of monitored items on a subscription.
    ///
    /// Returns the server-assigned monitored-item ids, one per input node.
    async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: &[NodeId],
        settings: &MonitoringSettings,
    ) -> UaResult<Vec<u32>>;

    /// Commits one batched write.
    async fn write(&self, batch: &[WriteValue]) -> UaResult<()>;

    /// Invokes a method on an object node.
    async fn call_method(&self, object: &NodeId, method: &NodeId) -> UaResult<()>;

    /// Reads historical values for a set of nodes over a time range.
    async fn read_history(
        &self,
        nodes: &[NodeId],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> UaResult<Vec<HistorySeries>>;

    /// Resolves the concrete built-in type of a node.
    async fn get_built_in_data_type(&self, node: &NodeId) -> UaResult<BuiltInType>;

    /// Subscribes to connection lifecycle events.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Subscribes to subscription notifications.
    fn notifications(&self) -> broadcast::Receiver<Notification>;

    /// Retry policy the transport was built with.
    fn retry_policy(&self) -> &RetryPolicy;
}

/// Creates transports.
///
/// The redundancy controller uses this to build the disposable probe
/// client that checks primary recovery without touching the active
/// session.
pub trait TransportFactory: Send + Sync {
    /// Builds a fresh, disconnected transport.
    fn create(&self) -> Arc<dyn UaTransport>;
}

// =============================================================================
// Tests
// =============================================================================
