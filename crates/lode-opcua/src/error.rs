// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error taxonomy for the OPC UA pipeline.
//!
//! Per-item failures (a single monitored item, one write entry, one method
//! call) are logged where they occur and never abort sibling operations.
//! Connection-level failures are funneled through the failover decision
//! point instead of being surfaced to callers as panics.

use thiserror::Error;

use lode_core::error::ConfigError;

/// Result alias used throughout the crate.
pub type UaResult<T> = Result<T, UaError>;

/// The error type for OPC UA pipeline operations.
#[derive(Debug, Clone, Error)]
pub enum UaError {
    /// Establishing the transport connection failed.
    #[error("connect to {endpoint} failed: {reason}")]
    ConnectFailure {
        /// Endpoint that was being connected.
        endpoint: String,

        /// Failure detail from the transport.
        reason: String,
    },

    /// The transport connected but session creation failed.
    #[error("session creation failed: {0}")]
    SessionCreateFailure(String),

    /// The transport exhausted its connect retry budget.
    #[error("retry budget exhausted after {retries} attempts")]
    BackoffExhausted {
        /// Attempts made before giving up.
        retries: u32,
    },

    /// The transport reported an established connection as lost.
    #[error("connection lost")]
    ConnectionLost,

    /// No liveness signal arrived within the stall threshold.
    #[error("no keepalive for {elapsed_ms}ms (threshold {threshold_ms}ms)")]
    KeepAliveTimeout {
        /// Milliseconds since the last liveness signal.
        elapsed_ms: u64,

        /// Threshold that was exceeded.
        threshold_ms: u64,
    },

    /// Creating a subscription or monitored-item batch failed.
    #[error("subscription creation failed: {0}")]
    SubscriptionCreateFailure(String),

    /// A single monitored item failed; siblings are unaffected.
    #[error("monitored item {node}: {reason}")]
    MonitoredItemError {
        /// Canonical node string of the failed item.
        node: String,

        /// Failure detail.
        reason: String,
    },

    /// A batched write failed as a whole.
    #[error("write failed: {0}")]
    WriteFailure(String),

    /// A single method invocation failed.
    #[error("method call {method} failed: {reason}")]
    MethodCallFailure {
        /// Method node that was invoked.
        method: String,

        /// Failure detail.
        reason: String,
    },

    /// A history read failed; reported as a failed command response.
    #[error("history read failed: {0}")]
    HistoryReadFailure(String),

    /// A node locator string could not be parsed.
    #[error("invalid node identifier {input:?}: {reason}")]
    InvalidNodeId {
        /// The rejected input.
        input: String,

        /// Why it was rejected.
        reason: String,
    },

    /// A declared data type name is not recognized.
    #[error("unknown data type {0:?}")]
    UnknownDataType(String),

    /// An operation needs a live session and none exists.
    #[error("no active session")]
    NoSession,

    /// A connect attempt was issued while one was already in flight.
    #[error("connect already in progress")]
    ConnectInProgress,

    /// Startup configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl UaError {
    /// Creates a connect failure.
    pub fn connect(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailure {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a per-item monitored-item error.
    pub fn monitored_item(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MonitoredItemError {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Creates a method-call failure.
    pub fn method_call(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MethodCallFailure {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Creates a node-identifier parse error.
    pub fn invalid_node_id(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for failures that feed the failover decision point
    /// rather than being reported to the operation's caller.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailure { .. }
                | Self::BackoffExhausted { .. }
                | Self::ConnectionLost
                | Self::KeepAliveTimeout { .. }
        )
    }

    /// Returns `true` for failures scoped to one item of a batch.
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            Self::MonitoredItemError { .. } | Self::MethodCallFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_level_classification() {
        assert!(UaError::connect("opc.tcp://plc:4840", "refused").is_connection_level());
        assert!(UaError::ConnectionLost.is_connection_level());
        assert!(UaError::BackoffExhausted { retries: 3 }.is_connection_level());
        assert!(!UaError::WriteFailure("bad node".into()).is_connection_level());
    }

    #[test]
    fn per_item_classification() {
        assert!(UaError::monitored_item("ns=2;s=T", "bad filter").is_per_item());
        assert!(UaError::method_call("ns=2;s=Reset", "timeout").is_per_item());
        assert!(!UaError::ConnectionLost.is_per_item());
    }

    #[test]
    fn messages_carry_context() {
        let e = UaError::KeepAliveTimeout {
            elapsed_ms: 16_000,
            threshold_ms: 15_000,
        };
        assert!(e.to_string().contains("16000"));
        assert!(e.to_string().contains("15000"));
    }
}
