// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Write and method-call dispatch.
//!
//! Method entries are dispatched individually, in request order, before
//! the batched write; their outcomes are logged per entry. All remaining
//! entries resolve their concrete wire type (declared builtin, or a live
//! lookup for namespaced declarations), get boolean normalization applied,
//! and commit as one batched write. A batch failure is reported once for
//! the whole batch.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use lode_core::channel::WriteTarget;
use lode_core::types::{Quality, TelemetryRecord, Value};

use crate::buffer::TelemetryBuffer;
use crate::transport::{UaTransport, WireValue, WriteValue};
use crate::types::{BuiltInType, NodeId};

// =============================================================================
// WriteDispatcher
// =============================================================================

/// Dispatches host write/act requests against the live session.
pub struct WriteDispatcher {
    transport: Arc<dyn UaTransport>,
    buffer: Arc<TelemetryBuffer>,
}

impl WriteDispatcher {
    /// Creates a dispatcher writing confirmations into `buffer`.
    pub fn new(transport: Arc<dyn UaTransport>, buffer: Arc<TelemetryBuffer>) -> Self {
        Self { transport, buffer }
    }

    /// Processes one write/act request.
    ///
    /// Per-entry problems (unknown type, bad locator, failed method) are
    /// logged and do not abort sibling entries.
    pub async fn dispatch(&self, batch: &[WriteTarget]) {
        let mut writes: Vec<WriteValue> = Vec::new();
        let mut echoes: Vec<(String, Value)> = Vec::new();

        for target in batch {
            let Some(declared) = self.declared_type(target) else {
                continue;
            };

            if declared.is_method() {
                self.call_method(target).await;
                continue;
            }

            let node: NodeId = match target.node.parse() {
                Ok(node) => node,
                Err(e) => {
                    warn!(id = %target.id, node = %target.node, error = %e, "Skipping write entry with bad node locator");
                    continue;
                }
            };

            let data_type = match self.resolve_type(&node, declared).await {
                Some(data_type) => data_type,
                None => continue,
            };

            let value = coerce(&target.value, &data_type);
            if target.with_ack {
                echoes.push((target.id.clone(), echo_value(&value)));
            }
            writes.push(WriteValue {
                node,
                data_type,
                value,
            });
        }

        if writes.is_empty() {
            return;
        }

        match self.transport.write(&writes).await {
            Ok(()) => {
                info!(entries = writes.len(), "Write batch committed");
                let ts = Utc::now().timestamp_millis();
                for (id, value) in echoes {
                    self.buffer
                        .push(TelemetryRecord::new(id, value, Quality::GOOD, ts));
                }
            }
            Err(e) => {
                error!(entries = writes.len(), error = %e, "Write batch failed");
            }
        }
    }

    fn declared_type(&self, target: &WriteTarget) -> Option<BuiltInType> {
        let Some(name) = target.data_type.as_deref() else {
            warn!(id = %target.id, "Skipping entry without a declared type");
            return None;
        };
        match name.parse::<BuiltInType>() {
            Ok(declared) => Some(declared),
            Err(e) => {
                warn!(id = %target.id, data_type = name, error = %e, "Skipping entry with unrecognized type");
                None
            }
        }
    }

    async fn call_method(&self, target: &WriteTarget) {
        let method: NodeId = match target.node.parse() {
            Ok(node) => node,
            Err(e) => {
                warn!(id = %target.id, node = %target.node, error = %e, "Skipping method entry with bad method locator");
                return;
            }
        };
        let Some(object_str) = target.object_node.as_deref() else {
            warn!(id = %target.id, "Skipping method entry without an object node");
            return;
        };
        let object: NodeId = match object_str.parse() {
            Ok(node) => node,
            Err(e) => {
                warn!(id = %target.id, node = object_str, error = %e, "Skipping method entry with bad object locator");
                return;
            }
        };

        match self.transport.call_method(&object, &method).await {
            Ok(()) => info!(id = %target.id, method = %method, "Method call succeeded"),
            Err(e) => warn!(id = %target.id, method = %method, error = %e, "Method call failed"),
        }
    }

    /// Resolves the wire type for a write entry, consulting the live
    /// session for namespaced declarations.
    async fn resolve_type(&self, node: &NodeId, declared: BuiltInType) -> Option<BuiltInType> {
        if !declared.needs_lookup() {
            return Some(declared);
        }
        match self.transport.get_built_in_data_type(node).await {
            Ok(resolved) => {
                debug!(node = %node, resolved = %resolved, "Resolved namespaced type");
                Some(resolved)
            }
            Err(e) => {
                warn!(node = %node, error = %e, "Type lookup failed, skipping entry");
                None
            }
        }
    }
}

/// Coerces a requested value for the wire.
///
/// Booleans normalize from the host's numeric convention (`0` is false,
/// anything else is true); every other type passes through in text form
/// and the server coerces it against the declared wire type.
fn coerce(requested: &serde_json::Value, data_type: &BuiltInType) -> WireValue {
    if *data_type == BuiltInType::Boolean {
        return WireValue::Boolean(json_truthy(requested));
    }
    WireValue::String(json_text(requested))
}

fn json_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map_or(false, |v| v != 0.0),
        serde_json::Value::String(s) => !s.is_empty() && s != "0",
        serde_json::Value::Null => false,
        _ => true,
    }
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The confirmation value echoed into the telemetry stream.
fn echo_value(committed: &WireValue) -> Value {
    match committed {
        WireValue::Boolean(b) => Value::from(*b),
        other => Value::Text(other.to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use lode_core::config::{Credentials, RetryPolicy};

    use crate::mock::MockTransport;

    use super::*;

    async fn fixture() -> (Arc<MockTransport>, WriteDispatcher, Arc<TelemetryBuffer>) {
        let transport = Arc::new(MockTransport::new(RetryPolicy::default()));
        transport.connect("opc.tcp://plc:4840").await.unwrap();
        transport.create_session(&Credentials::Anonymous).await.unwrap();
        let buffer = Arc::new(TelemetryBuffer::new());
        let dispatcher = WriteDispatcher::new(transport.clone(), buffer.clone());
        (transport, dispatcher, buffer)
    }

    fn entry(id: &str, node: &str, value: serde_json::Value, data_type: &str) -> WriteTarget {
        WriteTarget {
            id: id.into(),
            node: node.into(),
            value,
            data_type: Some(data_type.into()),
            object_node: None,
            with_ack: false,
        }
    }

    #[tokio::test]
    async fn methods_dispatch_separately_and_booleans_normalize() {
        let (transport, dispatcher, _buffer) = fixture().await;

        let mut method = entry("m1", "ns=2;s=Reset", serde_json::json!(1), "Method");
        method.object_node = Some("ns=2;s=Pump".into());
        let switch = entry("b1", "ns=2;s=Enable", serde_json::json!(0), "Boolean");

        dispatcher.dispatch(&[method, switch]).await;

        let calls = transport.method_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, NodeId::string(2, "Pump"));
        assert_eq!(calls[0].1, NodeId::string(2, "Reset"));

        let batches = transport.write_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].value, WireValue::Boolean(false));
        assert_eq!(batches[0][0].data_type, BuiltInType::Boolean);
    }

    #[tokio::test]
    async fn bool_alias_and_nonzero_values_coerce_true() {
        let (transport, dispatcher, _buffer) = fixture().await;

        dispatcher
            .dispatch(&[entry("b1", "ns=2;s=Enable", serde_json::json!(2), "Bool")])
            .await;

        let batches = transport.write_batches();
        assert_eq!(batches[0][0].value, WireValue::Boolean(true));
    }

    #[tokio::test]
    async fn namespaced_types_resolve_against_the_session() {
        let (transport, dispatcher, _buffer) = fixture().await;
        let node = NodeId::string(2, "Custom");
        transport.set_data_type(&node, BuiltInType::Int32);

        dispatcher
            .dispatch(&[entry("c1", "ns=2;s=Custom", serde_json::json!(7), "ns=3;i=3002")])
            .await;

        let batches = transport.write_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].data_type, BuiltInType::Int32);
        assert_eq!(batches[0][0].value, WireValue::String("7".into()));
    }

    #[tokio::test]
    async fn failed_type_lookup_skips_only_that_entry() {
        let (transport, dispatcher, _buffer) = fixture().await;

        dispatcher
            .dispatch(&[
                entry("c1", "ns=2;s=Unknown", serde_json::json!(7), "ns=3;i=9999"),
                entry("i1", "ns=2;s=Speed", serde_json::json!(55), "Int32"),
            ])
            .await;

        let batches = transport.write_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].node, NodeId::string(2, "Speed"));
    }

    #[tokio::test]
    async fn acked_entries_echo_into_the_buffer() {
        let (_transport, dispatcher, buffer) = fixture().await;

        let mut target = entry("b1", "ns=2;s=Enable", serde_json::json!(1), "Boolean");
        target.with_ack = true;
        dispatcher.dispatch(&[target]).await;

        let records = buffer.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "b1");
        assert_eq!(records[0].value, Value::Int(1));
        assert!(records[0].quality.is_good());
    }

    #[tokio::test]
    async fn batch_failure_produces_no_echoes() {
        let (transport, dispatcher, buffer) = fixture().await;
        transport.set_write_failure(true);

        let mut target = entry("b1", "ns=2;s=Enable", serde_json::json!(1), "Boolean");
        target.with_ack = true;
        dispatcher.dispatch(&[target]).await;

        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn method_failure_does_not_abort_the_write_batch() {
        let (transport, dispatcher, _buffer) = fixture().await;
        transport.set_method_failure(true);

        let mut method = entry("m1", "ns=2;s=Reset", serde_json::json!(1), "Method");
        method.object_node = Some("ns=2;s=Pump".into());
        let write = entry("i1", "ns=2;s=Speed", serde_json::json!(55), "Int32");

        dispatcher.dispatch(&[method, write]).await;

        assert!(transport.method_calls().is_empty());
        assert_eq!(transport.write_batches().len(), 1);
    }
}
