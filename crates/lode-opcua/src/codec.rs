// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Wire-value decoding into outbound telemetry values.
//!
//! Pure functions, no I/O. The rules:
//!
//! - structured values (arrays, byte strings) are rendered to canonical
//!   JSON text
//! - booleans become `0`/`1` integers
//! - values declared `Int64`/`UInt64` but delivered as a two-element
//!   `UInt32` pair are reassembled as the little-endian low/high halves of
//!   one 64-bit integer
//! - every other scalar passes through unchanged

use chrono::{DateTime, Utc};

use lode_core::types::Value;

use crate::transport::WireValue;
use crate::types::BuiltInType;

/// Decodes one wire value into an outbound telemetry value.
///
/// `declared` is the channel's declared type; it only matters for the
/// split 64-bit case, where the wire carries a `[low, high]` word pair and
/// the declaration decides the signedness of the reassembled integer.
pub fn decode_value(wire: &WireValue, declared: Option<&BuiltInType>) -> Value {
    if let Some(declared) = declared {
        if declared.is_wide_integer() {
            if let Some(value) = reassemble_wide(wire, declared) {
                return value;
            }
        }
    }

    match wire {
        WireValue::Boolean(v) => Value::Int(if *v { 1 } else { 0 }),
        WireValue::SByte(v) => Value::Int(*v as i64),
        WireValue::Byte(v) => Value::Int(*v as i64),
        WireValue::Int16(v) => Value::Int(*v as i64),
        WireValue::UInt16(v) => Value::Int(*v as i64),
        WireValue::Int32(v) => Value::Int(*v as i64),
        WireValue::UInt32(v) => Value::Int(*v as i64),
        WireValue::Int64(v) => Value::Int(*v),
        WireValue::UInt64(v) => Value::UInt(*v),
        WireValue::Float(v) => Value::Float(*v as f64),
        WireValue::Double(v) => Value::Float(*v),
        WireValue::String(v) => Value::Text(v.clone()),
        WireValue::DateTime(v) => Value::Text(v.to_rfc3339()),
        WireValue::Guid(v) => Value::Text(v.to_string()),
        WireValue::ByteString(_) | WireValue::Array(_) => Value::Text(stringify(wire)),
        WireValue::Null => Value::Text("null".to_string()),
    }
}

/// Reassembles a `[low, high]` `UInt32` pair into the declared 64-bit
/// integer. Returns `None` when the wire shape does not match, in which
/// case the value decodes by the ordinary rules.
fn reassemble_wide(wire: &WireValue, declared: &BuiltInType) -> Option<Value> {
    let WireValue::Array(parts) = wire else {
        return None;
    };
    let [WireValue::UInt32(low), WireValue::UInt32(high)] = parts.as_slice() else {
        return None;
    };

    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&low.to_le_bytes());
    bytes[4..].copy_from_slice(&high.to_le_bytes());

    Some(match declared {
        BuiltInType::Int64 => Value::Int(i64::from_le_bytes(bytes)),
        BuiltInType::UInt64 => Value::UInt(u64::from_le_bytes(bytes)),
        _ => return None,
    })
}

/// Renders a structured wire value as canonical JSON text.
fn stringify(wire: &WireValue) -> String {
    serde_json::to_string(&to_json(wire)).unwrap_or_else(|_| wire.to_string())
}

fn to_json(wire: &WireValue) -> serde_json::Value {
    use serde_json::{json, Value as Json};
    match wire {
        WireValue::Boolean(v) => json!(v),
        WireValue::SByte(v) => json!(v),
        WireValue::Byte(v) => json!(v),
        WireValue::Int16(v) => json!(v),
        WireValue::UInt16(v) => json!(v),
        WireValue::Int32(v) => json!(v),
        WireValue::UInt32(v) => json!(v),
        WireValue::Int64(v) => json!(v),
        WireValue::UInt64(v) => json!(v),
        WireValue::Float(v) => json!(v),
        WireValue::Double(v) => json!(v),
        WireValue::String(v) => json!(v),
        WireValue::DateTime(v) => json!(v.to_rfc3339()),
        WireValue::Guid(v) => json!(v.to_string()),
        WireValue::ByteString(v) => json!(v),
        WireValue::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        WireValue::Null => Json::Null,
    }
}

/// Picks the record timestamp in epoch milliseconds.
///
/// The source timestamp wins unless the gateway prefers local time or the
/// server did not supply one.
pub fn record_timestamp(source_ts: Option<DateTime<Utc>>, use_system_ts: bool) -> i64 {
    match source_ts {
        Some(ts) if !use_system_ts => ts.timestamp_millis(),
        _ => Utc::now().timestamp_millis(),
    }
}

// =============================================================================
// Tests
// =============================================================================
