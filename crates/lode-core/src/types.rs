// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Telemetry value model.
//!
//! Outbound values are a closed set: integers, unsigned integers, floats
//! and text. Booleans never leave the gateway as booleans; the decoding
//! layer coerces them to `0`/`1` integers, and structured wire values are
//! rendered to canonical JSON text before they reach a [`TelemetryRecord`].

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Value
// =============================================================================

/// An outbound telemetry value.
///
/// `Display` renders the exact textual form of the value; for integers this
/// is the full decimal representation, which is what downstream consumers
/// compare against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Signed integer (also carries coerced booleans as 0/1).
    Int(i64),

    /// Unsigned integer, used where the full `u64` range is required.
    UInt(u64),

    /// Floating point value.
    Float(f64),

    /// Text, including JSON-serialized structured values.
    Text(String),
}

impl Value {
    /// Returns the value as a signed integer if it is one.
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the value as a float if it is numeric.
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Returns the text content if the value is textual.
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::UInt(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Int(if v { 1 } else { 0 })
    }
}

// =============================================================================
// Quality
// =============================================================================

/// Raw status-code word attached to a telemetry record.
///
/// The word follows the OPC UA status-code layout: the two top bits select
/// good (00), uncertain (01) or bad (10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Quality(pub u32);

impl Quality {
    /// The all-good status word.
    pub const GOOD: Quality = Quality(0);

    /// Returns `true` if the status is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the status is uncertain.
    #[inline]
    pub fn is_uncertain(&self) -> bool {
        self.0 & 0x4000_0000 != 0 && self.0 & 0x8000_0000 == 0
    }

    /// Returns `true` if the status is bad.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

// =============================================================================
// TelemetryRecord
// =============================================================================

/// One outbound record: a channel value change or a write confirmation.
///
/// `ts` is milliseconds since the Unix epoch, taken from the source
/// timestamp of the notification or from wall clock when the gateway is
/// configured to prefer local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// External channel identifier.
    pub id: String,

    /// Decoded value.
    pub value: Value,

    /// Status word reported with the value.
    pub quality: Quality,

    /// Timestamp in epoch milliseconds.
    pub ts: i64,
}

impl TelemetryRecord {
    /// Creates a record with the given fields.
    pub fn new(id: impl Into<String>, value: Value, quality: Quality, ts: i64) -> Self {
        Self {
            id: id.into(),
            value,
            quality,
            ts,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
