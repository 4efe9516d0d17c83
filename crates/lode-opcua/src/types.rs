// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node identifiers and wire data types.
//!
//! A [`NodeId`] is the canonical locator of a server-side data point. Its
//! string grammar (`ns=2;s=Pump.Speed`) is also the key the pipeline uses
//! to map change notifications back to external channel ids, so `Display`
//! and `FromStr` must agree exactly.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UaError;

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA node identifier: namespace index plus one of four identifier
/// forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 is the standard namespace).
    pub namespace: u16,

    /// The identifier itself.
    pub identifier: NodeIdentifier,
}

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeIdentifier {
    /// Numeric identifier (`i=`).
    Numeric(u32),

    /// String identifier (`s=`).
    String(String),

    /// GUID identifier (`g=`).
    Guid(Uuid),

    /// Opaque byte identifier (`b=`), rendered base64.
    Opaque(Vec<u8>),
}

impl NodeId {
    /// Creates a numeric node id.
    #[inline]
    pub fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    #[inline]
    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node id.
    #[inline]
    pub fn guid(namespace: u16, value: Uuid) -> Self {
        Self {
            namespace,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque node id.
    #[inline]
    pub fn opaque(namespace: u16, value: Vec<u8>) -> Self {
        Self {
            namespace,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    /// Canonical string form, identical to `Display`.
    pub fn to_canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};{}", self.namespace, self.identifier)
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

impl FromStr for NodeId {
    type Err = UaError;

    /// Parses the OPC UA string grammar.
    ///
    /// Accepted forms: `ns=2;i=1001`, `ns=2;s=Pump.Speed`,
    /// `ns=2;g=<uuid>`, `ns=2;b=<base64>`, and the same four without the
    /// `ns=` part (namespace 0). String identifiers may contain `;`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();

        let (namespace, rest) = match input.strip_prefix("ns=") {
            Some(tail) => {
                let (ns_part, rest) = tail
                    .split_once(';')
                    .ok_or_else(|| UaError::invalid_node_id(input, "missing ';' after namespace"))?;
                let namespace = ns_part
                    .parse::<u16>()
                    .map_err(|e| UaError::invalid_node_id(input, format!("bad namespace: {}", e)))?;
                (namespace, rest)
            }
            None => (0, input),
        };

        let (marker, value) = rest
            .split_once('=')
            .ok_or_else(|| UaError::invalid_node_id(input, "missing identifier marker"))?;

        let identifier = match marker {
            "i" => NodeIdentifier::Numeric(
                value
                    .parse::<u32>()
                    .map_err(|e| UaError::invalid_node_id(input, format!("bad numeric id: {}", e)))?,
            ),
            "s" => NodeIdentifier::String(value.to_string()),
            "g" => NodeIdentifier::Guid(
                Uuid::parse_str(value)
                    .map_err(|e| UaError::invalid_node_id(input, format!("bad guid: {}", e)))?,
            ),
            "b" => NodeIdentifier::Opaque(
                BASE64
                    .decode(value)
                    .map_err(|e| UaError::invalid_node_id(input, format!("bad base64: {}", e)))?,
            ),
            other => {
                return Err(UaError::invalid_node_id(
                    input,
                    format!("unknown identifier marker {:?}", other),
                ))
            }
        };

        Ok(Self {
            namespace,
            identifier,
        })
    }
}

// =============================================================================
// BuiltInType
// =============================================================================

/// Declared wire data type of a channel or write target.
///
/// A closed enumeration; custom types declared as `ns=...` strings become
/// [`BuiltInType::Namespaced`] and are resolved against the live session
/// when a write needs the concrete built-in type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltInType {
    /// Boolean.
    Boolean,
    /// Signed 8-bit integer.
    SByte,
    /// Unsigned 8-bit integer.
    Byte,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Timestamp.
    DateTime,
    /// GUID.
    Guid,
    /// Raw bytes.
    ByteString,
    /// Method node; dispatched as a call, never written.
    Method,
    /// Custom type declared by node id; needs a live lookup.
    Namespaced(std::string::String),
}

impl BuiltInType {
    /// Returns `true` for the two 64-bit integer types that may arrive as
    /// a split two-word pair.
    #[inline]
    pub fn is_wide_integer(&self) -> bool {
        matches!(self, Self::Int64 | Self::UInt64)
    }

    /// Returns `true` if this entry marks a method invocation.
    #[inline]
    pub fn is_method(&self) -> bool {
        matches!(self, Self::Method)
    }

    /// Returns `true` if the concrete built-in type needs a live lookup.
    #[inline]
    pub fn needs_lookup(&self) -> bool {
        matches!(self, Self::Namespaced(_))
    }
}

impl FromStr for BuiltInType {
    type Err = UaError;

    /// Parses a declared type name.
    ///
    /// `Bool` is accepted as an alias for `Boolean`; `ns=...` declarations
    /// become [`BuiltInType::Namespaced`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.starts_with("ns=") {
            return Ok(Self::Namespaced(name.to_string()));
        }
        match name {
            "Boolean" | "Bool" => Ok(Self::Boolean),
            "SByte" => Ok(Self::SByte),
            "Byte" => Ok(Self::Byte),
            "Int16" => Ok(Self::Int16),
            "UInt16" => Ok(Self::UInt16),
            "Int32" => Ok(Self::Int32),
            "UInt32" => Ok(Self::UInt32),
            "Int64" => Ok(Self::Int64),
            "UInt64" => Ok(Self::UInt64),
            "Float" => Ok(Self::Float),
            "Double" => Ok(Self::Double),
            "String" => Ok(Self::String),
            "DateTime" => Ok(Self::DateTime),
            "Guid" => Ok(Self::Guid),
            "ByteString" => Ok(Self::ByteString),
            "Method" => Ok(Self::Method),
            other => Err(UaError::UnknownDataType(other.to_string())),
        }
    }
}

impl fmt::Display for BuiltInType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "Boolean"),
            Self::SByte => write!(f, "SByte"),
            Self::Byte => write!(f, "Byte"),
            Self::Int16 => write!(f, "Int16"),
            Self::UInt16 => write!(f, "UInt16"),
            Self::Int32 => write!(f, "Int32"),
            Self::UInt32 => write!(f, "UInt32"),
            Self::Int64 => write!(f, "Int64"),
            Self::UInt64 => write!(f, "UInt64"),
            Self::Float => write!(f, "Float"),
            Self::Double => write!(f, "Double"),
            Self::String => write!(f, "String"),
            Self::DateTime => write!(f, "DateTime"),
            Self::Guid => write!(f, "Guid"),
            Self::ByteString => write!(f, "ByteString"),
            Self::Method => write!(f, "Method"),
            Self::Namespaced(v) => write!(f, "{}", v),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_round_trips_all_four_forms() {
        let cases = [
            "ns=0;i=85",
            "ns=2;s=Pump.Speed",
            "ns=4;s=|var|PLC.Application.PRG.a",
            "ns=3;g=550e8400-e29b-41d4-a716-446655440000",
            "ns=1;b=SGVsbG8=",
        ];
        for case in cases {
            let parsed: NodeId = case.parse().unwrap();
            assert_eq!(parsed.to_string(), case);
        }
    }

    #[test]
    fn bare_identifier_defaults_to_namespace_zero() {
        let parsed: NodeId = "i=2253".parse().unwrap();
        assert_eq!(parsed, NodeId::numeric(0, 2253));
        assert_eq!(parsed.to_string(), "ns=0;i=2253");
    }

    #[test]
    fn string_identifier_keeps_embedded_semicolons() {
        let parsed: NodeId = "ns=4;s=a;b;c".parse().unwrap();
        assert_eq!(parsed, NodeId::string(4, "a;b;c"));
    }

    #[test]
    fn opaque_identifier_renders_base64() {
        let id = NodeId::opaque(2, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(id.to_string(), "ns=2;b=3q2+7w==");
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!("".parse::<NodeId>().is_err());
        assert!("ns=2".parse::<NodeId>().is_err());
        assert!("ns=2;x=1".parse::<NodeId>().is_err());
        assert!("ns=abc;i=1".parse::<NodeId>().is_err());
        assert!("ns=2;i=notanumber".parse::<NodeId>().is_err());
    }

    #[test]
    fn built_in_type_parsing() {
        assert_eq!("Boolean".parse::<BuiltInType>().unwrap(), BuiltInType::Boolean);
        assert_eq!("Bool".parse::<BuiltInType>().unwrap(), BuiltInType::Boolean);
        assert_eq!("UInt64".parse::<BuiltInType>().unwrap(), BuiltInType::UInt64);
        assert_eq!(
            "ns=3;i=3002".parse::<BuiltInType>().unwrap(),
            BuiltInType::Namespaced("ns=3;i=3002".into())
        );
        assert!("Widget".parse::<BuiltInType>().is_err());
    }

    #[test]
    fn wide_integer_detection() {
        assert!(BuiltInType::Int64.is_wide_integer());
        assert!(BuiltInType::UInt64.is_wide_integer());
        assert!(!BuiltInType::Int32.is_wide_integer());
    }
}
