// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration and host-link error types.

use thiserror::Error;

/// Errors raised by configuration validation at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The primary endpoint URL is missing or empty.
    #[error("endpoint_url must be set")]
    MissingEndpoint,

    /// Redundancy was enabled without naming a redundant endpoint.
    #[error("use_redundancy requires redundancy_endpoint_url")]
    MissingRedundantEndpoint,

    /// A field value is outside its accepted range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,

        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-value error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Error returned when the host pipeline rejects an outbound message.
#[derive(Debug, Clone, Error)]
#[error("host pipeline rejected {what}: {reason}")]
pub struct LinkError {
    /// What was being sent.
    pub what: &'static str,

    /// Why the host rejected it.
    pub reason: String,
}

impl LinkError {
    /// Creates a link error.
    pub fn new(what: &'static str, reason: impl Into<String>) -> Self {
        Self {
            what,
            reason: reason.into(),
        }
    }
}
