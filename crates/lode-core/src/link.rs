// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Northbound host-pipeline surface.
//!
//! Everything the gateway emits toward the host platform goes through one
//! [`HostLink`] implementation: telemetry batches, archive batches, command
//! responses and process-status updates. The gateway never talks to host
//! transports directly, which keeps the pipeline testable with the
//! [`RecordingLink`] double.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::types::TelemetryRecord;

// =============================================================================
// CommandResponse
// =============================================================================

/// Outcome of a host command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Command name this responds to.
    pub command: String,

    /// Success or failure.
    pub status: CommandStatus,

    /// Free-form payload; carries the error text on failure.
    pub payload: serde_json::Value,
}

impl CommandResponse {
    /// Creates a success response.
    pub fn success(command: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            command: command.into(),
            status: CommandStatus::Success,
            payload,
        }
    }

    /// Creates a failure response carrying the error text.
    pub fn failure(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            status: CommandStatus::Failure,
            payload: serde_json::Value::String(error.into()),
        }
    }
}

/// Command completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// The command completed.
    Success,

    /// The command failed.
    Failure,
}

// =============================================================================
// HostLink
// =============================================================================

/// Process-status key reporting the redundancy phase.
pub const STATUS_REDUNDANCY_STATE: &str = "redundancy_state";

/// Process-status key reporting the active endpoint URL.
pub const STATUS_CURRENT_ENDPOINT: &str = "current_endpoint";

/// Process-status key reporting the active server role.
pub const STATUS_CURRENT_SERVER: &str = "current_server";

/// Northbound surface toward the host platform.
///
/// Implementations must be cheap to call from concurrent tasks; the
/// gateway invokes them from its flush timer and its failover path.
#[async_trait]
pub trait HostLink: Send + Sync {
    /// Delivers one batch of telemetry records.
    async fn send_data(&self, records: Vec<TelemetryRecord>) -> Result<(), LinkError>;

    /// Delivers one batch of archive (history) records.
    async fn send_archive(&self, records: Vec<TelemetryRecord>) -> Result<(), LinkError>;

    /// Delivers a command response.
    async fn send_response(&self, response: CommandResponse) -> Result<(), LinkError>;

    /// Publishes a process-status key/value update.
    async fn update_status(&self, key: &str, value: &str) -> Result<(), LinkError>;
}

// =============================================================================
// RecordingLink
// =============================================================================

/// In-memory [`HostLink`] double that records everything it receives.
#[derive(Debug, Default)]
pub struct RecordingLink {
    data: Mutex<Vec<Vec<TelemetryRecord>>>,
    archives: Mutex<Vec<Vec<TelemetryRecord>>>,
    responses: Mutex<Vec<CommandResponse>>,
    statuses: Mutex<Vec<(String, String)>>,
}

impl RecordingLink {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Telemetry batches received so far.
    pub fn data_batches(&self) -> Vec<Vec<TelemetryRecord>> {
        self.data.lock().clone()
    }

    /// Archive batches received so far.
    pub fn archive_batches(&self) -> Vec<Vec<TelemetryRecord>> {
        self.archives.lock().clone()
    }

    /// Command responses received so far.
    pub fn responses(&self) -> Vec<CommandResponse> {
        self.responses.lock().clone()
    }

    /// Status updates received so far, in arrival order.
    pub fn statuses(&self) -> Vec<(String, String)> {
        self.statuses.lock().clone()
    }

    /// Counts status updates matching the given key and value.
    pub fn status_count(&self, key: &str, value: &str) -> usize {
        self.statuses
            .lock()
            .iter()
            .filter(|(k, v)| k == key && v == value)
            .count()
    }

    /// Last value published for the given status key.
    pub fn status_value(&self, key: &str) -> Option<String> {
        self.statuses
            .lock()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl HostLink for RecordingLink {
    async fn send_data(&self, records: Vec<TelemetryRecord>) -> Result<(), LinkError> {
        self.data.lock().push(records);
        Ok(())
    }

    async fn send_archive(&self, records: Vec<TelemetryRecord>) -> Result<(), LinkError> {
        self.archives.lock().push(records);
        Ok(())
    }

    async fn send_response(&self, response: CommandResponse) -> Result<(), LinkError> {
        self.responses.lock().push(response);
        Ok(())
    }

    async fn update_status(&self, key: &str, value: &str) -> Result<(), LinkError> {
        self.statuses.lock().push((key.to_string(), value.to_string()));
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
