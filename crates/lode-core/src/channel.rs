// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Channel (tag point) model and inbound host messages.
//!
//! The channel list is owned by the host platform and replaced wholesale on
//! every change notification. The gateway never mutates individual channel
//! records; it only regroups them into subscriptions.

use serde::{Deserialize, Serialize};

// =============================================================================
// Channel
// =============================================================================

/// One externally configured tag point.
///
/// `group` names the parent-folder key used for subscription grouping.
/// Channels that share a key also share the sampling overrides of the first
/// member of that group; ungrouped channels use the global defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// External identifier the host pipeline addresses this point by.
    pub id: String,

    /// Node locator on the server, in canonical string form.
    pub node: String,

    /// Declared wire data type, if the host knows it.
    #[serde(default)]
    pub data_type: Option<String>,

    /// Parent-folder key for subscription grouping.
    #[serde(default)]
    pub group: Option<String>,

    /// Sampling interval override in milliseconds.
    #[serde(default)]
    pub sampling_interval: Option<u64>,

    /// Discard-oldest override for the server-side queue.
    #[serde(default)]
    pub discard_oldest: Option<bool>,

    /// Queue size override for the server-side queue.
    #[serde(default)]
    pub queue_size: Option<u32>,

    /// Deadband filter override.
    #[serde(default)]
    pub deadband: Option<DeadbandFilter>,
}

impl Channel {
    /// Creates a minimal channel with only identifier and node locator.
    pub fn new(id: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node: node.into(),
            data_type: None,
            group: None,
            sampling_interval: None,
            discard_oldest: None,
            queue_size: None,
            deadband: None,
        }
    }

    /// Sets the declared data type.
    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    /// Sets the grouping key.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

// =============================================================================
// Deadband filter
// =============================================================================

/// Notification-suppression rule attached to a monitored-item group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeadbandFilter {
    /// What kind of change triggers a notification.
    pub trigger: DeadbandTrigger,

    /// How the deadband magnitude is interpreted.
    pub kind: DeadbandKind,

    /// Deadband magnitude.
    pub value: f64,
}

/// Data-change trigger selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeadbandTrigger {
    /// Report on status changes only.
    Status,

    /// Report on status or value changes.
    #[default]
    StatusValue,

    /// Report on status, value or timestamp changes.
    StatusValueTimestamp,
}

/// Deadband magnitude interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeadbandKind {
    /// Absolute engineering-unit difference.
    #[default]
    Absolute,

    /// Percentage of the instrument range.
    Percent,
}

// =============================================================================
// WriteTarget
// =============================================================================

/// One entry of a write/act request from the host.
///
/// Entries whose declared type is `Method` are dispatched as method calls
/// (`object_node` holds the owning object); everything else participates in
/// one batched write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteTarget {
    /// External channel identifier.
    pub id: String,

    /// Node locator to write to, or the method node for method entries.
    pub node: String,

    /// Requested value.
    pub value: serde_json::Value,

    /// Declared data type of the target.
    #[serde(default)]
    pub data_type: Option<String>,

    /// Owning object node for method entries.
    #[serde(default)]
    pub object_node: Option<String>,

    /// Echo the committed value back into the telemetry stream.
    #[serde(default)]
    pub with_ack: bool,
}

// =============================================================================
// Host commands
// =============================================================================

/// A tag named in a history-sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTag {
    /// Node locator to read history for.
    pub node: String,

    /// External identifier the results are reported under.
    pub id: String,
}

/// Inbound command message from the host platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HostCommand {
    /// Read historical values for a set of tags over a time range.
    SyncHistory {
        /// Tags to read.
        points: Vec<HistoryTag>,

        /// Range start, epoch milliseconds.
        start: i64,

        /// Range end, epoch milliseconds.
        end: i64,
    },

    /// Anything this gateway does not interpret.
    #[serde(other)]
    Unknown,
}

impl HostCommand {
    /// Returns the command name used in responses.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SyncHistory { .. } => "sync_history",
            Self::Unknown => "unknown",
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
    fn channel_deserializes_with_defaults() {
        let ch: Channel = serde_json::from_str(r#"{"id": "t1", "node": "ns=2;s=Temp"}"#).unwrap();
        assert_eq!(ch.id, "t1");
        assert!(ch.group.is_none());
        assert!(ch.deadband.is_none());
    }

    #[test]
    fn write_target_ack_defaults_off() {
        let wt: WriteTarget = serde_json::from_str(
            r#"{"id": "t1", "node": "ns=2;s=Sp", "value": 4.2}"#,
        )
        .unwrap();
        assert!(!wt.with_ack);
        assert!(wt.object_node.is_none());
    }

    #[test]
    fn unknown_commands_parse_to_unknown() {
        let cmd: HostCommand = serde_json::from_str(r#"{"command": "reboot_everything"}"#).unwrap();
        assert_eq!(cmd, HostCommand::Unknown);
        assert_eq!(cmd.name(), "unknown");
    }

    #[test]
    fn sync_history_round_trips() {
        let cmd = HostCommand::SyncHistory {
            points: vec![HistoryTag {
                node: "ns=2;s=Temp".into(),
                id: "t1".into(),
            }],
            start: 1000,
            end: 2000,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: HostCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }
}
