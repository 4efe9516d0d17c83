// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Channel grouping and subscription batch planning.
//!
//! The externally supplied channel list is partitioned by parent-folder
//! key; each group inherits the sampling parameters of its first member and
//! is then sliced into batches no larger than the configured maximum
//! variables per subscription. Planning is pure; the monitor driver turns
//! the plan into live subscriptions.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::warn;

use lode_core::channel::Channel;
use lode_core::config::MonitoringDefaults;

use crate::transport::MonitoringSettings;
use crate::types::{BuiltInType, NodeId};

// =============================================================================
// ChannelIndex
// =============================================================================

/// One external channel bound to a monitored node.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBinding {
    /// External channel identifier.
    pub id: String,

    /// Declared data type, if the host supplied a recognizable one.
    pub declared: Option<BuiltInType>,
}

/// Maps canonical node strings to the external channels they feed.
///
/// A single node locator may serve several external ids; one notification
/// fans out to all of them.
#[derive(Debug, Clone, Default)]
pub struct ChannelIndex {
    map: HashMap<String, Vec<ChannelBinding>>,
}

impl ChannelIndex {
    /// Bindings for a canonical node string.
    pub fn bindings(&self, node: &str) -> &[ChannelBinding] {
        self.map.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct monitored nodes.
    pub fn node_count(&self) -> usize {
        self.map.len()
    }

    /// Total number of channel bindings.
    pub fn binding_count(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    fn insert(&mut self, node: String, binding: ChannelBinding) {
        self.map.entry(node).or_default().push(binding);
    }
}

// =============================================================================
// MonitorPlan
// =============================================================================

/// One monitored-item batch attached to one subscription.
#[derive(Debug, Clone)]
pub struct MonitorBatch {
    /// Group key the batch came from; `None` for ungrouped channels.
    pub group: Option<String>,

    /// Nodes to monitor, at most `max_variables_per_sub` of them.
    pub items: Vec<NodeId>,

    /// Monitoring parameters shared by the batch.
    pub settings: MonitoringSettings,
}

/// Output of [`plan`]: the batches to create and the notification index.
#[derive(Debug, Clone, Default)]
pub struct MonitorPlan {
    /// Batches in deterministic group order.
    pub batches: Vec<MonitorBatch>,

    /// Node-to-channel fan-out index.
    pub index: ChannelIndex,
}

impl MonitorPlan {
    /// Total monitored items across all batches.
    pub fn item_count(&self) -> usize {
        self.batches.iter().map(|b| b.items.len()).sum()
    }
}

struct GroupAccumulator {
    settings: MonitoringSettings,
    nodes: Vec<NodeId>,
    seen: HashSet<String>,
}

/// Plans subscription batches for a channel list.
///
/// Channels sharing a group key inherit that group's sampling interval,
/// discard-oldest flag, queue size and deadband from the group's first
/// member; ungrouped channels use the global defaults. Duplicate node
/// locators within a group are monitored once and fan out through the
/// index. Channels with unparseable node locators are skipped with a
/// warning and excluded from the plan.
pub fn plan(
    channels: &[Channel],
    defaults: &MonitoringDefaults,
    max_variables_per_sub: usize,
) -> MonitorPlan {
    let mut index = ChannelIndex::default();
    let mut groups: BTreeMap<Option<String>, GroupAccumulator> = BTreeMap::new();

    for channel in channels {
        let node: NodeId = match channel.node.parse() {
            Ok(node) => node,
            Err(e) => {
                warn!(id = %channel.id, node = %channel.node, error = %e, "Skipping channel with bad node locator");
                continue;
            }
        };
        let canonical = node.to_canonical();

        let declared = channel.data_type.as_deref().and_then(|name| {
            match name.parse::<BuiltInType>() {
                Ok(t) => Some(t),
                Err(_) => {
                    warn!(id = %channel.id, data_type = name, "Ignoring unrecognized declared type");
                    None
                }
            }
        });
        index.insert(
            canonical.clone(),
            ChannelBinding {
                id: channel.id.clone(),
                declared,
            },
        );

        match groups.entry(channel.group.clone()) {
            Entry::Vacant(slot) => {
                let settings = if channel.group.is_some() {
                    group_settings(channel, defaults)
                } else {
                    MonitoringSettings::from_defaults(defaults)
                };
                let mut acc = GroupAccumulator {
                    settings,
                    nodes: Vec::new(),
                    seen: HashSet::new(),
                };
                acc.seen.insert(canonical);
                acc.nodes.push(node);
                slot.insert(acc);
            }
            Entry::Occupied(mut slot) => {
                let acc = slot.get_mut();
                if acc.seen.insert(canonical) {
                    acc.nodes.push(node);
                }
            }
        }
    }

    let mut batches = Vec::new();
    for (group, acc) in groups {
        for chunk in acc.nodes.chunks(max_variables_per_sub.max(1)) {
            batches.push(MonitorBatch {
                group: group.clone(),
                items: chunk.to_vec(),
                settings: acc.settings.clone(),
            });
        }
    }

    MonitorPlan { batches, index }
}

/// Group settings taken from the group's first member, field by field.
fn group_settings(first: &Channel, defaults: &MonitoringDefaults) -> MonitoringSettings {
    MonitoringSettings {
        sampling_interval: first
            .sampling_interval
            .map(std::time::Duration::from_millis)
            .unwrap_or(defaults.sampling_interval),
        discard_oldest: first.discard_oldest.unwrap_or(defaults.discard_oldest),
        queue_size: first.queue_size.unwrap_or(defaults.queue_size),
        deadband: first.deadband,
    }
}

// =============================================================================
// Tests
// =============================================================================
