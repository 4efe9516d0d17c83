// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription driver.
//!
//! Turns a [`MonitorPlan`](crate::grouper::MonitorPlan) into live
//! subscriptions against the current session and pumps their
//! notifications through the codec into the telemetry buffer. Re-invoking
//! [`MonitorDriver::monitor`] first terminates every previously created
//! subscription, so a channel-list change can never produce duplicate
//! delivery.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lode_core::channel::Channel;
use lode_core::config::GatewayConfig;
use lode_core::types::{Quality, TelemetryRecord};

use crate::buffer::TelemetryBuffer;
use crate::codec::{decode_value, record_timestamp};
use crate::error::UaResult;
use crate::grouper::{plan, ChannelIndex};
use crate::keepalive::KeepaliveClock;
use crate::transport::{Notification, UaTransport};

// =============================================================================
// MonitorDriver
// =============================================================================

struct LiveSubscription {
    subscription_id: u32,
    item_count: usize,
}

/// Creates and tears down subscriptions for the current channel list.
pub struct MonitorDriver {
    transport: Arc<dyn UaTransport>,
    config: Arc<GatewayConfig>,
    index: RwLock<ChannelIndex>,
    live: tokio::sync::Mutex<Vec<LiveSubscription>>,
}

impl MonitorDriver {
    /// Creates a driver over the given transport.
    pub fn new(transport: Arc<dyn UaTransport>, config: Arc<GatewayConfig>) -> Self {
        Self {
            transport,
            config,
            index: RwLock::new(ChannelIndex::default()),
            live: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Mirrors the given channel list as subscriptions.
    ///
    /// Previously created subscriptions are terminated first. A failure
    /// creating one batch is logged and does not abort the remaining
    /// batches; partial monitoring is preferred over none. Returns the
    /// number of batches that went live.
    pub async fn monitor(&self, channels: &[Channel]) -> UaResult<usize> {
        let mut live = self.live.lock().await;
        self.teardown(&mut live).await;

        let plan = plan(
            channels,
            &self.config.monitoring,
            self.config.max_variables_per_sub,
        );
        let planned_batches = plan.batches.len();
        let planned_items = plan.item_count();
        *self.index.write() = plan.index;

        for batch in plan.batches {
            let subscription_id = match self
                .transport
                .create_subscription(&self.config.subscription)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    warn!(group = batch.group.as_deref().unwrap_or("<none>"), error = %e, "Subscription creation failed, continuing with remaining groups");
                    continue;
                }
            };

            match self
                .transport
                .create_monitored_items(subscription_id, &batch.items, &batch.settings)
                .await
            {
                Ok(item_ids) => {
                    debug!(
                        subscription_id,
                        items = item_ids.len(),
                        group = batch.group.as_deref().unwrap_or("<none>"),
                        "Monitored-item batch created"
                    );
                    live.push(LiveSubscription {
                        subscription_id,
                        item_count: item_ids.len(),
                    });
                }
                Err(e) => {
                    warn!(subscription_id, error = %e, "Monitored-item creation failed, dropping the subscription");
                    let _ = self.transport.delete_subscription(subscription_id).await;
                }
            }
        }

        info!(
            channels = channels.len(),
            planned_items,
            batches = live.len(),
            planned_batches,
            "Monitoring rebuilt"
        );
        Ok(live.len())
    }

    /// Terminates all live subscriptions.
    pub async fn stop(&self) {
        let mut live = self.live.lock().await;
        self.teardown(&mut live).await;
    }

    async fn teardown(&self, live: &mut Vec<LiveSubscription>) {
        for subscription in live.drain(..) {
            if let Err(e) = self
                .transport
                .delete_subscription(subscription.subscription_id)
                .await
            {
                warn!(
                    subscription_id = subscription.subscription_id,
                    items = subscription.item_count,
                    error = %e,
                    "Subscription termination failed"
                );
            }
        }
    }

    /// Number of currently live monitored items.
    pub async fn live_item_count(&self) -> usize {
        self.live.lock().await.iter().map(|s| s.item_count).sum()
    }

    /// Spawns the notification pump.
    ///
    /// Every notification (data or keepalive) touches the keepalive clock.
    /// Data changes fan out to every external channel bound to the
    /// originating node; per-item errors are logged and nothing else.
    pub fn spawn_pump(
        self: &Arc<Self>,
        buffer: Arc<TelemetryBuffer>,
        clock: Arc<KeepaliveClock>,
    ) -> JoinHandle<()> {
        // Subscribe before spawning so no notification emitted between
        // this call and the task's first poll is missed.
        let mut notifications = self.transport.notifications();
        let driver = self.clone();
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(Notification::KeepAlive) => {
                        clock.touch();
                    }
                    Ok(Notification::ItemError { node, message }) => {
                        warn!(node = %node, message = %message, "Monitored item error");
                    }
                    Ok(Notification::DataChange(change)) => {
                        clock.touch();
                        let canonical = change.node.to_canonical();
                        let bindings = driver.index.read().bindings(&canonical).to_vec();
                        if bindings.is_empty() {
                            debug!(node = %canonical, "Data change for an unmapped node");
                            continue;
                        }
                        let ts =
                            record_timestamp(change.source_ts, driver.config.use_system_ts);
                        buffer.extend(bindings.into_iter().map(|binding| {
                            let value = decode_value(&change.value, binding.declared.as_ref());
                            TelemetryRecord::new(binding.id, value, Quality(change.status), ts)
                        }));
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Notification pump lagged, values were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use lode_core::config::{Credentials, RetryPolicy};
    use lode_core::types::Value;

    use crate::mock::MockTransport;
    use crate::transport::WireValue;
    use crate::types::NodeId;

    use super::*;

    async fn connected_mock() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new(RetryPolicy::default()));
        transport.connect("opc.tcp://plc:4840").await.unwrap();
        transport.create_session(&Credentials::Anonymous).await.unwrap();
        transport
    }

    fn driver(transport: Arc<MockTransport>) -> Arc<MonitorDriver> {
        let config = Arc::new(GatewayConfig::for_endpoint("opc.tcp://plc:4840"));
        Arc::new(MonitorDriver::new(transport, config))
    }

    fn channels(n: usize) -> Vec<Channel> {
        (0..n)
            .map(|i| Channel::new(format!("tag{}", i), format!("ns=2;s=Var{}", i)))
            .collect()
    }

    #[tokio::test]
    async fn large_channel_list_splits_into_capped_batches() {
        let transport = connected_mock().await;
        let driver = driver(transport.clone());

        let created = driver.monitor(&channels(250)).await.unwrap();
        assert_eq!(created, 3);
        assert_eq!(transport.monitored_batch_sizes(), vec![100, 100, 50]);
        assert_eq!(driver.live_item_count().await, 250);
    }

    #[tokio::test]
    async fn remonitoring_terminates_previous_subscriptions() {
        let transport = connected_mock().await;
        let driver = driver(transport.clone());

        driver.monitor(&channels(5)).await.unwrap();
        assert_eq!(transport.live_subscription_count(), 1);

        driver.monitor(&channels(3)).await.unwrap();
        assert_eq!(transport.live_subscription_count(), 1);
        assert_eq!(transport.live_monitored_nodes().len(), 3);
    }

    #[tokio::test]
    async fn one_failed_group_does_not_abort_the_rest() {
        let transport = connected_mock().await;
        let driver = driver(transport.clone());
        transport.fail_next_subscriptions(1);

        let created = driver.monitor(&channels(250)).await.unwrap();
        assert_eq!(created, 2);
        assert_eq!(driver.live_item_count().await, 150);
    }

    #[tokio::test]
    async fn pump_decodes_and_fans_out() {
        let transport = connected_mock().await;
        let driver = driver(transport.clone());
        let buffer = Arc::new(TelemetryBuffer::new());
        let clock = Arc::new(KeepaliveClock::new());

        let shared = vec![
            Channel::new("a", "ns=2;s=Shared").with_data_type("UInt64"),
            Channel::new("b", "ns=2;s=Shared").with_data_type("UInt64"),
        ];
        driver.monitor(&shared).await.unwrap();
        let _pump = driver.spawn_pump(buffer.clone(), clock.clone());

        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        transport.push_data_change(
            NodeId::string(2, "Shared"),
            WireValue::Array(vec![
                WireValue::UInt32(0xFFFF_FFFF),
                WireValue::UInt32(0xFFFF_FFFF),
            ]),
            0,
            Some(ts),
        );

        tokio::task::yield_now().await;
        let records = buffer.drain();
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.value, Value::UInt(u64::MAX));
            assert_eq!(record.ts, ts.timestamp_millis());
            assert!(record.quality.is_good());
        }
        let mut ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn keepalives_touch_the_clock() {
        let transport = connected_mock().await;
        let driver = driver(transport.clone());
        let buffer = Arc::new(TelemetryBuffer::new());
        let clock = Arc::new(KeepaliveClock::new());

        let _pump = driver.spawn_pump(buffer.clone(), clock.clone());
        transport.push_keepalive();
        tokio::task::yield_now().await;

        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn item_errors_do_not_produce_records() {
        let transport = connected_mock().await;
        let driver = driver(transport.clone());
        let buffer = Arc::new(TelemetryBuffer::new());
        let clock = Arc::new(KeepaliveClock::new());

        driver.monitor(&channels(1)).await.unwrap();
        let _pump = driver.spawn_pump(buffer.clone(), clock);

        transport.push_item_error(&NodeId::string(2, "Var0"), "filter rejected");
        tokio::task::yield_now().await;

        assert!(buffer.is_empty());
    }
}
