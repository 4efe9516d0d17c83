// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! End-to-end gateway scenarios over the scripted in-memory transport.
//!
//! These tests drive the assembled pipeline the way a host platform
//! would: configuration plus channel list in, telemetry batches, status
//! updates and command responses out. Time-driven behavior (flush timer,
//! keepalive watchdog, recovery probe) runs under tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use lode_core::channel::{Channel, HistoryTag, HostCommand, WriteTarget};
use lode_core::config::GatewayConfig;
use lode_core::link::{
    CommandStatus, RecordingLink, STATUS_CURRENT_ENDPOINT, STATUS_CURRENT_SERVER,
};
use lode_core::types::Value;

use lode_opcua::mock::MockFactory;
use lode_opcua::transport::{HistorySample, WireValue};
use lode_opcua::types::{BuiltInType, NodeId};
use lode_opcua::{Gateway, ServerRole};

const PRIMARY: &str = "opc.tcp://plc:4840";
const STANDBY: &str = "opc.tcp://standby:4840";

fn config_with_redundancy() -> GatewayConfig {
    GatewayConfig::for_endpoint(PRIMARY).with_redundancy(STANDBY)
}

fn channels(n: usize) -> Vec<Channel> {
    (0..n)
        .map(|i| Channel::new(format!("tag{}", i), format!("ns=2;s=Var{}", i)))
        .collect()
}

// =============================================================================
// Telemetry path
// =============================================================================

#[tokio::test(start_paused = true)]
async fn data_changes_flow_into_buffered_batches() {
    let link = Arc::new(RecordingLink::new());
    let factory = Arc::new(MockFactory::new(Default::default()));

    let mut list = channels(2);
    list.push(Channel::new("wide", "ns=2;s=Counter").with_data_type("Int64"));
    let gateway = Gateway::start(GatewayConfig::for_endpoint(PRIMARY), list, link.clone(), factory.clone())
        .await
        .unwrap();
    let transport = factory.primary_transport().unwrap();

    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    transport.push_data_change(NodeId::string(2, "Var0"), WireValue::Double(21.5), 0, Some(ts));
    transport.push_data_change(
        NodeId::string(2, "Counter"),
        WireValue::Array(vec![
            WireValue::UInt32(0xFFFF_FFFF),
            WireValue::UInt32(0xFFFF_FFFF),
        ]),
        0,
        Some(ts),
    );

    // One flush period later both records leave in a single batch.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let batches = link.data_batches();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.len(), 2);

    let temp = batch.iter().find(|r| r.id == "tag0").unwrap();
    assert_eq!(temp.value, Value::Float(21.5));
    assert_eq!(temp.ts, ts.timestamp_millis());

    let wide = batch.iter().find(|r| r.id == "wide").unwrap();
    assert_eq!(wide.value.to_string(), "-1");

    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn quiet_subscriptions_produce_no_downstream_calls() {
    let link = Arc::new(RecordingLink::new());
    let factory = Arc::new(MockFactory::new(Default::default()));

    let gateway = Gateway::start(
        GatewayConfig::for_endpoint(PRIMARY),
        channels(3),
        link.clone(),
        factory,
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(link.data_batches().is_empty());

    gateway.shutdown().await;
}

// =============================================================================
// Failover scenarios
// =============================================================================

#[tokio::test]
async fn three_connect_failures_switch_to_redundant_exactly_once() {
    let link = Arc::new(RecordingLink::new());
    let factory = Arc::new(MockFactory::new(Default::default()));
    factory.set_unreachable(PRIMARY);

    let gateway = Gateway::start(config_with_redundancy(), channels(4), link.clone(), factory.clone())
        .await
        .unwrap();

    assert_eq!(gateway.server_role(), ServerRole::Redundant);
    assert_eq!(link.status_count(STATUS_CURRENT_SERVER, "redundant"), 1);
    assert_eq!(link.status_value(STATUS_CURRENT_ENDPOINT).as_deref(), Some(STANDBY));

    // The monitoring chain was rebuilt against the redundant endpoint.
    let transport = factory.primary_transport().unwrap();
    assert_eq!(transport.live_monitored_nodes().len(), 4);
    assert_eq!(transport.connect_attempts(), vec![PRIMARY.to_string(), STANDBY.to_string()]);

    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn keepalive_stall_fails_over_to_redundant() {
    let link = Arc::new(RecordingLink::new());
    let factory = Arc::new(MockFactory::new(Default::default()));

    let gateway = Gateway::start(config_with_redundancy(), channels(2), link.clone(), factory.clone())
        .await
        .unwrap();
    assert_eq!(gateway.server_role(), ServerRole::Primary);

    // No keepalives, no data. Threshold is 15s, the watchdog polls every
    // 5s, so the stall is declared on the 20s tick.
    tokio::time::sleep(Duration::from_secs(25)).await;

    assert_eq!(gateway.server_role(), ServerRole::Redundant);
    assert_eq!(gateway.active_endpoint(), STANDBY);
    assert_eq!(link.status_count(STATUS_CURRENT_SERVER, "redundant"), 1);

    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn keepalives_prevent_failover() {
    let link = Arc::new(RecordingLink::new());
    let factory = Arc::new(MockFactory::new(Default::default()));

    let gateway = Gateway::start(config_with_redundancy(), channels(2), link.clone(), factory.clone())
        .await
        .unwrap();
    let transport = factory.primary_transport().unwrap();

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        transport.push_keepalive();
    }

    assert_eq!(gateway.server_role(), ServerRole::Primary);
    assert_eq!(link.status_count(STATUS_CURRENT_SERVER, "redundant"), 0);

    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn recovered_primary_wins_the_gateway_back() {
    let link = Arc::new(RecordingLink::new());
    let factory = Arc::new(MockFactory::new(Default::default()));
    factory.set_unreachable(PRIMARY);

    let gateway = Gateway::start(config_with_redundancy(), channels(2), link.clone(), factory.clone())
        .await
        .unwrap();
    assert_eq!(gateway.server_role(), ServerRole::Redundant);

    factory.set_reachable(PRIMARY);
    // Default probe interval is 60s.
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(gateway.server_role(), ServerRole::Primary);
    assert_eq!(gateway.active_endpoint(), PRIMARY);
    assert_eq!(link.status_count(STATUS_CURRENT_SERVER, "primary"), 1);
    assert_eq!(link.status_value(STATUS_CURRENT_ENDPOINT).as_deref(), Some(PRIMARY));

    // Monitoring follows the switch back.
    let transport = factory.primary_transport().unwrap();
    assert_eq!(transport.live_monitored_nodes().len(), 2);

    gateway.shutdown().await;
}

// =============================================================================
// Write and command paths
// =============================================================================

#[tokio::test]
async fn mixed_write_batch_splits_methods_from_writes() {
    let link = Arc::new(RecordingLink::new());
    let factory = Arc::new(MockFactory::new(Default::default()));

    let gateway = Gateway::start(
        GatewayConfig::for_endpoint(PRIMARY),
        channels(1),
        link,
        factory.clone(),
    )
    .await
    .unwrap();

    let batch = vec![
        WriteTarget {
            id: "m1".into(),
            node: "ns=2;s=Restart".into(),
            value: serde_json::json!(1),
            data_type: Some("Method".into()),
            object_node: Some("ns=2;s=Controller".into()),
            with_ack: false,
        },
        WriteTarget {
            id: "b1".into(),
            node: "ns=2;s=Enable".into(),
            value: serde_json::json!(0),
            data_type: Some("Boolean".into()),
            object_node: None,
            with_ack: false,
        },
    ];
    gateway.write(&batch).await;

    let transport = factory.primary_transport().unwrap();
    let calls = transport.method_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, NodeId::string(2, "Restart"));

    let writes = transport.write_batches();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].len(), 1);
    assert_eq!(writes[0][0].data_type, BuiltInType::Boolean);
    assert_eq!(writes[0][0].value, WireValue::Boolean(false));

    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn acked_write_confirmation_reaches_the_host() {
    let link = Arc::new(RecordingLink::new());
    let factory = Arc::new(MockFactory::new(Default::default()));

    let gateway = Gateway::start(
        GatewayConfig::for_endpoint(PRIMARY),
        channels(1),
        link.clone(),
        factory,
    )
    .await
    .unwrap();

    gateway
        .write(&[WriteTarget {
            id: "b1".into(),
            node: "ns=2;s=Enable".into(),
            value: serde_json::json!(1),
            data_type: Some("Boolean".into()),
            object_node: None,
            with_ack: true,
        }])
        .await;

    tokio::time::sleep(Duration::from_millis(600)).await;

    let batches = link.data_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].id, "b1");
    assert_eq!(batches[0][0].value, Value::Int(1));

    gateway.shutdown().await;
}

#[tokio::test]
async fn history_sync_round_trip() {
    let link = Arc::new(RecordingLink::new());
    let factory = Arc::new(MockFactory::new(Default::default()));

    let gateway = Gateway::start(
        GatewayConfig::for_endpoint(PRIMARY),
        channels(1),
        link.clone(),
        factory.clone(),
    )
    .await
    .unwrap();

    let transport = factory.primary_transport().unwrap();
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();
    transport.set_history(
        &NodeId::string(2, "Temp"),
        vec![HistorySample {
            value: WireValue::Double(19.5),
            source_ts: ts,
        }],
    );

    gateway
        .command(HostCommand::SyncHistory {
            points: vec![HistoryTag {
                node: "ns=2;s=Temp".into(),
                id: "t1".into(),
            }],
            start: 0,
            end: ts.timestamp_millis() + 1,
        })
        .await;

    let archives = link.archive_batches();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0][0].id, "t1");
    assert_eq!(archives[0][0].value, Value::Float(19.5));

    let responses = link.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, CommandStatus::Success);

    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn history_failure_leaves_the_live_stream_intact() {
    let link = Arc::new(RecordingLink::new());
    let factory = Arc::new(MockFactory::new(Default::default()));

    let gateway = Gateway::start(
        GatewayConfig::for_endpoint(PRIMARY),
        channels(1),
        link.clone(),
        factory.clone(),
    )
    .await
    .unwrap();
    let transport = factory.primary_transport().unwrap();
    transport.set_history_failure(true);

    gateway
        .command(HostCommand::SyncHistory {
            points: vec![HistoryTag {
                node: "ns=2;s=Temp".into(),
                id: "t1".into(),
            }],
            start: 0,
            end: 1_000,
        })
        .await;

    assert_eq!(link.responses()[0].status, CommandStatus::Failure);

    // Telemetry keeps flowing afterwards.
    transport.push_data_change(NodeId::string(2, "Var0"), WireValue::Int32(5), 0, None);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(link.data_batches().len(), 1);
    assert_eq!(link.data_batches()[0][0].id, "tag0");

    gateway.shutdown().await;
}

#[tokio::test]
async fn unknown_commands_get_a_failure_response() {
    let link = Arc::new(RecordingLink::new());
    let factory = Arc::new(MockFactory::new(Default::default()));

    let gateway = Gateway::start(
        GatewayConfig::for_endpoint(PRIMARY),
        channels(1),
        link.clone(),
        factory,
    )
    .await
    .unwrap();

    gateway.command(HostCommand::Unknown).await;

    let responses = link.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, CommandStatus::Failure);

    gateway.shutdown().await;
}
