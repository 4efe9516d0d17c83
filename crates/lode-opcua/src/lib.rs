// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client pipeline for the LODE data-acquisition gateway.
//!
//! This crate keeps a session to a remote automation server, mirrors an
//! externally supplied channel list as active subscriptions, streams value
//! changes to the host pipeline in buffered batches, accepts write and
//! method-call requests, and fails over to a redundant endpoint when the
//! primary becomes unreachable.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Gateway                               │
//! │          (task lifecycle, write/command entry points)           │
//! └─────────────────────────────────────────────────────────────────┘
//!        │                │                  │               │
//!        ▼                ▼                  ▼               ▼
//! ┌────────────┐  ┌──────────────┐  ┌───────────────┐  ┌──────────┐
//! │ Connection │  │  Redundancy  │  │ MonitorDriver │  │Telemetry │
//! │  Manager   │──│  Controller  │  │ (grouper +    │──│ Buffer   │
//! │ (+watchdog)│  │ (+ probe)    │  │  codec pump)  │  │ (flusher)│
//! └────────────┘  └──────────────┘  └───────────────┘  └──────────┘
//!        │                                  │
//!        ▼                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         UaTransport                             │
//! │         (external OPC UA client library boundary)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The wire protocol itself lives behind [`UaTransport`]; this crate never
//! encodes a single protocol byte. The bundled [`mock::MockTransport`]
//! implements the trait in memory for tests and demos.
//!
//! # Failure handling
//!
//! Connection-level failures are decision signals, not panics. The three
//! detectors (retry-budget exhaustion, connection-lost events, the
//! keepalive watchdog) all converge on one failover decision point inside
//! the [`redundancy::RedundancyController`]; an atomic switching guard
//! admits exactly one failover at a time.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod grouper;
pub mod history;
pub mod keepalive;
pub mod mock;
pub mod monitor;
pub mod redundancy;
pub mod state;
pub mod transport;
pub mod types;

pub use error::{UaError, UaResult};
pub use gateway::{Gateway, GatewayHealth};
pub use state::{FailoverState, FailoverTrigger, ServerRole};
pub use transport::{
    DataChange, HistorySample, HistorySeries, Notification, SessionHandle, TransportEvent,
    TransportFactory, UaTransport, WireValue, WriteValue,
};
pub use types::{BuiltInType, NodeId, NodeIdentifier};
