// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core domain types for the LODE data-acquisition gateway.
//!
//! This crate carries everything that is independent of a particular field
//! protocol: the telemetry value model, the externally supplied channel
//! list, the northbound host-pipeline surface, and the gateway
//! configuration schema. Protocol crates (such as `lode-opcua`) build on
//! these types and never define their own copies.
//!
//! # Modules
//!
//! - [`types`] - telemetry values, quality codes, outbound records
//! - [`channel`] - channel (tag point) model and host commands
//! - [`link`] - northbound host-pipeline traits
//! - [`config`] - gateway configuration with validated defaults
//! - [`error`] - configuration and link error types

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod error;
pub mod link;
pub mod types;

pub use channel::{Channel, DeadbandFilter, DeadbandKind, DeadbandTrigger, HostCommand, HistoryTag, WriteTarget};
pub use config::{
    Credentials, GatewayConfig, MonitoringDefaults, RetryPolicy, SecurityMode, SecurityPolicy,
    SubscriptionSettings,
};
pub use error::{ConfigError, LinkError};
pub use link::{CommandResponse, CommandStatus, HostLink, RecordingLink};
pub use types::{Quality, TelemetryRecord, Value};
