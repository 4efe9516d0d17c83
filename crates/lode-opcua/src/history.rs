// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! History-sync command forwarding.
//!
//! History reads are forwarded, not computed: the server's stored samples
//! stream back as archive batches, one per requested tag, followed by a
//! command response. Failures become a failed response carrying the error
//! text and never touch the live telemetry stream.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{info, warn};

use lode_core::channel::HistoryTag;
use lode_core::link::{CommandResponse, HostLink};
use lode_core::types::{Quality, TelemetryRecord};

use crate::codec::decode_value;
use crate::error::{UaError, UaResult};
use crate::transport::UaTransport;
use crate::types::NodeId;

/// Command name used in history responses.
const COMMAND: &str = "sync_history";

/// Forwards history-sync commands to the server.
pub struct HistoryForwarder {
    transport: Arc<dyn UaTransport>,
    link: Arc<dyn HostLink>,
}

impl HistoryForwarder {
    /// Creates a forwarder reporting through `link`.
    pub fn new(transport: Arc<dyn UaTransport>, link: Arc<dyn HostLink>) -> Self {
        Self { transport, link }
    }

    /// Handles one history-sync command.
    ///
    /// Emits one archive batch per requested tag and then a success
    /// response; any failure is reported as a failed response instead.
    pub async fn sync_history(&self, points: &[HistoryTag], start_ms: i64, end_ms: i64) {
        match self.run(points, start_ms, end_ms).await {
            Ok(samples) => {
                info!(tags = points.len(), samples, "History sync complete");
                let response =
                    CommandResponse::success(COMMAND, serde_json::json!({ "samples": samples }));
                if let Err(e) = self.link.send_response(response).await {
                    warn!(error = %e, "Host pipeline rejected history response");
                }
            }
            Err(e) => {
                warn!(error = %e, "History sync failed");
                let response = CommandResponse::failure(COMMAND, e.to_string());
                if let Err(e) = self.link.send_response(response).await {
                    warn!(error = %e, "Host pipeline rejected history response");
                }
            }
        }
    }

    async fn run(&self, points: &[HistoryTag], start_ms: i64, end_ms: i64) -> UaResult<usize> {
        let start = timestamp(start_ms)?;
        let end = timestamp(end_ms)?;

        let mut nodes = Vec::with_capacity(points.len());
        for point in points {
            let node: NodeId = point
                .node
                .parse()
                .map_err(|e: UaError| UaError::HistoryReadFailure(e.to_string()))?;
            nodes.push(node);
        }

        let series = self
            .transport
            .read_history(&nodes, start, end)
            .await?;

        let mut total = 0;
        for (point, series) in points.iter().zip(series) {
            let records: Vec<TelemetryRecord> = series
                .samples
                .iter()
                .map(|sample| {
                    TelemetryRecord::new(
                        point.id.clone(),
                        decode_value(&sample.value, None),
                        Quality::GOOD,
                        sample.source_ts.timestamp_millis(),
                    )
                })
                .collect();
            if records.is_empty() {
                continue;
            }
            total += records.len();
            self.link
                .send_archive(records)
                .await
                .map_err(|e| UaError::HistoryReadFailure(e.to_string()))?;
        }
        Ok(total)
    }
}

fn timestamp(ms: i64) -> UaResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| UaError::HistoryReadFailure(format!("invalid timestamp {}", ms)))
}

// =============================================================================
// Tests
// =============================================================================
