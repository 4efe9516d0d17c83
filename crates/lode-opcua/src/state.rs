// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shared failover state.
//!
//! One instance is threaded through the connection manager, the keepalive
//! watchdog and the redundancy controller. The `switching` flag is the
//! sole failover guard: it is taken with a compare-exchange before any
//! state-mutating transition and released only once the new connection (or
//! the no-op decision) is fully settled.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// =============================================================================
// ServerRole
// =============================================================================

/// Which configured endpoint the gateway is currently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerRole {
    /// The primary endpoint.
    #[default]
    Primary,

    /// The redundant endpoint.
    Redundant,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Redundant => write!(f, "redundant"),
        }
    }
}

// =============================================================================
// FailoverTrigger
// =============================================================================

/// A detector observation that may start a failover.
///
/// All three detectors converge on the same decision point; whichever
/// fires first wins and the switching guard keeps the others out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailoverTrigger {
    /// The transport exhausted its connect retry budget.
    BackoffExhausted,

    /// The transport reported an established connection as lost.
    ConnectionLost,

    /// The keepalive watchdog declared a stall.
    KeepAliveTimeout,
}

impl fmt::Display for FailoverTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackoffExhausted => write!(f, "backoff_exhausted"),
            Self::ConnectionLost => write!(f, "connection_lost"),
            Self::KeepAliveTimeout => write!(f, "keepalive_timeout"),
        }
    }
}

/// A trigger stamped with the connection generation it was observed under.
///
/// Triggers from a superseded connection are discarded at the decision
/// point, so a queued detector cannot re-fail a link that was already
/// replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEnvelope {
    /// The observation.
    pub trigger: FailoverTrigger,

    /// Connection generation at observation time.
    pub generation: u64,
}

// =============================================================================
// GatewayHealth
// =============================================================================

/// Overall gateway health, published on a watch channel.
///
/// The gateway never terminates the process itself; when every recovery
/// path is gone it reports `Failed` and the host platform decides what to
/// do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayHealth {
    /// The pipeline is operating (possibly on the redundant endpoint).
    Running,

    /// No recovery path remains; the reason says which one failed last.
    Failed(String),
}

impl GatewayHealth {
    /// Returns `true` while the pipeline is operating.
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` once every recovery path is exhausted.
    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

// =============================================================================
// FailoverState
// =============================================================================

/// Process-wide redundancy state.
#[derive(Debug, Default)]
pub struct FailoverState {
    role: RwLock<ServerRole>,
    switching: AtomicBool,
    generation: AtomicU64,
}

impl FailoverState {
    /// Creates state bound to the primary endpoint, not switching.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current active role.
    pub fn role(&self) -> ServerRole {
        *self.role.read()
    }

    /// Rebinds the active role.
    pub fn set_role(&self, role: ServerRole) {
        *self.role.write() = role;
    }

    /// Returns `true` while a switch is in progress.
    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::Acquire)
    }

    /// Attempts to take the switching guard.
    ///
    /// Returns `true` for exactly one caller until [`end_switch`] runs.
    ///
    /// [`end_switch`]: Self::end_switch
    pub fn begin_switch(&self) -> bool {
        self.switching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the switching guard.
    pub fn end_switch(&self) {
        self.switching.store(false, Ordering::Release);
    }

    /// Current connection generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Marks the start of a new connection generation.
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Stamps a trigger with the current generation.
    pub fn envelope(&self, trigger: FailoverTrigger) -> TriggerEnvelope {
        TriggerEnvelope {
            trigger,
            generation: self.generation(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
