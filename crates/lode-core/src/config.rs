// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Gateway configuration schema.
//!
//! Every recognized option is an explicit field with a stated default, so a
//! deployment that supplies `{}` plus an endpoint URL gets a fully working
//! configuration. Validation runs once at startup; nothing downstream
//! re-checks these invariants.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Serde helpers for millisecond-valued durations.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a duration as integer milliseconds.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    /// Deserializes integer milliseconds into a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// GatewayConfig
// =============================================================================

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Primary server endpoint URL.
    pub endpoint_url: String,

    /// Redundant server endpoint URL.
    #[serde(default)]
    pub redundancy_endpoint_url: Option<String>,

    /// Whether failover to the redundant endpoint is enabled.
    #[serde(default)]
    pub use_redundancy: bool,

    /// Session security settings.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Connect retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Floor for the keepalive stall threshold.
    #[serde(default = "default_keepalive_threshold")]
    #[serde(with = "duration_ms")]
    pub keepalive_timeout_threshold: Duration,

    /// How often the keepalive watchdog checks for a stall.
    #[serde(default = "default_keepalive_poll")]
    #[serde(with = "duration_ms")]
    pub keepalive_poll_period: Duration,

    /// How often the recovery probe tries the primary endpoint.
    #[serde(default = "default_primary_check")]
    #[serde(with = "duration_ms")]
    pub primary_check_interval: Duration,

    /// Telemetry buffer flush period.
    #[serde(default = "default_buffer_time")]
    #[serde(with = "duration_ms")]
    pub buffer_time: Duration,

    /// Subscription creation parameters.
    #[serde(default)]
    pub subscription: SubscriptionSettings,

    /// Monitoring defaults for ungrouped channels.
    #[serde(default)]
    pub monitoring: MonitoringDefaults,

    /// Hard upper bound on monitored items per subscription.
    #[serde(default = "default_max_variables")]
    pub max_variables_per_sub: usize,

    /// Stamp records with local wall clock instead of the source timestamp.
    #[serde(default)]
    pub use_system_ts: bool,
}

impl GatewayConfig {
    /// Creates a configuration for the given endpoint with all defaults.
    pub fn for_endpoint(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            redundancy_endpoint_url: None,
            use_redundancy: false,
            security: SecurityConfig::default(),
            retry: RetryPolicy::default(),
            keepalive_timeout_threshold: default_keepalive_threshold(),
            keepalive_poll_period: default_keepalive_poll(),
            primary_check_interval: default_primary_check(),
            buffer_time: default_buffer_time(),
            subscription: SubscriptionSettings::default(),
            monitoring: MonitoringDefaults::default(),
            max_variables_per_sub: default_max_variables(),
            use_system_ts: false,
        }
    }

    /// Enables redundancy toward the given endpoint.
    pub fn with_redundancy(mut self, endpoint_url: impl Into<String>) -> Self {
        self.redundancy_endpoint_url = Some(endpoint_url.into());
        self.use_redundancy = true;
        self
    }

    /// Validates cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_url.trim().is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if self.use_redundancy
            && self
                .redundancy_endpoint_url
                .as_deref()
                .map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::MissingRedundantEndpoint);
        }
        if self.max_variables_per_sub == 0 {
            return Err(ConfigError::invalid(
                "max_variables_per_sub",
                "must be at least 1",
            ));
        }
        if self.buffer_time.is_zero() {
            return Err(ConfigError::invalid("buffer_time", "must be positive"));
        }
        if self.keepalive_poll_period.is_zero() {
            return Err(ConfigError::invalid(
                "keepalive_poll_period",
                "must be positive",
            ));
        }
        if self.retry.max_retry == 0 {
            return Err(ConfigError::invalid("retry.max_retry", "must be at least 1"));
        }
        Ok(())
    }

    /// The stall threshold actually used by the keepalive watchdog.
    ///
    /// The configured floor protects against very short publishing
    /// intervals that would otherwise produce false stall reports.
    pub fn keepalive_stall_threshold(&self) -> Duration {
        let derived = self.subscription.publishing_interval
            * self.subscription.max_keepalive_count
            * 3
            / 2;
        self.keepalive_timeout_threshold.max(derived)
    }
}

fn default_keepalive_threshold() -> Duration {
    Duration::from_millis(15_000)
}

fn default_keepalive_poll() -> Duration {
    Duration::from_millis(5_000)
}

fn default_primary_check() -> Duration {
    Duration::from_millis(60_000)
}

fn default_buffer_time() -> Duration {
    Duration::from_millis(500)
}

fn default_max_variables() -> usize {
    100
}

// =============================================================================
// Security
// =============================================================================

/// Session security settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Security policy requested for the channel.
    #[serde(default)]
    pub policy: SecurityPolicy,

    /// Message security mode requested for the channel.
    #[serde(default)]
    pub mode: SecurityMode,

    /// Identity presented at session creation.
    #[serde(default)]
    pub credentials: Credentials,
}

/// Message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No message security.
    #[default]
    None,

    /// Messages are signed.
    Sign,

    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

/// Security policy identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security policy.
    #[default]
    None,

    /// Basic128Rsa15 (legacy).
    Basic128Rsa15,

    /// Basic256 (legacy).
    Basic256,

    /// Basic256Sha256.
    Basic256Sha256,

    /// Aes128-Sha256-RsaOaep.
    Aes128Sha256RsaOaep,

    /// Aes256-Sha256-RsaPss.
    Aes256Sha256RsaPss,
}

/// Identity presented at session creation.
///
/// Certificate material is provisioned outside the gateway; the
/// configuration only names the files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// Anonymous session.
    #[default]
    Anonymous,

    /// User name and password.
    UserName {
        /// Login name.
        user: String,

        /// Password.
        password: String,
    },

    /// X.509 certificate identity.
    Certificate {
        /// DER certificate path.
        cert_path: PathBuf,

        /// PEM private key path.
        key_path: PathBuf,
    },
}

// =============================================================================
// Retry
// =============================================================================

/// Connect retry policy handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay")]
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,

    /// Total connect attempts before the budget is exhausted.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Transport-level timeout for a single attempt.
    #[serde(default = "default_transport_timeout")]
    #[serde(with = "duration_ms")]
    pub transport_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_retry: default_max_retry(),
            transport_timeout: default_transport_timeout(),
        }
    }
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(1_000)
}

fn default_max_retry() -> u32 {
    3
}

fn default_transport_timeout() -> Duration {
    Duration::from_millis(5_000)
}

// =============================================================================
// Subscription and monitoring defaults
// =============================================================================

/// Subscription creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionSettings {
    /// Requested publishing interval.
    #[serde(default = "default_publishing_interval")]
    #[serde(with = "duration_ms")]
    pub publishing_interval: Duration,

    /// Requested lifetime count.
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Requested maximum keepalive count.
    #[serde(default = "default_max_keepalive_count")]
    pub max_keepalive_count: u32,

    /// Maximum notifications per publish response.
    #[serde(default = "default_max_notifications")]
    pub max_notifications_per_publish: u32,

    /// Subscription priority.
    #[serde(default = "default_priority")]
    pub priority: u8,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            lifetime_count: default_lifetime_count(),
            max_keepalive_count: default_max_keepalive_count(),
            max_notifications_per_publish: default_max_notifications(),
            priority: default_priority(),
        }
    }
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1_000)
}

fn default_lifetime_count() -> u32 {
    100
}

fn default_max_keepalive_count() -> u32 {
    10
}

fn default_max_notifications() -> u32 {
    100
}

fn default_priority() -> u8 {
    10
}

/// Monitoring parameters applied to ungrouped channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringDefaults {
    /// Sampling interval.
    #[serde(default = "default_sampling_interval")]
    #[serde(with = "duration_ms")]
    pub sampling_interval: Duration,

    /// Discard oldest queued value on overflow.
    #[serde(default = "default_discard_oldest")]
    pub discard_oldest: bool,

    /// Server-side queue size.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,
}

impl Default for MonitoringDefaults {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_interval(),
            discard_oldest: default_discard_oldest(),
            queue_size: default_queue_size(),
        }
    }
}

fn default_sampling_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_discard_oldest() -> bool {
    true
}

fn default_queue_size() -> u32 {
    10
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_from_minimal_json() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"endpoint_url": "opc.tcp://plc:4840"}"#).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retry, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(1_000));
        assert_eq!(config.buffer_time, Duration::from_millis(500));
        assert_eq!(config.max_variables_per_sub, 100);
        assert_eq!(config.subscription.publishing_interval, Duration::from_millis(1_000));
        assert_eq!(config.monitoring.queue_size, 10);
        assert!(!config.use_redundancy);
        assert!(!config.use_system_ts);
    }

    #[test]
    fn redundancy_requires_endpoint() {
        let mut config = GatewayConfig::for_endpoint("opc.tcp://plc:4840");
        config.use_redundancy = true;
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingRedundantEndpoint)
        );

        let config = GatewayConfig::for_endpoint("opc.tcp://plc:4840")
            .with_redundancy("opc.tcp://standby:4840");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_endpoint_rejected() {
        let config = GatewayConfig::for_endpoint("  ");
        assert_eq!(config.validate(), Err(ConfigError::MissingEndpoint));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let mut config = GatewayConfig::for_endpoint("opc.tcp://plc:4840");
        config.max_variables_per_sub = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn stall_threshold_takes_the_larger_of_floor_and_derived() {
        let mut config = GatewayConfig::for_endpoint("opc.tcp://plc:4840");
        // 10 keepalives at 1s publishing: derived 15s equals the floor.
        assert_eq!(config.keepalive_stall_threshold(), Duration::from_millis(15_000));

        // Short publishing interval: the floor wins.
        config.subscription.publishing_interval = Duration::from_millis(100);
        assert_eq!(config.keepalive_stall_threshold(), Duration::from_millis(15_000));

        // Long publishing interval: the derived value wins.
        config.subscription.publishing_interval = Duration::from_millis(2_000);
        assert_eq!(config.keepalive_stall_threshold(), Duration::from_millis(30_000));
    }

    #[test]
    fn credentials_tagged_form() {
        let creds: Credentials = serde_json::from_str(
            r#"{"type": "user_name", "user": "op", "password": "secret"}"#,
        )
        .unwrap();
        assert_eq!(
            creds,
            Credentials::UserName {
                user: "op".into(),
                password: "secret".into()
            }
        );
    }
}
