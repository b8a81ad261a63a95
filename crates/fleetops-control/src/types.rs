//! Configuration and result types for control operations.
//!
//! The configuration structs deserialize from the sections of the fleetops
//! TOML file; every field has a default so a missing section is valid.

use std::collections::BTreeSet;
use std::time::Duration;

use fleetops_core::{DeviceId, InstanceId, PermissionKey, Uid};
use fleetops_provider::{PowerState, TransactionStatus};
use serde::{Deserialize, Serialize};

use crate::access::{AccessPolicy, Allowlist};
use crate::error::{ControlError, Result};
use crate::lifecycle::OperationKind;
use crate::monitor::PollSettings;

/// Transaction polling configuration (`[monitor]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay before the first re-poll, in seconds.
    #[serde(default = "MonitorConfig::default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Upper bound on a single wait, in seconds.
    #[serde(default = "MonitorConfig::default_max_wait")]
    pub max_wait_seconds: u64,

    /// Multiplier applied to the interval after each pending poll.
    #[serde(default = "MonitorConfig::default_backoff_factor")]
    pub backoff_factor: f64,

    /// Ceiling for the grown interval, in seconds.
    #[serde(default = "MonitorConfig::default_max_poll_interval")]
    pub max_poll_interval_seconds: u64,
}

impl MonitorConfig {
    const fn default_poll_interval() -> u64 {
        10
    }

    const fn default_max_wait() -> u64 {
        60
    }

    const fn default_backoff_factor() -> f64 {
        1.0
    }

    const fn default_max_poll_interval() -> u64 {
        30
    }

    /// Convert to the monitor's runtime settings.
    #[must_use]
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            max_wait: Duration::from_secs(self.max_wait_seconds),
            backoff_factor: self.backoff_factor,
            max_poll_interval: Duration::from_secs(self.max_poll_interval_seconds),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: Self::default_poll_interval(),
            max_wait_seconds: Self::default_max_wait(),
            backoff_factor: Self::default_backoff_factor(),
            max_poll_interval_seconds: Self::default_max_poll_interval(),
        }
    }
}

/// Access reconciliation configuration (`[access]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Users exempt from reconciliation and bulk access changes.
    #[serde(default)]
    pub privileged_uids: BTreeSet<Uid>,

    /// Maximum number of users updated concurrently.
    #[serde(default = "AccessConfig::default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Devices every non-privileged user ends up with.
    #[serde(default)]
    pub baseline_hardware_access: BTreeSet<DeviceId>,

    /// Portal permissions every non-privileged user ends up with.
    #[serde(default = "AccessConfig::default_baseline_portal_permissions")]
    pub baseline_portal_permissions: BTreeSet<PermissionKey>,
}

impl AccessConfig {
    const fn default_worker_pool_size() -> usize {
        4
    }

    fn default_baseline_portal_permissions() -> BTreeSet<PermissionKey> {
        BTreeSet::from([PermissionKey::ssl_vpn_enabled()])
    }

    /// The configured baseline policy.
    #[must_use]
    pub fn policy(&self) -> AccessPolicy {
        AccessPolicy {
            baseline_hardware_access: self.baseline_hardware_access.clone(),
            baseline_portal_permissions: self.baseline_portal_permissions.clone(),
        }
    }

    /// The configured privileged allowlist.
    #[must_use]
    pub fn allowlist(&self) -> Allowlist {
        Allowlist::new(self.privileged_uids.iter().copied())
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            privileged_uids: BTreeSet::new(),
            worker_pool_size: Self::default_worker_pool_size(),
            baseline_hardware_access: BTreeSet::new(),
            baseline_portal_permissions: Self::default_baseline_portal_permissions(),
        }
    }
}

/// Settings shared by every provisioning profile (`[orders]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfig {
    /// DNS domain of new guests.
    #[serde(default = "OrderConfig::default_domain")]
    pub domain: String,

    /// Datacenter short name.
    #[serde(default = "OrderConfig::default_datacenter")]
    pub datacenter: String,

    /// Operating system reference code.
    #[serde(default = "OrderConfig::default_os_code")]
    pub os_code: String,

    /// SSH key ids installed on new guests.
    #[serde(default)]
    pub ssh_key_ids: Vec<u64>,
}

impl OrderConfig {
    fn default_domain() -> String {
        "example.com".to_string()
    }

    fn default_datacenter() -> String {
        "dal10".to_string()
    }

    fn default_os_code() -> String {
        "CentOS_6_64".to_string()
    }
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            domain: Self::default_domain(),
            datacenter: Self::default_datacenter(),
            os_code: Self::default_os_code(),
            ssh_key_ids: Vec::new(),
        }
    }
}

/// Configuration for the control layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Transaction polling.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Access reconciliation.
    #[serde(default)]
    pub access: AccessConfig,
    /// Provisioning orders.
    #[serde(default)]
    pub orders: OrderConfig,
}

/// Result of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleOutcome {
    /// The resolved instance.
    pub instance_id: InstanceId,
    /// Hostname as last observed.
    pub hostname: String,
    /// The verb that was requested.
    pub operation: OperationKind,
    /// Transaction status, or `None` when nothing was awaited.
    pub transaction: Option<TransactionStatus>,
    /// Last known power state.
    pub state: PowerState,
}

impl LifecycleOutcome {
    /// Returns true if the operation is known to have finished provider-side.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.transaction == Some(TransactionStatus::Ready) || self.state.is_terminal()
    }

    /// Turn a timed-out wait into an error.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Timeout` if the transaction timed out.
    pub fn ensure_completed(self, waited: Duration) -> Result<Self> {
        if self.transaction == Some(TransactionStatus::TimedOut) {
            return Err(ControlError::Timeout {
                instance_id: self.instance_id,
                waited,
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_config_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.monitor.poll_interval_seconds, 10);
        assert_eq!(config.monitor.max_wait_seconds, 60);
        assert_eq!(config.access.worker_pool_size, 4);
        assert!(config
            .access
            .baseline_portal_permissions
            .contains(&PermissionKey::ssl_vpn_enabled()));
        assert_eq!(config.orders.datacenter, "dal10");
    }

    #[test]
    fn poll_settings_from_config() {
        let settings = MonitorConfig {
            poll_interval_seconds: 5,
            max_wait_seconds: 30,
            backoff_factor: 2.0,
            max_poll_interval_seconds: 20,
        }
        .poll_settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.max_wait, Duration::from_secs(30));
        assert_eq!(settings.max_poll_interval, Duration::from_secs(20));
    }

    #[test]
    fn allowlist_from_config() {
        let config = AccessConfig {
            privileged_uids: [Uid::new(1)].into(),
            ..AccessConfig::default()
        };
        assert!(config.allowlist().contains(Uid::new(1)));
        assert!(!config.allowlist().contains(Uid::new(2)));
    }

    #[test]
    fn ensure_completed_rejects_timeout() {
        let outcome = LifecycleOutcome {
            instance_id: InstanceId::new(555),
            hostname: "vm-demo".into(),
            operation: OperationKind::PowerOn,
            transaction: Some(TransactionStatus::TimedOut),
            state: PowerState::Transitioning,
        };
        assert!(!outcome.is_settled());
        assert!(matches!(
            outcome.ensure_completed(Duration::from_secs(60)),
            Err(ControlError::Timeout { .. })
        ));
    }
}
