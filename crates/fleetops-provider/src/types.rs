//! Types exchanged with the provider and the user directory.

use std::collections::BTreeSet;
use std::fmt;

use fleetops_core::{DeviceId, InstanceId, PermissionKey, Uid};
use serde::{Deserialize, Serialize};

/// Power state of a virtual guest as observed by fleetops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// The provider did not report a recognisable state.
    #[default]
    Unknown,
    /// The guest is powered on.
    Running,
    /// The guest is halted.
    Stopped,
    /// An asynchronous lifecycle operation is in flight.
    Transitioning,
    /// The guest has been cancelled. Terminal.
    Cancelled,
}

impl PowerState {
    /// Parse a power state from the provider's `powerState.keyName`.
    #[must_use]
    pub fn from_provider_key(key: &str) -> Self {
        match key {
            "RUNNING" => Self::Running,
            "HALTED" | "PAUSED" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    /// Check if no further lifecycle operation may target the guest.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Transitioning => "transitioning",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// A provider-hosted virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider id. The identity of the instance.
    pub id: InstanceId,
    /// Mutable label used for lookup only.
    pub hostname: String,
    /// Last observed power state.
    pub power_state: PowerState,
    /// DNS domain, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Datacenter short name, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
}

impl Instance {
    /// Create an instance record with only the fields the core depends on.
    #[must_use]
    pub fn new(id: InstanceId, hostname: impl Into<String>, power_state: PowerState) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            power_state,
            domain: None,
            datacenter: None,
        }
    }
}

/// Status of an asynchronous provider transaction.
///
/// The provider itself only ever reports `Pending` or `Ready`; `TimedOut` is
/// produced locally when a wait bound is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// The operation is still running provider-side.
    Pending,
    /// No transaction is active; the guest is settled.
    Ready,
    /// The local wait bound expired before the provider reported `Ready`.
    TimedOut,
}

/// A portal user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Provider user id.
    pub uid: Uid,
    /// Portal login name.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Devices whose details the user may view in the portal.
    #[serde(default)]
    pub hardware_access: BTreeSet<DeviceId>,
    /// Portal permissions granted to the user.
    #[serde(default)]
    pub portal_permissions: BTreeSet<PermissionKey>,
}

impl User {
    /// Create a user with no hardware access and no portal permissions.
    #[must_use]
    pub fn new(uid: Uid, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            uid,
            username: username.into(),
            email: email.into(),
            hardware_access: BTreeSet::new(),
            portal_permissions: BTreeSet::new(),
        }
    }
}

/// Account status codes understood by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// 1001
    Active,
    /// 1002
    Disabled,
    /// 1003
    Inactive,
    /// 1021
    CancelPending,
    /// 1022
    VpnOnly,
}

impl UserStatus {
    /// The provider's numeric status id.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Active => 1001,
            Self::Disabled => 1002,
            Self::Inactive => 1003,
            Self::CancelPending => 1021,
            Self::VpnOnly => 1022,
        }
    }

    /// Map a provider status id back to a status.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1001 => Some(Self::Active),
            1002 => Some(Self::Disabled),
            1003 => Some(Self::Inactive),
            1021 => Some(Self::CancelPending),
            1022 => Some(Self::VpnOnly),
            _ => None,
        }
    }
}

/// Which VPN flavours a user may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnAccess {
    /// SSL VPN allowed.
    pub ssl: bool,
    /// PPTP VPN allowed.
    pub pptp: bool,
}

/// Fields for a new portal user.
///
/// The password is supplied by the operator at runtime and is never
/// serialized or printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    /// Portal login name.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Initial portal password, also used as the VPN password.
    pub password: String,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Exact-match user lookup criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserFilter {
    /// Match on email address.
    Email(String),
    /// Match on portal username.
    Username(String),
}

/// Billing cadence for a provisioned guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Billing {
    /// Billed per hour.
    Hourly,
    /// Billed per month.
    Monthly,
}

/// A fully-specified order for a new virtual guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningTemplate {
    /// Hostname of the new guest.
    pub hostname: String,
    /// DNS domain.
    pub domain: String,
    /// Datacenter short name, e.g. `dal10`.
    pub datacenter: String,
    /// Number of vCPUs.
    pub cpus: u32,
    /// Memory in megabytes.
    pub memory_mb: u32,
    /// Operating system reference code, e.g. `CentOS_6_64`.
    pub os_code: String,
    /// Disk capacities in gigabytes; the first entry is the boot disk.
    pub disks_gb: Vec<u32>,
    /// Free-form tags attached after creation.
    pub tags: Vec<String>,
    /// Billing cadence.
    pub billing: Billing,
    /// Run on a dedicated host.
    pub dedicated: bool,
    /// Only attach a private network interface.
    pub private_network_only: bool,
    /// Use local rather than SAN disks.
    pub local_disk: bool,
    /// Provider ids of SSH keys to install.
    pub ssh_key_ids: Vec<u64>,
}

/// Outcome of a provider-side dry-run order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Hostname the order was generated for.
    pub hostname: String,
    /// Whether the provider accepted the order.
    pub accepted: bool,
    /// The provider's reason for refusing the order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
    /// Sum of hourly recurring fees, when the provider quoted them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_cost: Option<f64>,
    /// Descriptions of the price items the order resolved to.
    #[serde(default)]
    pub price_items: Vec<String>,
}
