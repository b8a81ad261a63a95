//! Collaborator interfaces the control layer is written against.
//!
//! Both traits are object safe so callers can hold `Arc<dyn ProviderClient>`
//! and swap the REST implementation for the in-memory mocks in tests.

use std::collections::BTreeSet;

use async_trait::async_trait;
use fleetops_core::{DeviceId, InstanceId, PermissionKey, Uid};

use crate::types::{
    Instance, NewUser, ProvisioningTemplate, TransactionStatus, User, UserFilter, UserStatus,
    ValidationResult, VpnAccess,
};
use crate::Result;

/// Virtual guest operations offered by the cloud provider.
///
/// Implementations hold no client-side cache; every call reflects provider state.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// List every virtual guest on the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing request fails.
    async fn list_instances(&self) -> Result<Vec<Instance>>;

    /// Fetch a single guest.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::NotFound` if the id is unknown.
    async fn get_instance(&self, id: InstanceId) -> Result<Instance>;

    /// Power the guest on.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects or fails the call.
    async fn power_on(&self, id: InstanceId) -> Result<()>;

    /// Power the guest off (hard).
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects or fails the call.
    async fn power_off(&self, id: InstanceId) -> Result<()>;

    /// Reboot the guest using the provider's default strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects or fails the call.
    async fn reboot(&self, id: InstanceId) -> Result<()>;

    /// Reinstall the operating system. Destroys data on the boot disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects or fails the call.
    async fn reload(&self, id: InstanceId) -> Result<()>;

    /// Cancel the guest. Irreversible.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects or fails the call.
    async fn cancel(&self, id: InstanceId) -> Result<()>;

    /// Order a new guest. Billable.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is rejected.
    async fn create_instance(&self, template: &ProvisioningTemplate) -> Result<Instance>;

    /// Dry-run an order without creating anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached or refuses to quote.
    async fn validate_instance(&self, template: &ProvisioningTemplate)
        -> Result<ValidationResult>;

    /// Report whether an asynchronous transaction is active on the guest.
    ///
    /// # Errors
    ///
    /// Returns an error if the status request fails.
    async fn get_transaction_status(&self, id: InstanceId) -> Result<TransactionStatus>;
}

/// Portal account operations.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// List the ids of every user on the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing request fails.
    async fn list_users(&self) -> Result<Vec<Uid>>;

    /// Fetch a user's profile, hardware access and portal permissions.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::NotFound` if the uid is unknown.
    async fn get_user(&self, uid: Uid) -> Result<User>;

    /// Fetch a user's account status.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::NotFound` if the uid is unknown and
    /// `ProviderError::Decode` for a status code fleetops does not know.
    async fn get_user_status(&self, uid: Uid) -> Result<UserStatus>;

    /// Create an active portal user with no hardware access and no
    /// portal permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the new account.
    async fn create_user(&self, user: &NewUser) -> Result<User>;

    /// Replace the user's hardware access with exactly `devices`.
    ///
    /// # Errors
    ///
    /// Returns an error if any provider call fails.
    async fn set_hardware_access(&self, uid: Uid, devices: &BTreeSet<DeviceId>) -> Result<()>;

    /// Clear the user's portal permissions, then grant exactly `permissions`.
    ///
    /// # Errors
    ///
    /// Returns an error if any provider call fails.
    async fn set_portal_permissions(
        &self,
        uid: Uid,
        permissions: &BTreeSet<PermissionKey>,
    ) -> Result<()>;

    /// List the ids of every hardware device on the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing request fails.
    async fn list_all_device_ids(&self) -> Result<BTreeSet<DeviceId>>;

    /// List every portal permission the provider knows about.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing request fails.
    async fn list_all_permissions(&self) -> Result<BTreeSet<PermissionKey>>;

    /// Find users by exact email or username.
    ///
    /// # Errors
    ///
    /// Returns an error if the search request fails.
    async fn find_users(&self, filter: &UserFilter) -> Result<Vec<User>>;

    /// Change the account status of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the change.
    async fn set_user_status(&self, uid: Uid, status: UserStatus) -> Result<()>;

    /// Enable or disable SSL and PPTP VPN for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the change.
    async fn set_vpn_access(&self, uid: Uid, access: VpnAccess) -> Result<()>;
}
