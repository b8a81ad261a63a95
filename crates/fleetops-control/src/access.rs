//! Fleet-wide access reconciliation.
//!
//! [`AccessReconciler`] drives every non-privileged user's hardware access
//! and portal permissions to a baseline. Users are processed independently
//! through a bounded worker pool: one user's failure is recorded in the
//! report and never stops the pass. Privileged users are never written.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use fleetops_core::{DeviceId, PermissionKey, Uid};
use fleetops_provider::{NewUser, User, UserDirectory, UserFilter, UserStatus, VpnAccess};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// Users exempt from reconciliation and bulk access changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allowlist(BTreeSet<Uid>);

impl Allowlist {
    /// Create an allowlist from uids.
    pub fn new(uids: impl IntoIterator<Item = Uid>) -> Self {
        Self(uids.into_iter().collect())
    }

    /// Returns true if `uid` is privileged.
    #[must_use]
    pub fn contains(&self, uid: Uid) -> bool {
        self.0.contains(&uid)
    }

    /// Number of privileged users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no user is privileged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Target access state for every non-privileged user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Devices each user may see. Replaces the current set.
    pub baseline_hardware_access: BTreeSet<DeviceId>,
    /// Portal permissions each user holds. Replaces the current set.
    pub baseline_portal_permissions: BTreeSet<PermissionKey>,
}

/// Which devices a bulk access change covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    /// Every device on the account.
    All,
    /// Only these devices.
    Only(BTreeSet<DeviceId>),
}

/// A user record with its account status, as reported by `user_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    /// The provider record, including hardware access and permissions.
    #[serde(flatten)]
    pub user: User,
    /// Account status.
    pub status: UserStatus,
    /// The provider's numeric status id.
    pub status_code: u32,
    /// Whether the user is on the privileged allowlist.
    pub privileged: bool,
}

/// Result of processing one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UserOutcome {
    /// The user's access was written.
    Updated,
    /// The user already matched; nothing was written.
    Unchanged,
    /// A provider call failed for this user.
    Failed {
        /// Error kind label.
        kind: String,
        /// Error message.
        error: String,
        /// Whether retrying may succeed.
        retriable: bool,
    },
}

impl UserOutcome {
    fn failed(err: &ControlError) -> Self {
        Self::Failed {
            kind: err.kind().to_string(),
            error: err.to_string(),
            retriable: err.is_retriable(),
        }
    }

    /// Returns true for `Failed`.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Per-user results of a fleet-wide pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Outcome for every processed user.
    pub outcomes: BTreeMap<Uid, UserOutcome>,
    /// Privileged users that were skipped.
    pub skipped: Vec<Uid>,
}

impl ReconciliationReport {
    /// Users whose processing failed, ascending.
    #[must_use]
    pub fn failed(&self) -> Vec<Uid> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_failure())
            .map(|(uid, _)| *uid)
            .collect()
    }

    /// Returns true if every processed user succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.outcomes.values().any(UserOutcome::is_failure)
    }

    /// Turn a report with failures into `ControlError::PartialFailure`.
    ///
    /// # Errors
    ///
    /// Returns `PartialFailure` if at least one user failed.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ControlError::PartialFailure {
            failed: self.failed(),
            total: self.outcomes.len(),
        })
    }
}

/// Applies access policy across all users of the account.
#[derive(Clone)]
pub struct AccessReconciler {
    directory: Arc<dyn UserDirectory>,
    allowlist: Allowlist,
    pool_size: usize,
}

impl AccessReconciler {
    /// Create a reconciler. `pool_size` is clamped to at least 1.
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>, allowlist: Allowlist, pool_size: usize) -> Self {
        Self {
            directory,
            allowlist,
            pool_size: pool_size.max(1),
        }
    }

    /// The privileged allowlist.
    #[must_use]
    pub const fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    /// Replace every non-privileged user's hardware access and portal
    /// permissions with the policy baseline.
    ///
    /// # Errors
    ///
    /// Returns an error only if the user list cannot be fetched. Per-user
    /// failures are recorded in the report.
    pub async fn reconcile(&self, policy: &AccessPolicy) -> Result<ReconciliationReport> {
        tracing::info!(
            devices = policy.baseline_hardware_access.len(),
            permissions = policy.baseline_portal_permissions.len(),
            "Reconciling fleet access"
        );

        self.for_each_user(|uid| async move {
            self.directory
                .set_hardware_access(uid, &policy.baseline_hardware_access)
                .await
                .map_err(|e| ControlError::provider(format!("user {uid}"), e))?;
            self.directory
                .set_portal_permissions(uid, &policy.baseline_portal_permissions)
                .await
                .map_err(|e| ControlError::provider(format!("user {uid}"), e))?;
            Ok(UserOutcome::Updated)
        })
        .await
    }

    /// Add the selected devices to every non-privileged user's access.
    ///
    /// # Errors
    ///
    /// Returns an error if the user or device list cannot be fetched.
    pub async fn grant_hardware_access(
        &self,
        selection: &DeviceSelection,
    ) -> Result<ReconciliationReport> {
        let devices = self.select_devices(selection).await?;
        tracing::info!(devices = devices.len(), "Granting hardware access");

        self.for_each_user(|uid| {
            let devices = &devices;
            async move {
                self.update_hardware(uid, |current| current.union(devices).copied().collect())
                    .await
            }
        })
        .await
    }

    /// Remove the selected devices from every non-privileged user's access.
    ///
    /// # Errors
    ///
    /// Returns an error if the user or device list cannot be fetched.
    pub async fn revoke_hardware_access(
        &self,
        selection: &DeviceSelection,
    ) -> Result<ReconciliationReport> {
        let devices = self.select_devices(selection).await?;
        tracing::info!(devices = devices.len(), "Revoking hardware access");

        self.for_each_user(|uid| {
            let devices = &devices;
            async move {
                self.update_hardware(uid, |current| {
                    current.difference(devices).copied().collect()
                })
                .await
            }
        })
        .await
    }

    /// Find users by exact email or username.
    ///
    /// # Errors
    ///
    /// Returns the classified provider error if the search fails.
    pub async fn find_users(&self, filter: &UserFilter) -> Result<Vec<User>> {
        self.directory
            .find_users(filter)
            .await
            .map_err(|e| ControlError::provider("user search", e))
    }

    /// Fetch a user's record together with their account status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown uid and the classified provider
    /// error if either lookup fails.
    pub async fn user_info(&self, uid: Uid) -> Result<UserInfo> {
        let target = format!("user {uid}");
        let user = self
            .directory
            .get_user(uid)
            .await
            .map_err(|e| ControlError::provider(&target, e))?;
        let status = self
            .directory
            .get_user_status(uid)
            .await
            .map_err(|e| ControlError::provider(&target, e))?;

        Ok(UserInfo {
            privileged: self.allowlist.contains(uid),
            status_code: status.code(),
            status,
            user,
        })
    }

    /// Create an active portal user with no hardware access or permissions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the username, email or password is blank,
    /// and the classified provider error if the provider refuses the account.
    pub async fn create_user(&self, new_user: &NewUser) -> Result<User> {
        for (field, value) in [
            ("username", &new_user.username),
            ("email", &new_user.email),
            ("password", &new_user.password),
        ] {
            if value.trim().is_empty() {
                return Err(ControlError::InvalidInput(format!("{field} must not be empty")));
            }
        }

        let user = self
            .directory
            .create_user(new_user)
            .await
            .map_err(|e| ControlError::provider(&new_user.username, e))?;
        tracing::info!(uid = %user.uid, username = %user.username, "Created user");
        Ok(user)
    }

    /// Disable a user's portal login.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for a privileged user unless `force` is set,
    /// and the classified provider error if the change fails.
    pub async fn disable_user(&self, uid: Uid, force: bool) -> Result<()> {
        if self.allowlist.contains(uid) && !force {
            return Err(ControlError::invalid_state(
                format!("user {uid}"),
                "user is privileged; pass force to disable",
            ));
        }
        self.directory
            .set_user_status(uid, UserStatus::Disabled)
            .await
            .map_err(|e| ControlError::provider(format!("user {uid}"), e))?;
        tracing::info!(uid = %uid, forced = force, "Disabled user");
        Ok(())
    }

    /// Set a user's SSL and PPTP VPN flags.
    ///
    /// # Errors
    ///
    /// Returns the classified provider error if the change fails.
    pub async fn set_vpn_access(&self, uid: Uid, access: VpnAccess) -> Result<()> {
        self.directory
            .set_vpn_access(uid, access)
            .await
            .map_err(|e| ControlError::provider(format!("user {uid}"), e))
    }

    async fn select_devices(&self, selection: &DeviceSelection) -> Result<BTreeSet<DeviceId>> {
        match selection {
            DeviceSelection::Only(devices) => Ok(devices.clone()),
            DeviceSelection::All => self
                .directory
                .list_all_device_ids()
                .await
                .map_err(|e| ControlError::provider("account hardware", e)),
        }
    }

    async fn update_hardware<F>(&self, uid: Uid, change: F) -> Result<UserOutcome>
    where
        F: FnOnce(&BTreeSet<DeviceId>) -> BTreeSet<DeviceId>,
    {
        let user = self
            .directory
            .get_user(uid)
            .await
            .map_err(|e| ControlError::provider(format!("user {uid}"), e))?;
        let target = change(&user.hardware_access);
        if target == user.hardware_access {
            return Ok(UserOutcome::Unchanged);
        }
        self.directory
            .set_hardware_access(uid, &target)
            .await
            .map_err(|e| ControlError::provider(format!("user {uid}"), e))?;
        Ok(UserOutcome::Updated)
    }

    /// Run `work` for every non-privileged user, at most `pool_size` at a time.
    async fn for_each_user<F, Fut>(&self, work: F) -> Result<ReconciliationReport>
    where
        F: Fn(Uid) -> Fut,
        Fut: Future<Output = Result<UserOutcome>>,
    {
        let uids: BTreeSet<Uid> = self
            .directory
            .list_users()
            .await
            .map_err(|e| ControlError::provider("account users", e))?
            .into_iter()
            .collect();

        let (skipped, targets): (Vec<Uid>, Vec<Uid>) =
            uids.into_iter().partition(|uid| self.allowlist.contains(*uid));

        for uid in &skipped {
            tracing::debug!(uid = %uid, "Skipping privileged user");
        }

        let work = &work;
        let outcomes: BTreeMap<Uid, UserOutcome> = stream::iter(targets)
            .map(|uid| async move {
                let outcome = match work(uid).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(uid = %uid, error = %e, "Failed to update user");
                        UserOutcome::failed(&e)
                    }
                };
                (uid, outcome)
            })
            .buffer_unordered(self.pool_size)
            .collect()
            .await;

        let report = ReconciliationReport { outcomes, skipped };
        tracing::info!(
            processed = report.outcomes.len(),
            failed = report.failed().len(),
            skipped = report.skipped.len(),
            "Fleet access pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetops_provider::{DirectoryWrite, MockDirectory};
    use std::time::Duration;

    fn user(uid: u64, name: &str, devices: &[u64], permissions: &[&str]) -> User {
        let mut user = User::new(Uid::new(uid), name, format!("{name}@example.com"));
        user.hardware_access = devices.iter().copied().map(DeviceId::new).collect();
        user.portal_permissions = permissions
            .iter()
            .map(|p| PermissionKey::new(*p).unwrap())
            .collect();
        user
    }

    fn vpn_only_policy() -> AccessPolicy {
        AccessPolicy {
            baseline_hardware_access: BTreeSet::new(),
            baseline_portal_permissions: [PermissionKey::ssl_vpn_enabled()].into(),
        }
    }

    fn reconciler(directory: &Arc<MockDirectory>, privileged: &[u64]) -> AccessReconciler {
        AccessReconciler::new(
            directory.clone(),
            Allowlist::new(privileged.iter().copied().map(Uid::new)),
            4,
        )
    }

    #[tokio::test]
    async fn privileged_users_are_untouched() {
        let admin = user(1, "itadmin", &[7, 8], &["TICKET_VIEW", "HARDWARE_VIEW"]);
        let directory = Arc::new(
            MockDirectory::new()
                .with_user(admin.clone())
                .with_user(user(2, "alice", &[7], &["TICKET_VIEW"])),
        );

        let report = reconciler(&directory, &[1])
            .reconcile(&vpn_only_policy())
            .await
            .unwrap();

        assert_eq!(report.skipped, vec![Uid::new(1)]);
        assert!(!report.outcomes.contains_key(&Uid::new(1)));
        assert_eq!(directory.user(Uid::new(1)).unwrap(), admin);
        assert!(directory.writes().iter().all(|w| w.uid() != Uid::new(1)));
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_pass() {
        let directory = Arc::new(
            MockDirectory::new()
                .with_user(user(101, "a", &[1], &[]))
                .with_user(user(102, "b", &[1], &[]))
                .with_user(user(103, "c", &[1], &[])),
        );
        directory.fail_writes_for(Uid::new(102));

        let report = reconciler(&directory, &[])
            .reconcile(&vpn_only_policy())
            .await
            .unwrap();

        assert_eq!(report.outcomes[&Uid::new(101)], UserOutcome::Updated);
        assert_eq!(report.outcomes[&Uid::new(103)], UserOutcome::Updated);
        assert!(matches!(
            report.outcomes[&Uid::new(102)],
            UserOutcome::Failed { retriable: true, .. }
        ));
        assert_eq!(report.failed(), vec![Uid::new(102)]);

        match report.into_result() {
            Err(ControlError::PartialFailure { failed, total }) => {
                assert_eq!(failed, vec![Uid::new(102)]);
                assert_eq!(total, 3);
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn worker_pool_is_bounded() {
        let mut directory = MockDirectory::new();
        for uid in 1..=12 {
            directory = directory.with_user(user(uid, &format!("u{uid}"), &[], &[]));
        }
        let directory = Arc::new(directory);
        directory.set_write_delay(Duration::from_millis(20));

        let report = AccessReconciler::new(directory.clone(), Allowlist::default(), 3)
            .reconcile(&AccessPolicy::default())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.outcomes.len(), 12);
        assert!(directory.max_concurrent_writes() <= 3);
        assert!(directory.max_concurrent_writes() >= 2);
    }

    #[tokio::test]
    async fn grant_and_revoke_all_devices() {
        let directory = Arc::new(
            MockDirectory::new()
                .with_device(10)
                .with_device(11)
                .with_user(user(1, "itadmin", &[], &[]))
                .with_user(user(2, "alice", &[10], &[])),
        );
        let reconciler = reconciler(&directory, &[1]);

        let report = reconciler
            .grant_hardware_access(&DeviceSelection::All)
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(
            directory.user(Uid::new(2)).unwrap().hardware_access,
            [DeviceId::new(10), DeviceId::new(11)].into()
        );
        assert!(directory.user(Uid::new(1)).unwrap().hardware_access.is_empty());

        reconciler
            .revoke_hardware_access(&DeviceSelection::Only([DeviceId::new(10)].into()))
            .await
            .unwrap();
        assert_eq!(
            directory.user(Uid::new(2)).unwrap().hardware_access,
            [DeviceId::new(11)].into()
        );
    }

    #[tokio::test]
    async fn unchanged_users_are_not_written() {
        let directory = Arc::new(MockDirectory::new().with_user(user(2, "alice", &[10], &[])));

        let report = reconciler(&directory, &[])
            .grant_hardware_access(&DeviceSelection::Only([DeviceId::new(10)].into()))
            .await
            .unwrap();

        assert_eq!(report.outcomes[&Uid::new(2)], UserOutcome::Unchanged);
        assert!(directory.writes().is_empty());
    }

    #[tokio::test]
    async fn listing_failure_is_an_error() {
        let directory = Arc::new(MockDirectory::new());
        directory.fail_listing(fleetops_provider::ProviderError::transient("getUsers", "503"));

        let err = reconciler(&directory, &[])
            .reconcile(&AccessPolicy::default())
            .await
            .unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn disable_privileged_requires_force() {
        let directory = Arc::new(MockDirectory::new().with_user(user(1, "itadmin", &[], &[])));
        let reconciler = reconciler(&directory, &[1]);

        let err = reconciler.disable_user(Uid::new(1), false).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_state");
        assert!(directory.writes().is_empty());

        reconciler.disable_user(Uid::new(1), true).await.unwrap();
        assert_eq!(directory.status(Uid::new(1)), Some(UserStatus::Disabled));
    }

    fn new_user(username: &str, password: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: format!("{username}@example.com"),
            first_name: "Dana".into(),
            last_name: "Ops".into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn created_user_starts_without_access() {
        let directory = Arc::new(MockDirectory::new().with_user(user(2, "alice", &[10], &[])));
        let reconciler = reconciler(&directory, &[]);

        let created = reconciler
            .create_user(&new_user("dana", "Correct-Horse-7"))
            .await
            .unwrap();
        assert_eq!(created.uid, Uid::new(3));
        assert!(created.hardware_access.is_empty());
        assert!(created.portal_permissions.is_empty());

        let info = reconciler.user_info(created.uid).await.unwrap();
        assert_eq!(info.status, UserStatus::Active);
        assert_eq!(info.status_code, 1001);
    }

    #[tokio::test]
    async fn blank_new_user_fields_are_invalid_input() {
        let directory = Arc::new(MockDirectory::new());
        let reconciler = reconciler(&directory, &[]);

        for bad in [new_user("", "pw"), new_user("dana", " ")] {
            let err = reconciler.create_user(&bad).await.unwrap_err();
            assert_eq!(err.kind(), "invalid_input");
        }
        assert!(directory.writes().is_empty());
    }

    #[tokio::test]
    async fn duplicate_username_is_provider_fatal() {
        let directory = Arc::new(MockDirectory::new().with_user(user(2, "alice", &[], &[])));

        let err = reconciler(&directory, &[])
            .create_user(&new_user("alice", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "provider_fatal");
    }

    #[tokio::test]
    async fn user_info_reports_status_and_access() {
        let directory =
            Arc::new(MockDirectory::new().with_user(user(1, "itadmin", &[7], &["TICKET_VIEW"])));
        let reconciler = reconciler(&directory, &[1]);
        reconciler.disable_user(Uid::new(1), true).await.unwrap();

        let info = reconciler.user_info(Uid::new(1)).await.unwrap();
        assert_eq!(info.status, UserStatus::Disabled);
        assert_eq!(info.status_code, 1002);
        assert!(info.privileged);
        assert!(info.user.hardware_access.contains(&DeviceId::new(7)));

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["username"], "itadmin");
        assert_eq!(value["status_code"], 1002);

        let err = reconciler.user_info(Uid::new(9)).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn vpn_flags_are_written() {
        let directory = Arc::new(MockDirectory::new().with_user(user(2, "alice", &[], &[])));
        let access = VpnAccess {
            ssl: true,
            pptp: false,
        };

        reconciler(&directory, &[])
            .set_vpn_access(Uid::new(2), access)
            .await
            .unwrap();
        assert_eq!(
            directory.writes(),
            vec![DirectoryWrite::Vpn(Uid::new(2), access)]
        );
    }
}
