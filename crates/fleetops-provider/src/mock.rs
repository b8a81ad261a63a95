//! In-memory collaborators for tests.
//!
//! `MockProvider` keeps a map of guests and simulates provider transactions:
//! a lifecycle call puts the guest into `Transitioning`, and the guest lands
//! in its final state once `get_transaction_status` has reported `Pending`
//! the configured number of times. `MockDirectory` stores users and records
//! every write so tests can assert on what reached the provider.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetops_core::{DeviceId, InstanceId, PermissionKey, Uid};
use parking_lot::Mutex;

use crate::client::{ProviderClient, UserDirectory};
use crate::error::{ProviderError, Result};
use crate::types::{
    Instance, NewUser, PowerState, ProvisioningTemplate, TransactionStatus, User, UserFilter,
    UserStatus, ValidationResult, VpnAccess,
};

/// A provider call observed by [`MockProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MockCall {
    /// `list_instances`
    ListInstances,
    /// `get_instance(id)`
    GetInstance(InstanceId),
    /// `power_on(id)`
    PowerOn(InstanceId),
    /// `power_off(id)`
    PowerOff(InstanceId),
    /// `reboot(id)`
    Reboot(InstanceId),
    /// `reload(id)`
    Reload(InstanceId),
    /// `cancel(id)`
    Cancel(InstanceId),
    /// `get_transaction_status(id)`
    TransactionStatus(InstanceId),
    /// `create_instance` for a hostname
    Create(String),
    /// `validate_instance` for a hostname
    Validate(String),
}

struct Injected {
    call: MockCall,
    error: ProviderError,
    remaining: Option<u32>,
}

struct PendingTransaction {
    polls_left: Option<u32>,
    final_state: PowerState,
}

struct ProviderState {
    instances: BTreeMap<InstanceId, Instance>,
    pending: HashMap<InstanceId, PendingTransaction>,
    failures: Vec<Injected>,
    calls: Vec<MockCall>,
    polls_until_ready: Option<u32>,
    next_id: u64,
    reject_orders: Option<String>,
}

impl Default for ProviderState {
    fn default() -> Self {
        Self {
            instances: BTreeMap::new(),
            pending: HashMap::new(),
            failures: Vec::new(),
            calls: Vec::new(),
            polls_until_ready: Some(0),
            next_id: 1000,
            reject_orders: None,
        }
    }
}

impl ProviderState {
    /// Record a call and return the injected failure for it, if any.
    fn record(&mut self, call: MockCall) -> Result<()> {
        self.calls.push(call.clone());

        let Some(index) = self.failures.iter().position(|f| f.call == call) else {
            return Ok(());
        };
        let injected = &mut self.failures[index];
        let error = injected.error.clone();
        let exhausted = match injected.remaining.as_mut() {
            Some(n) => {
                *n -= 1;
                *n == 0
            }
            None => false,
        };
        if exhausted {
            self.failures.remove(index);
        }
        Err(error)
    }

    fn instance_mut(&mut self, id: InstanceId) -> Result<&mut Instance> {
        self.instances
            .get_mut(&id)
            .ok_or_else(|| ProviderError::not_found(format!("virtual guest {id}")))
    }

    fn begin(&mut self, id: InstanceId, final_state: PowerState) -> Result<()> {
        let polls_left = self.polls_until_ready;
        self.instance_mut(id)?.power_state = PowerState::Transitioning;
        self.pending.insert(
            id,
            PendingTransaction {
                polls_left,
                final_state,
            },
        );
        Ok(())
    }
}

/// An in-memory [`ProviderClient`].
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<ProviderState>,
}

impl MockProvider {
    /// Create an empty mock provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a guest, builder style.
    #[must_use]
    pub fn with_instance(self, id: u64, hostname: &str, state: PowerState) -> Self {
        self.insert_instance(Instance::new(InstanceId::new(id), hostname, state));
        self
    }

    /// Add or replace a guest.
    pub fn insert_instance(&self, instance: Instance) {
        self.state.lock().instances.insert(instance.id, instance);
    }

    /// Remove a guest, as if the provider stopped listing it.
    pub fn remove_instance(&self, id: InstanceId) {
        self.state.lock().instances.remove(&id);
    }

    /// Number of `Pending` answers a new transaction gives before `Ready`.
    ///
    /// `None` means the transaction never completes.
    pub fn set_polls_until_ready(&self, polls: Option<u32>) {
        self.state.lock().polls_until_ready = polls;
    }

    /// Fail every matching call with `error`.
    pub fn fail_on(&self, call: MockCall, error: ProviderError) {
        self.state.lock().failures.push(Injected {
            call,
            error,
            remaining: None,
        });
    }

    /// Fail the next `times` matching calls with `error`.
    pub fn fail_times(&self, call: MockCall, error: ProviderError, times: u32) {
        if times == 0 {
            return;
        }
        self.state.lock().failures.push(Injected {
            call,
            error,
            remaining: Some(times),
        });
    }

    /// Reject every order with `reason`: `validate_instance` reports it and
    /// `create_instance` fails with `OrderRejected`.
    pub fn reject_orders(&self, reason: impl Into<String>) {
        self.state.lock().reject_orders = Some(reason.into());
    }

    /// Current record of a guest.
    #[must_use]
    pub fn instance(&self, id: InstanceId) -> Option<Instance> {
        self.state.lock().instances.get(&id).cloned()
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls equal to `call`.
    #[must_use]
    pub fn count(&self, call: &MockCall) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut state = self.state.lock();
        state.record(MockCall::ListInstances)?;
        Ok(state.instances.values().cloned().collect())
    }

    async fn get_instance(&self, id: InstanceId) -> Result<Instance> {
        let mut state = self.state.lock();
        state.record(MockCall::GetInstance(id))?;
        state.instance_mut(id).cloned()
    }

    async fn power_on(&self, id: InstanceId) -> Result<()> {
        let mut state = self.state.lock();
        state.record(MockCall::PowerOn(id))?;
        state.begin(id, PowerState::Running)
    }

    async fn power_off(&self, id: InstanceId) -> Result<()> {
        let mut state = self.state.lock();
        state.record(MockCall::PowerOff(id))?;
        state.begin(id, PowerState::Stopped)
    }

    async fn reboot(&self, id: InstanceId) -> Result<()> {
        let mut state = self.state.lock();
        state.record(MockCall::Reboot(id))?;
        state.begin(id, PowerState::Running)
    }

    async fn reload(&self, id: InstanceId) -> Result<()> {
        let mut state = self.state.lock();
        state.record(MockCall::Reload(id))?;
        state.begin(id, PowerState::Running)
    }

    async fn cancel(&self, id: InstanceId) -> Result<()> {
        let mut state = self.state.lock();
        state.record(MockCall::Cancel(id))?;
        state.instance_mut(id)?.power_state = PowerState::Cancelled;
        state.pending.remove(&id);
        Ok(())
    }

    async fn create_instance(&self, template: &ProvisioningTemplate) -> Result<Instance> {
        let mut state = self.state.lock();
        state.record(MockCall::Create(template.hostname.clone()))?;
        if let Some(reason) = &state.reject_orders {
            return Err(ProviderError::OrderRejected {
                operation: "SoftLayer_Virtual_Guest::createObject".into(),
                message: reason.clone(),
            });
        }

        let id = InstanceId::new(state.next_id);
        state.next_id += 1;

        let mut instance = Instance::new(id, template.hostname.clone(), PowerState::Stopped);
        instance.domain = Some(template.domain.clone());
        instance.datacenter = Some(template.datacenter.clone());
        state.instances.insert(id, instance);
        state.begin(id, PowerState::Running)?;

        state.instance_mut(id).cloned()
    }

    async fn validate_instance(
        &self,
        template: &ProvisioningTemplate,
    ) -> Result<ValidationResult> {
        let mut state = self.state.lock();
        state.record(MockCall::Validate(template.hostname.clone()))?;

        let rejection = state.reject_orders.clone();
        Ok(ValidationResult {
            hostname: template.hostname.clone(),
            accepted: rejection.is_none(),
            hourly_cost: rejection.is_none().then_some(0.1),
            price_items: Vec::new(),
            rejection,
        })
    }

    async fn get_transaction_status(&self, id: InstanceId) -> Result<TransactionStatus> {
        let mut state = self.state.lock();
        state.record(MockCall::TransactionStatus(id))?;

        let Some(pending) = state.pending.get_mut(&id) else {
            return Ok(TransactionStatus::Ready);
        };
        match &mut pending.polls_left {
            None => return Ok(TransactionStatus::Pending),
            Some(n) if *n > 0 => {
                *n -= 1;
                return Ok(TransactionStatus::Pending);
            }
            Some(_) => {}
        }

        let final_state = pending.final_state;
        state.pending.remove(&id);
        if let Some(instance) = state.instances.get_mut(&id) {
            instance.power_state = final_state;
        }
        Ok(TransactionStatus::Ready)
    }
}

/// A write observed by [`MockDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryWrite {
    /// `set_hardware_access`
    HardwareAccess(Uid, BTreeSet<DeviceId>),
    /// `set_portal_permissions`
    PortalPermissions(Uid, BTreeSet<PermissionKey>),
    /// `set_user_status`
    Status(Uid, UserStatus),
    /// `set_vpn_access`
    Vpn(Uid, VpnAccess),
    /// `create_user`
    Created(Uid, String),
}

impl DirectoryWrite {
    /// The user the write targeted.
    #[must_use]
    pub const fn uid(&self) -> Uid {
        match self {
            Self::HardwareAccess(uid, _)
            | Self::PortalPermissions(uid, _)
            | Self::Status(uid, _)
            | Self::Vpn(uid, _)
            | Self::Created(uid, _) => *uid,
        }
    }
}

#[derive(Default)]
struct DirectoryState {
    users: BTreeMap<Uid, User>,
    statuses: HashMap<Uid, UserStatus>,
    vpn: HashMap<Uid, VpnAccess>,
    devices: BTreeSet<DeviceId>,
    permissions: BTreeSet<PermissionKey>,
    failing: BTreeSet<Uid>,
    writes: Vec<DirectoryWrite>,
    fail_listing: Option<ProviderError>,
}

/// An in-memory [`UserDirectory`].
#[derive(Default)]
pub struct MockDirectory {
    state: Mutex<DirectoryState>,
    write_delay: Mutex<Option<Duration>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

struct InFlight {
    counter: Arc<AtomicUsize>,
}

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user, builder style. The user's devices and permissions are
    /// added to the account catalogues.
    #[must_use]
    pub fn with_user(self, user: User) -> Self {
        self.insert_user(user);
        self
    }

    /// Add a device to the account, builder style.
    #[must_use]
    pub fn with_device(self, id: u64) -> Self {
        self.state.lock().devices.insert(DeviceId::new(id));
        self
    }

    /// Add or replace a user.
    pub fn insert_user(&self, user: User) {
        let mut state = self.state.lock();
        state.devices.extend(user.hardware_access.iter().copied());
        state
            .permissions
            .extend(user.portal_permissions.iter().cloned());
        state.users.insert(user.uid, user);
    }

    /// Make every write for `uid` fail with a transient error.
    pub fn fail_writes_for(&self, uid: Uid) {
        self.state.lock().failing.insert(uid);
    }

    /// Make `list_users` fail.
    pub fn fail_listing(&self, error: ProviderError) {
        self.state.lock().fail_listing = Some(error);
    }

    /// Sleep this long inside every write.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock() = Some(delay);
    }

    /// Current record of a user.
    #[must_use]
    pub fn user(&self, uid: Uid) -> Option<User> {
        self.state.lock().users.get(&uid).cloned()
    }

    /// Last status set for a user.
    #[must_use]
    pub fn status(&self, uid: Uid) -> Option<UserStatus> {
        self.state.lock().statuses.get(&uid).copied()
    }

    /// Last VPN flags set for a user.
    #[must_use]
    pub fn vpn(&self, uid: Uid) -> Option<VpnAccess> {
        self.state.lock().vpn.get(&uid).copied()
    }

    /// Every successful write, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<DirectoryWrite> {
        self.state.lock().writes.clone()
    }

    /// Highest number of writes observed running at once.
    #[must_use]
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn write(&self, write: DirectoryWrite) -> Result<()> {
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let uid = write.uid();
        if state.failing.contains(&uid) {
            return Err(ProviderError::transient(
                "SoftLayer_User_Customer::editObject",
                format!("injected failure for user {uid}"),
            ));
        }
        let Some(user) = state.users.get_mut(&uid) else {
            return Err(ProviderError::not_found(format!("user {uid}")));
        };

        match &write {
            DirectoryWrite::HardwareAccess(_, devices) => user.hardware_access.clone_from(devices),
            DirectoryWrite::PortalPermissions(_, permissions) => {
                user.portal_permissions.clone_from(permissions);
            }
            DirectoryWrite::Status(_, status) => {
                state.statuses.insert(uid, *status);
            }
            DirectoryWrite::Vpn(_, access) => {
                state.vpn.insert(uid, *access);
            }
            DirectoryWrite::Created(..) => {}
        }
        state.writes.push(write);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MockDirectory {
    async fn list_users(&self) -> Result<Vec<Uid>> {
        let state = self.state.lock();
        if let Some(error) = &state.fail_listing {
            return Err(error.clone());
        }
        Ok(state.users.keys().copied().collect())
    }

    async fn get_user(&self, uid: Uid) -> Result<User> {
        self.state
            .lock()
            .users
            .get(&uid)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("user {uid}")))
    }

    async fn get_user_status(&self, uid: Uid) -> Result<UserStatus> {
        let state = self.state.lock();
        if !state.users.contains_key(&uid) {
            return Err(ProviderError::not_found(format!("user {uid}")));
        }
        Ok(state
            .statuses
            .get(&uid)
            .copied()
            .unwrap_or(UserStatus::Active))
    }

    async fn create_user(&self, user: &NewUser) -> Result<User> {
        let mut state = self.state.lock();
        if state.users.values().any(|u| u.username == user.username) {
            return Err(ProviderError::fatal(
                "SoftLayer_User_Customer::createObject",
                format!("username {} is already in use", user.username),
            ));
        }
        let next = state.users.keys().next_back().map_or(1, |uid| uid.get() + 1);
        let created = User::new(Uid::new(next), user.username.clone(), user.email.clone());
        state.users.insert(created.uid, created.clone());
        state.statuses.insert(created.uid, UserStatus::Active);
        state
            .writes
            .push(DirectoryWrite::Created(created.uid, user.username.clone()));
        Ok(created)
    }

    async fn set_hardware_access(&self, uid: Uid, devices: &BTreeSet<DeviceId>) -> Result<()> {
        self.write(DirectoryWrite::HardwareAccess(uid, devices.clone()))
            .await
    }

    async fn set_portal_permissions(
        &self,
        uid: Uid,
        permissions: &BTreeSet<PermissionKey>,
    ) -> Result<()> {
        self.write(DirectoryWrite::PortalPermissions(uid, permissions.clone()))
            .await
    }

    async fn list_all_device_ids(&self) -> Result<BTreeSet<DeviceId>> {
        Ok(self.state.lock().devices.clone())
    }

    async fn list_all_permissions(&self) -> Result<BTreeSet<PermissionKey>> {
        Ok(self.state.lock().permissions.clone())
    }

    async fn find_users(&self, filter: &UserFilter) -> Result<Vec<User>> {
        let state = self.state.lock();
        Ok(state
            .users
            .values()
            .filter(|u| match filter {
                UserFilter::Email(email) => &u.email == email,
                UserFilter::Username(username) => &u.username == username,
            })
            .cloned()
            .collect())
    }

    async fn set_user_status(&self, uid: Uid, status: UserStatus) -> Result<()> {
        self.write(DirectoryWrite::Status(uid, status)).await
    }

    async fn set_vpn_access(&self, uid: Uid, access: VpnAccess) -> Result<()> {
        self.write(DirectoryWrite::Vpn(uid, access)).await
    }
}
