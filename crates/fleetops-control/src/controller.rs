//! Lifecycle controller.
//!
//! One entry point per verb, all funnelled through [`LifecycleController::execute`]:
//! resolve the target, take the instance's lock, check the current state,
//! issue the provider call, and optionally wait for the transaction.
//! Provider errors are returned as-is; nothing is retried here.

use std::collections::HashSet;
use std::sync::Arc;

use fleetops_core::{InstanceId, Target};
use fleetops_provider::{Instance, PowerState, ProviderClient, TransactionStatus};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{ControlError, Result};
use crate::lifecycle::{self, OperationKind, Plan};
use crate::locks::InstanceLocks;
use crate::monitor::TransactionMonitor;
use crate::resolver::NameResolver;
use crate::types::LifecycleOutcome;

/// Executes lifecycle operations against provider instances.
pub struct LifecycleController {
    provider: Arc<dyn ProviderClient>,
    resolver: NameResolver,
    monitor: TransactionMonitor,
    locks: InstanceLocks,
    cancelled: Mutex<HashSet<InstanceId>>,
    shutdown: CancellationToken,
}

impl LifecycleController {
    /// Create a controller.
    #[must_use]
    pub fn new(provider: Arc<dyn ProviderClient>, monitor: TransactionMonitor) -> Self {
        Self {
            resolver: NameResolver::new(Arc::clone(&provider)),
            provider,
            monitor,
            locks: InstanceLocks::new(),
            cancelled: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Use `token` to abort in-progress waits.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// The token that aborts in-progress waits.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The monitor used for waits.
    #[must_use]
    pub const fn monitor(&self) -> &TransactionMonitor {
        &self.monitor
    }

    /// The resolver used for hostname targets.
    #[must_use]
    pub const fn resolver(&self) -> &NameResolver {
        &self.resolver
    }

    /// Power the instance on. Succeeds without a provider call if it is
    /// already running.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn power_on(&self, target: &Target, wait: bool) -> Result<LifecycleOutcome> {
        self.execute(OperationKind::PowerOn, target, wait).await
    }

    /// Power the instance off. Succeeds without a provider call if it is
    /// already stopped.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn power_off(&self, target: &Target, wait: bool) -> Result<LifecycleOutcome> {
        self.execute(OperationKind::PowerOff, target, wait).await
    }

    /// Reboot a running instance.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn reboot(&self, target: &Target, wait: bool) -> Result<LifecycleOutcome> {
        self.execute(OperationKind::Reboot, target, wait).await
    }

    /// Reinstall the instance's operating system.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn reload(&self, target: &Target, wait: bool) -> Result<LifecycleOutcome> {
        self.execute(OperationKind::Reload, target, wait).await
    }

    /// Cancel the instance.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn cancel(&self, target: &Target) -> Result<LifecycleOutcome> {
        self.execute(OperationKind::Cancel, target, false).await
    }

    /// Run a lifecycle verb against a target.
    ///
    /// Operations on the same instance id run one at a time. With `wait`,
    /// asynchronous verbs block until the provider reports completion or the
    /// monitor's bound expires; a timeout is reported in the outcome, not as
    /// an error.
    ///
    /// # Errors
    ///
    /// - `NotFound` / `AmbiguousName` if the hostname does not resolve
    /// - `InvalidState` if the verb is not allowed in the current state
    /// - `ProviderTransient` / `ProviderFatal` if a provider call fails
    /// - `WaitAborted` if the cancellation token fires during a wait
    pub async fn execute(
        &self,
        kind: OperationKind,
        target: &Target,
        wait: bool,
    ) -> Result<LifecycleOutcome> {
        let id = self.resolver.resolve_target(target).await?;
        let _guard = self.locks.acquire(id).await;

        if self.is_tombstoned(id) {
            return Err(ControlError::invalid_state(
                target,
                format!("cannot {kind}: instance was cancelled"),
            ));
        }

        let instance = self
            .provider
            .get_instance(id)
            .await
            .map_err(|e| ControlError::provider(target, e))?;

        if lifecycle::plan(target, kind, instance.power_state)? == Plan::AlreadySatisfied {
            tracing::info!(
                instance_id = %id,
                operation = %kind,
                state = %instance.power_state,
                "Instance already in requested state"
            );
            return Ok(LifecycleOutcome {
                instance_id: id,
                hostname: instance.hostname,
                operation: kind,
                transaction: None,
                state: instance.power_state,
            });
        }

        if kind.is_destructive() {
            tracing::warn!(instance_id = %id, hostname = %instance.hostname, operation = %kind, "Issuing destructive operation");
        }

        self.dispatch(kind, id)
            .await
            .map_err(|e| ControlError::provider(target, e))?;

        tracing::info!(
            instance_id = %id,
            hostname = %instance.hostname,
            operation = %kind,
            "Provider accepted operation"
        );

        if kind == OperationKind::Cancel {
            self.cancelled.lock().insert(id);
            return Ok(LifecycleOutcome {
                instance_id: id,
                hostname: instance.hostname,
                operation: kind,
                transaction: None,
                state: PowerState::Cancelled,
            });
        }

        if !wait {
            return Ok(LifecycleOutcome {
                instance_id: id,
                hostname: instance.hostname,
                operation: kind,
                transaction: None,
                state: PowerState::Transitioning,
            });
        }

        let status = self.monitor.await_completion(id, &self.shutdown).await?;
        let (hostname, state) = if status == TransactionStatus::Ready {
            let settled = self
                .provider
                .get_instance(id)
                .await
                .map_err(|e| ControlError::provider(target, e))?;
            (settled.hostname, settled.power_state)
        } else {
            (instance.hostname, PowerState::Transitioning)
        };

        tracing::info!(instance_id = %id, operation = %kind, ?status, state = %state, "Operation finished");

        Ok(LifecycleOutcome {
            instance_id: id,
            hostname,
            operation: kind,
            transaction: Some(status),
            state,
        })
    }

    /// Current provider record of an instance.
    ///
    /// # Errors
    ///
    /// Returns resolution or provider errors.
    pub async fn status(&self, target: &Target) -> Result<Instance> {
        let id = self.resolver.resolve_target(target).await?;
        self.provider
            .get_instance(id)
            .await
            .map_err(|e| ControlError::provider(target, e))
    }

    /// Every instance on the account, sorted by hostname then id.
    ///
    /// # Errors
    ///
    /// Returns the classified provider error if listing fails.
    pub async fn list(&self) -> Result<Vec<Instance>> {
        let mut instances = self
            .provider
            .list_instances()
            .await
            .map_err(|e| ControlError::provider("account", e))?;
        instances.sort_by(|a, b| a.hostname.cmp(&b.hostname).then(a.id.cmp(&b.id)));
        Ok(instances)
    }

    fn is_tombstoned(&self, id: InstanceId) -> bool {
        self.cancelled.lock().contains(&id)
    }

    async fn dispatch(&self, kind: OperationKind, id: InstanceId) -> fleetops_provider::Result<()> {
        match kind {
            OperationKind::PowerOn => self.provider.power_on(id).await,
            OperationKind::PowerOff => self.provider.power_off(id).await,
            OperationKind::Reboot => self.provider.reboot(id).await,
            OperationKind::Reload => self.provider.reload(id).await,
            OperationKind::Cancel => self.provider.cancel(id).await,
        }
    }
}
