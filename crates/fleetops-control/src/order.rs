//! Provisioning profiles and order submission.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use fleetops_provider::{
    Billing, Instance, PowerState, ProviderClient, ProvisioningTemplate, TransactionStatus,
    ValidationResult,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ControlError, Result};
use crate::monitor::TransactionMonitor;
use crate::types::OrderConfig;

/// A fixed provisioning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Application server: 1 vCPU, 4 GiB.
    Webapp,
    /// Smallest footprint: 1 vCPU, 1 GiB.
    Minimal,
}

impl Profile {
    /// Every known profile.
    pub const ALL: [Self; 2] = [Self::Webapp, Self::Minimal];

    /// The profile key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webapp => "webapp",
            Self::Minimal => "minimal",
        }
    }

    /// Build the order for `hostname`.
    #[must_use]
    pub fn template(self, hostname: &str, config: &OrderConfig) -> ProvisioningTemplate {
        let (memory_mb, tag) = match self {
            Self::Webapp => (4096, "webapp VM"),
            Self::Minimal => (1024, "minimal VM"),
        };

        ProvisioningTemplate {
            hostname: hostname.to_string(),
            domain: config.domain.clone(),
            datacenter: config.datacenter.clone(),
            cpus: 1,
            memory_mb,
            os_code: config.os_code.clone(),
            disks_gb: vec![100, 25],
            tags: vec![tag.to_string()],
            billing: Billing::Hourly,
            dedicated: false,
            private_network_only: true,
            local_disk: true,
            ssh_key_ids: config.ssh_key_ids.clone(),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.as_str() == s)
            .ok_or_else(|| ControlError::UnknownProfile(s.to_string()))
    }
}

/// Result of a create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOutcome {
    /// The new instance as last observed.
    pub instance: Instance,
    /// Provisioning transaction status, or `None` when not awaited.
    pub transaction: Option<TransactionStatus>,
}

/// Validates and submits orders built from fixed profiles.
///
/// `validate` and `create` build the order the same way, so a passing
/// validation predicts the create outcome.
pub struct OrderValidator {
    provider: Arc<dyn ProviderClient>,
    monitor: TransactionMonitor,
    config: OrderConfig,
}

impl OrderValidator {
    /// Create a validator.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        monitor: TransactionMonitor,
        config: OrderConfig,
    ) -> Self {
        Self {
            provider,
            monitor,
            config,
        }
    }

    /// Build the order for `hostname` and `profile`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProfile` for an unknown key and `InvalidInput` for an
    /// empty hostname.
    pub fn template(&self, hostname: &str, profile: &str) -> Result<ProvisioningTemplate> {
        if hostname.trim().is_empty() {
            return Err(ControlError::InvalidInput("hostname must not be empty".into()));
        }
        let profile: Profile = profile.parse()?;
        Ok(profile.template(hostname, &self.config))
    }

    /// Dry-run the order. Creates nothing and bills nothing.
    ///
    /// # Errors
    ///
    /// Returns template errors, or the classified provider error if the
    /// provider cannot quote.
    pub async fn validate(&self, hostname: &str, profile: &str) -> Result<ValidationResult> {
        let template = self.template(hostname, profile)?;
        let result = self
            .provider
            .validate_instance(&template)
            .await
            .map_err(|e| ControlError::provider(hostname, e))?;

        tracing::info!(
            hostname,
            profile,
            accepted = result.accepted,
            hourly_cost = ?result.hourly_cost,
            "Validated order"
        );
        Ok(result)
    }

    /// Submit the order. Billable.
    ///
    /// With `wait`, block until the provisioning transaction completes or the
    /// monitor's bound expires.
    ///
    /// # Errors
    ///
    /// Returns template errors, the classified provider error, or
    /// `WaitAborted` if `cancel` fires during the wait.
    pub async fn create(
        &self,
        hostname: &str,
        profile: &str,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<CreateOutcome> {
        let template = self.template(hostname, profile)?;
        let mut instance = self
            .provider
            .create_instance(&template)
            .await
            .map_err(|e| ControlError::provider(hostname, e))?;

        tracing::info!(
            instance_id = %instance.id,
            hostname,
            profile,
            datacenter = %template.datacenter,
            "Ordered instance"
        );

        if !wait {
            return Ok(CreateOutcome {
                instance,
                transaction: None,
            });
        }

        let status = self.monitor.await_completion(instance.id, cancel).await?;
        if status == TransactionStatus::Ready {
            instance = self
                .provider
                .get_instance(instance.id)
                .await
                .map_err(|e| ControlError::provider(hostname, e))?;
        } else {
            instance.power_state = PowerState::Transitioning;
        }

        Ok(CreateOutcome {
            instance,
            transaction: Some(status),
        })
    }
}
