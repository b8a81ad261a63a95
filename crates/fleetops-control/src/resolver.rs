//! Hostname to instance id resolution.

use std::sync::Arc;

use fleetops_core::{InstanceId, Target};
use fleetops_provider::ProviderClient;

use crate::error::{ControlError, Result};

/// Maps hostnames to provider instance ids.
///
/// Every lookup scans a fresh instance listing; nothing is cached.
#[derive(Clone)]
pub struct NameResolver {
    provider: Arc<dyn ProviderClient>,
}

impl NameResolver {
    /// Create a resolver over the given provider.
    #[must_use]
    pub fn new(provider: Arc<dyn ProviderClient>) -> Self {
        Self { provider }
    }

    /// Resolve a hostname by exact, case-sensitive match.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotFound` if no instance matches and
    /// `ControlError::AmbiguousName` if more than one does.
    pub async fn resolve(&self, hostname: &str) -> Result<InstanceId> {
        if hostname.trim().is_empty() {
            return Err(ControlError::InvalidInput("hostname must not be empty".into()));
        }

        let instances = self
            .provider
            .list_instances()
            .await
            .map_err(|e| ControlError::provider(hostname, e))?;

        let mut ids: Vec<InstanceId> = instances
            .iter()
            .filter(|i| i.hostname == hostname)
            .map(|i| i.id)
            .collect();
        ids.sort_unstable();

        match ids.as_slice() {
            [] => Err(ControlError::NotFound {
                target: hostname.to_string(),
            }),
            [id] => {
                tracing::debug!(hostname, instance_id = %id, "Resolved hostname");
                Ok(*id)
            }
            _ => {
                tracing::warn!(hostname, matches = ids.len(), "Hostname is ambiguous");
                Err(ControlError::AmbiguousName {
                    hostname: hostname.to_string(),
                    ids,
                })
            }
        }
    }

    /// Resolve a target to an id, looking names up through [`Self::resolve`].
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::resolve`] for `Target::ByName`.
    pub async fn resolve_target(&self, target: &Target) -> Result<InstanceId> {
        match target {
            Target::ById(id) => Ok(*id),
            Target::ByName(hostname) => self.resolve(hostname).await,
        }
    }
}
