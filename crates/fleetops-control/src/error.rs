//! Error types for fleetops control operations.
//!
//! Every variant names the instance, hostname or user it concerns so the
//! failure can be reported without extra context. Provider failures keep
//! their transient/fatal classification.

use std::time::Duration;

use fleetops_core::{IdError, InstanceId, Uid};
use fleetops_provider::ProviderError;
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// No instance or user matches the target.
    #[error("not found: {target}")]
    NotFound {
        /// Hostname, `#id` or user the lookup was for.
        target: String,
    },

    /// More than one instance carries the hostname.
    #[error("hostname {hostname:?} is ambiguous: matches instances {ids:?}")]
    AmbiguousName {
        /// The hostname that was looked up.
        hostname: String,
        /// Every matching instance id, ascending.
        ids: Vec<InstanceId>,
    },

    /// The operation is not allowed in the target's current state.
    #[error("invalid state for {target}: {reason}")]
    InvalidState {
        /// The instance or user the operation targeted.
        target: String,
        /// What made the operation invalid.
        reason: String,
    },

    /// The provider failed in a way the caller may retry.
    #[error("transient provider failure for {target}: {source}")]
    ProviderTransient {
        /// The instance or user the call targeted.
        target: String,
        /// The underlying provider error.
        source: ProviderError,
    },

    /// The provider rejected the call.
    #[error("provider failure for {target}: {source}")]
    ProviderFatal {
        /// The instance or user the call targeted.
        target: String,
        /// The underlying provider error.
        source: ProviderError,
    },

    /// The provider did not report completion within the wait bound.
    #[error("instance {instance_id} did not settle within {waited:?}")]
    Timeout {
        /// The instance being waited on.
        instance_id: InstanceId,
        /// How long the monitor waited.
        waited: Duration,
    },

    /// The provisioning profile key is not known.
    #[error("unknown provisioning profile: {0:?}")]
    UnknownProfile(String),

    /// A fleet-wide operation failed for at least one user.
    #[error("{} of {total} users failed: {failed:?}", failed.len())]
    PartialFailure {
        /// Users whose update failed, ascending.
        failed: Vec<Uid>,
        /// Number of users processed.
        total: usize,
    },

    /// The wait was cancelled before the provider reported completion.
    #[error("wait for instance {instance_id} was aborted")]
    WaitAborted {
        /// The instance being waited on.
        instance_id: InstanceId,
    },

    /// The caller supplied malformed input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ControlError {
    /// Wrap a provider error, keeping its classification.
    pub fn provider(target: impl ToString, source: ProviderError) -> Self {
        let target = target.to_string();
        match source {
            ProviderError::NotFound { .. } => Self::NotFound { target },
            ProviderError::Transient { .. } => Self::ProviderTransient { target, source },
            ProviderError::Fatal { .. }
            | ProviderError::OrderRejected { .. }
            | ProviderError::Decode { .. } => Self::ProviderFatal { target, source },
        }
    }

    /// Build an invalid-state error.
    pub fn invalid_state(target: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable snake_case label for the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AmbiguousName { .. } => "ambiguous_name",
            Self::InvalidState { .. } => "invalid_state",
            Self::ProviderTransient { .. } => "provider_transient",
            Self::ProviderFatal { .. } => "provider_fatal",
            Self::Timeout { .. } => "timeout",
            Self::UnknownProfile(_) => "unknown_profile",
            Self::PartialFailure { .. } => "partial_failure",
            Self::WaitAborted { .. } => "wait_aborted",
            Self::InvalidInput(_) => "invalid_input",
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ProviderTransient { .. } | Self::Timeout { .. } | Self::WaitAborted { .. }
        )
    }

    /// Process exit status the CLI reports for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidInput(_) | Self::UnknownProfile(_) => 2,
            Self::NotFound { .. } => 3,
            Self::AmbiguousName { .. } => 4,
            Self::InvalidState { .. } => 5,
            Self::ProviderTransient { .. } => 6,
            Self::ProviderFatal { .. } => 7,
            Self::Timeout { .. } | Self::WaitAborted { .. } => 8,
            Self::PartialFailure { .. } => 9,
        }
    }
}

impl From<IdError> for ControlError {
    fn from(err: IdError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}
