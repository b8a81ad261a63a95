//! Lifecycle control and access reconciliation for fleetops.
//!
//! This crate holds the decision logic that sits between an operator (or
//! automation) and the cloud provider:
//!
//! - [`NameResolver`]: hostname to instance id, failing loudly on ambiguity
//! - [`TransactionMonitor`]: bounded, cancellable waits for provider transactions
//! - [`LifecycleController`]: power-on, power-off, reboot, reload and cancel,
//!   one operation per instance at a time
//! - [`AccessReconciler`]: fleet-wide hardware access and portal permission
//!   baselines, exempting a privileged allowlist
//! - [`OrderValidator`]: fixed provisioning profiles, dry-run or billable create
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      fleetops CLI                             │
//! └──────────────────────────────────────────────────────────────┘
//!          │                      │                      │
//!          ▼                      ▼                      ▼
//! ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │ LifecycleControl │  │ AccessReconciler │  │  OrderValidator  │
//! │  ┌────────────┐  │  │  (worker pool)   │  │                  │
//! │  │NameResolver│  │  └──────────────────┘  └──────────────────┘
//! │  │ InstanceLk │  │           │                     │
//! │  │ TxMonitor  │  │           │                     │
//! │  └────────────┘  │           │                     │
//! └──────────────────┘           │                     │
//!          │                     ▼                     │
//!          │            ┌──────────────────┐           │
//!          │            │  UserDirectory   │           │
//!          │            └──────────────────┘           │
//!          ▼                                           ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       ProviderClient                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetops_control::{LifecycleController, PollSettings, TransactionMonitor};
//! use fleetops_core::Target;
//! use fleetops_provider::{Credentials, HttpProviderClient, HttpProviderConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(HttpProviderClient::new(
//!     &HttpProviderConfig::default(),
//!     Credentials::new("ops", "api-key"),
//! )?);
//! let monitor = TransactionMonitor::new(provider.clone(), PollSettings::default());
//! let controller = LifecycleController::new(provider, monitor);
//!
//! let outcome = controller.power_on(&Target::by_name("vm-demo")?, true).await?;
//! println!("{} is {}", outcome.hostname, outcome.state);
//! # Ok(())
//! # }
//! ```
//!
//! See the [`lifecycle`] module for the state machine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod access;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod locks;
pub mod monitor;
pub mod order;
pub mod resolver;
pub mod types;

pub use access::{
    AccessPolicy, AccessReconciler, Allowlist, DeviceSelection, ReconciliationReport, UserInfo,
    UserOutcome,
};
pub use controller::LifecycleController;
pub use error::{ControlError, Result};
pub use lifecycle::OperationKind;
pub use locks::InstanceLocks;
pub use monitor::{MAX_BACKOFF_FACTOR, MAX_WAIT_LIMIT, PollSettings, TransactionMonitor};
pub use order::{CreateOutcome, OrderValidator, Profile};
pub use resolver::NameResolver;
pub use types::{AccessConfig, ControlConfig, LifecycleOutcome, MonitorConfig, OrderConfig};

// Re-export commonly used types from dependencies for convenience
pub use fleetops_core::{DeviceId, InstanceId, PermissionKey, Target, Uid};
pub use fleetops_provider::{Instance, NewUser, PowerState, TransactionStatus};
