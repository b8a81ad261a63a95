//! Provider-facing data model and collaborator clients for fleetops.
//!
//! This crate defines what the control layer talks to:
//!
//! - [`ProviderClient`]: virtual guest listing, power and lifecycle calls,
//!   ordering and transaction status
//! - [`UserDirectory`]: portal accounts, hardware access and permissions
//! - [`HttpProviderClient`] / [`HttpUserDirectory`]: the REST implementations
//! - [`ProviderError`]: failures classified as transient or fatal
//!
//! # Example
//!
//! ```no_run
//! use fleetops_provider::{Credentials, HttpProviderClient, HttpProviderConfig, ProviderClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpProviderClient::new(
//!     &HttpProviderConfig::default(),
//!     Credentials::new("ops", "api-key"),
//! )?;
//!
//! for instance in client.list_instances().await? {
//!     println!("{} {} {}", instance.id, instance.hostname, instance.power_state);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature for the in-memory collaborators:
//!
//! ```ignore
//! use fleetops_provider::{MockProvider, PowerState, ProviderClient};
//!
//! let provider = MockProvider::new().with_instance(555, "vm-demo", PowerState::Stopped);
//! assert_eq!(provider.list_instances().await?.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod http;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod types;

pub use client::{ProviderClient, UserDirectory};
pub use error::{ProviderError, Result};
pub use http::{Credentials, HttpProviderClient, HttpProviderConfig, HttpUserDirectory};
pub use types::{
    Billing, Instance, NewUser, PowerState, ProvisioningTemplate, TransactionStatus, User,
    UserFilter, UserStatus, ValidationResult, VpnAccess,
};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{DirectoryWrite, MockCall, MockDirectory, MockProvider};
