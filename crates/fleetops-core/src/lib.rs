//! Core types and utilities for fleetops.
//!
//! This crate provides the foundational types used throughout the fleetops tooling:
//!
//! - **Identifiers**: Strongly-typed ids for instances, users, devices and permissions
//! - **Targets**: The explicit by-name / by-id instance selector
//! - **Parse errors**: `IdError` for malformed identifiers
//!
//! # Example
//!
//! ```
//! use fleetops_core::{InstanceId, Target, Uid};
//!
//! let by_name = Target::by_name("vm-demo").unwrap();
//! let by_id = Target::by_id(InstanceId::new(555));
//! assert_ne!(by_name, by_id);
//!
//! let uid: Uid = "101".parse().unwrap();
//! assert_eq!(uid.get(), 101);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{DeviceId, IdError, InstanceId, PermissionKey, Target, Uid};
