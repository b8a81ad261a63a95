//! Core identifier types for fleetops.
//!
//! Provider identifiers are plain integers on the wire, but they name very
//! different things (virtual guests, portal users, hardware devices), so each
//! gets its own newtype.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw provider identifier.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Return the raw provider identifier.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|_| IdError::InvalidNumber(s.to_string()))
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

numeric_id! {
    /// Provider identifier of a virtual guest.
    ///
    /// This is the stable identity of an instance; hostnames are only labels.
    InstanceId
}

numeric_id! {
    /// Provider identifier of a portal user account.
    Uid
}

numeric_id! {
    /// Provider identifier of a hardware device a user may be granted access to.
    DeviceId
}

/// Key name of a portal permission, e.g. `SSL_VPN_ENABLED`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionKey(String);

impl PermissionKey {
    /// Create a permission key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or contains whitespace.
    pub fn new(key: impl Into<String>) -> Result<Self, IdError> {
        let key = key.into();
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(IdError::InvalidPermissionKey(key));
        }
        Ok(Self(key))
    }

    /// The permission that lets a user log in to the SSL VPN.
    #[must_use]
    pub fn ssl_vpn_enabled() -> Self {
        Self("SSL_VPN_ENABLED".to_string())
    }

    /// Return the key name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PermissionKey({})", self.0)
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PermissionKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PermissionKey {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PermissionKey> for String {
    fn from(key: PermissionKey) -> Self {
        key.0
    }
}

/// How a caller names the instance an operation targets.
///
/// Names are resolved to ids exactly once, before any state-changing call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// A hostname, matched exactly against the provider's instance list.
    ByName(String),
    /// An already-known provider id.
    ById(InstanceId),
}

impl Target {
    /// Target an instance by hostname.
    ///
    /// # Errors
    ///
    /// Returns an error if the hostname is empty.
    pub fn by_name(hostname: impl Into<String>) -> Result<Self, IdError> {
        let hostname = hostname.into();
        if hostname.trim().is_empty() {
            return Err(IdError::EmptyHostname);
        }
        Ok(Self::ByName(hostname))
    }

    /// Target an instance by provider id.
    #[must_use]
    pub const fn by_id(id: InstanceId) -> Self {
        Self::ById(id)
    }

    /// Returns the id if the target is already resolved.
    #[must_use]
    pub const fn id(&self) -> Option<InstanceId> {
        match self {
            Self::ById(id) => Some(*id),
            Self::ByName(_) => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByName(name) => write!(f, "{name}"),
            Self::ById(id) => write!(f, "#{id}"),
        }
    }
}

impl From<InstanceId> for Target {
    fn from(id: InstanceId) -> Self {
        Self::ById(id)
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not an unsigned integer.
    #[error("invalid numeric identifier: {0:?}")]
    InvalidNumber(String),

    /// The permission key is empty or contains whitespace.
    #[error("invalid permission key: {0:?}")]
    InvalidPermissionKey(String),

    /// A hostname target was empty.
    #[error("hostname must not be empty")]
    EmptyHostname,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_parse() {
        let id: InstanceId = "555".parse().unwrap();
        assert_eq!(id, InstanceId::new(555));
        assert_eq!(id.to_string(), "555");
        assert_eq!(format!("{id:?}"), "InstanceId(555)");
    }

    #[test]
    fn instance_id_rejects_names() {
        let result = "vm-demo".parse::<InstanceId>();
        assert!(matches!(result, Err(IdError::InvalidNumber(_))));
    }

    #[test]
    fn uid_serde_is_transparent() {
        let json = serde_json::to_string(&Uid::new(101)).unwrap();
        assert_eq!(json, "101");
        let parsed: Uid = serde_json::from_str("101").unwrap();
        assert_eq!(parsed, Uid::new(101));
    }

    #[test]
    fn permission_key_validation() {
        assert!(PermissionKey::new("SSL_VPN_ENABLED").is_ok());
        assert!(PermissionKey::new("").is_err());
        assert!(PermissionKey::new("SSL VPN").is_err());
    }

    #[test]
    fn permission_key_serde_validates() {
        let parsed: PermissionKey = serde_json::from_str("\"TICKET_VIEW\"").unwrap();
        assert_eq!(parsed.as_str(), "TICKET_VIEW");
        assert!(serde_json::from_str::<PermissionKey>("\"\"").is_err());
    }

    #[test]
    fn target_by_name_rejects_empty() {
        assert!(matches!(Target::by_name("  "), Err(IdError::EmptyHostname)));
        assert_eq!(
            Target::by_name("vm-demo").unwrap(),
            Target::ByName("vm-demo".to_string())
        );
    }

    #[test]
    fn target_display() {
        assert_eq!(Target::by_name("vm-demo").unwrap().to_string(), "vm-demo");
        assert_eq!(Target::by_id(InstanceId::new(555)).to_string(), "#555");
    }

    #[test]
    fn target_id() {
        assert_eq!(Target::from(InstanceId::new(7)).id(), Some(InstanceId::new(7)));
        assert_eq!(Target::by_name("web").unwrap().id(), None);
    }
}
